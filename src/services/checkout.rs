//! Checkout orchestration
//!
//! Turns a short-link click into a priced checkout session with an inventory
//! hold and a hosted redirect URL. While a session is live, repeat attempts
//! by the same visitor for the same link and variant replay it instead of
//! creating another; the database enforces this with a unique key over live
//! sessions, so concurrent attempts converge on a single winner.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::commerce::CheckoutUrlBuilder;
use crate::entities::checkout_session::{
    self, CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel,
};
use crate::entities::inventory_reservation::{
    self, Entity as InventoryReservation, Model as ReservationModel, ReservationStatus,
};
use crate::entities::product_variant::{
    self, Entity as ProductVariant, Model as ProductVariantModel,
};
use crate::entities::short_link::Model as ShortLinkModel;
use crate::errors::{is_unique_violation, ServiceError};
use crate::events::{Event, EventSender};
use crate::services::links::ShortLinkService;
use crate::services::pricing::{self, OfferRule, PriceQuote};
use crate::services::reservations;

/// Builds the deterministic key that makes checkout attempts idempotent.
pub fn derive_idempotency_key(visitor_id: &str, link_code: &str, variant_id: Uuid) -> String {
    format!("{}:{}:{}", visitor_id, link_code, variant_id)
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct StartCheckoutRequest {
    /// Stable visitor identity. Anonymous visitors omit it and get a fresh
    /// session on every attempt.
    #[validate(length(min = 1, max = 128))]
    pub visitor_id: Option<String>,
    pub variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// What a checkout attempt produced.
#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub session: CheckoutSessionModel,
    pub checkout_url: String,
    /// True when an earlier attempt's live session was replayed.
    pub is_existing: bool,
}

enum Created {
    Fresh(CheckoutSessionModel, ReservationModel),
    Raced(CheckoutSessionModel),
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    links: ShortLinkService,
    url_builder: Arc<dyn CheckoutUrlBuilder>,
    event_sender: Arc<EventSender>,
    session_ttl: Duration,
    reservation_ttl: Duration,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        links: ShortLinkService,
        url_builder: Arc<dyn CheckoutUrlBuilder>,
        event_sender: Arc<EventSender>,
        session_ttl: Duration,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            db,
            links,
            url_builder,
            event_sender,
            session_ttl,
            reservation_ttl,
        }
    }

    /// Runs one checkout attempt end to end.
    ///
    /// Resolves the link, prices the cart, places the inventory hold, and
    /// returns the hosted redirect URL. A repeat attempt with the same
    /// visitor, link, and variant replays the live session it created
    /// earlier, URL included, without touching inventory again.
    #[instrument(skip(self, request), fields(code = %code, variant_id = %request.variant_id))]
    pub async fn start_checkout(
        &self,
        code: &str,
        request: StartCheckoutRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        request.validate()?;

        let (link, offer) = self.links.resolve_for_checkout(code).await?;
        let variant = self.load_variant(&link, request.variant_id).await?;

        self.links.record_click(link.id).await;

        let visitor_id = match &request.visitor_id {
            Some(visitor_id) => visitor_id.clone(),
            None => format!("anon-{}", Uuid::new_v4()),
        };
        let key = derive_idempotency_key(&visitor_id, &link.code, variant.id);

        if let Some(existing) = self.find_live_session(&key, Utc::now()).await? {
            info!(session_id = %existing.id, "replaying live checkout session");
            let (session, checkout_url) = self.ensure_redirect_url(existing, &variant).await?;
            return Ok(CheckoutOutcome {
                session,
                checkout_url,
                is_existing: true,
            });
        }

        let rule = OfferRule::from_offer(&offer)?;
        let quote = pricing::quote(variant.unit_price, rule, request.quantity);

        self.check_availability(&variant, request.quantity).await?;

        let created = self
            .create_session_with_hold(&link, &variant, &visitor_id, &key, request.quantity, &quote)
            .await?;

        let (session, reservation) = match created {
            Created::Fresh(session, reservation) => (session, reservation),
            Created::Raced(existing) => {
                info!(session_id = %existing.id, "lost checkout insert race, replaying winner");
                let (session, checkout_url) = self.ensure_redirect_url(existing, &variant).await?;
                return Ok(CheckoutOutcome {
                    session,
                    checkout_url,
                    is_existing: true,
                });
            }
        };

        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                session_id: session.id,
                short_link_id: link.id,
                offer_id: link.offer_id,
                variant_id: variant.id,
                quantity: session.quantity,
                total: session.total,
                currency: session.currency.clone(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::ReservationCreated {
                reservation_id: reservation.id,
                session_id: session.id,
                variant_id: reservation.variant_id,
                quantity: reservation.quantity,
                expires_at: reservation.expires_at,
            })
            .await;

        let (session, checkout_url) = self.ensure_redirect_url(session, &variant).await?;
        Ok(CheckoutOutcome {
            session,
            checkout_url,
            is_existing: false,
        })
    }

    async fn load_variant(
        &self,
        link: &ShortLinkModel,
        variant_id: Uuid,
    ) -> Result<ProductVariantModel, ServiceError> {
        ProductVariant::find_by_id(variant_id)
            .filter(product_variant::Column::OfferId.eq(link.offer_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Variant {} is not part of offer {}",
                    variant_id, link.offer_id
                ))
            })
    }

    async fn find_live_session(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CheckoutSessionModel>, ServiceError> {
        CheckoutSession::find()
            .filter(checkout_session::Column::IdempotencyKey.eq(key))
            .filter(checkout_session::Column::Status.is_in(CheckoutStatus::LIVE))
            .filter(checkout_session::Column::ExpiresAt.gt(now))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Available-to-promise accounting: on-hand minus still-live holds.
    async fn check_availability(
        &self,
        variant: &ProductVariantModel,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let holds = InventoryReservation::find()
            .filter(inventory_reservation::Column::VariantId.eq(variant.id))
            .filter(
                inventory_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()),
            )
            .filter(inventory_reservation::Column::ExpiresAt.gt(now))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let reserved: i64 = holds.iter().map(|r| i64::from(r.quantity)).sum();
        let available = i64::from(variant.inventory_quantity) - reserved;

        if i64::from(quantity) > available {
            return Err(ServiceError::InsufficientInventory(format!(
                "Variant {} has {} available, requested {}",
                variant.id,
                available.max(0),
                quantity
            )));
        }

        Ok(())
    }

    /// Inserts the session and its hold, handling the idempotency-key race.
    ///
    /// A unique violation means another writer holds the key. Usually that
    /// writer is a live session worth replaying; when it is a live-status
    /// session past its deadline that the sweeper has not visited yet, this
    /// reclaims it inline and tries the insert once more.
    async fn create_session_with_hold(
        &self,
        link: &ShortLinkModel,
        variant: &ProductVariantModel,
        visitor_id: &str,
        key: &str,
        quantity: i32,
        quote: &PriceQuote,
    ) -> Result<Created, ServiceError> {
        if let Some((session, reservation)) = self
            .try_insert(link, variant, visitor_id, key, quantity, quote)
            .await?
        {
            return Ok(Created::Fresh(session, reservation));
        }

        if let Some(existing) = self.find_live_session(key, Utc::now()).await? {
            return Ok(Created::Raced(existing));
        }

        let now = Utc::now();
        if self.reclaim_stale_holder(key, now).await? {
            if let Some((session, reservation)) = self
                .try_insert(link, variant, visitor_id, key, quantity, quote)
                .await?
            {
                return Ok(Created::Fresh(session, reservation));
            }
            if let Some(existing) = self.find_live_session(key, Utc::now()).await? {
                return Ok(Created::Raced(existing));
            }
        }

        Err(ServiceError::Conflict(format!(
            "Checkout for key {} is being settled by another request",
            key
        )))
    }

    /// One guarded attempt to insert the session plus its reservation.
    /// Returns None when the idempotency key is already taken.
    async fn try_insert(
        &self,
        link: &ShortLinkModel,
        variant: &ProductVariantModel,
        visitor_id: &str,
        key: &str,
        quantity: i32,
        quote: &PriceQuote,
    ) -> Result<Option<(CheckoutSessionModel, ReservationModel)>, ServiceError> {
        let now = Utc::now();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start checkout transaction");
            ServiceError::db_error(e)
        })?;

        let session = checkout_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            idempotency_key: Set(key.to_string()),
            short_link_id: Set(link.id),
            offer_id: Set(link.offer_id),
            variant_id: Set(variant.id),
            visitor_id: Set(visitor_id.to_string()),
            status: Set(CheckoutStatus::Pending),
            quantity: Set(quantity),
            unit_price: Set(quote.unit_price),
            discounted_unit_price: Set(quote.discounted_unit_price),
            subtotal: Set(quote.subtotal),
            discount_total: Set(quote.discount_total),
            total: Set(quote.total),
            currency: Set(variant.currency.clone()),
            external_checkout_url: Set(None),
            expires_at: Set(now + self.session_ttl),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        };

        let session = match session.insert(&txn).await {
            Ok(model) => model,
            Err(e) if is_unique_violation(&e) => return Ok(None),
            Err(e) => {
                error!(error = %e, "failed to insert checkout session");
                return Err(ServiceError::db_error(e));
            }
        };

        let reservation = inventory_reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            checkout_session_id: Set(session.id),
            variant_id: Set(variant.id),
            quantity: Set(quantity),
            status: Set(ReservationStatus::Pending.as_str().to_string()),
            expires_at: Set(now + self.reservation_ttl),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let reservation = match reservation.insert(&txn).await {
            Ok(model) => model,
            Err(e) => {
                error!(error = %e, session_id = %session.id, "failed to insert inventory reservation");
                return Err(ServiceError::db_error(e));
            }
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, session_id = %session.id, "failed to commit checkout transaction");
            ServiceError::db_error(e)
        })?;

        info!(
            session_id = %session.id,
            reservation_id = %reservation.id,
            total = session.total,
            "checkout session created"
        );

        Ok(Some((session, reservation)))
    }

    /// Settles a live-status session whose deadline has passed, ahead of the
    /// sweeper, so its idempotency key frees up. Same transitions the sweeper
    /// applies, same guards.
    async fn reclaim_stale_holder(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let db = &*self.db;

        let stale = CheckoutSession::find()
            .filter(checkout_session::Column::IdempotencyKey.eq(key))
            .filter(checkout_session::Column::Status.is_in(CheckoutStatus::LIVE))
            .filter(checkout_session::Column::ExpiresAt.lte(now))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        let Some(stale) = stale else {
            return Ok(false);
        };

        info!(session_id = %stale.id, "reclaiming stale session holding the idempotency key");

        let claimed = reservations::expire_pending_for_session(db, stale.id, now).await?;
        reservations::abandon_live_session(db, stale.id, now).await?;

        for reservation in claimed {
            self.event_sender
                .send_or_log(Event::ReservationExpired {
                    reservation_id: reservation.id,
                    session_id: reservation.checkout_session_id,
                })
                .await;
        }

        Ok(true)
    }

    /// Secures the redirect URL on the session and marks it redirected.
    ///
    /// The URL write is guarded on the column still being NULL, so exactly
    /// one racer stores a URL and everyone re-reads whatever won. Builder
    /// failures fail the session and release its hold so the key frees up
    /// immediately.
    async fn ensure_redirect_url(
        &self,
        session: CheckoutSessionModel,
        variant: &ProductVariantModel,
    ) -> Result<(CheckoutSessionModel, String), ServiceError> {
        let db = &*self.db;

        if session.external_checkout_url.is_none() {
            match self
                .url_builder
                .build_checkout_url(&variant.external_id, session.quantity, session.id)
                .await
            {
                Ok(url) => {
                    CheckoutSession::update_many()
                        .col_expr(
                            checkout_session::Column::ExternalCheckoutUrl,
                            Expr::value(url),
                        )
                        .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
                        .filter(checkout_session::Column::Id.eq(session.id))
                        .filter(checkout_session::Column::ExternalCheckoutUrl.is_null())
                        .exec(db)
                        .await
                        .map_err(ServiceError::db_error)?;
                }
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "checkout url build failed, failing session");
                    self.fail_session(session.id).await?;
                    return Err(e);
                }
            }
        }

        let now = Utc::now();
        CheckoutSession::update_many()
            .col_expr(
                checkout_session::Column::Status,
                Expr::value(CheckoutStatus::Redirected),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
            .filter(checkout_session::Column::Id.eq(session.id))
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::Pending))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        let stored = CheckoutSession::find_by_id(session.id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Checkout session {} not found", session.id))
            })?;
        let checkout_url = stored.external_checkout_url.clone().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "checkout session {} has no redirect url after convergence",
                stored.id
            ))
        })?;

        Ok((stored, checkout_url))
    }

    /// Fails a session that cannot produce a redirect URL and releases its
    /// hold.
    async fn fail_session(&self, session_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let now = Utc::now();

        CheckoutSession::update_many()
            .col_expr(
                checkout_session::Column::Status,
                Expr::value(CheckoutStatus::Failed),
            )
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
            .filter(checkout_session::Column::Id.eq(session_id))
            .filter(checkout_session::Column::Status.is_in(CheckoutStatus::LIVE))
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        reservations::cancel_pending_for_session(db, session_id, now).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_colon_joined() {
        let variant_id = Uuid::parse_str("6ba7b810-9dad-11d1-80b4-00c04fd430c8").unwrap();
        assert_eq!(
            derive_idempotency_key("visitor-1", "abc123", variant_id),
            "visitor-1:abc123:6ba7b810-9dad-11d1-80b4-00c04fd430c8"
        );
    }

    #[test]
    fn quantity_must_be_positive() {
        let request = StartCheckoutRequest {
            visitor_id: Some("v".repeat(12)),
            variant_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert!(request.validate().is_err());

        let request = StartCheckoutRequest {
            quantity: 1,
            ..request
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn empty_visitor_id_is_rejected() {
        let request = StartCheckoutRequest {
            visitor_id: Some(String::new()),
            variant_id: Uuid::new_v4(),
            quantity: 1,
        };
        assert!(request.validate().is_err());
    }
}
