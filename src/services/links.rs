use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::offer::{Entity as Offer, OfferStatus};
use crate::entities::short_link::{self, Entity as ShortLink};
use crate::entities::{OfferModel, ShortLinkModel};
use crate::errors::{is_unique_violation, ServiceError};

const GENERATED_CODE_LENGTH: usize = 8;
const CODE_COLLISION_RETRIES: usize = 3;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateLinkRequest {
    pub offer_id: Uuid,
    pub creator_id: Uuid,
    /// Vanity code; generated when absent.
    #[validate(length(min = 4, max = 32))]
    pub code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub max_clicks: Option<i32>,
}

/// Short link management and checkout-precondition checks.
#[derive(Clone)]
pub struct ShortLinkService {
    db: Arc<DatabaseConnection>,
}

impl ShortLinkService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a short link pointing at an existing offer. Generated codes
    /// retry on collision; a caller-supplied code that collides is a conflict.
    #[instrument(skip(self, request), fields(offer_id = %request.offer_id))]
    pub async fn create_link(
        &self,
        request: CreateLinkRequest,
    ) -> Result<ShortLinkModel, ServiceError> {
        request.validate()?;

        Offer::find_by_id(request.offer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Offer {} not found", request.offer_id))
            })?;

        let supplied_code = request.code.is_some();
        let mut attempts = 0;

        loop {
            let code = request
                .code
                .clone()
                .unwrap_or_else(generate_code);
            let now = Utc::now();

            let link = short_link::ActiveModel {
                id: Set(Uuid::new_v4()),
                code: Set(code.clone()),
                offer_id: Set(request.offer_id),
                creator_id: Set(request.creator_id),
                revoked: Set(false),
                expires_at: Set(request.expires_at),
                max_clicks: Set(request.max_clicks),
                click_count: Set(0),
                created_at: Set(now),
                updated_at: Set(now),
            };

            match link.insert(&*self.db).await {
                Ok(model) => {
                    info!(link_id = %model.id, code = %model.code, "short link created");
                    return Ok(model);
                }
                Err(e) if is_unique_violation(&e) => {
                    if supplied_code {
                        return Err(ServiceError::Conflict(format!(
                            "Link code {} already in use",
                            code
                        )));
                    }
                    attempts += 1;
                    if attempts >= CODE_COLLISION_RETRIES {
                        error!("code generation kept colliding after {} attempts", attempts);
                        return Err(ServiceError::InternalError(
                            "could not allocate a unique link code".to_string(),
                        ));
                    }
                    warn!(code = %code, "generated link code collided, retrying");
                }
                Err(e) => return Err(ServiceError::DatabaseError(e)),
            }
        }
    }

    /// Flips the revocation flag; idempotent.
    #[instrument(skip(self))]
    pub async fn revoke_link(&self, link_id: Uuid) -> Result<ShortLinkModel, ServiceError> {
        let link = ShortLink::find_by_id(link_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Short link {} not found", link_id)))?;

        if link.revoked {
            return Ok(link);
        }

        let mut active: short_link::ActiveModel = link.into();
        active.revoked = Set(true);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(link_id = %updated.id, code = %updated.code, "short link revoked");
        Ok(updated)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<ShortLinkModel>, ServiceError> {
        let link = ShortLink::find()
            .filter(short_link::Column::Code.eq(code))
            .one(&*self.db)
            .await?;
        Ok(link)
    }

    /// Loads the link and its offer, applying every checkout precondition.
    /// Fails closed with a typed error before the orchestrator writes anything.
    pub async fn resolve_for_checkout(
        &self,
        code: &str,
    ) -> Result<(ShortLinkModel, OfferModel), ServiceError> {
        let now = Utc::now();

        let link = self
            .get_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Short link {} not found", code)))?;
        ensure_link_checkoutable(&link, now)?;

        let offer = Offer::find_by_id(link.offer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Offer {} not found", link.offer_id)))?;
        ensure_offer_active(&offer, now)?;

        Ok((link, offer))
    }

    /// Best-effort click accounting; failures are logged, never surfaced.
    pub async fn record_click(&self, link_id: Uuid) {
        let result = ShortLink::update_many()
            .col_expr(
                short_link::Column::ClickCount,
                Expr::col(short_link::Column::ClickCount).add(1),
            )
            .col_expr(short_link::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(short_link::Column::Id.eq(link_id))
            .exec(&*self.db)
            .await;

        if let Err(e) = result {
            warn!(link_id = %link_id, "failed to record click: {}", e);
        }
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_CODE_LENGTH)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect()
}

pub(crate) fn ensure_link_checkoutable(
    link: &ShortLinkModel,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if link.revoked {
        return Err(ServiceError::LinkRevoked(link.code.clone()));
    }
    if let Some(expires_at) = link.expires_at {
        if expires_at <= now {
            return Err(ServiceError::LinkExpired(link.code.clone()));
        }
    }
    // A spent click budget reads as expiry to the visitor.
    if let Some(max_clicks) = link.max_clicks {
        if link.click_count >= max_clicks {
            return Err(ServiceError::LinkExpired(format!(
                "{} click budget spent",
                link.code
            )));
        }
    }
    Ok(())
}

pub(crate) fn ensure_offer_active(
    offer: &OfferModel,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    if offer.status != OfferStatus::Active {
        return Err(ServiceError::OfferNotActive(format!(
            "Offer {} is {:?}",
            offer.id, offer.status
        )));
    }
    if let Some(starts_at) = offer.starts_at {
        if starts_at > now {
            return Err(ServiceError::OfferNotActive(format!(
                "Offer {} has not started",
                offer.id
            )));
        }
    }
    if let Some(ends_at) = offer.ends_at {
        if ends_at < now {
            return Err(ServiceError::OfferExpired(format!(
                "Offer {} ended at {}",
                offer.id, ends_at
            )));
        }
    }
    Ok(())
}
