//! Order reconciliation
//!
//! Consumes order notifications pushed by the commerce backend, recording
//! each external order exactly once per connection and settling the checkout
//! session it came from. Notifications arrive at-least-once and out of
//! order; the composite unique index on `(connection_id, external_order_id)`
//! makes redelivery collapse onto the first recording, and every state
//! transition is guarded by the expected prior status.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::checkout_session::{
    self, CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel,
};
use crate::entities::order::{self, Entity as Order, Model as OrderModel};
use crate::errors::{is_unique_violation, ServiceError};
use crate::events::{Event, EventSender};
use crate::services::reservations;

/// One order notification from the commerce backend.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderNotification {
    #[validate(length(min = 1, max = 128))]
    pub external_order_id: String,
    #[validate(length(min = 1, max = 64))]
    pub order_number: String,
    /// Order total in minor currency units.
    pub total_price: i64,
    #[validate(length(min = 3, max = 8))]
    pub currency: String,
    /// Cart note echoed by the backend. Checkout writes the session id here,
    /// which is what lets a purchase be attributed back to its link.
    pub note: Option<String>,
    #[serde(default)]
    pub line_items: Vec<NotificationLineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationLineItem {
    pub variant_id: String,
    pub quantity: i32,
    pub price: i64,
}

/// What reconciling one notification produced.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub order: OrderModel,
    /// True when this notification had been reconciled before.
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct OrderReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderReconciliationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Reconciles one notification: dedup, attribute, record, settle.
    ///
    /// Duplicates return the original row untouched, with no second event.
    /// When the note names a session this recorded order completes it, but
    /// only from a live status; a session the sweeper already abandoned
    /// keeps the attribution and stays abandoned, and its expired hold is
    /// never resurrected.
    #[instrument(skip(self, notification), fields(connection_id = %connection_id, external_order_id = %notification.external_order_id))]
    pub async fn reconcile(
        &self,
        connection_id: Uuid,
        notification: OrderNotification,
    ) -> Result<ReconcileOutcome, ServiceError> {
        notification.validate()?;

        if let Some(existing) = self
            .find_existing(connection_id, &notification.external_order_id)
            .await?
        {
            info!(order_id = %existing.id, "order notification already reconciled");
            self.heal_finalize(&existing).await?;
            return Ok(ReconcileOutcome {
                order: existing,
                duplicate: true,
            });
        }

        let session = self.attribute_session(notification.note.as_deref()).await?;
        let now = Utc::now();

        let line_items = if notification.line_items.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&notification.line_items).map_err(|e| {
                    ServiceError::BadRequest(format!("order line items are not serializable: {}", e))
                })?,
            )
        };

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start reconciliation transaction");
            ServiceError::db_error(e)
        })?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            connection_id: Set(connection_id),
            external_order_id: Set(notification.external_order_id.clone()),
            order_number: Set(notification.order_number.clone()),
            total: Set(notification.total_price),
            currency: Set(notification.currency.clone()),
            checkout_session_id: Set(session.as_ref().map(|s| s.id)),
            short_link_id: Set(session.as_ref().map(|s| s.short_link_id)),
            note: Set(notification.note.clone()),
            line_items: Set(line_items),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let order = match order.insert(&txn).await {
            Ok(model) => model,
            Err(e) if is_unique_violation(&e) => {
                drop(txn);
                let existing = self
                    .find_existing(connection_id, &notification.external_order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Conflict(
                            "Order notification is being reconciled elsewhere".to_string(),
                        )
                    })?;
                info!(order_id = %existing.id, "lost order insert race, treating as duplicate");
                self.heal_finalize(&existing).await?;
                return Ok(ReconcileOutcome {
                    order: existing,
                    duplicate: true,
                });
            }
            Err(e) => {
                error!(error = %e, "failed to record order");
                return Err(ServiceError::db_error(e));
            }
        };

        let session_completed = match &session {
            Some(session) => finalize_session(&txn, session.id, now).await?,
            None => false,
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "failed to commit reconciliation transaction");
            ServiceError::db_error(e)
        })?;

        if let Some(session) = &session {
            if session_completed {
                info!(session_id = %session.id, "checkout session completed by order");
            } else {
                info!(
                    session_id = %session.id,
                    status = ?session.status,
                    "attributed session was already settled, left as-is"
                );
            }
        }

        self.event_sender
            .send_or_log(Event::PurchaseCompleted {
                order_id: order.id,
                session_id: order.checkout_session_id,
                short_link_id: order.short_link_id,
                total: order.total,
                currency: order.currency.clone(),
            })
            .await;

        info!(
            order_id = %order.id,
            attributed = session.is_some(),
            "order reconciled"
        );

        Ok(ReconcileOutcome {
            order,
            duplicate: false,
        })
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn find_existing(
        &self,
        connection_id: Uuid,
        external_order_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Order::find()
            .filter(order::Column::ConnectionId.eq(connection_id))
            .filter(order::Column::ExternalOrderId.eq(external_order_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Resolves the note back to a checkout session, if it names one.
    /// Unattributable notes are normal: organic storefront orders arrive on
    /// the same webhook.
    async fn attribute_session(
        &self,
        note: Option<&str>,
    ) -> Result<Option<CheckoutSessionModel>, ServiceError> {
        let Some(note) = note else {
            return Ok(None);
        };

        let Ok(session_id) = Uuid::parse_str(note.trim()) else {
            debug!("order note is not a session id, skipping attribution");
            return Ok(None);
        };

        CheckoutSession::find_by_id(session_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Re-applies the guarded finalize for an order that was recorded
    /// earlier, covering a crash between recording and settling. The guards
    /// make it a no-op once everything settled.
    async fn heal_finalize(&self, order: &OrderModel) -> Result<(), ServiceError> {
        if let Some(session_id) = order.checkout_session_id {
            finalize_session(&*self.db, session_id, Utc::now()).await?;
        }
        Ok(())
    }
}

/// Completes the session and confirms its hold, each write guarded by the
/// expected prior status. Returns true when the session transitioned here
/// rather than having been settled already.
async fn finalize_session<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, ServiceError> {
    let completed = CheckoutSession::update_many()
        .col_expr(
            checkout_session::Column::Status,
            Expr::value(CheckoutStatus::Completed),
        )
        .col_expr(checkout_session::Column::CompletedAt, Expr::value(now))
        .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
        .filter(checkout_session::Column::Id.eq(session_id))
        .filter(checkout_session::Column::Status.is_in(CheckoutStatus::LIVE))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;

    reservations::confirm_pending_for_session(db, session_id, now).await?;

    Ok(completed.rows_affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> OrderNotification {
        OrderNotification {
            external_order_id: "5001".to_string(),
            order_number: "#1001".to_string(),
            total_price: 2399,
            currency: "USD".to_string(),
            note: None,
            line_items: vec![],
        }
    }

    #[test]
    fn notification_requires_order_identifiers() {
        let mut bad = notification();
        bad.external_order_id = String::new();
        assert!(bad.validate().is_err());

        let mut bad = notification();
        bad.order_number = String::new();
        assert!(bad.validate().is_err());

        assert!(notification().validate().is_ok());
    }

    #[test]
    fn line_items_default_to_empty_on_deserialize() {
        let parsed: OrderNotification = serde_json::from_str(
            r##"{"external_order_id":"5001","order_number":"#1001","total_price":2399,"currency":"USD"}"##,
        )
        .unwrap();
        assert!(parsed.line_items.is_empty());
        assert!(parsed.note.is_none());
    }
}
