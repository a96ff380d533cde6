//! Inventory reservation service
//!
//! Owns the reservation state machine: the recurring expiry sweep, plus the
//! guarded confirm/cancel transitions used by checkout and reconciliation.
//! Every transition is a conditional update scoped by the expected prior
//! status, so racing writers settle rows at most once.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::checkout_session::{self, CheckoutStatus, Entity as CheckoutSession};
use crate::entities::inventory_reservation::{
    self, Entity as InventoryReservation, Model as ReservationModel, ReservationStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Result of one expiry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    /// Reservations transitioned pending -> expired this tick.
    pub expired_count: u64,
    /// Candidates left alone because a concurrent writer settled them first.
    pub skipped_count: u64,
    /// Timestamp the sweep ran at.
    pub swept_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ReservationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// One sweep tick.
    ///
    /// Finds reservations that are still `pending` past their lease, expires
    /// each one, and abandons the parent session if it has not progressed.
    /// A failure on one row logs and moves on; the row stays pending and
    /// overdue, so the next tick retries it.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepResult, ServiceError> {
        let now = Utc::now();

        let overdue = InventoryReservation::find()
            .filter(
                inventory_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()),
            )
            .filter(inventory_reservation::Column::ExpiresAt.lt(now))
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut expired_count = 0u64;
        let mut skipped_count = 0u64;

        for reservation in overdue {
            match self.reclaim_one(&reservation, now).await {
                Ok(true) => {
                    expired_count += 1;
                    info!(
                        reservation_id = %reservation.id,
                        session_id = %reservation.checkout_session_id,
                        "reservation lease reclaimed"
                    );
                    self.event_sender
                        .send_or_log(Event::ReservationExpired {
                            reservation_id: reservation.id,
                            session_id: reservation.checkout_session_id,
                        })
                        .await;
                }
                Ok(false) => {
                    skipped_count += 1;
                }
                Err(e) => {
                    warn!(
                        reservation_id = %reservation.id,
                        error = %e,
                        "failed to reclaim reservation, will retry next tick"
                    );
                }
            }
        }

        info!(expired_count, skipped_count, "completed reservation expiry sweep");

        Ok(SweepResult {
            expired_count,
            skipped_count,
            swept_at: now,
        })
    }

    /// Expires one reservation and abandons its session. Returns false when
    /// a concurrent writer settled the reservation between select and update.
    async fn reclaim_one(
        &self,
        reservation: &ReservationModel,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let db = &*self.db;

        let claimed = InventoryReservation::update_many()
            .col_expr(
                inventory_reservation::Column::Status,
                Expr::value(ReservationStatus::Expired.as_str()),
            )
            .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(now))
            .filter(inventory_reservation::Column::Id.eq(reservation.id))
            .filter(
                inventory_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()),
            )
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        if claimed.rows_affected == 0 {
            return Ok(false);
        }

        abandon_live_session(db, reservation.checkout_session_id, now).await?;

        Ok(true)
    }
}

/// Abandons a session still in a live status. Sessions the reconciler has
/// completed (or checkout has failed) keep their terminal state.
pub async fn abandon_live_session<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    let result = CheckoutSession::update_many()
        .col_expr(
            checkout_session::Column::Status,
            Expr::value(CheckoutStatus::Abandoned),
        )
        .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
        .filter(checkout_session::Column::Id.eq(session_id))
        .filter(checkout_session::Column::Status.is_in(CheckoutStatus::LIVE))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(result.rows_affected)
}

/// Confirms the session's pending reservations when an order reconciles.
/// Reservations already reclaimed by the sweeper stay expired; the guard
/// refuses to resurrect them.
pub async fn confirm_pending_for_session<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    let result = InventoryReservation::update_many()
        .col_expr(
            inventory_reservation::Column::Status,
            Expr::value(ReservationStatus::Confirmed.as_str()),
        )
        .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(now))
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(session_id))
        .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(result.rows_affected)
}

/// Expires the session's pending reservations one row at a time, returning
/// the rows this caller actually claimed. Used when checkout finds a stale
/// session still holding an idempotency key ahead of the sweeper.
pub async fn expire_pending_for_session<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<ReservationModel>, ServiceError> {
    let pending = InventoryReservation::find()
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(session_id))
        .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;

    let mut claimed = Vec::new();
    for reservation in pending {
        let result = InventoryReservation::update_many()
            .col_expr(
                inventory_reservation::Column::Status,
                Expr::value(ReservationStatus::Expired.as_str()),
            )
            .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(now))
            .filter(inventory_reservation::Column::Id.eq(reservation.id))
            .filter(
                inventory_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()),
            )
            .exec(db)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected > 0 {
            claimed.push(reservation);
        }
    }

    Ok(claimed)
}

/// Cancels the session's pending reservations when checkout fails before
/// redirect.
pub async fn cancel_pending_for_session<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, ServiceError> {
    let result = InventoryReservation::update_many()
        .col_expr(
            inventory_reservation::Column::Status,
            Expr::value(ReservationStatus::Cancelled.as_str()),
        )
        .col_expr(inventory_reservation::Column::UpdatedAt, Expr::value(now))
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(session_id))
        .filter(inventory_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
        .exec(db)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(result.rows_affected)
}

/// Spawns the sweep loop. The loop body runs a full tick, then sleeps, so
/// ticks never overlap; a slow sweep delays the next one instead of racing
/// it.
pub fn start_sweeper(
    service: ReservationService,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "starting reservation expiry sweeper"
        );
        loop {
            if let Err(e) = service.sweep_expired().await {
                error!("reservation sweep failed: {}", e);
            }
            sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_status_round_trips() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Expired,
            ReservationStatus::Cancelled,
        ] {
            assert_eq!(ReservationStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(ReservationStatus::from_str("released"), None);
    }

    #[test]
    fn sweep_result_serializes() {
        let result = SweepResult {
            expired_count: 3,
            skipped_count: 1,
            swept_at: Utc::now(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["expired_count"], 3);
        assert_eq!(value["skipped_count"], 1);
    }
}
