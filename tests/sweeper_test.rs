//! Integration tests for the reservation expiry sweeper.
//!
//! The sweeper reclaims pending holds past their deadline and abandons the
//! sessions that held them. Everything it touches is guarded, so settled
//! rows and live deadlines must come through a sweep untouched.

mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use shoplink_api::entities::{
    checkout_session, inventory_reservation, CheckoutSession, CheckoutStatus, DiscountKind,
    InventoryReservation, ReservationStatus,
};
use shoplink_api::services::{CheckoutOutcome, StartCheckoutRequest};

/// Seeds a link and runs one checkout through the service layer.
async fn seeded_checkout(app: &TestApp, code: &str) -> CheckoutOutcome {
    let offer = app.seed_offer(DiscountKind::PercentageOff, dec!(10)).await;
    let variant = app.seed_variant(offer.id, 2000, 5).await;
    app.seed_link(offer.id, code).await;

    app.state
        .services
        .checkout
        .start_checkout(
            code,
            StartCheckoutRequest {
                visitor_id: Some("visitor-1".to_string()),
                variant_id: variant.id,
                quantity: 1,
            },
        )
        .await
        .expect("seeded checkout")
}

async fn backdate_hold(app: &TestApp, session_id: uuid::Uuid) {
    let past = Utc::now() - Duration::minutes(5);
    InventoryReservation::update_many()
        .col_expr(inventory_reservation::Column::ExpiresAt, Expr::value(past))
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(session_id))
        .exec(&*app.state.db)
        .await
        .expect("backdate reservation");
}

async fn hold_status(app: &TestApp, session_id: uuid::Uuid) -> String {
    InventoryReservation::find()
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(session_id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .status
}

async fn session_status(app: &TestApp, session_id: uuid::Uuid) -> CheckoutStatus {
    CheckoutSession::find_by_id(session_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn sweep_reclaims_overdue_holds_and_abandons_their_sessions() {
    let app = TestApp::new().await;
    let outcome = seeded_checkout(&app, "sweep1").await;
    backdate_hold(&app, outcome.session.id).await;

    let result = app
        .state
        .services
        .reservations
        .sweep_expired()
        .await
        .expect("sweep");

    assert_eq!(result.expired_count, 1);
    assert_eq!(result.skipped_count, 0);
    assert_eq!(
        hold_status(&app, outcome.session.id).await,
        ReservationStatus::Expired.as_str()
    );
    assert_eq!(
        session_status(&app, outcome.session.id).await,
        CheckoutStatus::Abandoned
    );
}

#[tokio::test]
async fn sweeping_twice_finds_nothing_the_second_time() {
    let app = TestApp::new().await;
    let outcome = seeded_checkout(&app, "sweep2").await;
    backdate_hold(&app, outcome.session.id).await;

    let first = app.state.services.reservations.sweep_expired().await.unwrap();
    assert_eq!(first.expired_count, 1);

    let second = app.state.services.reservations.sweep_expired().await.unwrap();
    assert_eq!(second.expired_count, 0);
    assert_eq!(second.skipped_count, 0);
}

#[tokio::test]
async fn sweep_leaves_live_deadlines_alone() {
    let app = TestApp::new().await;
    let outcome = seeded_checkout(&app, "sweep3").await;

    let result = app.state.services.reservations.sweep_expired().await.unwrap();

    assert_eq!(result.expired_count, 0);
    assert_eq!(
        hold_status(&app, outcome.session.id).await,
        ReservationStatus::Pending.as_str()
    );
    assert_eq!(
        session_status(&app, outcome.session.id).await,
        CheckoutStatus::Redirected
    );
}

#[tokio::test]
async fn confirmed_holds_survive_the_sweep() {
    let app = TestApp::new().await;
    let outcome = seeded_checkout(&app, "sweep4").await;

    // Settle the hold as a purchase would, then push its deadline into the
    // past. The sweep scans pending rows only.
    InventoryReservation::update_many()
        .col_expr(
            inventory_reservation::Column::Status,
            Expr::value(ReservationStatus::Confirmed.as_str()),
        )
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(outcome.session.id))
        .exec(&*app.state.db)
        .await
        .unwrap();
    backdate_hold(&app, outcome.session.id).await;

    let result = app.state.services.reservations.sweep_expired().await.unwrap();

    assert_eq!(result.expired_count, 0);
    assert_eq!(result.skipped_count, 0);
    assert_eq!(
        hold_status(&app, outcome.session.id).await,
        ReservationStatus::Confirmed.as_str()
    );
}

#[tokio::test]
async fn sweep_never_abandons_a_completed_session() {
    let app = TestApp::new().await;
    let outcome = seeded_checkout(&app, "sweep5").await;

    // Complete the session while its hold lingers in pending, then let the
    // hold expire. The abandon transition is guarded on live status.
    CheckoutSession::update_many()
        .col_expr(
            checkout_session::Column::Status,
            Expr::value(CheckoutStatus::Completed),
        )
        .filter(checkout_session::Column::Id.eq(outcome.session.id))
        .exec(&*app.state.db)
        .await
        .unwrap();
    backdate_hold(&app, outcome.session.id).await;

    let result = app.state.services.reservations.sweep_expired().await.unwrap();

    assert_eq!(result.expired_count, 1);
    assert_eq!(
        hold_status(&app, outcome.session.id).await,
        ReservationStatus::Expired.as_str()
    );
    assert_eq!(
        session_status(&app, outcome.session.id).await,
        CheckoutStatus::Completed
    );
}
