//! Integration tests for order webhook reconciliation.
//!
//! Redelivered notifications must collapse onto one order row, notes that
//! name a checkout session must attribute and complete it, and a session
//! the sweeper already abandoned must stay abandoned no matter how late
//! the order arrives.

mod common;

use axum::{body, http::Method, response::Response};
use chrono::{Duration, Utc};
use common::TestApp;
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shoplink_api::entities::{
    inventory_reservation, CheckoutSession, CheckoutStatus, DiscountKind, InventoryReservation,
    Order, ReservationStatus,
};
use shoplink_api::services::{CheckoutOutcome, StartCheckoutRequest};

type HmacSha256 = Hmac<Sha256>;

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Seeds a link and runs one checkout through the service layer.
async fn seeded_checkout(app: &TestApp, code: &str) -> CheckoutOutcome {
    let offer = app.seed_offer(DiscountKind::PercentageOff, dec!(20)).await;
    let variant = app.seed_variant(offer.id, 2999, 5).await;
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

fn order_payload(external_order_id: &str, note: Option<&str>) -> Value {
    json!({
        "external_order_id": external_order_id,
        "order_number": "#1001",
        "total_price": 2399,
        "currency": "USD",
        "note": note,
    })
}

#[tokio::test]
async fn redelivered_notifications_collapse_onto_one_order() {
    let app = TestApp::new().await;
    let connection_id = Uuid::new_v4();
    let uri = format!("/api/v1/webhooks/orders/{}", connection_id);
    let payload = order_payload("5001", None);

    let first = app
        .request(Method::POST, &uri, Some(payload.clone()))
        .await;
    assert_eq!(first.status(), 200);
    let first = response_json(first).await;
    assert_eq!(first["data"]["duplicate"], json!(false));

    let second = app.request(Method::POST, &uri, Some(payload)).await;
    assert_eq!(second.status(), 200);
    let second = response_json(second).await;
    assert_eq!(second["data"]["duplicate"], json!(true));
    assert_eq!(first["data"]["order_id"], second["data"]["order_id"]);

    let orders = Order::find().count(&*app.state.db).await.unwrap();
    assert_eq!(orders, 1);
}

#[tokio::test]
async fn the_same_external_id_on_another_connection_is_a_new_order() {
    let app = TestApp::new().await;
    let payload = order_payload("5001", None);

    for connection_id in [Uuid::new_v4(), Uuid::new_v4()] {
        let response = app
            .request(
                Method::POST,
                &format!("/api/v1/webhooks/orders/{}", connection_id),
                Some(payload.clone()),
            )
            .await;
        assert_eq!(response.status(), 200);
        let body = response_json(response).await;
        assert_eq!(body["data"]["duplicate"], json!(false));
    }

    let orders = Order::find().count(&*app.state.db).await.unwrap();
    assert_eq!(orders, 2);
}

#[tokio::test]
async fn orders_attribute_to_the_session_named_in_the_note() {
    let app = TestApp::new().await;
    let outcome = seeded_checkout(&app, "attr").await;
    let connection_id = Uuid::new_v4();

    let payload = json!({
        "external_order_id": "5002",
        "order_number": "#1002",
        "total_price": 2399,
        "currency": "USD",
        "note": outcome.session.id.to_string(),
        "line_items": [
            { "variant_id": "gid://variant/1", "quantity": 1, "price": 2399 }
        ],
    });
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", connection_id),
            Some(payload),
        )
        .await;
    assert_eq!(response.status(), 200);

    let order = Order::find().one(&*app.state.db).await.unwrap().unwrap();
    assert_eq!(order.checkout_session_id, Some(outcome.session.id));
    assert_eq!(order.short_link_id, Some(outcome.session.short_link_id));
    assert_eq!(order.total, 2399);
    assert!(order.line_items.is_some());

    let session = CheckoutSession::find_by_id(outcome.session.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, CheckoutStatus::Completed);
    assert!(session.completed_at.is_some());

    let hold = InventoryReservation::find()
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(outcome.session.id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hold.status, ReservationStatus::Confirmed.as_str());
}

#[tokio::test]
async fn organic_orders_record_without_attribution() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", Uuid::new_v4()),
            Some(order_payload("5003", None)),
        )
        .await;
    assert_eq!(response.status(), 200);

    let order = Order::find().one(&*app.state.db).await.unwrap().unwrap();
    assert_eq!(order.checkout_session_id, None);
    assert_eq!(order.short_link_id, None);
}

#[tokio::test]
async fn non_session_notes_are_left_unattributed() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", Uuid::new_v4()),
            Some(order_payload("5004", Some("thanks for the quick shipping!"))),
        )
        .await;
    assert_eq!(response.status(), 200);

    let order = Order::find().one(&*app.state.db).await.unwrap().unwrap();
    assert_eq!(order.checkout_session_id, None);
    assert_eq!(order.note.as_deref(), Some("thanks for the quick shipping!"));
}

#[tokio::test]
async fn late_orders_never_resurrect_swept_sessions() {
    let app = TestApp::new().await;
    let outcome = seeded_checkout(&app, "late").await;

    // Let the hold lapse and the sweeper reclaim it.
    let past = Utc::now() - Duration::minutes(5);
    InventoryReservation::update_many()
        .col_expr(inventory_reservation::Column::ExpiresAt, Expr::value(past))
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(outcome.session.id))
        .exec(&*app.state.db)
        .await
        .unwrap();
    let swept = app.state.services.reservations.sweep_expired().await.unwrap();
    assert_eq!(swept.expired_count, 1);

    // The order webhook lands after the sweep, still naming the session.
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", Uuid::new_v4()),
            Some(order_payload(
                "5005",
                Some(&outcome.session.id.to_string()),
            )),
        )
        .await;
    assert_eq!(response.status(), 200);

    // Attribution is kept for reporting, but the settled rows stay settled.
    let order = Order::find().one(&*app.state.db).await.unwrap().unwrap();
    assert_eq!(order.checkout_session_id, Some(outcome.session.id));

    let session = CheckoutSession::find_by_id(outcome.session.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, CheckoutStatus::Abandoned);
    assert_eq!(session.completed_at, None);

    let hold = InventoryReservation::find()
        .filter(inventory_reservation::Column::CheckoutSessionId.eq(outcome.session.id))
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hold.status, ReservationStatus::Expired.as_str());
}

#[tokio::test]
async fn malformed_notification_bodies_are_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), 400);
}

fn sign(secret: &str, ts: i64, body: &[u8]) -> String {
    let signed = format!("{}.{}", ts, std::str::from_utf8(body).unwrap());
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signed.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[tokio::test]
async fn signed_deliveries_are_accepted() {
    let app = TestApp::with_webhook_secret("whsec_test").await;
    let payload = order_payload("5006", None);
    let body_bytes = serde_json::to_vec(&payload).unwrap();

    let ts = Utc::now().timestamp();
    let signature = sign("whsec_test", ts, &body_bytes);
    let ts_header = ts.to_string();

    let response = app
        .request_with_headers(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", Uuid::new_v4()),
            Some(payload),
            &[
                ("x-timestamp", ts_header.as_str()),
                ("x-signature", signature.as_str()),
            ],
        )
        .await;
    assert_eq!(response.status(), 200);

    let orders = Order::find().count(&*app.state.db).await.unwrap();
    assert_eq!(orders, 1);
}

#[tokio::test]
async fn deliveries_with_a_bad_signature_are_rejected() {
    let app = TestApp::with_webhook_secret("whsec_test").await;
    let payload = order_payload("5007", None);

    let ts_header = Utc::now().timestamp().to_string();
    let response = app
        .request_with_headers(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", Uuid::new_v4()),
            Some(payload),
            &[
                ("x-timestamp", ts_header.as_str()),
                ("x-signature", "deadbeef"),
            ],
        )
        .await;
    assert_eq!(response.status(), 401);

    let orders = Order::find().count(&*app.state.db).await.unwrap();
    assert_eq!(orders, 0);
}

#[tokio::test]
async fn unsigned_deliveries_are_rejected_when_a_secret_is_configured() {
    let app = TestApp::with_webhook_secret("whsec_test").await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/webhooks/orders/{}", Uuid::new_v4()),
            Some(order_payload("5008", None)),
        )
        .await;
    assert_eq!(response.status(), 401);
}
