use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::services::OrderNotification;
use crate::{ApiResponse, AppState};

type HmacSha256 = Hmac<Sha256>;

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/orders/{connection_id}", post(order_webhook))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWebhookResponse {
    pub order_id: Uuid,
    pub duplicate: bool,
}

/// Receive an order notification from a storefront connection
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/orders/{connection_id}",
    summary = "Order webhook",
    description = "Ingests an order notification and reconciles it into an order row. Redeliveries of the same external order return the original row with duplicate=true.",
    params(("connection_id" = Uuid, Path, description = "Storefront connection the notification came from")),
    request_body = OrderNotification,
    responses(
        (status = 200, description = "Notification reconciled", body = ApiResponse<OrderWebhookResponse>),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
    ),
    tag = "Webhooks"
)]
pub async fn order_webhook(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // Verify signature if configured
    if let Some(secret) = state.config.order_webhook_secret.as_deref() {
        let ok = verify_signature(
            &headers,
            &body,
            secret,
            state.config.order_webhook_tolerance_secs,
        );
        if !ok {
            warn!(%connection_id, "order webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let notification: OrderNotification = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let outcome = state
        .services
        .orders
        .reconcile(connection_id, notification)
        .await?;

    Ok(Json(ApiResponse::success(OrderWebhookResponse {
        order_id: outcome.order.id,
        duplicate: outcome.duplicate,
    })))
}

fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    // Generic HMAC: x-timestamp and x-signature headers
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            // Reject stale or future-dated deliveries
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
            mac.update(signed.as_bytes());
            let expected = hex::encode(mac.finalize().into_bytes());
            return constant_time_eq(&expected, sig);
        }
    }
    false
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
