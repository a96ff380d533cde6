use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response};
use crate::services::{CheckoutOutcome, StartCheckoutRequest};
use crate::{ApiResponse, AppState};

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/links/{code}/checkout", post(start_checkout))
}

/// Checkout session snapshot returned to the storefront client.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub session_id: Uuid,
    pub status: String,
    pub checkout_url: String,
    pub is_existing: bool,
    pub quantity: i32,
    pub unit_price: i64,
    pub discounted_unit_price: i64,
    pub subtotal: i64,
    pub discount_total: i64,
    pub total: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}

impl From<CheckoutOutcome> for CheckoutSessionResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        let session = outcome.session;
        Self {
            session_id: session.id,
            status: session.status.as_str().to_string(),
            checkout_url: outcome.checkout_url,
            is_existing: outcome.is_existing,
            quantity: session.quantity,
            unit_price: session.unit_price,
            discounted_unit_price: session.discounted_unit_price,
            subtotal: session.subtotal,
            discount_total: session.discount_total,
            total: session.total,
            currency: session.currency,
            expires_at: session.expires_at,
        }
    }
}

/// Start a checkout for a short link, or replay the live session for the
/// same visitor, link, and variant
#[utoipa::path(
    post,
    path = "/api/v1/links/{code}/checkout",
    summary = "Start checkout",
    description = "Creates a checkout session and inventory hold for a short link. Repeating the request with the same visitor, link, and variant replays the live session instead of creating a second one.",
    params(("code" = String, Path, description = "Short link code")),
    request_body = StartCheckoutRequest,
    responses(
        (status = 201, description = "Checkout session created", body = ApiResponse<CheckoutSessionResponse>),
        (status = 200, description = "Existing live session replayed", body = ApiResponse<CheckoutSessionResponse>),
        (status = 400, description = "Invalid request body", body = crate::errors::ErrorResponse),
        (status = 404, description = "Link, offer, or variant not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Idempotency key contended by another request", body = crate::errors::ErrorResponse),
        (status = 410, description = "Link or offer no longer available", body = crate::errors::ErrorResponse),
        (status = 422, description = "Offer inactive or insufficient inventory", body = crate::errors::ErrorResponse),
        (status = 502, description = "Storefront cart creation failed", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(payload): Json<StartCheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .checkout
        .start_checkout(&code, payload)
        .await?;
    let replayed = outcome.is_existing;
    let body = ApiResponse::success(CheckoutSessionResponse::from(outcome));

    if replayed {
        Ok(success_response(body))
    } else {
        Ok(created_response(body))
    }
}
