use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::short_link::Model as ShortLinkModel;
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response};
use crate::services::CreateLinkRequest;
use crate::{ApiResponse, AppState};

pub fn link_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_link))
        .route("/{code}", get(get_link))
        .route("/{code}/revoke", post(revoke_link))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LinkResponse {
    pub id: Uuid,
    pub code: String,
    pub offer_id: Uuid,
    pub creator_id: Uuid,
    pub revoked: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_clicks: Option<i32>,
    pub click_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<ShortLinkModel> for LinkResponse {
    fn from(link: ShortLinkModel) -> Self {
        Self {
            id: link.id,
            code: link.code,
            offer_id: link.offer_id,
            creator_id: link.creator_id,
            revoked: link.revoked,
            expires_at: link.expires_at,
            max_clicks: link.max_clicks,
            click_count: link.click_count,
            created_at: link.created_at,
        }
    }
}

/// Create a short link for an offer
#[utoipa::path(
    post,
    path = "/api/v1/links",
    summary = "Create link",
    description = "Creates a short link pointing at an offer. The code is generated unless supplied.",
    request_body = CreateLinkRequest,
    responses(
        (status = 201, description = "Link created", body = ApiResponse<LinkResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Offer not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Requested code already in use", body = crate::errors::ErrorResponse),
    ),
    tag = "Links"
)]
pub async fn create_link(
    State(state): State<AppState>,
    Json(payload): Json<CreateLinkRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let link = state.services.links.create_link(payload).await?;
    Ok(created_response(ApiResponse::success(LinkResponse::from(
        link,
    ))))
}

/// Get a short link by code
#[utoipa::path(
    get,
    path = "/api/v1/links/{code}",
    summary = "Get link",
    params(("code" = String, Path, description = "Short link code")),
    responses(
        (status = 200, description = "Link retrieved", body = ApiResponse<LinkResponse>),
        (status = 404, description = "Link not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Links"
)]
pub async fn get_link(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let link = state
        .services
        .links
        .get_by_code(&code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Short link {} not found", code)))?;

    Ok(success_response(ApiResponse::success(LinkResponse::from(
        link,
    ))))
}

/// Revoke a short link
#[utoipa::path(
    post,
    path = "/api/v1/links/{code}/revoke",
    summary = "Revoke link",
    description = "Marks the link revoked so future checkouts through it are refused. Idempotent.",
    params(("code" = String, Path, description = "Short link code")),
    responses(
        (status = 200, description = "Link revoked", body = ApiResponse<LinkResponse>),
        (status = 404, description = "Link not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Links"
)]
pub async fn revoke_link(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let link = state
        .services
        .links
        .get_by_code(&code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Short link {} not found", code)))?;
    let revoked = state.services.links.revoke_link(link.id).await?;

    Ok(success_response(ApiResponse::success(LinkResponse::from(
        revoked,
    ))))
}
