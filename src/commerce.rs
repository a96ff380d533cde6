//! Storefront integration
//!
//! The checkout orchestrator needs exactly one thing from the commerce
//! backend: a hosted checkout URL for a variant and quantity. The trait keeps
//! that seam narrow so tests can swap in a canned builder.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Builds the hosted checkout URL a visitor is redirected to.
///
/// The session id rides along as the cart note. The backend echoes the note
/// on the resulting order, which is how reconciliation attributes a purchase
/// back to its session.
#[async_trait]
pub trait CheckoutUrlBuilder: Send + Sync {
    async fn build_checkout_url(
        &self,
        variant_external_id: &str,
        quantity: i32,
        checkout_session_id: Uuid,
    ) -> Result<String, ServiceError>;
}

#[derive(Debug, Serialize)]
struct CartRequest<'a> {
    variant_id: &'a str,
    quantity: i32,
    note: Uuid,
}

#[derive(Debug, Deserialize)]
struct CartResponse {
    checkout_url: String,
}

/// HTTP client for the upstream storefront cart API.
#[derive(Clone)]
pub struct StorefrontClient {
    client: Client,
    base_url: Url,
    api_token: String,
}

impl StorefrontClient {
    pub fn new(base_url: Url, api_token: String, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            ServiceError::InternalError(format!("failed to construct storefront client: {}", e))
        })?;

        Ok(Self::with_client(client, base_url, api_token))
    }

    /// Build from an existing client (useful for testing).
    pub fn with_client(client: Client, base_url: Url, api_token: String) -> Self {
        Self {
            client,
            base_url,
            api_token,
        }
    }

    fn carts_endpoint(&self) -> Result<Url, ServiceError> {
        self.base_url.join("carts").map_err(|e| {
            ServiceError::InternalError(format!("invalid storefront base url: {}", e))
        })
    }
}

#[async_trait]
impl CheckoutUrlBuilder for StorefrontClient {
    #[instrument(skip(self))]
    async fn build_checkout_url(
        &self,
        variant_external_id: &str,
        quantity: i32,
        checkout_session_id: Uuid,
    ) -> Result<String, ServiceError> {
        let endpoint = self.carts_endpoint()?;
        let payload = CartRequest {
            variant_id: variant_external_id,
            quantity,
            note: checkout_session_id,
        };

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                ServiceError::IntegrationError(format!("failed to call storefront cart API: {}", e))
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            ServiceError::IntegrationError(format!("failed to read storefront response: {}", e))
        })?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(ServiceError::IntegrationError(format!(
                "storefront cart API error (status: {}): {}",
                status, text
            )));
        }

        let cart: CartResponse = serde_json::from_slice(&body).map_err(|e| {
            ServiceError::IntegrationError(format!("failed to parse storefront response: {}", e))
        })?;

        Ok(cart.checkout_url)
    }
}
