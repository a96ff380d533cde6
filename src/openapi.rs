use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Shoplink API",
        version = "0.2.0",
        description = r#"
# Shoplink Checkout API

Link-commerce checkout for creator storefronts: short links resolve to
offers, checkouts place a time-boxed inventory hold and hand the shopper
to the hosted storefront cart, and order webhooks reconcile completed
purchases back onto the session that produced them.

## Idempotency

Starting a checkout is idempotent per visitor, link, and variant: while a
session is live, repeating the request replays it (HTTP 200) instead of
creating a second session or a second inventory hold (HTTP 201).

## Webhook signatures

Order webhooks are HMAC-SHA256 signed. Send the unix timestamp in
`x-timestamp` and `hex(hmac(secret, "{timestamp}.{body}"))` in
`x-signature`.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Links", description = "Short link management endpoints"),
        (name = "Checkout", description = "Checkout session endpoints"),
        (name = "Webhooks", description = "Storefront webhook ingestion")
    ),
    paths(
        // Links
        crate::handlers::links::create_link,
        crate::handlers::links::get_link,
        crate::handlers::links::revoke_link,

        // Checkout
        crate::handlers::checkout::start_checkout,

        // Webhooks
        crate::handlers::webhooks::order_webhook,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,

            // Link types
            crate::services::CreateLinkRequest,
            crate::handlers::links::LinkResponse,

            // Checkout types
            crate::services::StartCheckoutRequest,
            crate::handlers::checkout::CheckoutSessionResponse,

            // Webhook types
            crate::services::OrderNotification,
            crate::services::orders::NotificationLineItem,
            crate::handlers::webhooks::OrderWebhookResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_the_public_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Shoplink API"));
        assert!(json.contains("/api/v1/links/{code}/checkout"));
        assert!(json.contains("/api/v1/webhooks/orders/{connection_id}"));
    }
}
