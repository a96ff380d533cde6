//! Tests for the storefront cart API client, against a mock HTTP server.

use std::time::Duration;

use serde_json::json;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shoplink_api::commerce::{CheckoutUrlBuilder, StorefrontClient};
use shoplink_api::errors::ServiceError;

fn client_for(server: &MockServer) -> StorefrontClient {
    let base = Url::parse(&format!("{}/", server.uri())).expect("mock server url");
    StorefrontClient::with_client(reqwest::Client::new(), base, "test-token".to_string())
}

#[tokio::test]
async fn creates_a_cart_and_returns_its_checkout_url() {
    let server = MockServer::start().await;
    let session_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/carts"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({
            "variant_id": "gid://variant/42",
            "quantity": 2,
            "note": session_id,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "checkout_url": "https://shop.example/cart/c/xyz"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = client_for(&server)
        .build_checkout_url("gid://variant/42", 2, session_id)
        .await
        .expect("cart creation");
    assert_eq!(url, "https://shop.example/cart/c/xyz");
}

#[tokio::test]
async fn upstream_errors_surface_as_integration_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/carts"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .build_checkout_url("gid://variant/42", 1, Uuid::new_v4())
        .await
        .expect_err("5xx should not produce a url");

    match err {
        ServiceError::IntegrationError(message) => {
            assert!(message.contains("503"), "unexpected message: {}", message);
            assert!(message.contains("upstream unavailable"));
        }
        other => panic!("expected IntegrationError, got {:?}", other),
    }
}

#[tokio::test]
async fn unparseable_cart_responses_are_integration_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/carts"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .build_checkout_url("gid://variant/42", 1, Uuid::new_v4())
        .await
        .expect_err("unparseable body should fail");
    assert!(matches!(err, ServiceError::IntegrationError(_)));
}

#[tokio::test]
async fn slow_upstreams_hit_the_client_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/carts"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let client = StorefrontClient::new(base, "test-token".to_string(), Duration::from_millis(50))
        .expect("client construction");

    let err = client
        .build_checkout_url("gid://variant/42", 1, Uuid::new_v4())
        .await
        .expect_err("timeout should fail the call");
    assert!(matches!(err, ServiceError::IntegrationError(_)));
}
