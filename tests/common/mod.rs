use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use shoplink_api::commerce::CheckoutUrlBuilder;
use shoplink_api::config::AppConfig;
use shoplink_api::db;
use shoplink_api::entities::offer::{DiscountKind, OfferStatus};
use shoplink_api::entities::{offer, product_variant, short_link};
use shoplink_api::errors::ServiceError;
use shoplink_api::events::{self, EventSender};
use shoplink_api::handlers::AppServices;
use shoplink_api::AppState;

/// Canned URL builder standing in for the hosted storefront. Counts calls so
/// tests can assert the replay path never re-creates a cart.
pub struct StaticUrlBuilder {
    base: String,
    calls: AtomicUsize,
}

impl StaticUrlBuilder {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckoutUrlBuilder for StaticUrlBuilder {
    async fn build_checkout_url(
        &self,
        variant_external_id: &str,
        quantity: i32,
        checkout_session_id: Uuid,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "{}/cart/{}?variant={}&qty={}",
            self.base, checkout_session_id, variant_external_id, quantity
        ))
    }
}

/// URL builder that always fails, for exercising the cleanup path when the
/// storefront is unreachable.
pub struct FailingUrlBuilder;

#[async_trait]
impl CheckoutUrlBuilder for FailingUrlBuilder {
    async fn build_checkout_url(
        &self,
        _variant_external_id: &str,
        _quantity: i32,
        _checkout_session_id: Uuid,
    ) -> Result<String, ServiceError> {
        Err(ServiceError::IntegrationError(
            "cart creation unavailable".to_string(),
        ))
    }
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        host: "127.0.0.1".to_string(),
        port: 18_080,
        environment: "development".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: true,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 30,
        db_idle_timeout_secs: 600,
        db_acquire_timeout_secs: 30,
        checkout_session_ttl_secs: 1800,
        reservation_ttl_secs: 900,
        sweep_interval_secs: 60,
        storefront_base_url: "http://localhost:3000/api/".to_string(),
        storefront_api_token: "dev-storefront-token".to_string(),
        storefront_timeout_secs: 5,
        order_webhook_secret: None,
        order_webhook_tolerance_secs: 300,
        event_channel_capacity: 256,
        cors_allowed_origins: None,
        cors_allow_any_origin: false,
    }
}

/// Helper harness for spinning up an application state backed by a
/// file-based SQLite database unique to the test.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub url_builder: Arc<StaticUrlBuilder>,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::build(|_| {}).await
    }

    /// Construct with the webhook signing secret configured.
    pub async fn with_webhook_secret(secret: &str) -> Self {
        let secret = secret.to_string();
        Self::build(move |cfg| cfg.order_webhook_secret = Some(secret)).await
    }

    async fn build(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = TempDir::new().expect("create temp dir for test database");
        let db_path = db_dir.path().join("shoplink_test.db");
        let mut cfg = test_config(format!("sqlite://{}?mode=rwc", db_path.display()));
        mutate(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let url_builder = Arc::new(StaticUrlBuilder::new("https://shop.test"));
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            url_builder.clone(),
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
            started_at: Utc::now(),
        };

        let router = Router::new()
            .nest("/api/v1", shoplink_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            url_builder,
            _event_task: event_task,
            _db_dir: db_dir,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Insert an offer row directly.
    pub async fn seed_offer(
        &self,
        discount_kind: DiscountKind,
        discount_value: Decimal,
    ) -> offer::Model {
        let now = Utc::now();
        offer::ActiveModel {
            id: Set(Uuid::new_v4()),
            creator_id: Set(Uuid::new_v4()),
            name: Set("Test offer".to_string()),
            description: Set(None),
            discount_kind: Set(discount_kind),
            discount_value: Set(discount_value),
            status: Set(OfferStatus::Active),
            starts_at: Set(None),
            ends_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed offer for tests")
    }

    /// Insert a product variant row directly.
    pub async fn seed_variant(
        &self,
        offer_id: Uuid,
        unit_price: i64,
        inventory_quantity: i32,
    ) -> product_variant::Model {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            offer_id: Set(offer_id),
            external_id: Set(format!("gid://variant/{}", suffix)),
            sku: Set(format!("SKU-{}", &suffix[..8])),
            name: Set("Test variant".to_string()),
            unit_price: Set(unit_price),
            currency: Set("USD".to_string()),
            inventory_quantity: Set(inventory_quantity),
            position: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product variant for tests")
    }

    /// Insert a short link row directly.
    pub async fn seed_link(&self, offer_id: Uuid, code: &str) -> short_link::Model {
        let now = Utc::now();
        short_link::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            offer_id: Set(offer_id),
            creator_id: Set(Uuid::new_v4()),
            revoked: Set(false),
            expires_at: Set(None),
            max_clicks: Set(None),
            click_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed short link for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
