use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_TTL_SECS: u64 = 1800;
const DEFAULT_RESERVATION_TTL_SECS: u64 = 900;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_STOREFRONT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;
const DEV_DEFAULT_STOREFRONT_TOKEN: &str = "dev-storefront-token";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// How long a checkout session stays live (seconds)
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 1))]
    pub checkout_session_ttl_secs: u64,

    /// How long an inventory hold stays live (seconds). Must be shorter
    /// than the session TTL so holds never outlive their session.
    #[serde(default = "default_reservation_ttl_secs")]
    #[validate(range(min = 1))]
    pub reservation_ttl_secs: u64,

    /// Expiry sweeper tick interval (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    #[validate(range(min = 1))]
    pub sweep_interval_secs: u64,

    /// Base URL of the commerce backend's cart API
    pub storefront_base_url: String,

    /// API token for the commerce backend
    pub storefront_api_token: String,

    /// Storefront request timeout (seconds)
    #[serde(default = "default_storefront_timeout_secs")]
    pub storefront_timeout_secs: u64,

    /// Shared secret for verifying inbound order notification signatures.
    /// When unset, signature checks are skipped (development only).
    #[serde(default)]
    pub order_webhook_secret: Option<String>,

    /// Order notification signature timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub order_webhook_tolerance_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,
}

impl AppConfig {
    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.checkout_session_ttl_secs as i64)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs as i64)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn storefront_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.storefront_timeout_secs)
    }

    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.reservation_ttl_secs >= self.checkout_session_ttl_secs {
            let mut err = ValidationError::new("reservation_ttl_exceeds_session_ttl");
            err.message = Some(
                "reservation_ttl_secs must be strictly shorter than checkout_session_ttl_secs so holds expire before their session".into(),
            );
            errors.add("reservation_ttl_secs", err);
        }

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.storefront_api_token.trim() == DEV_DEFAULT_STOREFRONT_TOKEN
        {
            let mut err = ValidationError::new("storefront_token_default_dev");
            err.message = Some(
                "The bundled development storefront token must not be used outside development. Set APP__STOREFRONT_API_TOKEN."
                    .into(),
            );
            errors.add("storefront_api_token", err);
        }

        if !self.is_development() && self.order_webhook_secret.is_none() {
            let mut err = ValidationError::new("order_webhook_secret_required");
            err.message = Some(
                "Set APP__ORDER_WEBHOOK_SECRET outside development so order notifications are signature-verified".into(),
            );
            errors.add("order_webhook_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}

fn default_db_min_connections() -> u32 {
    2
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_db_idle_timeout_secs() -> u64 {
    600
}

fn default_db_acquire_timeout_secs() -> u64 {
    30
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_reservation_ttl_secs() -> u64 {
    DEFAULT_RESERVATION_TTL_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_storefront_timeout_secs() -> u64 {
    DEFAULT_STOREFRONT_TIMEOUT_SECS
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("shoplink_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(EnvFilter::new(filter_directive)).json().try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter_directive)).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://shoplink.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("storefront_base_url", "http://localhost:3000/api/")?
        .set_default("storefront_api_token", DEV_DEFAULT_STOREFRONT_TOKEN)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
