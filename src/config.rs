use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CART_COOKIE: &str = "cart_session_id";
const DEFAULT_CART_COOKIE_MAX_AGE_DAYS: i64 = 30;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret used to verify bearer tokens issued by the auth backend
    #[validate(length(min = 32))]
    pub jwt_secret: String,

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

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Request timeout applied to the whole router, seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Payment gateway secret API key
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Shared secret for verifying payment webhook signatures
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Maximum accepted webhook timestamp skew, seconds
    #[serde(default = "default_webhook_tolerance")]
    pub stripe_webhook_tolerance_secs: u64,

    /// Public base URL of the storefront, used for checkout redirect URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Name of the guest cart cookie
    #[serde(default = "default_cart_cookie_name")]
    pub cart_cookie_name: String,

    /// Guest cart cookie lifetime, days
    #[serde(default = "default_cart_cookie_max_age_days")]
    pub cart_cookie_max_age_days: i64,

    /// Default currency for carts and orders
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_webhook_tolerance() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_cart_cookie_name() -> String {
    DEFAULT_CART_COOKIE.to_string()
}
fn default_cart_cookie_max_age_days() -> i64 {
    DEFAULT_CART_COOKIE_MAX_AGE_DAYS
}
fn default_currency() -> String {
    "USD".to_string()
}

impl AppConfig {
    /// Programmatic constructor used by tests.
    pub fn new(
        database_url: impl Into<String>,
        jwt_secret: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            jwt_secret: jwt_secret.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            request_timeout_secs: default_request_timeout_secs(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_webhook_tolerance_secs: default_webhook_tolerance(),
            public_base_url: default_public_base_url(),
            cart_cookie_name: default_cart_cookie_name(),
            cart_cookie_max_age_days: default_cart_cookie_max_age_days(),
            currency: default_currency(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// URL the gateway redirects to after a successful payment. The
    /// `{CHECKOUT_SESSION_ID}` placeholder is substituted by the gateway.
    pub fn checkout_success_url(&self) -> String {
        format!(
            "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.public_base_url.trim_end_matches('/')
        )
    }

    pub fn checkout_cancel_url(&self) -> String {
        format!("{}/cart", self.public_base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads configuration from `config/{default,ENV}.toml` plus `APP__*`
/// environment variables, with sane development defaults.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let mut cfg: AppConfig = builder.build()?.try_deserialize().or_else(|err| {
        // jwt_secret is the only required field without a file default; fill
        // it for development runs so `cargo run` works out of the box.
        if run_env == DEFAULT_ENV {
            let fallback = Config::builder()
                .set_default("database_url", "sqlite://storefront.db?mode=rwc")
                .and_then(|b| b.set_default("host", "0.0.0.0"))
                .and_then(|b| b.set_default("port", DEFAULT_PORT as i64))
                .and_then(|b| b.set_default("environment", DEFAULT_ENV))
                .and_then(|b| b.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET))
                .map(|b| {
                    b.add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
                        .add_source(Environment::with_prefix("APP").separator("__"))
                });
            match fallback {
                Ok(b) => b.build()?.try_deserialize().map_err(AppConfigError::from),
                Err(e) => Err(AppConfigError::from(e)),
            }
        } else {
            Err(AppConfigError::from(err))
        }
    })?;

    if cfg.db_min_connections > cfg.db_max_connections {
        cfg.db_min_connections = cfg.db_max_connections;
    }

    cfg.validate()?;
    Ok(cfg)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
