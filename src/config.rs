use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_WEBHOOK_SECRET: &str = "development_webhook_secret_do_not_use_in_production";

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

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// ISO currency code used for pricing and gateway orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Orders at or above this subtotal ship free
    #[serde(default = "default_free_shipping_threshold")]
    #[validate(custom = "validate_non_negative")]
    pub free_shipping_threshold: f64,

    /// Flat shipping fee below the free-shipping threshold
    #[serde(default = "default_base_shipping_fee")]
    #[validate(custom = "validate_non_negative")]
    pub base_shipping_fee: f64,

    /// Upper bound for a single cart line's quantity
    #[serde(default = "default_max_quantity_per_line")]
    #[validate(range(min = 1, max = 999))]
    pub max_quantity_per_line: u32,

    /// Shared secret for verifying inbound payment webhooks
    #[validate(length(min = 16))]
    pub payment_webhook_secret: String,

    /// Payment provider API base URL
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Payment provider API key id
    #[serde(default)]
    pub gateway_key_id: String,

    /// Payment provider API key secret
    #[serde(default)]
    pub gateway_key_secret: String,

    /// Bounded retry count for create-payment-order calls
    #[serde(default = "default_gateway_max_retries")]
    #[validate(range(min = 1, max = 10))]
    pub gateway_max_retries: u32,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
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

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_free_shipping_threshold() -> f64 {
    1999.0
}

fn default_base_shipping_fee() -> f64 {
    99.0
}

fn default_max_quantity_per_line() -> u32 {
    10
}

fn default_gateway_base_url() -> String {
    "https://api.payment-provider.example".to_string()
}

fn default_gateway_max_retries() -> u32 {
    3
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn validate_non_negative(value: f64) -> Result<(), ValidationError> {
    if value < 0.0 {
        return Err(ValidationError::new("must_be_non_negative"));
    }
    Ok(())
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "dev"
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("{0}")]
    Missing(String),
}

/// Loads configuration from `config/` profiles and `APP__`-prefixed
/// environment variables, then validates it.
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
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // The webhook secret has no production default. Development gets a marked
    // dev-only value so the webhook path is exercisable out of the box.
    let mut config: AppConfig = match config.get_string("payment_webhook_secret") {
        Ok(_) => config.try_deserialize()?,
        Err(_) if run_env == DEFAULT_ENV || run_env == "dev" || run_env == "test" => {
            let rebuilt = Config::builder()
                .add_source(config)
                .set_default("payment_webhook_secret", DEV_DEFAULT_WEBHOOK_SECRET)?
                .build()?;
            rebuilt.try_deserialize()?
        }
        Err(_) => {
            return Err(AppConfigError::Missing(
                "payment_webhook_secret must be set via APP__PAYMENT_WEBHOOK_SECRET or a config file"
                    .to_string(),
            ))
        }
    };

    if config.db_min_connections > config.db_max_connections {
        config.db_min_connections = config.db_max_connections;
    }

    config.validate()?;
    Ok(config)
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

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "test".to_string(),
            log_level: "debug".to_string(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            db_max_connections: 5,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            currency: "USD".to_string(),
            free_shipping_threshold: 1999.0,
            base_shipping_fee: 99.0,
            max_quantity_per_line: 10,
            payment_webhook_secret: DEV_DEFAULT_WEBHOOK_SECRET.to_string(),
            gateway_base_url: "http://localhost:9999".to_string(),
            gateway_key_id: "key".to_string(),
            gateway_key_secret: "secret".to_string(),
            gateway_max_retries: 3,
            event_channel_capacity: 64,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn negative_shipping_fee_is_rejected() {
        let mut cfg = base_config();
        cfg.base_shipping_fee = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn short_webhook_secret_is_rejected() {
        let mut cfg = base_config();
        cfg.payment_webhook_secret = "short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_max_quantity_is_rejected() {
        let mut cfg = base_config();
        cfg.max_quantity_per_line = 0;
        assert!(cfg.validate().is_err());
    }
}
