use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CART_RETENTION_DAYS: i64 = 30;

/// Pricing rates applied by the pricing calculator.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PricingConfig {
    /// Tax rate applied to the subtotal (e.g. 0.10 for 10%)
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,

    /// Orders at or above this subtotal ship free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,

    /// Flat shipping fee below the free-shipping threshold
    #[serde(default = "default_flat_shipping_fee")]
    pub flat_shipping_fee: Decimal,

    /// Store-wide currency code; one currency per order
    #[serde(default = "default_currency")]
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate: default_tax_rate(),
            free_shipping_threshold: default_free_shipping_threshold(),
            flat_shipping_fee: default_flat_shipping_fee(),
            currency: default_currency(),
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_tax_rate() -> Decimal {
    dec!(0.10)
}

fn default_free_shipping_threshold() -> Decimal {
    dec!(50)
}

fn default_flat_shipping_fee() -> Decimal {
    dec!(5)
}

/// Cart lifecycle settings.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CartConfig {
    /// Carts not touched within this many days are reaped
    #[serde(default = "default_cart_retention_days")]
    pub retention_days: i64,

    /// Interval between reaper sweeps, in seconds (0 disables the task)
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            retention_days: default_cart_retention_days(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

fn default_cart_retention_days() -> i64 {
    DEFAULT_CART_RETENTION_DAYS
}

fn default_reaper_interval_secs() -> u64 {
    3600
}

/// Which payment processor the deployment talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
    Razorpay,
}

impl Default for PaymentProvider {
    fn default() -> Self {
        PaymentProvider::Stripe
    }
}

/// Credentials and endpoints for one processor account.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayCredentials {
    #[serde(default)]
    pub key_id: String,
    #[serde(default)]
    pub key_secret: String,
    /// Shared secret used to authenticate inbound webhooks
    #[serde(default)]
    pub webhook_secret: String,
    /// Override for the processor API base URL (tests point this at a stub)
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Payment settlement configuration.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    #[serde(default)]
    pub provider: PaymentProvider,

    #[serde(default)]
    pub stripe: GatewayCredentials,

    #[serde(default)]
    pub razorpay: GatewayCredentials,

    /// Remote call timeout in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

impl PaymentConfig {
    /// Credentials for the active provider.
    pub fn active_credentials(&self) -> &GatewayCredentials {
        match self.provider {
            PaymentProvider::Stripe => &self.stripe,
            PaymentProvider::Razorpay => &self.razorpay,
        }
    }
}

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
    #[serde(default = "default_environment")]
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

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub pricing: PricingConfig,

    #[serde(default)]
    #[validate]
    pub cart: CartConfig,

    #[serde(default)]
    #[validate]
    pub payment: PaymentConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
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

impl AppConfig {
    /// Minimal constructor used by tests and tools.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            pricing: PricingConfig::default(),
            cart: CartConfig::default(),
            payment: PaymentConfig::default(),
        }
    }

    /// Loads configuration from `config/{default,<env>}.toml` plus `APP_`
    /// environment overrides (e.g. `APP_DATABASE_URL`,
    /// `APP_PAYMENT__PROVIDER=razorpay`).
    pub fn load() -> Result<Self, ConfigError> {
        let run_env = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

        let mut builder = Config::builder();

        let default_path = Path::new(CONFIG_DIR).join("default.toml");
        if default_path.exists() {
            builder = builder.add_source(File::from(default_path));
        }

        let env_path = Path::new(CONFIG_DIR).join(format!("{run_env}.toml"));
        if env_path.exists() {
            builder = builder.add_source(File::from(env_path));
        }

        let cfg: AppConfig = builder
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        cfg.validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        info!(environment = %cfg.environment, "configuration loaded");
        Ok(cfg)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={level},tower_http=info");
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter))
            .json()
            .try_init();
    } else {
        let _ = fmt().with_env_filter(EnvFilter::new(filter)).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_defaults_match_store_policy() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.tax_rate, dec!(0.10));
        assert_eq!(pricing.free_shipping_threshold, dec!(50));
        assert_eq!(pricing.flat_shipping_fee, dec!(5));
    }

    #[test]
    fn active_credentials_follow_provider() {
        let mut payment = PaymentConfig::default();
        payment.stripe.key_id = "sk_test".into();
        payment.razorpay.key_id = "rzp_test".into();

        payment.provider = PaymentProvider::Stripe;
        assert_eq!(payment.active_credentials().key_id, "sk_test");

        payment.provider = PaymentProvider::Razorpay;
        assert_eq!(payment.active_credentials().key_id, "rzp_test");
    }

    #[test]
    fn new_populates_sane_defaults() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            18080,
            "test".into(),
        );
        assert_eq!(cfg.cart.retention_days, 30);
        assert!(!cfg.auto_migrate);
        assert_eq!(cfg.payment.provider, PaymentProvider::Stripe);
    }
}
