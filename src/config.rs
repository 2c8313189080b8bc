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
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;
const DEV_DEFAULT_JWT_SECRET: &str = "techshop_development_secret_key_not_for_production_use_01";

/// Momo wallet gateway settings.
///
/// The defaults point at Momo's public sandbox with its published test credentials.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MomoConfig {
    #[serde(default = "default_momo_partner_code")]
    pub partner_code: String,

    #[serde(default = "default_momo_access_key")]
    pub access_key: String,

    #[validate(length(min = 1))]
    #[serde(default = "default_momo_secret_key")]
    pub secret_key: String,

    /// Payment-creation endpoint (`/v2/gateway/api/create`)
    #[serde(default = "default_momo_endpoint")]
    pub endpoint: String,

    /// Where Momo redirects the payer after checkout
    #[serde(default = "default_momo_redirect_url")]
    pub redirect_url: String,

    /// Server-to-server notification target
    #[serde(default = "default_momo_ipn_url")]
    pub ipn_url: String,

    #[serde(default = "default_momo_request_type")]
    pub request_type: String,

    #[serde(default = "default_momo_lang")]
    pub lang: String,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            partner_code: default_momo_partner_code(),
            access_key: default_momo_access_key(),
            secret_key: default_momo_secret_key(),
            endpoint: default_momo_endpoint(),
            redirect_url: default_momo_redirect_url(),
            ipn_url: default_momo_ipn_url(),
            request_type: default_momo_request_type(),
            lang: default_momo_lang(),
        }
    }
}

/// VNPay hosted payment page settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct VnpayConfig {
    #[serde(default)]
    pub tmn_code: String,

    #[serde(default)]
    pub hash_secret: String,

    #[serde(default = "default_vnpay_pay_url")]
    pub pay_url: String,

    #[serde(default = "default_vnpay_return_url")]
    pub return_url: String,

    #[serde(default = "default_vnpay_version")]
    pub version: String,

    #[serde(default = "default_vnpay_locale")]
    pub locale: String,

    /// Minutes until the payment page expires
    #[validate(range(min = 1, max = 1440))]
    #[serde(default = "default_vnpay_expire_minutes")]
    pub expire_minutes: i64,
}

impl Default for VnpayConfig {
    fn default() -> Self {
        Self {
            tmn_code: String::new(),
            hash_secret: String::new(),
            pay_url: default_vnpay_pay_url(),
            return_url: default_vnpay_return_url(),
            version: default_vnpay_version(),
            locale: default_vnpay_locale(),
            expire_minutes: default_vnpay_expire_minutes(),
        }
    }
}

/// VietQR image service settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct VietQrConfig {
    #[serde(default = "default_vietqr_image_base_url")]
    pub image_base_url: String,

    #[serde(default = "default_vietqr_template")]
    pub template: String,
}

impl Default for VietQrConfig {
    fn default() -> Self {
        Self {
            image_base_url: default_vietqr_image_base_url(),
            template: default_vietqr_template(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
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

    /// DB idle timeout (seconds)
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// DB acquire timeout (seconds)
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Timeout applied by the HTTP client on outbound gateway calls
    #[validate(range(min = 1, max = 120))]
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Externally reachable base URL of this service
    #[serde(default)]
    pub public_base_url: Option<String>,

    #[validate]
    #[serde(default)]
    pub momo: MomoConfig,

    #[validate]
    #[serde(default)]
    pub vnpay: VnpayConfig,

    #[serde(default)]
    pub vietqr: VietQrConfig,
}

impl AppConfig {
    /// Creates a new configuration with gateway sections at their defaults
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration: default_jwt_expiration(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            public_base_url: None,
            momo: MomoConfig::default(),
            vnpay: VnpayConfig::default(),
            vietqr: VietQrConfig::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn gateway_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.gateway_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.is_production() && self.vnpay.hash_secret.trim().is_empty() {
            let mut err = ValidationError::new("vnpay_hash_secret_required");
            err.message = Some("Set APP__VNPAY__HASH_SECRET in production".into());
            errors.add("vnpay", err);
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
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration() -> usize {
    3600
}

fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    8
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_momo_partner_code() -> String {
    "MOMO".to_string()
}
fn default_momo_access_key() -> String {
    "F8BBA842ECF85".to_string()
}
fn default_momo_secret_key() -> String {
    "K951B6PE1waDMi640xX08PD3vg6EkVlz".to_string()
}
fn default_momo_endpoint() -> String {
    "https://test-payment.momo.vn/v2/gateway/api/create".to_string()
}
fn default_momo_redirect_url() -> String {
    "http://localhost:3000/payment/result".to_string()
}
fn default_momo_ipn_url() -> String {
    "http://localhost:8080/api/v1/payments/momo/notify".to_string()
}
fn default_momo_request_type() -> String {
    "captureWallet".to_string()
}
fn default_momo_lang() -> String {
    "vi".to_string()
}

fn default_vnpay_pay_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}
fn default_vnpay_return_url() -> String {
    "http://localhost:8080/api/v1/payments/vnpay/return".to_string()
}
fn default_vnpay_version() -> String {
    "2.1.0".to_string()
}
fn default_vnpay_locale() -> String {
    "vn".to_string()
}
fn default_vnpay_expire_minutes() -> i64 {
    15
}

fn default_vietqr_image_base_url() -> String {
    "https://img.vietqr.io/image".to_string()
}
fn default_vietqr_template() -> String {
    "compact2".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("techshop_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://techshop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
