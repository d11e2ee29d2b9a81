use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PICKUP_GRACE_HOURS: i64 = 24;
const DEFAULT_PICKUP_SWEEP_SECS: u64 = 300;
const DEFAULT_PURGE_SWEEP_SECS: u64 = 600;
const DEFAULT_STALE_SWEEP_SECS: u64 = 3600;
const DEFAULT_RETENTION_DAYS: i64 = 180;
const DEFAULT_EXPIRED_GRACE_DAYS: i64 = 14;

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Secret used to verify bearer tokens issued by the identity service
    #[validate(length(min = 32, message = "jwt_secret must be at least 32 characters"))]
    pub jwt_secret: String,

    /// HTTP bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Run migrations at startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// Deployment environment name
    #[serde(default = "default_env")]
    pub environment: String,

    /// How far in the past a pickup date may lie at creation time
    #[serde(default = "default_pickup_grace_hours")]
    pub pickup_grace_hours: i64,

    /// Interval for the pickup-missed sweep
    #[serde(default = "default_pickup_sweep_secs")]
    pub pickup_sweep_interval_secs: u64,

    /// Interval for the purge-and-restore sweep
    #[serde(default = "default_purge_sweep_secs")]
    pub purge_sweep_interval_secs: u64,

    /// Interval for the stale-request sweep
    #[serde(default = "default_stale_sweep_secs")]
    pub stale_sweep_interval_secs: u64,

    /// Requests older than this (by creation date) are deleted outright
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Grace window before expired_no_pickup requests are deleted
    #[serde(default = "default_expired_grace_days")]
    pub expired_grace_days: i64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_true() -> bool {
    true
}
fn default_pickup_grace_hours() -> i64 {
    DEFAULT_PICKUP_GRACE_HOURS
}
fn default_pickup_sweep_secs() -> u64 {
    DEFAULT_PICKUP_SWEEP_SECS
}
fn default_purge_sweep_secs() -> u64 {
    DEFAULT_PURGE_SWEEP_SECS
}
fn default_stale_sweep_secs() -> u64 {
    DEFAULT_STALE_SWEEP_SECS
}
fn default_retention_days() -> i64 {
    DEFAULT_RETENTION_DAYS
}
fn default_expired_grace_days() -> i64 {
    DEFAULT_EXPIRED_GRACE_DAYS
}

impl AppConfig {
    /// Constructor used by tests and tooling.
    pub fn new(database_url: String, jwt_secret: String, host: String, port: u16) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            environment: "test".to_string(),
            pickup_grace_hours: default_pickup_grace_hours(),
            pickup_sweep_interval_secs: default_pickup_sweep_secs(),
            purge_sweep_interval_secs: default_purge_sweep_secs(),
            stale_sweep_interval_secs: default_stale_sweep_secs(),
            retention_days: default_retention_days(),
            expired_grace_days: default_expired_grace_days(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Loads configuration from `config/default.toml`, an optional
/// `config/{environment}.toml` overlay, and `APP_`-prefixed environment
/// variables (highest precedence).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    builder = builder
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false));
    builder = builder
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false));

    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let config: AppConfig = builder.build()?.try_deserialize()?;

    config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(config)
}

/// Initializes the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("labtrack_api={0},tower_http={0}", log_level)));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "test_secret_key_for_testing_purposes_only_32chars".into(),
            "127.0.0.1".into(),
            8080,
        );
        assert!(cfg.auto_migrate);
        assert_eq!(cfg.pickup_grace_hours, DEFAULT_PICKUP_GRACE_HOURS);
        assert!(cfg.retention_days > cfg.expired_grace_days);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn short_jwt_secret_is_rejected() {
        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "short".into(),
            "127.0.0.1".into(),
            8080,
        );
        assert!(cfg.validate().is_err());
    }
}
