//! Application configuration management.
//!
//! Configuration is loaded from an optional YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via the `-f` flag or the
//! `FIDO_CONFIG` environment variable. A `.env` file in the working directory is loaded into the
//! process environment by the binary before any of this runs.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`, may be absent)
//! 2. **Prefixed environment variables** - `FIDO_*` overrides, `__` separates nested keys
//! 3. **Deployment environment variables** - the flat names used by the container setup
//!    (`POSTGRES_USER`, `REDIS_HOST`, `SECRET_KEY`, `ENCRYPTION_KEY`, `API_PORT`, ...)
//!
//! `DATABASE_URL`, when present, wins over the individual `POSTGRES_*` parts.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Deployment names
//! POSTGRES_USER=fido POSTGRES_PASSWORD=secret POSTGRES_DB=fido POSTGRES_HOST=db
//! REDIS_HOST=redis
//! API_PORT=8000
//!
//! # Any setting through the prefixed form
//! FIDO_CACHE__BACKEND=memory
//! FIDO_QUEUE__ENABLED=false
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::crypto::FieldCipher;
use crate::errors::Error;

/// Deployment environment variables and the config keys they populate.
const DEPLOYMENT_ENV_KEYS: &[(&str, &str)] = &[
    ("DATABASE_URL", "database.url"),
    ("POSTGRES_USER", "database.user"),
    ("POSTGRES_PASSWORD", "database.password"),
    ("POSTGRES_DB", "database.name"),
    ("POSTGRES_HOST", "database.host"),
    ("POSTGRES_PORT", "database.port"),
    ("REDIS_URL", "redis.url"),
    ("REDIS_HOST", "redis.host"),
    ("REDIS_PORT", "redis.port"),
    ("SECRET_KEY", "secret_key"),
    ("ENCRYPTION_KEY", "encryption_key"),
    ("API_HOST", "host"),
    ("API_PORT", "port"),
    ("ENVIRONMENT", "environment"),
    ("EMAIL_SMTP_HOST", "email.smtp.host"),
    ("EMAIL_SMTP_PORT", "email.smtp.port"),
    ("EMAIL_SMTP_USER", "email.smtp.username"),
    ("EMAIL_SMTP_PASSWORD", "email.smtp.password"),
    ("EMAIL_FROM_EMAIL", "email.from_email"),
    ("EMAIL_ENABLE_NOTIFICATIONS", "email.enable_notifications"),
];

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FIDO_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate a new key and write it into an env file. Run once before first start.
    GenerateKey {
        /// Env file to update (created if missing)
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
        /// Variable name to assign
        #[arg(long, default_value = "ENCRYPTION_KEY")]
        name: String,
    },
}

/// Main application configuration.
///
/// All fields have defaults, so an empty YAML file plus the deployment environment variables is
/// a complete configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Title used in the OpenAPI document
    pub project_name: String,
    /// Prefix under which the versioned API is mounted
    pub api_prefix: String,
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Free-form deployment environment name ("development", "production", ...)
    pub environment: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    /// Application secret (required)
    pub secret_key: Option<String>,
    /// Base64 encoded 32 byte key used to encrypt user names at rest (required)
    pub encryption_key: Option<String>,
    pub cors: CorsConfig,
    pub email: EmailConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub settlement: SettlementConfig,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Export traces over OTLP (configured through the standard `OTEL_*` variables)
    pub enable_otel_export: bool,
}

/// Individual pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the individual parts below.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub user: String,
    pub password: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "fido".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            pool: PoolSettings::default(),
        }
    }
}

impl DatabaseConfig {
    /// Connection string for sqlx
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.name
            ),
        }
    }
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 6379,
        }
    }
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: true,
            max_age: None,
        }
    }
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// How outgoing email is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailTransportKind {
    Smtp,
    /// Write messages to `file_path` (development)
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: String::new(),
            password: String::new(),
            use_tls: true,
        }
    }
}

/// Transaction notification email configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    pub transport: EmailTransportKind,
    pub smtp: SmtpConfig,
    /// Directory for the file transport
    pub file_path: String,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
    /// When false, notifications are skipped entirely
    pub enable_notifications: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportKind::Smtp,
            smtp: SmtpConfig::default(),
            file_path: "./emails".to_string(),
            from_email: "noreply@fido.local".to_string(),
            from_name: "Fido".to_string(),
            enable_notifications: true,
        }
    }
}

/// Where cached API responses live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    /// In-process store, for development and tests
    Memory,
    Disabled,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// TTL for cached responses
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Entry limit for the memory backend
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Redis,
            default_ttl: Duration::from_secs(300),
            max_capacity: 10_000,
        }
    }
}

/// Redis processing queues fed by settled transactions.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Publish settled transactions and run the queue worker
    pub enabled: bool,
    /// BRPOP timeout for each worker iteration
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Pause after a failed iteration
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Background balance settlement.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettlementConfig {
    /// Bound of the in-process event channel
    pub channel_capacity: usize,
    /// Re-dispatch transactions left pending by a previous run
    pub recover_pending_on_startup: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            recover_pending_on_startup: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_name: "Fido Transaction API".to_string(),
            api_prefix: "/api/v1".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            environment: "development".to_string(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            secret_key: None,
            encryption_key: None,
            cors: CorsConfig::default(),
            email: EmailConfig::default(),
            cache: CacheConfig::default(),
            queue: QueueConfig::default(),
            settlement: SettlementConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Internal {
                operation: "Config validation: secret_key is not configured. \
                     Set SECRET_KEY (or FIDO_SECRET_KEY), or run `fido generate-key --name SECRET_KEY`."
                    .to_string(),
            });
        }

        let Some(encryption_key) = self.encryption_key.as_deref().filter(|k| !k.is_empty()) else {
            return Err(Error::Internal {
                operation: "Config validation: encryption_key is not configured. \
                     Set ENCRYPTION_KEY, or run `fido generate-key` to create one."
                    .to_string(),
            });
        };
        FieldCipher::from_key(encryption_key).map_err(|e| Error::Internal {
            operation: format!("Config validation: invalid encryption_key: {e}"),
        })?;

        if !self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/') {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: api_prefix '{}' must start with '/' and must not end with '/'",
                    self.api_prefix
                ),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        let pool = &self.database.pool;
        if pool.max_connections == 0 || pool.min_connections > pool.max_connections {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: invalid database pool: min_connections ({}) must not exceed max_connections ({}), which must be positive",
                    pool.min_connections, pool.max_connections
                ),
            });
        }

        if self.cache.default_ttl.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: cache.default_ttl must be positive".to_string(),
            });
        }

        if self.settlement.channel_capacity == 0 {
            return Err(Error::Internal {
                operation: "Config validation: settlement.channel_capacity must be positive".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Prefixed overrides; FIDO_CONFIG names the file itself
            .merge(Env::prefixed("FIDO_").ignore(&["config"]).split("__"))
            // Deployment environment names
            .merge(
                Env::raw()
                    .only(&DEPLOYMENT_ENV_KEYS.iter().map(|(env, _)| *env).collect::<Vec<_>>())
                    .map(|key| {
                        DEPLOYMENT_ENV_KEYS
                            .iter()
                            .find(|(env, _)| key == *env)
                            .map(|(_, path)| (*path).into())
                            .unwrap_or_else(|| key.as_str().to_lowercase().into())
                    }),
            )
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_ENCRYPTION_KEY;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
            command: None,
        }
    }

    fn set_required_keys(jail: &mut Jail) {
        jail.set_env("SECRET_KEY", "test-secret");
        jail.set_env("ENCRYPTION_KEY", TEST_ENCRYPTION_KEY);
    }

    #[test]
    fn test_defaults_without_config_file() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            set_required_keys(jail);

            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.project_name, "Fido Transaction API");
            assert_eq!(config.api_prefix, "/api/v1");
            assert_eq!(config.bind_address(), "0.0.0.0:8000");
            assert_eq!(config.database.port, 5432);
            assert_eq!(config.redis.connection_url(), "redis://localhost:6379");
            assert!(matches!(config.cors.allowed_origins[..], [CorsOrigin::Wildcard]));
            assert_eq!(config.cache.default_ttl, Duration::from_secs(300));
            assert_eq!(config.queue.poll_timeout, Duration::from_secs(1));
            assert!(config.email.enable_notifications);

            Ok(())
        });
    }

    #[test]
    fn test_deployment_env_names() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            set_required_keys(jail);
            jail.set_env("POSTGRES_USER", "fido");
            jail.set_env("POSTGRES_PASSWORD", "s3cret");
            jail.set_env("POSTGRES_DB", "ledger");
            jail.set_env("POSTGRES_HOST", "db");
            jail.set_env("POSTGRES_PORT", "6543");
            jail.set_env("REDIS_HOST", "cache");
            jail.set_env("REDIS_PORT", "6380");
            jail.set_env("API_PORT", "9000");
            jail.set_env("EMAIL_SMTP_HOST", "mail.example.com");
            jail.set_env("EMAIL_SMTP_PORT", "2525");
            jail.set_env("EMAIL_SMTP_USER", "mailer");
            jail.set_env("EMAIL_ENABLE_NOTIFICATIONS", "false");

            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.database.connection_url(), "postgres://fido:s3cret@db:6543/ledger");
            assert_eq!(config.redis.connection_url(), "redis://cache:6380");
            assert_eq!(config.port, 9000);
            assert_eq!(config.email.smtp.host, "mail.example.com");
            assert_eq!(config.email.smtp.port, 2525);
            assert_eq!(config.email.smtp.username, "mailer");
            assert!(!config.email.enable_notifications);
            assert_eq!(config.secret_key.as_deref(), Some("test-secret"));

            Ok(())
        });
    }

    #[test]
    fn test_database_url_wins_over_parts() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            set_required_keys(jail);
            jail.set_env("POSTGRES_HOST", "ignored");
            jail.set_env("DATABASE_URL", "postgres://u:p@elsewhere:5432/other");

            let config = Config::load(&args("missing.yaml"))?;
            assert_eq!(config.database.connection_url(), "postgres://u:p@elsewhere:5432/other");

            Ok(())
        });
    }

    #[test]
    fn test_yaml_with_prefixed_env_override() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "test.yaml",
                r#"
secret_key: from-yaml
encryption_key: "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY="
port: 8080
cache:
  backend: memory
  default_ttl: 2m
cors:
  allowed_origins:
    - https://app.example.com
  allow_credentials: false
"#,
            )?;
            jail.set_env("FIDO_PORT", "8181");
            jail.set_env("FIDO_QUEUE__ENABLED", "false");
            jail.set_env("FIDO_CONFIG", "test.yaml");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 8181);
            assert!(!config.queue.enabled);
            assert_eq!(config.cache.backend, CacheBackend::Memory);
            assert_eq!(config.cache.default_ttl, Duration::from_secs(120));
            assert!(matches!(&config.cors.allowed_origins[..], [CorsOrigin::Url(u)] if u.as_str() == "https://app.example.com/"));
            assert_eq!(config.secret_key.as_deref(), Some("from-yaml"));

            Ok(())
        });
    }

    #[test]
    fn test_missing_encryption_key_fails_validation() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("SECRET_KEY", "test-secret");

            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("encryption_key is not configured"));

            Ok(())
        });
    }

    #[test]
    fn test_malformed_encryption_key_fails_validation() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("SECRET_KEY", "test-secret");
            jail.set_env("ENCRYPTION_KEY", "not-a-key");

            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("invalid encryption_key"));

            Ok(())
        });
    }

    #[test]
    fn test_missing_secret_key_fails_validation() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("ENCRYPTION_KEY", TEST_ENCRYPTION_KEY);

            let err = Config::load(&args("missing.yaml")).unwrap_err();
            assert!(err.to_string().contains("secret_key is not configured"));

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            set_required_keys(jail);
            jail.create_file("test.yaml", "prot: 8000\n")?;

            assert!(Config::load(&args("test.yaml")).is_err());

            Ok(())
        });
    }

    #[test]
    fn test_api_prefix_must_be_absolute() {
        let config = Config {
            secret_key: Some("s".into()),
            encryption_key: Some(TEST_ENCRYPTION_KEY.into()),
            api_prefix: "api/v1".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_test_config_is_valid() {
        let config = crate::test_utils::create_test_config();
        config.validate().unwrap();
        assert!(!config.queue.enabled);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
    }
}
