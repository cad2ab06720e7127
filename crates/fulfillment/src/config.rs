//! Fulfillment service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PODBRIDGE_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//! - `PODBRIDGE_BASE_URL` - Public URL, used to build tenant webhook URLs
//! - `PODBRIDGE_ENCRYPTION_KEY` - Base64 AES-256 key for credentials at rest
//!
//! ## Optional
//! - `PODBRIDGE_HOST` - Bind address (default: 127.0.0.1)
//! - `PODBRIDGE_PORT` - Listen port (default: 3002)
//! - `PROVIDER_API_URL` - Order API base URL
//! - `PROVIDER_CATALOG_URL` - Catalog API base URL
//! - `PROVIDER_TIMEOUT_SECS` - Outbound call timeout (default: 30)
//! - `PROVIDER_WEBHOOK_SECRET` - Secret for the platform webhook endpoint
//! - `CREDENTIAL_CACHE_TTL_SECS` - Resolved credential cache TTL (default: 300)
//! - `SYNC_INTERVAL_SECS` - Background sync period (unset disables the worker)
//! - `SYNC_STALE_AFTER_SECS` - Records quieter than this are synced (default: 3600)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//!
//! ## Optional (platform account - both or neither)
//! - `PROVIDER_API_KEY` - Shared provider API key
//! - `PROVIDER_STORE_ID` - Shared provider store id
//!
//! ## Optional (TLS)
//! - `PODBRIDGE_TLS_CERT` - PEM-encoded certificate chain
//! - `PODBRIDGE_TLS_KEY` - PEM-encoded private key

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::provider::ProviderClientConfig;
use crate::services::PlatformAccount;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const ENCRYPTION_KEY_BYTES: usize = 32;

pub const DEFAULT_PROVIDER_API_URL: &str = "https://order.gelatoapis.com/v4";
pub const DEFAULT_PROVIDER_CATALOG_URL: &str = "https://product.gelatoapis.com/v3";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Fulfillment service configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    /// Public base URL, without trailing slash
    pub base_url: String,
    /// Base64 AES-256-GCM key for credentials at rest
    pub encryption_key: SecretString,
    pub provider: ProviderConfig,
    pub credential_cache_ttl: Duration,
    pub sync: SyncConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
    pub tls: Option<TlsConfig>,
}

/// Provider API configuration.
///
/// Implements `Debug` manually to redact the platform secrets.
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_url: String,
    pub catalog_url: String,
    pub timeout: Duration,
    /// Shared platform account, used when a seller has no usable credential
    pub platform: Option<PlatformAccount>,
    pub webhook_secret: Option<SecretString>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_url", &self.api_url)
            .field("catalog_url", &self.catalog_url)
            .field("timeout", &self.timeout)
            .field("platform", &self.platform)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProviderConfig {
    /// Load only the provider settings (`PROVIDER_*`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value is invalid or the platform pair is incomplete.
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout = get_duration_secs("PROVIDER_TIMEOUT_SECS", 30)?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "PROVIDER_TIMEOUT_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let platform = match (
            get_optional_env("PROVIDER_API_KEY"),
            get_optional_env("PROVIDER_STORE_ID"),
        ) {
            (Some(key), Some(store_id)) => {
                validate_secret_strength(&key, "PROVIDER_API_KEY")?;
                Some(PlatformAccount {
                    api_key: SecretString::from(key),
                    provider_store_id: store_id,
                })
            }
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidEnvVar(
                    "PROVIDER_*".to_string(),
                    "Both PROVIDER_API_KEY and PROVIDER_STORE_ID must be set together".to_string(),
                ));
            }
        };

        let webhook_secret = get_optional_env("PROVIDER_WEBHOOK_SECRET")
            .map(|secret| {
                validate_secret_strength(&secret, "PROVIDER_WEBHOOK_SECRET")?;
                Ok::<_, ConfigError>(SecretString::from(secret))
            })
            .transpose()?;

        Ok(Self {
            api_url: get_env_or_default("PROVIDER_API_URL", DEFAULT_PROVIDER_API_URL),
            catalog_url: get_env_or_default("PROVIDER_CATALOG_URL", DEFAULT_PROVIDER_CATALOG_URL),
            timeout,
            platform,
            webhook_secret,
        })
    }

    /// Settings for the HTTP client.
    #[must_use]
    pub fn client_config(&self) -> ProviderClientConfig {
        ProviderClientConfig {
            order_api_url: self.api_url.clone(),
            catalog_api_url: self.catalog_url.clone(),
            timeout: self.timeout,
        }
    }
}

/// Background sync worker configuration.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// `None` disables the worker.
    pub interval: Option<Duration>,
    pub stale_after: Duration,
}

impl SyncConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let interval = get_optional_env("SYNC_INTERVAL_SECS")
            .map(|value| parse_secs("SYNC_INTERVAL_SECS", &value))
            .transpose()?
            .filter(|interval| !interval.is_zero());
        Ok(Self {
            interval,
            stale_after: get_duration_secs("SYNC_STALE_AFTER_SECS", 3600)?,
        })
    }
}

/// TLS configuration for HTTPS.
#[derive(Clone)]
pub struct TlsConfig {
    /// PEM-encoded certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: SecretString,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert_pem", &"[CERTIFICATE]")
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

impl TlsConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let cert_pem = get_optional_env("PODBRIDGE_TLS_CERT");
        let key_pem = get_optional_env("PODBRIDGE_TLS_KEY");

        match (cert_pem, key_pem) {
            (Some(cert), Some(key)) => Ok(Some(Self {
                cert_pem: cert,
                key_pem: SecretString::from(key),
            })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "PODBRIDGE_TLS_*".to_string(),
                "Both PODBRIDGE_TLS_CERT and PODBRIDGE_TLS_KEY must be set together".to_string(),
            )),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("PODBRIDGE_DATABASE_URL")?;
        let host = get_env_or_default("PODBRIDGE_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("PODBRIDGE_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("PODBRIDGE_PORT", "3002")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("PODBRIDGE_PORT".to_string(), e.to_string()))?;
        let base_url = get_required_env("PODBRIDGE_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let encryption_key = get_required_secret("PODBRIDGE_ENCRYPTION_KEY")?;
        validate_encryption_key(&encryption_key, "PODBRIDGE_ENCRYPTION_KEY")?;

        let provider = ProviderConfig::from_env()?;
        let credential_cache_ttl = get_duration_secs("CREDENTIAL_CACHE_TTL_SECS", 300)?;
        let sync = SyncConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);
        let tls = TlsConfig::from_env()?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            encryption_key,
            provider,
            credential_cache_ttl,
            sync,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
            tls,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if neither variable is set.
pub fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable; blank counts as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn get_duration_secs(key: &str, default_secs: u64) -> Result<Duration, ConfigError> {
    get_optional_env(key).map_or(Ok(Duration::from_secs(default_secs)), |value| {
        parse_secs(key, &value)
    })
}

/// Validate that the encryption key is base64 for exactly 32 bytes.
fn validate_encryption_key(key: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let bytes = STANDARD.decode(key.expose_secret().trim()).map_err(|e| {
        ConfigError::InvalidEnvVar(var_name.to_string(), format!("not valid base64: {e}"))
    })?;
    if bytes.len() != ENCRYPTION_KEY_BYTES {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must decode to {ENCRYPTION_KEY_BYTES} bytes (got {})",
                bytes.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= \
                 {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_validate_secret_strength() {
        assert!(matches!(
            validate_secret_strength("your-api-key-here", "TEST_VAR"),
            Err(ConfigError::InsecureSecret(_, _))
        ));
        assert!(validate_secret_strength("changeme123", "TEST_VAR").is_err());
        assert!(validate_secret_strength(&"a".repeat(33), "TEST_VAR").is_err());
        let uuid = "3f9c2e71-8a4b-4d6e-b1f0-7c5a9e2d8b64";
        assert!(validate_secret_strength(uuid, "TEST_VAR").is_ok());
    }

    #[test]
    fn test_validate_encryption_key() {
        let good = SecretString::from(STANDARD.encode([3u8; 32]));
        assert!(validate_encryption_key(&good, "KEY").is_ok());

        let short = SecretString::from(STANDARD.encode([3u8; 16]));
        assert!(matches!(
            validate_encryption_key(&short, "KEY"),
            Err(ConfigError::InsecureSecret(_, _))
        ));

        let garbage = SecretString::from("not base64!!");
        assert!(matches!(
            validate_encryption_key(&garbage, "KEY"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("X", " 45 ").unwrap(), Duration::from_secs(45));
        assert!(parse_secs("X", "-1").is_err());
        assert!(parse_secs("X", "soon").is_err());
    }

    #[test]
    fn test_provider_config_debug_redacts_secrets() {
        let config = ProviderConfig {
            api_url: DEFAULT_PROVIDER_API_URL.to_string(),
            catalog_url: DEFAULT_PROVIDER_CATALOG_URL.to_string(),
            timeout: Duration::from_secs(30),
            platform: Some(PlatformAccount {
                api_key: SecretString::from("super-secret-platform-key"),
                provider_store_id: "platform_store".to_string(),
            }),
            webhook_secret: Some(SecretString::from("super-secret-webhook")),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("order.gelatoapis.com"));
        assert!(debug_output.contains("platform_store"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super-secret-platform-key"));
        assert!(!debug_output.contains("super-secret-webhook"));
    }

    #[test]
    fn test_client_config_and_socket_addr() {
        let config = ServerConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3002,
            base_url: "http://localhost:3002".to_string(),
            encryption_key: SecretString::from(STANDARD.encode([3u8; 32])),
            provider: ProviderConfig {
                api_url: "http://provider.test/v4".to_string(),
                catalog_url: "http://catalog.test/v3".to_string(),
                timeout: Duration::from_secs(5),
                platform: None,
                webhook_secret: None,
            },
            credential_cache_ttl: Duration::from_secs(300),
            sync: SyncConfig {
                interval: None,
                stale_after: Duration::from_secs(3600),
            },
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.1,
            tls: None,
        };

        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3002);

        let client = config.provider.client_config();
        assert_eq!(client.order_api_url, "http://provider.test/v4");
        assert_eq!(client.timeout, Duration::from_secs(5));
    }
}
