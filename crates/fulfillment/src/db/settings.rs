//! Global settings (key/value JSONB).
//!
//! Callers apply their own documented defaults; a missing key is `None`.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use super::RepositoryError;

/// Default shipping method for print-on-demand submissions.
pub const POD_DEFAULT_SHIPPING_METHOD: &str = "pod_default_shipping_method";
/// Days between delivery and automatic escrow release.
pub const ESCROW_DEFAULT_HOLD_DAYS: &str = "escrow_default_hold_days";
/// Platform-wide switch for print-on-demand fulfillment.
pub const POD_ENABLED: &str = "pod_enabled";

/// Read access to global settings.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Get a global setting value.
    async fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, RepositoryError>;
}

/// Read a string setting, falling back to `default` when unset or not a string.
///
/// # Errors
///
/// Returns an error if the settings lookup fails.
pub async fn string_setting(
    settings: &dyn SettingsRepository,
    key: &str,
    default: &str,
) -> Result<String, RepositoryError> {
    Ok(settings
        .get_setting(key)
        .await?
        .and_then(|value| value.as_str().map(str::to_owned))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_owned()))
}

/// Read a non-negative integer setting. Numeric strings are accepted.
///
/// # Errors
///
/// Returns an error if the settings lookup fails.
pub async fn u32_setting(
    settings: &dyn SettingsRepository,
    key: &str,
    default: u32,
) -> Result<u32, RepositoryError> {
    let value = settings.get_setting(key).await?;
    let parsed = match value {
        Some(JsonValue::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or(default))
}

/// Read a boolean setting. `"true"`/`"false"` strings are accepted.
///
/// # Errors
///
/// Returns an error if the settings lookup fails.
pub async fn bool_setting(
    settings: &dyn SettingsRepository,
    key: &str,
    default: bool,
) -> Result<bool, RepositoryError> {
    let value = settings.get_setting(key).await?;
    let parsed = match value {
        Some(JsonValue::Bool(b)) => Some(b),
        Some(JsonValue::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or(default))
}

/// `PostgreSQL` implementation of [`SettingsRepository`].
pub struct PgSettingsRepository {
    pool: PgPool,
}

impl PgSettingsRepository {
    /// Create a new settings repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for PgSettingsRepository {
    async fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, RepositoryError> {
        let result = sqlx::query_scalar::<_, JsonValue>("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_string_setting_defaults() {
        let store = InMemoryStore::new();
        assert_eq!(
            string_setting(&store, POD_DEFAULT_SHIPPING_METHOD, "standard")
                .await
                .expect("lookup"),
            "standard"
        );

        store.set_setting(POD_DEFAULT_SHIPPING_METHOD, json!("express"));
        assert_eq!(
            string_setting(&store, POD_DEFAULT_SHIPPING_METHOD, "standard")
                .await
                .expect("lookup"),
            "express"
        );
    }

    #[tokio::test]
    async fn test_u32_setting_accepts_numbers_and_strings() {
        let store = InMemoryStore::new();
        assert_eq!(u32_setting(&store, ESCROW_DEFAULT_HOLD_DAYS, 7).await.expect("lookup"), 7);

        store.set_setting(ESCROW_DEFAULT_HOLD_DAYS, json!(14));
        assert_eq!(u32_setting(&store, ESCROW_DEFAULT_HOLD_DAYS, 7).await.expect("lookup"), 14);

        store.set_setting(ESCROW_DEFAULT_HOLD_DAYS, json!("3"));
        assert_eq!(u32_setting(&store, ESCROW_DEFAULT_HOLD_DAYS, 7).await.expect("lookup"), 3);

        store.set_setting(ESCROW_DEFAULT_HOLD_DAYS, json!(-2));
        assert_eq!(u32_setting(&store, ESCROW_DEFAULT_HOLD_DAYS, 7).await.expect("lookup"), 7);
    }

    #[tokio::test]
    async fn test_bool_setting() {
        let store = InMemoryStore::new();
        assert!(!bool_setting(&store, POD_ENABLED, false).await.expect("lookup"));
        store.set_setting(POD_ENABLED, json!("true"));
        assert!(bool_setting(&store, POD_ENABLED, false).await.expect("lookup"));
    }
}
