//! Credential verification against the provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use podbridge_core::{StoreId, mask_api_key};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::models::ConnectionTestRecord;
use crate::provider::{CredentialSource, FulfillmentProvider, ProviderCredential, ProviderError};

/// Result of a connection test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tested_at: DateTime<Utc>,
}

impl ConnectionTestResult {
    #[must_use]
    pub fn record(&self) -> ConnectionTestRecord {
        ConnectionTestRecord {
            verified: self.success,
            tested_at: self.tested_at,
            error: self.error.clone(),
        }
    }
}

/// Validates a credential pair with a lightweight authenticated call.
#[derive(Clone)]
pub struct ConnectionTester {
    provider: Arc<dyn FulfillmentProvider>,
}

impl ConnectionTester {
    #[must_use]
    pub fn new(provider: Arc<dyn FulfillmentProvider>) -> Self {
        Self { provider }
    }

    /// Test an API key and provider store id. Never fails; the outcome is in the result.
    #[instrument(skip(self, api_key), fields(api_key = %mask_api_key(api_key.expose_secret())))]
    pub async fn test(
        &self,
        store_id: Option<&StoreId>,
        api_key: &SecretString,
        provider_store_id: &str,
    ) -> ConnectionTestResult {
        let tested_at = Utc::now();
        let api_key = api_key.expose_secret().trim();
        let provider_store_id = provider_store_id.trim();

        if api_key.is_empty() || provider_store_id.is_empty() {
            return ConnectionTestResult {
                success: false,
                error: Some("API key and provider store id are required".to_string()),
                tested_at,
            };
        }

        let source = store_id
            .map_or(CredentialSource::Platform, |id| CredentialSource::Seller(id.clone()));
        let credential = ProviderCredential::new(
            SecretString::from(api_key.to_owned()),
            provider_store_id,
            source,
        );

        match self.provider.verify_credentials(&credential).await {
            Ok(()) => {
                info!("Provider connection verified");
                ConnectionTestResult {
                    success: true,
                    error: None,
                    tested_at,
                }
            }
            Err(e) => {
                warn!(error = %e, "Provider connection test failed");
                ConnectionTestResult {
                    success: false,
                    error: Some(describe_failure(&e)),
                    tested_at,
                }
            }
        }
    }
}

fn describe_failure(err: &ProviderError) -> String {
    match err {
        ProviderError::Unauthorized(_) => "Invalid API key - authentication failed".to_string(),
        ProviderError::NotFound(_) => {
            "API endpoint not found - the key may not have catalog access".to_string()
        }
        ProviderError::Timeout | ProviderError::Http(_) | ProviderError::Unavailable(_) => {
            format!("Connection failed: {err}")
        }
        other => match other.status() {
            Some(status) => format!("Connection failed ({status})"),
            None => format!("Connection failed: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScriptedProvider;
    use crate::provider::fake::ScriptedFailure;

    fn tester() -> (Arc<ScriptedProvider>, ConnectionTester) {
        let provider = Arc::new(ScriptedProvider::new());
        (provider.clone(), ConnectionTester::new(provider))
    }

    #[tokio::test]
    async fn test_successful_connection() {
        let (provider, tester) = tester();
        let result = tester
            .test(None, &SecretString::from("  key-with-spaces  "), "prov_store")
            .await;
        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(provider.verified_keys(), vec!["key-with-spaces".to_string()]);
        assert!(result.record().verified);
    }

    #[tokio::test]
    async fn test_rejected_key_reports_authentication_failure() {
        let (provider, tester) = tester();
        provider.fail_verify(Some(ScriptedFailure::Unauthorized("bad key".into())));
        let result = tester.test(None, &SecretString::from("key"), "prov_store").await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Invalid API key - authentication failed")
        );
        assert!(!result.record().verified);
    }

    #[tokio::test]
    async fn test_other_status_reports_code() {
        let (provider, tester) = tester();
        provider.fail_verify(Some(ScriptedFailure::Upstream(418, "teapot".into())));
        let result = tester.test(None, &SecretString::from("key"), "prov_store").await;
        assert_eq!(result.error.as_deref(), Some("Connection failed (418)"));
    }

    #[tokio::test]
    async fn test_missing_fields_skip_provider_call() {
        let (provider, tester) = tester();
        let result = tester.test(None, &SecretString::from(" "), "prov_store").await;
        assert!(!result.success);
        assert!(provider.verified_keys().is_empty());
    }
}
