//! Provider connection test.
//!
//! # Usage
//!
//! ```bash
//! export SELLER_KEY=...
//! podbridge-cli test-connection --api-key-env SELLER_KEY --store-id 3f1c...
//! ```
//!
//! The key is read from the named environment variable so it never appears in
//! shell history or process listings.

use std::sync::Arc;

use async_trait::async_trait;
use podbridge_core::StoreId;
use podbridge_fulfillment::config::{ConfigError, ProviderConfig};
use podbridge_fulfillment::provider::{
    CredentialProvider, ProviderClient, ProviderCredential, ProviderError,
};
use podbridge_fulfillment::services::{ConnectionTestResult, ConnectionTester};
use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Provider client: {0}")]
    Provider(#[from] ProviderError),

    #[error("Connection test failed: {0}")]
    Failed(String),
}

/// The connection test supplies its credential explicitly; nothing is stored.
struct NoStoredCredentials;

#[async_trait]
impl CredentialProvider for NoStoredCredentials {
    async fn credential_for(
        &self,
        _store_id: Option<&StoreId>,
    ) -> Result<ProviderCredential, ProviderError> {
        Err(ProviderError::NoCredentials(
            "connection test uses an explicit credential".to_string(),
        ))
    }
}

/// Test an API key and provider store id against the provider.
///
/// # Errors
///
/// Returns [`ConnectionError::Failed`] if the provider rejects the pair.
pub async fn test(
    api_key_env: &str,
    provider_store_id: &str,
) -> Result<ConnectionTestResult, ConnectionError> {
    dotenvy::dotenv().ok();

    let api_key = std::env::var(api_key_env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
        .ok_or_else(|| ConnectionError::MissingEnvVar(api_key_env.to_owned()))?;

    let config = ProviderConfig::from_env()?;
    let client = ProviderClient::new(&config.client_config(), Arc::new(NoStoredCredentials))?;
    let tester = ConnectionTester::new(Arc::new(client));

    tracing::info!(api_url = %config.api_url, "Testing provider connection...");
    let result = tester.test(None, &api_key, provider_store_id).await;

    if !result.success {
        return Err(ConnectionError::Failed(
            result.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    tracing::info!(tested_at = %result.tested_at, "Connection verified");
    Ok(result)
}
