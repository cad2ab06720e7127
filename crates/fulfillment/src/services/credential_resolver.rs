//! Tenant credential resolution with platform fallback.
//!
//! Resolution order for a store:
//! 1. A cached entry younger than the cache TTL
//! 2. The seller's own credential, if enabled and verified
//! 3. The platform account, if configured
//!
//! Anything else is [`ProviderError::NoCredentials`].

use std::sync::Arc;

use async_trait::async_trait;
use podbridge_core::StoreId;
use secrecy::SecretString;
use tracing::{debug, error, info, instrument};

use super::credential_cache::CredentialCache;
use super::credential_store::CredentialStore;
use crate::provider::{CredentialProvider, CredentialSource, ProviderCredential, ProviderError};

/// The shared platform account used when a seller has none.
#[derive(Clone)]
pub struct PlatformAccount {
    pub api_key: SecretString,
    pub provider_store_id: String,
}

impl std::fmt::Debug for PlatformAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformAccount")
            .field("api_key", &"[REDACTED]")
            .field("provider_store_id", &self.provider_store_id)
            .finish()
    }
}

/// Resolves the credential to use for a store's outbound calls.
#[derive(Clone)]
pub struct CredentialResolver {
    store: CredentialStore,
    cache: Arc<dyn CredentialCache>,
    platform: Option<PlatformAccount>,
}

impl CredentialResolver {
    #[must_use]
    pub fn new(
        store: CredentialStore,
        cache: Arc<dyn CredentialCache>,
        platform: Option<PlatformAccount>,
    ) -> Self {
        Self {
            store,
            cache,
            platform,
        }
    }

    #[must_use]
    pub const fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Whether a platform account is configured.
    #[must_use]
    pub const fn has_platform_account(&self) -> bool {
        self.platform.is_some()
    }

    /// The platform credential.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NoCredentials`] if no platform account is configured.
    pub fn platform(&self) -> Result<ProviderCredential, ProviderError> {
        self.platform
            .as_ref()
            .map(|account| {
                ProviderCredential::new(
                    account.api_key.clone(),
                    account.provider_store_id.clone(),
                    CredentialSource::Platform,
                )
            })
            .ok_or_else(|| {
                ProviderError::NoCredentials("platform account not configured".to_string())
            })
    }

    /// Resolve the active credential for a store.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NoCredentials`] if neither the seller nor the
    /// platform has a usable credential, or [`ProviderError::CredentialLookup`]
    /// if the credential store fails.
    #[instrument(skip(self), fields(store_id = %store_id))]
    pub async fn resolve(&self, store_id: &StoreId) -> Result<ProviderCredential, ProviderError> {
        if let Some(cached) = self.cache.get(store_id).await {
            debug!(platform_fallback = cached.is_platform_fallback(), "Credential cache hit");
            return Ok(cached);
        }

        let row = self
            .store
            .load(store_id)
            .await
            .map_err(|e| ProviderError::CredentialLookup(e.to_string()))?;

        let seller = row.and_then(|row| match self.store.decrypt(&row) {
            Ok(credential) => Some(credential),
            Err(e) => {
                error!(
                    error = %e,
                    "Stored credential could not be decrypted, treating as unusable"
                );
                None
            }
        });

        let credential = match seller {
            Some(seller) if seller.is_usable() => {
                let credential = ProviderCredential::new(
                    seller.api_key,
                    seller.provider_store_id,
                    CredentialSource::Seller(store_id.clone()),
                );
                info!(api_key = %credential.masked_key(), "Using seller credential");
                credential
            }
            _ => {
                let credential = self.platform().map_err(|_| {
                    ProviderError::NoCredentials(format!(
                        "store {store_id} has no usable credential and no platform account \
                         is configured"
                    ))
                })?;
                info!("Using platform fallback credential");
                credential
            }
        };

        self.cache.insert(store_id.clone(), credential.clone()).await;
        Ok(credential)
    }

    /// Drop the cached credential for a store.
    pub async fn invalidate(&self, store_id: &StoreId) {
        self.cache.invalidate(store_id).await;
        debug!(store_id = %store_id, "Credential cache invalidated");
    }
}

#[async_trait]
impl CredentialProvider for CredentialResolver {
    async fn credential_for(
        &self,
        store_id: Option<&StoreId>,
    ) -> Result<ProviderCredential, ProviderError> {
        match store_id {
            Some(store_id) => self.resolve(store_id).await,
            None => self.platform(),
        }
    }
}
