//! Seller-facing credential management.
//!
//! Every write drops the store's resolved-credential cache entry so the next
//! outbound call sees the change.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use podbridge_core::{MASKED_SECRET, StoreId, mask_api_key};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::connection::{ConnectionTestResult, ConnectionTester};
use super::credential_resolver::CredentialResolver;
use super::credential_store::{CredentialStore, NewCredential};
use crate::error::AppError;
use crate::models::{SellerCredential, StoredCredential};

/// Path segment identifying a store in its webhook URL.
#[must_use]
pub fn store_webhook_key(store_id: &StoreId) -> String {
    URL_SAFE_NO_PAD.encode(store_id.as_str())
}

/// Inverse of [`store_webhook_key`].
#[must_use]
pub fn decode_store_webhook_key(key: &str) -> Option<StoreId> {
    let bytes = URL_SAFE_NO_PAD.decode(key.trim_end_matches('=')).ok()?;
    let id = String::from_utf8(bytes).ok()?;
    (!id.is_empty()).then(|| StoreId::new(id))
}

/// Seller settings as shown to the seller (secrets masked).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerSettingsView {
    pub store_id: StoreId,
    pub configured: bool,
    pub enabled: bool,
    pub verified: bool,
    pub provider_store_id: Option<String>,
    pub api_key_masked: Option<String>,
    pub webhook_secret_masked: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_test_at: Option<DateTime<Utc>>,
    pub connection_error: Option<String>,
    pub account_name: Option<String>,
    pub webhook_url: Option<String>,
    pub notes: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SellerSettingsView {
    fn unconfigured(store_id: &StoreId) -> Self {
        Self {
            store_id: store_id.clone(),
            configured: false,
            enabled: false,
            verified: false,
            provider_store_id: None,
            api_key_masked: None,
            webhook_secret_masked: None,
            verified_at: None,
            last_test_at: None,
            connection_error: None,
            account_name: None,
            webhook_url: None,
            notes: None,
            updated_at: None,
        }
    }

    fn from_row(row: &StoredCredential, api_key_masked: String) -> Self {
        Self {
            store_id: row.store_id.clone(),
            configured: true,
            enabled: row.enabled,
            verified: row.verified,
            provider_store_id: Some(row.provider_store_id.clone()),
            api_key_masked: Some(api_key_masked),
            webhook_secret_masked: row
                .webhook_secret_encrypted
                .as_ref()
                .map(|_| MASKED_SECRET.to_owned()),
            verified_at: row.verified_at,
            last_test_at: row.last_test_at,
            connection_error: row.connection_error.clone(),
            account_name: row.account_name.clone(),
            webhook_url: row.webhook_url.clone(),
            notes: row.notes.clone(),
            updated_at: Some(row.updated_at),
        }
    }
}

/// Create-or-update request. Omitted or masked secrets keep the stored value.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSettingsRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub provider_store_id: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub account_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl std::fmt::Debug for SaveSettingsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveSettingsRequest")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("provider_store_id", &self.provider_store_id)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// A submitted secret, or `None` when blank or echoing the masked form.
fn fresh_secret(value: Option<&str>) -> Option<SecretString> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.contains(MASKED_SECRET))
        .map(|v| SecretString::from(v.to_owned()))
}

/// Manages a seller's provider credentials.
#[derive(Clone)]
pub struct SellerSettingsService {
    store: CredentialStore,
    resolver: CredentialResolver,
    tester: ConnectionTester,
    public_base_url: String,
}

impl SellerSettingsService {
    #[must_use]
    pub fn new(
        store: CredentialStore,
        resolver: CredentialResolver,
        tester: ConnectionTester,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            resolver,
            tester,
            public_base_url: public_base_url.into(),
        }
    }

    /// Tenant webhook URL for a store.
    #[must_use]
    pub fn webhook_url(&self, store_id: &StoreId) -> String {
        format!(
            "{}/webhooks/provider/{}",
            self.public_base_url.trim_end_matches('/'),
            store_webhook_key(store_id)
        )
    }

    fn view(&self, row: &StoredCredential) -> SellerSettingsView {
        let masked = self
            .store
            .decrypt(row)
            .map_or_else(|_| MASKED_SECRET.to_owned(), |c| mask_api_key(c.api_key.expose_secret()));
        SellerSettingsView::from_row(row, masked)
    }

    async fn existing(
        &self,
        store_id: &StoreId,
    ) -> Result<Option<(StoredCredential, SellerCredential)>, AppError> {
        match self.store.load(store_id).await? {
            Some(row) => {
                let decrypted = self.store.decrypt(&row)?;
                Ok(Some((row, decrypted)))
            }
            None => Ok(None),
        }
    }

    /// Current settings with masked secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store fails.
    #[instrument(skip(self))]
    pub async fn get(&self, store_id: &StoreId) -> Result<SellerSettingsView, AppError> {
        Ok(self
            .store
            .load(store_id)
            .await?
            .map_or_else(|| SellerSettingsView::unconfigured(store_id), |row| self.view(&row)))
    }

    /// Create or update a store's credentials.
    ///
    /// The credential pair is tested first; a failed test rejects the save.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if required fields are missing or the
    /// connection test fails.
    #[instrument(skip(self, request))]
    pub async fn upsert(
        &self,
        store_id: &StoreId,
        request: SaveSettingsRequest,
    ) -> Result<SellerSettingsView, AppError> {
        let existing = self.existing(store_id).await?;

        let api_key = fresh_secret(request.api_key.as_deref())
            .or_else(|| existing.as_ref().map(|(_, c)| c.api_key.clone()))
            .ok_or_else(|| AppError::Validation("API key is required".to_string()))?;

        let provider_store_id = request
            .provider_store_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .or_else(|| existing.as_ref().map(|(_, c)| c.provider_store_id.clone()))
            .ok_or_else(|| AppError::Validation("Provider store id is required".to_string()))?;

        let webhook_secret = fresh_secret(request.webhook_secret.as_deref())
            .or_else(|| existing.as_ref().and_then(|(_, c)| c.webhook_secret.clone()));

        let test = self
            .tester
            .test(Some(store_id), &api_key, &provider_store_id)
            .await;
        if !test.success {
            return Err(AppError::Validation(format!(
                "Connection test failed: {}",
                test.error.as_deref().unwrap_or("unknown error")
            )));
        }

        let existing_row = existing.as_ref().map(|(row, _)| row);
        let credential = NewCredential {
            store_id: store_id.clone(),
            api_key,
            provider_store_id,
            webhook_secret,
            enabled: request
                .enabled
                .or_else(|| existing_row.map(|row| row.enabled))
                .unwrap_or(false),
            account_name: request
                .account_name
                .or_else(|| existing_row.and_then(|row| row.account_name.clone())),
            webhook_url: Some(self.webhook_url(store_id)),
            notes: request.notes.or_else(|| existing_row.and_then(|row| row.notes.clone())),
        };

        let row = self.store.save(&credential, &test.record()).await?;
        self.resolver.invalidate(store_id).await;

        info!(
            created = existing.is_none(),
            enabled = row.enabled,
            "Seller fulfillment settings saved"
        );
        Ok(self.view(&row))
    }

    /// Enable or disable the seller's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if nothing is configured, or
    /// [`AppError::Validation`] when enabling an unverified credential.
    #[instrument(skip(self))]
    pub async fn set_enabled(
        &self,
        store_id: &StoreId,
        enabled: bool,
    ) -> Result<SellerSettingsView, AppError> {
        let row = self.store.load(store_id).await?.ok_or_else(|| {
            AppError::NotFound(
                "Fulfillment settings not found, configure credentials first".to_string(),
            )
        })?;

        if enabled && !row.verified {
            return Err(AppError::Validation(
                "Cannot enable fulfillment: connection is not verified, test the credentials first"
                    .to_string(),
            ));
        }

        let row = self.store.set_enabled(store_id, enabled).await?;
        self.resolver.invalidate(store_id).await;

        info!(enabled, "Seller fulfillment toggled");
        Ok(self.view(&row))
    }

    /// Remove the seller's credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if nothing was configured.
    #[instrument(skip(self))]
    pub async fn delete(&self, store_id: &StoreId) -> Result<(), AppError> {
        let deleted = self.store.delete(store_id).await?;
        self.resolver.invalidate(store_id).await;

        if !deleted {
            return Err(AppError::NotFound("Fulfillment settings not found".to_string()));
        }
        info!("Seller fulfillment settings deleted");
        Ok(())
    }

    /// Re-test the stored credentials and record the result.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if nothing is configured.
    #[instrument(skip(self))]
    pub async fn test(&self, store_id: &StoreId) -> Result<ConnectionTestResult, AppError> {
        let (_, credential) = self
            .existing(store_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Fulfillment settings not found".to_string()))?;

        let result = self
            .tester
            .test(Some(store_id), &credential.api_key, &credential.provider_store_id)
            .await;
        self.store.record_test(store_id, &result.record()).await?;
        self.resolver.invalidate(store_id).await;

        Ok(result)
    }
}
