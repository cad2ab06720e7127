//! Encrypting wrapper around the credential repository.
//!
//! Plaintext secrets exist only in [`SellerCredential`] and [`NewCredential`];
//! everything that reaches the repository is ciphertext.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use podbridge_core::StoreId;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

use crate::crypto::{CryptoError, SecretCipher};
use crate::db::{CredentialRepository, RepositoryError};
use crate::models::{ConnectionTestRecord, CredentialUpsert, SellerCredential, StoredCredential};

/// Plaintext credential to persist for a store.
#[derive(Clone)]
pub struct NewCredential {
    pub store_id: StoreId,
    pub api_key: SecretString,
    pub provider_store_id: String,
    pub webhook_secret: Option<SecretString>,
    pub enabled: bool,
    pub account_name: Option<String>,
    pub webhook_url: Option<String>,
    pub notes: Option<String>,
}

impl std::fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewCredential")
            .field("store_id", &self.store_id)
            .field("api_key", &"[REDACTED]")
            .field("provider_store_id", &self.provider_store_id)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Error loading or saving a credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<CredentialStoreError> for crate::error::AppError {
    fn from(err: CredentialStoreError) -> Self {
        match err {
            CredentialStoreError::Repository(e) => e.into(),
            CredentialStoreError::Crypto(e) => e.into(),
        }
    }
}

/// Persists per-store provider credentials, encrypting secrets at rest.
#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn CredentialRepository>,
    cipher: Arc<dyn SecretCipher>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(repo: Arc<dyn CredentialRepository>, cipher: Arc<dyn SecretCipher>) -> Self {
        Self { repo, cipher }
    }

    /// Load the raw (still encrypted) row.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn load(
        &self,
        store_id: &StoreId,
    ) -> Result<Option<StoredCredential>, RepositoryError> {
        self.repo.get(store_id).await
    }

    /// Decrypt a stored row.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if either secret cannot be decrypted.
    pub fn decrypt(&self, row: &StoredCredential) -> Result<SellerCredential, CryptoError> {
        let api_key = self.cipher.decrypt(&row.api_key_encrypted)?;
        let webhook_secret = row
            .webhook_secret_encrypted
            .as_deref()
            .map(|ciphertext| self.cipher.decrypt(ciphertext))
            .transpose()?;

        Ok(SellerCredential {
            store_id: row.store_id.clone(),
            api_key: SecretString::from(api_key.trim().to_owned()),
            provider_store_id: row.provider_store_id.trim().to_owned(),
            webhook_secret: webhook_secret.map(|s| SecretString::from(s.trim().to_owned())),
            enabled: row.enabled,
            verified: row.verified,
        })
    }

    /// Load and decrypt a store's credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails or decryption fails.
    pub async fn seller_credential(
        &self,
        store_id: &StoreId,
    ) -> Result<Option<SellerCredential>, CredentialStoreError> {
        match self.load(store_id).await? {
            Some(row) => Ok(Some(self.decrypt(&row)?)),
            None => Ok(None),
        }
    }

    /// Decrypted webhook secret of a store, if one is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository fails or decryption fails.
    pub async fn webhook_secret(
        &self,
        store_id: &StoreId,
    ) -> Result<Option<SecretString>, CredentialStoreError> {
        let Some(row) = self.load(store_id).await? else {
            return Ok(None);
        };
        let secret = row
            .webhook_secret_encrypted
            .as_deref()
            .map(|ciphertext| self.cipher.decrypt(ciphertext))
            .transpose()?;
        Ok(secret.map(SecretString::from))
    }

    /// Encrypt and persist a credential together with its connection test result.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the repository fails.
    #[instrument(skip(self, credential, test), fields(store_id = %credential.store_id))]
    pub async fn save(
        &self,
        credential: &NewCredential,
        test: &ConnectionTestRecord,
    ) -> Result<StoredCredential, CredentialStoreError> {
        let api_key_encrypted = self.cipher.encrypt(credential.api_key.expose_secret())?;
        let webhook_secret_encrypted = credential
            .webhook_secret
            .as_ref()
            .map(|secret| self.cipher.encrypt(secret.expose_secret()))
            .transpose()?;

        let verified_at: Option<DateTime<Utc>> = test.verified.then_some(test.tested_at);
        let row = self
            .repo
            .upsert(&CredentialUpsert {
                store_id: credential.store_id.clone(),
                api_key_encrypted,
                provider_store_id: credential.provider_store_id.clone(),
                webhook_secret_encrypted,
                enabled: credential.enabled,
                verified: test.verified,
                verified_at,
                last_test_at: Some(test.tested_at),
                connection_error: test.error.clone(),
                account_name: credential.account_name.clone(),
                webhook_url: credential.webhook_url.clone(),
                notes: credential.notes.clone(),
            })
            .await?;

        Ok(row)
    }

    /// Record a connection test result on an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the store has no credentials.
    pub async fn record_test(
        &self,
        store_id: &StoreId,
        record: &ConnectionTestRecord,
    ) -> Result<StoredCredential, RepositoryError> {
        self.repo.record_test(store_id, record).await
    }

    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if the store has no credentials.
    pub async fn set_enabled(
        &self,
        store_id: &StoreId,
        enabled: bool,
    ) -> Result<StoredCredential, RepositoryError> {
        self.repo.set_enabled(store_id, enabled).await
    }

    /// # Errors
    ///
    /// Returns an error if the repository fails.
    pub async fn delete(&self, store_id: &StoreId) -> Result<bool, RepositoryError> {
        self.repo.delete(store_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmCipher;
    use crate::db::InMemoryStore;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn store() -> (Arc<InMemoryStore>, CredentialStore) {
        let memory = Arc::new(InMemoryStore::new());
        let key = SecretString::from(STANDARD.encode([7u8; 32]));
        let cipher = Arc::new(AesGcmCipher::from_base64_key(&key).unwrap());
        (memory.clone(), CredentialStore::new(memory, cipher))
    }

    fn new_credential() -> NewCredential {
        NewCredential {
            store_id: StoreId::new("store_1"),
            api_key: SecretString::from(" seller-api-key-0000000000000 "),
            provider_store_id: "prov_store".to_string(),
            webhook_secret: Some(SecretString::from("whsec_1")),
            enabled: true,
            account_name: None,
            webhook_url: None,
            notes: None,
        }
    }

    fn passed_test() -> ConnectionTestRecord {
        ConnectionTestRecord {
            verified: true,
            tested_at: Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_save_encrypts_and_load_decrypts() {
        let (_memory, store) = store();
        let row = store.save(&new_credential(), &passed_test()).await.unwrap();

        assert!(!row.api_key_encrypted.contains("seller-api-key"));
        assert!(row.verified);
        assert!(row.verified_at.is_some());

        let seller = store
            .seller_credential(&StoreId::new("store_1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seller.api_key.expose_secret(), "seller-api-key-0000000000000");
        assert!(seller.is_usable());

        let secret = store.webhook_secret(&StoreId::new("store_1")).await.unwrap().unwrap();
        assert_eq!(secret.expose_secret(), "whsec_1");
    }

    #[tokio::test]
    async fn test_undecryptable_row_is_an_error() {
        let (memory, store) = store();
        let mut row = store.save(&new_credential(), &passed_test()).await.unwrap();
        row.api_key_encrypted = "not-ciphertext".to_string();
        memory.insert_credential(row);

        let result = store.seller_credential(&StoreId::new("store_1")).await;
        assert!(matches!(result, Err(CredentialStoreError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_missing_store_returns_none() {
        let (_memory, store) = store();
        assert!(store.seller_credential(&StoreId::new("nope")).await.unwrap().is_none());
        assert!(store.webhook_secret(&StoreId::new("nope")).await.unwrap().is_none());
    }
}
