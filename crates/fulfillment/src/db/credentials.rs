//! Seller credential repository.
//!
//! Stores provider credentials per store. Secret columns hold ciphertext
//! produced by [`crate::crypto::SecretCipher`]; this layer never sees plaintext.

use async_trait::async_trait;
use podbridge_core::StoreId;
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::{ConnectionTestRecord, CredentialUpsert, StoredCredential};

const CREDENTIAL_COLUMNS: &str = r"
    store_id, api_key_encrypted, provider_store_id, webhook_secret_encrypted,
    enabled, verified, verified_at, last_test_at, connection_error,
    account_name, webhook_url, notes, created_at, updated_at
";

/// Persistence for per-store provider credentials.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Load a store's credential row.
    async fn get(&self, store_id: &StoreId) -> Result<Option<StoredCredential>, RepositoryError>;

    /// Insert or fully replace a store's credential row.
    async fn upsert(&self, params: &CredentialUpsert) -> Result<StoredCredential, RepositoryError>;

    /// Record a connection test result.
    ///
    /// Returns [`RepositoryError::NotFound`] if the store has no credentials.
    async fn record_test(
        &self,
        store_id: &StoreId,
        record: &ConnectionTestRecord,
    ) -> Result<StoredCredential, RepositoryError>;

    /// Flip the enabled flag.
    ///
    /// Returns [`RepositoryError::NotFound`] if the store has no credentials.
    async fn set_enabled(
        &self,
        store_id: &StoreId,
        enabled: bool,
    ) -> Result<StoredCredential, RepositoryError>;

    /// Remove a store's credentials. Returns whether a row existed.
    async fn delete(&self, store_id: &StoreId) -> Result<bool, RepositoryError>;
}

/// `PostgreSQL` implementation of [`CredentialRepository`].
pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    /// Create a new credential repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn get(&self, store_id: &StoreId) -> Result<Option<StoredCredential>, RepositoryError> {
        let row = sqlx::query_as::<_, StoredCredential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM fulfillment_credentials WHERE store_id = $1"
        ))
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert(&self, params: &CredentialUpsert) -> Result<StoredCredential, RepositoryError> {
        let row = sqlx::query_as::<_, StoredCredential>(&format!(
            r"
            INSERT INTO fulfillment_credentials (
                store_id, api_key_encrypted, provider_store_id, webhook_secret_encrypted,
                enabled, verified, verified_at, last_test_at, connection_error,
                account_name, webhook_url, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (store_id) DO UPDATE SET
                api_key_encrypted = EXCLUDED.api_key_encrypted,
                provider_store_id = EXCLUDED.provider_store_id,
                webhook_secret_encrypted = EXCLUDED.webhook_secret_encrypted,
                enabled = EXCLUDED.enabled,
                verified = EXCLUDED.verified,
                verified_at = EXCLUDED.verified_at,
                last_test_at = EXCLUDED.last_test_at,
                connection_error = EXCLUDED.connection_error,
                account_name = EXCLUDED.account_name,
                webhook_url = EXCLUDED.webhook_url,
                notes = EXCLUDED.notes,
                updated_at = NOW()
            RETURNING {CREDENTIAL_COLUMNS}
            "
        ))
        .bind(&params.store_id)
        .bind(&params.api_key_encrypted)
        .bind(&params.provider_store_id)
        .bind(&params.webhook_secret_encrypted)
        .bind(params.enabled)
        .bind(params.verified)
        .bind(params.verified_at)
        .bind(params.last_test_at)
        .bind(&params.connection_error)
        .bind(&params.account_name)
        .bind(&params.webhook_url)
        .bind(&params.notes)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn record_test(
        &self,
        store_id: &StoreId,
        record: &ConnectionTestRecord,
    ) -> Result<StoredCredential, RepositoryError> {
        sqlx::query_as::<_, StoredCredential>(&format!(
            r"
            UPDATE fulfillment_credentials SET
                verified = $2,
                verified_at = CASE WHEN $2 THEN $3 ELSE verified_at END,
                last_test_at = $3,
                connection_error = $4,
                updated_at = NOW()
            WHERE store_id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "
        ))
        .bind(store_id)
        .bind(record.verified)
        .bind(record.tested_at)
        .bind(&record.error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)
    }

    async fn set_enabled(
        &self,
        store_id: &StoreId,
        enabled: bool,
    ) -> Result<StoredCredential, RepositoryError> {
        sqlx::query_as::<_, StoredCredential>(&format!(
            r"
            UPDATE fulfillment_credentials SET enabled = $2, updated_at = NOW()
            WHERE store_id = $1
            RETURNING {CREDENTIAL_COLUMNS}
            "
        ))
        .bind(store_id)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, store_id: &StoreId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM fulfillment_credentials WHERE store_id = $1")
            .bind(store_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
