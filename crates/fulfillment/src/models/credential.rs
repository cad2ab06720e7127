//! Seller provider credentials.
//!
//! Two shapes exist: [`StoredCredential`] mirrors the database row (secrets as
//! ciphertext) and [`SellerCredential`] is the decrypted form handed to the
//! resolver. Both implement `Debug` manually so secrets never reach logs.

use chrono::{DateTime, Utc};
use podbridge_core::StoreId;
use secrecy::SecretString;

/// Credential row as persisted (secret columns hold ciphertext).
#[derive(Clone, sqlx::FromRow)]
pub struct StoredCredential {
    pub store_id: StoreId,
    pub api_key_encrypted: String,
    pub provider_store_id: String,
    pub webhook_secret_encrypted: Option<String>,
    pub enabled: bool,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_test_at: Option<DateTime<Utc>>,
    pub connection_error: Option<String>,
    pub account_name: Option<String>,
    pub webhook_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredCredential")
            .field("store_id", &self.store_id)
            .field("api_key_encrypted", &"[REDACTED]")
            .field("provider_store_id", &self.provider_store_id)
            .field(
                "webhook_secret_encrypted",
                &self.webhook_secret_encrypted.as_ref().map(|_| "[REDACTED]"),
            )
            .field("enabled", &self.enabled)
            .field("verified", &self.verified)
            .field("verified_at", &self.verified_at)
            .field("last_test_at", &self.last_test_at)
            .field("connection_error", &self.connection_error)
            .finish_non_exhaustive()
    }
}

/// Full replacement of a store's credential row.
#[derive(Clone)]
pub struct CredentialUpsert {
    pub store_id: StoreId,
    pub api_key_encrypted: String,
    pub provider_store_id: String,
    pub webhook_secret_encrypted: Option<String>,
    pub enabled: bool,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_test_at: Option<DateTime<Utc>>,
    pub connection_error: Option<String>,
    pub account_name: Option<String>,
    pub webhook_url: Option<String>,
    pub notes: Option<String>,
}

impl std::fmt::Debug for CredentialUpsert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialUpsert")
            .field("store_id", &self.store_id)
            .field("provider_store_id", &self.provider_store_id)
            .field("enabled", &self.enabled)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

/// Outcome of a connection test, as recorded on the credential row.
#[derive(Debug, Clone)]
pub struct ConnectionTestRecord {
    pub verified: bool,
    pub tested_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Decrypted seller credential.
#[derive(Clone)]
pub struct SellerCredential {
    pub store_id: StoreId,
    pub api_key: SecretString,
    pub provider_store_id: String,
    pub webhook_secret: Option<SecretString>,
    pub enabled: bool,
    pub verified: bool,
}

impl SellerCredential {
    /// Only enabled and verified credentials may be used for live calls.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.enabled && self.verified
    }
}

impl std::fmt::Debug for SellerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SellerCredential")
            .field("store_id", &self.store_id)
            .field("api_key", &"[REDACTED]")
            .field("provider_store_id", &self.provider_store_id)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("enabled", &self.enabled)
            .field("verified", &self.verified)
            .finish()
    }
}
