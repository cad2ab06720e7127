//! Print-on-demand provider REST API.
//!
//! # Architecture
//!
//! - [`ProviderClient`] authenticates every call with the `X-API-KEY` header
//!   and normalizes non-2xx responses into [`ProviderError`]
//! - Credentials come from a [`CredentialProvider`] supplied at composition
//!   time (the credential resolver), so the client never reads storage itself
//! - Services depend on the [`FulfillmentProvider`] trait, which tests replace
//!   with a scripted fake

pub mod client;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podbridge_core::{StoreId, mask_api_key};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

pub use client::{ProviderClient, ProviderClientConfig};
#[cfg(any(test, feature = "test-support"))]
pub use fake::ScriptedProvider;
pub use types::*;

/// Errors that can occur when interacting with the provider API.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response that is not otherwise classified.
    #[error("Provider API error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// Rate limited by the provider.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The API key was rejected (401/403).
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The call exceeded the configured timeout.
    #[error("Provider request timed out")]
    Timeout,

    /// Provider unreachable or returning 5xx.
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Neither seller nor platform credentials are available.
    #[error("No provider credentials available: {0}")]
    NoCredentials(String),

    /// Loading the seller's credentials failed.
    #[error("Credential lookup failed: {0}")]
    CredentialLookup(String),
}

impl ProviderError {
    /// HTTP status reported by the provider, if the error carries one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::RateLimited(_) => Some(429),
            Self::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// Whether the provider definitely created nothing.
    ///
    /// Timeouts, 5xx answers, transport failures and unreadable 2xx bodies
    /// leave the outcome unknown: the remote order may exist.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => *status >= 400 && *status < 500,
            Self::RateLimited(_)
            | Self::Unauthorized(_)
            | Self::NotFound(_)
            | Self::NoCredentials(_)
            | Self::CredentialLookup(_) => true,
            Self::Timeout | Self::Unavailable(_) | Self::Http(_) | Self::Parse(_) => false,
        }
    }
}

/// Whose account a credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// The seller's own, enabled and verified, account.
    Seller(StoreId),
    /// The shared platform account.
    Platform,
}

/// A credential ready for outbound calls.
#[derive(Clone)]
pub struct ProviderCredential {
    pub api_key: SecretString,
    /// The provider-side store id sent in request bodies.
    pub provider_store_id: String,
    pub source: CredentialSource,
    pub resolved_at: DateTime<Utc>,
}

impl ProviderCredential {
    #[must_use]
    pub fn new(
        api_key: SecretString,
        provider_store_id: impl Into<String>,
        source: CredentialSource,
    ) -> Self {
        Self {
            api_key,
            provider_store_id: provider_store_id.into(),
            source,
            resolved_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn is_platform_fallback(&self) -> bool {
        matches!(self.source, CredentialSource::Platform)
    }

    /// The API key in masked form, safe for logs and responses.
    #[must_use]
    pub fn masked_key(&self) -> String {
        mask_api_key(self.api_key.expose_secret())
    }
}

impl std::fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("api_key", &self.masked_key())
            .field("provider_store_id", &self.provider_store_id)
            .field("source", &self.source)
            .field("resolved_at", &self.resolved_at)
            .finish()
    }
}

/// Supplies the credential for an outbound call.
///
/// `None` asks for the platform credential (platform-level operations).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential_for(
        &self,
        store_id: Option<&StoreId>,
    ) -> Result<ProviderCredential, ProviderError>;
}

/// Operations the services need from the provider.
#[async_trait]
pub trait FulfillmentProvider: Send + Sync {
    /// Create a remote order with the tenant's resolved credential.
    async fn create_order(
        &self,
        store_id: &StoreId,
        request: &CreateOrderRequest,
    ) -> Result<CreatedOrder, ProviderError>;

    async fn get_order(
        &self,
        store_id: &StoreId,
        external_order_id: &str,
    ) -> Result<ProviderOrder, ProviderError>;

    async fn cancel_order(
        &self,
        store_id: &StoreId,
        external_order_id: &str,
    ) -> Result<(), ProviderError>;

    async fn list_products(
        &self,
        store_id: Option<&StoreId>,
        query: &ProductQuery,
    ) -> Result<ProductList, ProviderError>;

    async fn get_product(
        &self,
        store_id: Option<&StoreId>,
        product_uid: &str,
    ) -> Result<CatalogProduct, ProviderError>;

    async fn shipping_methods(
        &self,
        store_id: Option<&StoreId>,
        request: &ShippingMethodsRequest,
    ) -> Result<Vec<ShippingMethod>, ProviderError>;

    async fn quote(
        &self,
        store_id: Option<&StoreId>,
        request: &QuoteRequest,
    ) -> Result<Quote, ProviderError>;

    /// Lightweight authenticated call with an explicit, not yet trusted credential.
    async fn verify_credentials(
        &self,
        credential: &ProviderCredential,
    ) -> Result<(), ProviderError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Upstream {
            status: 422,
            message: "Invalid productUid".to_string(),
        };
        assert_eq!(err.to_string(), "Provider API error (422): Invalid productUid");
        assert_eq!(err.status(), Some(422));

        let err = ProviderError::RateLimited(30);
        assert_eq!(err.to_string(), "Rate limited, retry after 30 seconds");
    }

    #[test]
    fn test_rejection_classification() {
        let rejected = [
            ProviderError::Upstream {
                status: 422,
                message: "Invalid productUid".to_string(),
            },
            ProviderError::RateLimited(30),
            ProviderError::Unauthorized("bad key".to_string()),
            ProviderError::NotFound("no such store".to_string()),
            ProviderError::NoCredentials("not configured".to_string()),
        ];
        for err in &rejected {
            assert!(err.is_rejection(), "{err}");
        }

        let parse = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        let unknown = [
            ProviderError::Timeout,
            ProviderError::Unavailable("provider returned 502".to_string()),
            ProviderError::Parse(parse),
            ProviderError::Upstream {
                status: 302,
                message: "Found".to_string(),
            },
        ];
        for err in &unknown {
            assert!(!err.is_rejection(), "{err}");
        }
    }

    #[test]
    fn test_credential_debug_masks_key() {
        let credential = ProviderCredential::new(
            SecretString::from("a1b2c3d4-e5f6-7890-abcd-ef1234567890-fedcba987654"),
            "prov_store",
            CredentialSource::Platform,
        );
        let debug_output = format!("{credential:?}");
        assert!(debug_output.contains("a1b2c3d4"));
        assert!(!debug_output.contains("e5f6-7890-abcd"));
        assert!(credential.is_platform_fallback());
    }
}
