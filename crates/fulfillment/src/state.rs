//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::ServerConfig;
use crate::crypto::{AesGcmCipher, CryptoError};
use crate::db::Repositories;
use crate::provider::{ProviderClient, ProviderError};
use crate::services::{
    CredentialResolver, CredentialStore, MokaCredentialCache, ServiceOptions, Services,
};

/// Error wiring the services from configuration.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid encryption key: {0}")]
    Crypto(#[from] CryptoError),
    #[error("provider client: {0}")]
    Provider(#[from] ProviderError),
}

/// Compose the production services over `PostgreSQL` and the provider HTTP API.
///
/// # Errors
///
/// Returns an error if the encryption key is invalid or the HTTP client cannot be built.
pub fn build_services(config: &ServerConfig, pool: &PgPool) -> Result<Services, StateError> {
    let repos = Repositories::postgres(pool);
    let cipher = Arc::new(AesGcmCipher::from_base64_key(&config.encryption_key)?);
    let resolver = CredentialResolver::new(
        CredentialStore::new(repos.credentials.clone(), cipher),
        Arc::new(MokaCredentialCache::new(config.credential_cache_ttl)),
        config.provider.platform.clone(),
    );
    let provider =
        ProviderClient::new(&config.provider.client_config(), Arc::new(resolver.clone()))?;

    Ok(Services::new(
        &repos,
        resolver,
        Arc::new(provider),
        ServiceOptions {
            public_base_url: config.base_url.clone(),
            platform_webhook_secret: config.provider.webhook_secret.clone(),
            sync_stale_after: config.sync.stale_after,
            reservation_grace: config.provider.timeout.saturating_mul(2),
            ..ServiceOptions::default()
        },
    ))
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    services: Services,
    pool: Option<PgPool>,
}

impl AppState {
    #[must_use]
    pub fn new(services: Services, pool: PgPool) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                services,
                pool: Some(pool),
            }),
        }
    }

    /// State without a database pool; readiness always passes.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn in_memory(services: Services) -> Self {
        Self {
            inner: Arc::new(AppStateInner { services, pool: None }),
        }
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// The database pool, absent when running over in-memory repositories.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }
}
