//! Resolved-credential cache.
//!
//! Entries expire passively after the TTL (5 minutes by default) and are
//! dropped explicitly whenever a seller's credentials change.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use podbridge_core::StoreId;

use crate::provider::ProviderCredential;

/// Default time-to-live for resolved credentials.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(300);

const MAX_CACHED_STORES: u64 = 10_000;

/// Cache of resolved credentials keyed by store.
///
/// Writes are last-write-wins; implementations may be shared across processes.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    async fn get(&self, store_id: &StoreId) -> Option<ProviderCredential>;

    async fn insert(&self, store_id: StoreId, credential: ProviderCredential);

    async fn invalidate(&self, store_id: &StoreId);
}

/// In-process [`CredentialCache`] backed by `moka`.
#[derive(Clone)]
pub struct MokaCredentialCache {
    cache: Cache<StoreId, ProviderCredential>,
}

impl MokaCredentialCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_STORES)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }
}

impl Default for MokaCredentialCache {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_TTL)
    }
}

#[async_trait]
impl CredentialCache for MokaCredentialCache {
    async fn get(&self, store_id: &StoreId) -> Option<ProviderCredential> {
        self.cache.get(store_id).await
    }

    async fn insert(&self, store_id: StoreId, credential: ProviderCredential) {
        self.cache.insert(store_id, credential).await;
    }

    async fn invalidate(&self, store_id: &StoreId) {
        self.cache.invalidate(store_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CredentialSource;
    use secrecy::SecretString;

    fn credential() -> ProviderCredential {
        ProviderCredential::new(SecretString::from("key"), "prov", CredentialSource::Platform)
    }

    #[tokio::test]
    async fn test_insert_get_invalidate() {
        let cache = MokaCredentialCache::default();
        let store = StoreId::new("store_1");

        assert!(cache.get(&store).await.is_none());
        cache.insert(store.clone(), credential()).await;
        assert!(cache.get(&store).await.is_some());
        cache.invalidate(&store).await;
        assert!(cache.get(&store).await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = MokaCredentialCache::new(Duration::from_millis(50));
        let store = StoreId::new("store_1");

        cache.insert(store.clone(), credential()).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get(&store).await.is_none());
    }
}
