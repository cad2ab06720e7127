//! In-memory service harness for tests.
//!
//! Wires [`Services`] to an [`InMemoryStore`] and a [`ScriptedProvider`], with
//! helpers to seed print-on-demand orders and build signed webhook bodies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use podbridge_core::{
    CustomerId, FulfillmentOrderId, FulfillmentType, OrderId, OrderItemId, OrderStatus, ProductId,
    ProviderEventId, StoreId,
};
use secrecy::SecretString;
use serde_json::{Value as JsonValue, json};

use crate::crypto::AesGcmCipher;
use crate::db::{InMemoryStore, Repositories, RepositoryError, WebhookEventRepository};
use crate::error::AppError;
use crate::models::{
    ClaimOutcome, FulfillmentOrder, NewWebhookEvent, Order, OrderItem, Product, ShippingAddress,
    WebhookEvent,
};
use crate::provider::ScriptedProvider;
use crate::services::credential_cache::{DEFAULT_CREDENTIAL_TTL, MokaCredentialCache};
use crate::services::seller_settings::SaveSettingsRequest;
use crate::services::webhooks::{WebhookOutcome, sign};
use crate::services::{
    CredentialResolver, CredentialStore, PlatformAccount, SellerSettingsView, ServiceOptions,
    Services, SubmitRequest,
};

/// Secret the harness configures for the platform webhook endpoint.
pub const PLATFORM_WEBHOOK_SECRET: &str = "whsec_platform_test";
/// Store that owns every seeded product.
pub const SELLER_STORE: &str = "store_1";
/// Catalog product every seeded line points at.
pub const POD_PRODUCT: &str = "prod_pod";

/// Webhook event store operation that [`FlakyWebhookEvents`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStoreFault {
    Claim,
    /// Linking the event to its order, and recording the failure afterwards.
    AttachAndMarkFailed,
}

/// Webhook event store that fails one kind of operation as if the database
/// were unreachable, delegating everything else.
pub struct FlakyWebhookEvents {
    inner: Arc<InMemoryStore>,
    fault: EventStoreFault,
}

impl FlakyWebhookEvents {
    #[must_use]
    pub const fn new(inner: Arc<InMemoryStore>, fault: EventStoreFault) -> Self {
        Self { inner, fault }
    }

    fn fails(&self, fault: EventStoreFault) -> Result<(), RepositoryError> {
        if self.fault == fault {
            Err(RepositoryError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WebhookEventRepository for FlakyWebhookEvents {
    async fn claim(
        &self,
        event: &NewWebhookEvent,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError> {
        self.fails(EventStoreFault::Claim)?;
        self.inner.claim(event, lease).await
    }

    async fn attach_fulfillment_order(
        &self,
        event_id: &ProviderEventId,
        fulfillment_order_id: &FulfillmentOrderId,
    ) -> Result<(), RepositoryError> {
        self.fails(EventStoreFault::AttachAndMarkFailed)?;
        self.inner.attach_fulfillment_order(event_id, fulfillment_order_id).await
    }

    async fn mark_processed(&self, event_id: &ProviderEventId) -> Result<(), RepositoryError> {
        self.inner.mark_processed(event_id).await
    }

    async fn mark_failed(
        &self,
        event_id: &ProviderEventId,
        error: &str,
    ) -> Result<(), RepositoryError> {
        self.fails(EventStoreFault::AttachAndMarkFailed)?;
        self.inner.mark_failed(event_id, error).await
    }

    async fn get(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<WebhookEvent>, RepositoryError> {
        WebhookEventRepository::get(self.inner.as_ref(), event_id).await
    }

    async fn list_for_fulfillment_order(
        &self,
        fulfillment_order_id: &FulfillmentOrderId,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        self.inner.list_for_fulfillment_order(fulfillment_order_id, limit).await
    }
}

/// Configures a [`Harness`].
#[derive(Debug, Clone)]
pub struct HarnessBuilder {
    platform_account: bool,
    platform_webhook_secret: Option<String>,
    cache_ttl: Duration,
    event_store_fault: Option<EventStoreFault>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            platform_account: true,
            platform_webhook_secret: Some(PLATFORM_WEBHOOK_SECRET.to_string()),
            cache_ttl: DEFAULT_CREDENTIAL_TTL,
            event_store_fault: None,
        }
    }
}

impl HarnessBuilder {
    #[must_use]
    pub const fn platform_account(mut self, configured: bool) -> Self {
        self.platform_account = configured;
        self
    }

    #[must_use]
    pub fn platform_webhook_secret(mut self, secret: Option<&str>) -> Self {
        self.platform_webhook_secret = secret.map(str::to_owned);
        self
    }

    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Route webhook events through a [`FlakyWebhookEvents`] store.
    #[must_use]
    pub const fn event_store_fault(mut self, fault: EventStoreFault) -> Self {
        self.event_store_fault = Some(fault);
        self
    }

    /// # Panics
    ///
    /// Never; the fixed test key is valid.
    #[must_use]
    pub fn build(self) -> Harness {
        let memory = Arc::new(InMemoryStore::new());
        let mut repos = Repositories::in_memory(&memory);
        if let Some(fault) = self.event_store_fault {
            repos.webhook_events = Arc::new(FlakyWebhookEvents::new(memory.clone(), fault));
        }
        let key = SecretString::from(STANDARD.encode([7u8; 32]));
        let cipher = match AesGcmCipher::from_base64_key(&key) {
            Ok(cipher) => Arc::new(cipher),
            Err(e) => unreachable!("fixed 32-byte key: {e}"),
        };
        let resolver = CredentialResolver::new(
            CredentialStore::new(repos.credentials.clone(), cipher),
            Arc::new(MokaCredentialCache::new(self.cache_ttl)),
            self.platform_account.then(|| PlatformAccount {
                api_key: SecretString::from("platform-key-0000-0000-000000000000"),
                provider_store_id: "platform_store".to_string(),
            }),
        );
        let provider = Arc::new(ScriptedProvider::new());
        let services = Services::new(
            &repos,
            resolver,
            provider.clone(),
            ServiceOptions {
                public_base_url: "https://pod.example.com".to_string(),
                platform_webhook_secret: self.platform_webhook_secret.map(SecretString::from),
                ..ServiceOptions::default()
            },
        );

        Harness {
            memory,
            provider,
            repos,
            services,
        }
    }
}

/// Services over in-memory state.
pub struct Harness {
    pub memory: Arc<InMemoryStore>,
    pub provider: Arc<ScriptedProvider>,
    pub repos: Repositories,
    pub services: Services,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// Harness with a platform account and platform webhook secret.
    #[must_use]
    pub fn new() -> Self {
        HarnessBuilder::default().build()
    }

    #[must_use]
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Seed a paid order with `lines` print-on-demand lines.
    pub fn seed_order(&self, order_id: &str, lines: usize) -> Vec<OrderItemId> {
        self.memory.add_product(Product {
            id: ProductId::new(POD_PRODUCT),
            store_id: Some(StoreId::new(SELLER_STORE)),
            name: "Art print".to_string(),
            fulfillment_type: FulfillmentType::Pod,
            provider_product_uid: Some("flat_a3_poster".to_string()),
            design_file_url: Some("https://cdn.example.com/art.pdf".to_string()),
        });

        let order = Order {
            id: OrderId::new(order_id),
            customer_id: CustomerId::new("cust_1"),
            customer_email: "ada@example.com".to_string(),
            status: OrderStatus::Paid,
            currency: None,
            shipping_address: Some(ShippingAddress {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                address_line1: "12 Analytical Row".to_string(),
                city: "London".to_string(),
                post_code: "N1 9GU".to_string(),
                country: "GB".to_string(),
                ..ShippingAddress::default()
            }),
        };
        let items: Vec<OrderItem> = (1..=lines)
            .map(|n| OrderItem {
                id: OrderItemId::new(format!("{order_id}_item_{n}")),
                order_id: order.id.clone(),
                product_id: ProductId::new(POD_PRODUCT),
                quantity: 1,
            })
            .collect();
        let ids = items.iter().map(|item| item.id.clone()).collect();
        self.memory.add_order(order, items);
        ids
    }

    /// Seed an order and submit each of its lines.
    ///
    /// # Errors
    ///
    /// Returns the first submission error.
    pub async fn try_submitted_lines(
        &self,
        order_id: &str,
        lines: usize,
    ) -> Result<Vec<FulfillmentOrder>, AppError> {
        let mut submitted = Vec::with_capacity(lines);
        for item in self.seed_order(order_id, lines) {
            let fo = self
                .services
                .submission
                .submit(SubmitRequest {
                    order_id: OrderId::new(order_id),
                    order_item_id: item,
                    shipping_method: None,
                })
                .await?;
            submitted.push(fo);
        }
        Ok(submitted)
    }

    /// # Panics
    ///
    /// Panics if a submission fails.
    pub async fn submitted_lines(&self, order_id: &str, lines: usize) -> Vec<FulfillmentOrder> {
        match self.try_submitted_lines(order_id, lines).await {
            Ok(submitted) => submitted,
            Err(e) => panic!("seed submission failed: {e}"),
        }
    }

    /// # Panics
    ///
    /// Panics if the record does not exist.
    pub async fn fulfillment_order(&self, id: &FulfillmentOrderId) -> FulfillmentOrder {
        match self.repos.fulfillment.get(id).await {
            Ok(Some(fo)) => fo,
            other => panic!("fulfillment order {id} not loadable: {other:?}"),
        }
    }

    /// Save verified, enabled seller credentials.
    ///
    /// # Panics
    ///
    /// Panics if the save is rejected.
    pub async fn configure_seller(
        &self,
        store_id: &str,
        webhook_secret: Option<&str>,
    ) -> SellerSettingsView {
        let request = SaveSettingsRequest {
            api_key: Some("5e11e4a1-0000-4000-8000-5e11e4a1c0de".to_string()),
            provider_store_id: Some(format!("{store_id}_provider")),
            webhook_secret: webhook_secret.map(str::to_owned),
            enabled: Some(true),
            ..SaveSettingsRequest::default()
        };
        match self.services.settings.upsert(&StoreId::new(store_id), request).await {
            Ok(view) => view,
            Err(e) => panic!("seller configuration failed: {e}"),
        }
    }

    /// Deliver a body to the platform endpoint, signed with the platform secret.
    ///
    /// # Errors
    ///
    /// Returns whatever the webhook processor returns.
    pub async fn deliver(&self, body: &[u8]) -> Result<WebhookOutcome, AppError> {
        let signature = sign(&SecretString::from(PLATFORM_WEBHOOK_SECRET), body);
        self.services.webhooks.handle(None, Some(&signature), body).await
    }
}

/// A provider webhook body; `orderId` is merged into `data`.
#[must_use]
pub fn webhook_body(
    event_id: &str,
    event: &str,
    external_order_id: &str,
    data: JsonValue,
) -> Vec<u8> {
    let mut data = match data {
        JsonValue::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    data.insert("orderId".to_string(), json!(external_order_id));
    json!({ "id": event_id, "event": event, "data": data })
        .to_string()
        .into_bytes()
}
