//! In-memory implementation of every repository trait.
//!
//! Used by unit tests and, behind the `test-support` feature, by the
//! integration test crate. Semantics mirror the `PostgreSQL` repositories,
//! including the compare-and-set updates and the atomic transition commit.
//! The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podbridge_core::{
    EscrowId, EscrowStatus, FulfillmentOrderId, FulfillmentStatus, OrderId, OrderItemId,
    OrderStatus, ProviderEventId, StoreId, WebhookEventStatus,
};
use serde_json::Value as JsonValue;
use sqlx::types::Json;

use super::fulfillment_orders::{
    ALREADY_SUBMITTED, all_lines_delivered, delivered_timeline, shipped_timeline,
};
use super::{
    CredentialRepository, EscrowLedger, FulfillmentRepository, OrderRepository, RepositoryError,
    SettingsRepository, WebhookEventRepository,
};
use crate::models::{
    ClaimOutcome, ConnectionTestRecord, CredentialUpsert, DeliveryConfirmation, EscrowTransaction,
    FulfillmentFilter, FulfillmentOrder, NewFulfillmentOrder, NewWebhookEvent, Order, OrderItem,
    OrderLine, Product, StoredCredential, TimelineEntry, Transition, TransitionOutcome,
    WebhookEvent,
};

#[derive(Default)]
struct MemoryState {
    credentials: HashMap<StoreId, StoredCredential>,
    orders: HashMap<OrderId, Order>,
    items: Vec<OrderItem>,
    products: HashMap<String, Product>,
    fulfillment: Vec<FulfillmentOrder>,
    webhook_events: HashMap<ProviderEventId, WebhookEvent>,
    settings: HashMap<String, JsonValue>,
    escrows: HashMap<OrderId, EscrowTransaction>,
    confirmations: Vec<DeliveryConfirmation>,
    timeline: Vec<TimelineEntry>,
    sync_checked: HashMap<FulfillmentOrderId, DateTime<Utc>>,
}

impl MemoryState {
    fn line(&self, item: &OrderItem) -> Result<OrderLine, RepositoryError> {
        let order = self.orders.get(&item.order_id).cloned().ok_or_else(|| {
            RepositoryError::DataCorruption(format!("item {} has no order", item.id))
        })?;
        let product = self
            .products
            .get(item.product_id.as_str())
            .cloned()
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!("item {} has no product", item.id))
            })?;
        Ok(OrderLine {
            order,
            item: item.clone(),
            product,
        })
    }

    fn fulfillment_mut(&mut self, id: &FulfillmentOrderId) -> Option<&mut FulfillmentOrder> {
        self.fulfillment.iter_mut().find(|fo| &fo.id == id)
    }

    fn push_timeline(
        &mut self,
        order_id: &OrderId,
        status: OrderStatus,
        (title, description, metadata): (String, String, JsonValue),
    ) {
        self.timeline.push(TimelineEntry {
            order_id: order_id.clone(),
            status,
            title,
            description,
            metadata,
            created_at: Utc::now(),
        });
    }
}

/// Shared in-memory store implementing all repository traits.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    credential_reads: AtomicUsize,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Seeding ---

    pub fn add_product(&self, product: Product) {
        self.state()
            .products
            .insert(product.id.as_str().to_owned(), product);
    }

    pub fn add_order(&self, order: Order, items: Vec<OrderItem>) {
        let mut state = self.state();
        state.items.retain(|item| item.order_id != order.id);
        state.items.extend(items);
        state.orders.insert(order.id.clone(), order);
    }

    pub fn set_setting(&self, key: &str, value: JsonValue) {
        self.state().settings.insert(key.to_owned(), value);
    }

    pub fn add_escrow(&self, escrow: EscrowTransaction) {
        self.state().escrows.insert(escrow.order_id.clone(), escrow);
    }

    pub fn insert_credential(&self, credential: StoredCredential) {
        self.state()
            .credentials
            .insert(credential.store_id.clone(), credential);
    }

    /// Pretend a fulfillment order was last touched at `at`.
    pub fn set_fulfillment_updated_at(&self, id: &FulfillmentOrderId, at: DateTime<Utc>) {
        if let Some(fo) = self.state().fulfillment_mut(id) {
            fo.updated_at = at;
        }
    }

    /// Pretend a webhook event's lease was last renewed at `at`.
    pub fn set_webhook_event_updated_at(&self, event_id: &ProviderEventId, at: DateTime<Utc>) {
        if let Some(event) = self.state().webhook_events.get_mut(event_id) {
            event.updated_at = at;
        }
    }

    // --- Inspection ---

    #[must_use]
    pub fn fulfillment_orders(&self) -> Vec<FulfillmentOrder> {
        self.state().fulfillment.clone()
    }

    #[must_use]
    pub fn credential(&self, store_id: &StoreId) -> Option<StoredCredential> {
        self.state().credentials.get(store_id).cloned()
    }

    #[must_use]
    pub fn webhook_event(&self, event_id: &ProviderEventId) -> Option<WebhookEvent> {
        self.state().webhook_events.get(event_id).cloned()
    }

    #[must_use]
    pub fn timeline(&self, order_id: &OrderId) -> Vec<TimelineEntry> {
        self.state()
            .timeline
            .iter()
            .filter(|entry| &entry.order_id == order_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn order_status(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.state().orders.get(order_id).map(|order| order.status)
    }

    #[must_use]
    pub fn escrow(&self, order_id: &OrderId) -> Option<EscrowTransaction> {
        self.state().escrows.get(order_id).cloned()
    }

    #[must_use]
    pub fn delivery_confirmations(&self) -> Vec<DeliveryConfirmation> {
        self.state().confirmations.clone()
    }

    /// Number of credential row reads served so far.
    #[must_use]
    pub fn credential_reads(&self) -> usize {
        self.credential_reads.load(Ordering::SeqCst)
    }
}

fn stored_from_upsert(
    params: &CredentialUpsert,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> StoredCredential {
    StoredCredential {
        store_id: params.store_id.clone(),
        api_key_encrypted: params.api_key_encrypted.clone(),
        provider_store_id: params.provider_store_id.clone(),
        webhook_secret_encrypted: params.webhook_secret_encrypted.clone(),
        enabled: params.enabled,
        verified: params.verified,
        verified_at: params.verified_at,
        last_test_at: params.last_test_at,
        connection_error: params.connection_error.clone(),
        account_name: params.account_name.clone(),
        webhook_url: params.webhook_url.clone(),
        notes: params.notes.clone(),
        created_at,
        updated_at: now,
    }
}

#[async_trait]
impl CredentialRepository for InMemoryStore {
    async fn get(&self, store_id: &StoreId) -> Result<Option<StoredCredential>, RepositoryError> {
        self.credential_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state().credentials.get(store_id).cloned())
    }

    async fn upsert(&self, params: &CredentialUpsert) -> Result<StoredCredential, RepositoryError> {
        let mut state = self.state();
        let now = Utc::now();
        let created_at = state
            .credentials
            .get(&params.store_id)
            .map_or(now, |existing| existing.created_at);
        let row = stored_from_upsert(params, created_at, now);
        state.credentials.insert(row.store_id.clone(), row.clone());
        Ok(row)
    }

    async fn record_test(
        &self,
        store_id: &StoreId,
        record: &ConnectionTestRecord,
    ) -> Result<StoredCredential, RepositoryError> {
        let mut state = self.state();
        let row = state
            .credentials
            .get_mut(store_id)
            .ok_or(RepositoryError::NotFound)?;
        row.verified = record.verified;
        if record.verified {
            row.verified_at = Some(record.tested_at);
        }
        row.last_test_at = Some(record.tested_at);
        row.connection_error.clone_from(&record.error);
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn set_enabled(
        &self,
        store_id: &StoreId,
        enabled: bool,
    ) -> Result<StoredCredential, RepositoryError> {
        let mut state = self.state();
        let row = state
            .credentials
            .get_mut(store_id)
            .ok_or(RepositoryError::NotFound)?;
        row.enabled = enabled;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, store_id: &StoreId) -> Result<bool, RepositoryError> {
        Ok(self.state().credentials.remove(store_id).is_some())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn order_line(
        &self,
        order_id: &OrderId,
        order_item_id: &OrderItemId,
    ) -> Result<Option<OrderLine>, RepositoryError> {
        let state = self.state();
        state
            .items
            .iter()
            .find(|item| &item.order_id == order_id && &item.id == order_item_id)
            .map(|item| state.line(item))
            .transpose()
    }

    async fn order_lines(&self, order_id: &OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        let state = self.state();
        let mut items: Vec<&OrderItem> = state
            .items
            .iter()
            .filter(|item| &item.order_id == order_id)
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items.into_iter().map(|item| state.line(item)).collect()
    }
}

#[async_trait]
impl FulfillmentRepository for InMemoryStore {
    async fn reserve(
        &self,
        new: &NewFulfillmentOrder,
    ) -> Result<FulfillmentOrder, RepositoryError> {
        let mut state = self.state();
        let duplicate = state.fulfillment.iter().any(|fo| {
            fo.order_id == new.order_id
                && fo.order_item_id == new.order_item_id
                && fo.status != FulfillmentStatus::Failed
        });
        if duplicate {
            return Err(RepositoryError::Conflict(ALREADY_SUBMITTED.to_string()));
        }

        let now = Utc::now();
        let record = FulfillmentOrder {
            id: new.id.clone(),
            order_id: new.order_id.clone(),
            order_item_id: new.order_item_id.clone(),
            product_id: new.product_id.clone(),
            store_id: new.store_id.clone(),
            external_order_id: None,
            external_reference: new.external_reference.clone(),
            status: FulfillmentStatus::Pending,
            provider_status: None,
            shipping_method: new.shipping_method.clone(),
            currency: new.currency.clone(),
            used_platform_account: new.used_platform_account,
            tracking_number: None,
            tracking_url: None,
            carrier: None,
            failure_reason: None,
            submitted_at: None,
            produced_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        state.fulfillment.push(record.clone());
        Ok(record)
    }

    async fn mark_submitted(
        &self,
        id: &FulfillmentOrderId,
        external_order_id: &str,
        provider_status: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<FulfillmentOrder, RepositoryError> {
        let mut state = self.state();
        let taken = state
            .fulfillment
            .iter()
            .any(|fo| fo.external_order_id.as_deref() == Some(external_order_id));
        if taken {
            return Err(RepositoryError::Conflict(
                "External order id already recorded".to_string(),
            ));
        }

        let fo = state
            .fulfillment_mut(id)
            .filter(|fo| fo.status == FulfillmentStatus::Pending)
            .ok_or(RepositoryError::NotFound)?;
        fo.status = FulfillmentStatus::Submitted;
        fo.external_order_id = Some(external_order_id.to_owned());
        fo.provider_status = provider_status.map(str::to_owned);
        fo.submitted_at = Some(at);
        fo.updated_at = Utc::now();
        Ok(fo.clone())
    }

    async fn get(
        &self,
        id: &FulfillmentOrderId,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError> {
        Ok(self.state().fulfillment.iter().find(|fo| &fo.id == id).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError> {
        Ok(self
            .state()
            .fulfillment
            .iter()
            .find(|fo| fo.external_order_id.as_deref() == Some(external_order_id))
            .cloned())
    }

    async fn find_active_for_line(
        &self,
        order_id: &OrderId,
        order_item_id: &OrderItemId,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError> {
        Ok(self
            .state()
            .fulfillment
            .iter()
            .find(|fo| {
                &fo.order_id == order_id
                    && &fo.order_item_id == order_item_id
                    && fo.status != FulfillmentStatus::Failed
            })
            .cloned())
    }

    async fn list(
        &self,
        filter: &FulfillmentFilter,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError> {
        let state = self.state();
        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let limit = usize::try_from(filter.limit).unwrap_or(0);
        Ok(state
            .fulfillment
            .iter()
            .rev()
            .filter(|fo| filter.status.is_none_or(|status| fo.status == status))
            .filter(|fo| filter.order_id.as_ref().is_none_or(|id| &fo.order_id == id))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError> {
        Ok(self
            .state()
            .fulfillment
            .iter()
            .filter(|fo| &fo.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_stale_active(
        &self,
        idle_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError> {
        let state = self.state();
        let idle_since = |fo: &FulfillmentOrder| {
            state
                .sync_checked
                .get(&fo.id)
                .map_or(fo.updated_at, |checked| fo.updated_at.max(*checked))
        };
        let mut stale: Vec<FulfillmentOrder> = state
            .fulfillment
            .iter()
            .filter(|fo| {
                matches!(
                    fo.status,
                    FulfillmentStatus::Submitted
                        | FulfillmentStatus::InProduction
                        | FulfillmentStatus::Produced
                        | FulfillmentStatus::Shipped
                ) && fo.external_order_id.is_some()
                    && idle_since(fo) < idle_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|fo| (idle_since(fo), fo.id.to_string()));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn mark_sync_checked(
        &self,
        id: &FulfillmentOrderId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.state().sync_checked.insert(id.clone(), at);
        Ok(())
    }

    async fn commit_transition(
        &self,
        transition: &Transition,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut state = self.state();

        let Some(parent_status) = state.orders.get(&transition.order_id).map(|o| o.status) else {
            return Err(RepositoryError::DataCorruption(format!(
                "fulfillment order {} references missing order {}",
                transition.fulfillment_order_id, transition.order_id
            )));
        };

        let Some(fo) = state
            .fulfillment_mut(&transition.fulfillment_order_id)
            .filter(|fo| fo.status == transition.from)
        else {
            return Ok(TransitionOutcome {
                fulfillment_order: None,
                order_delivered: false,
            });
        };

        let update = &transition.update;
        fo.status = transition.to;
        fo.provider_status = Some(transition.provider_status.clone());
        fo.produced_at = update.produced_at.or(fo.produced_at);
        fo.shipped_at = update.shipped_at.or(fo.shipped_at);
        fo.delivered_at = update.delivered_at.or(fo.delivered_at);
        fo.cancelled_at = update.cancelled_at.or(fo.cancelled_at);
        if update.tracking.tracking_number.is_some() {
            fo.tracking_number.clone_from(&update.tracking.tracking_number);
        }
        if update.tracking.tracking_url.is_some() {
            fo.tracking_url.clone_from(&update.tracking.tracking_url);
        }
        if update.tracking.carrier.is_some() {
            fo.carrier.clone_from(&update.tracking.carrier);
        }
        if update.failure_reason.is_some() {
            fo.failure_reason.clone_from(&update.failure_reason);
        }
        fo.updated_at = Utc::now();
        let updated = fo.clone();

        let mut order_delivered = false;
        match transition.to {
            FulfillmentStatus::Shipped => {
                if parent_status.accepts_shipment()
                    && let Some(order) = state.orders.get_mut(&transition.order_id)
                {
                    order.status = OrderStatus::Shipped;
                }
                state.push_timeline(
                    &transition.order_id,
                    OrderStatus::Shipped,
                    shipped_timeline(transition),
                );
            }
            FulfillmentStatus::Delivered => {
                let siblings = state
                    .fulfillment
                    .iter()
                    .filter(|fo| fo.order_id == transition.order_id)
                    .map(|fo| (&fo.order_item_id, fo.status));
                if parent_status != OrderStatus::Delivered && all_lines_delivered(siblings) {
                    if let Some(order) = state.orders.get_mut(&transition.order_id) {
                        order.status = OrderStatus::Delivered;
                    }
                    state.push_timeline(
                        &transition.order_id,
                        OrderStatus::Delivered,
                        delivered_timeline(transition),
                    );
                    order_delivered = true;
                }
            }
            _ => {}
        }

        Ok(TransitionOutcome {
            fulfillment_order: Some(updated),
            order_delivered,
        })
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryStore {
    async fn claim(
        &self,
        event: &NewWebhookEvent,
        lease: Duration,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let mut state = self.state();
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);

        if let Some(existing) = state.webhook_events.get_mut(&event.event_id) {
            let reclaimable = match existing.status {
                WebhookEventStatus::Processed => return Ok(ClaimOutcome::AlreadyProcessed),
                WebhookEventStatus::Failed => true,
                WebhookEventStatus::Processing => now
                    .checked_sub_signed(lease)
                    .is_some_and(|cutoff| existing.updated_at < cutoff),
            };
            if !reclaimable {
                return Ok(ClaimOutcome::InProgress);
            }
            existing.status = WebhookEventStatus::Processing;
            existing.event_type.clone_from(&event.event_type);
            existing.payload = Json(event.payload.clone());
            existing.error_message = None;
            existing.updated_at = now;
            return Ok(ClaimOutcome::Claimed);
        }

        state.webhook_events.insert(
            event.event_id.clone(),
            WebhookEvent {
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
                fulfillment_order_id: None,
                payload: Json(event.payload.clone()),
                status: WebhookEventStatus::Processing,
                error_message: None,
                processed_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn attach_fulfillment_order(
        &self,
        event_id: &ProviderEventId,
        fulfillment_order_id: &FulfillmentOrderId,
    ) -> Result<(), RepositoryError> {
        if let Some(event) = self.state().webhook_events.get_mut(event_id) {
            event.fulfillment_order_id = Some(fulfillment_order_id.clone());
            event.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_processed(&self, event_id: &ProviderEventId) -> Result<(), RepositoryError> {
        if let Some(event) = self.state().webhook_events.get_mut(event_id) {
            let now = Utc::now();
            event.status = WebhookEventStatus::Processed;
            event.processed_at = Some(now);
            event.error_message = None;
            event.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: &ProviderEventId,
        error: &str,
    ) -> Result<(), RepositoryError> {
        if let Some(event) = self.state().webhook_events.get_mut(event_id) {
            event.status = WebhookEventStatus::Failed;
            event.error_message = Some(error.to_owned());
            event.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(
        &self,
        event_id: &ProviderEventId,
    ) -> Result<Option<WebhookEvent>, RepositoryError> {
        Ok(self.webhook_event(event_id))
    }

    async fn list_for_fulfillment_order(
        &self,
        fulfillment_order_id: &FulfillmentOrderId,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let state = self.state();
        let mut events: Vec<WebhookEvent> = state
            .webhook_events
            .values()
            .filter(|event| event.fulfillment_order_id.as_ref() == Some(fulfillment_order_id))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(events)
    }
}

#[async_trait]
impl SettingsRepository for InMemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<JsonValue>, RepositoryError> {
        Ok(self.state().settings.get(key).cloned())
    }
}

#[async_trait]
impl EscrowLedger for InMemoryStore {
    async fn find_by_order_id(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<EscrowTransaction>, RepositoryError> {
        Ok(self.escrow(order_id))
    }

    async fn transition_to_pending_release(
        &self,
        escrow_id: &EscrowId,
        auto_release_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        let Some(escrow) = state
            .escrows
            .values_mut()
            .find(|escrow| &escrow.id == escrow_id && escrow.status == EscrowStatus::Held)
        else {
            return Ok(false);
        };
        escrow.status = EscrowStatus::PendingRelease;
        escrow.auto_release_at = Some(auto_release_at);
        escrow.delivery_confirmed = true;
        escrow.delivery_confirmed_at = Some(Utc::now());
        Ok(true)
    }

    async fn record_delivery_confirmation(
        &self,
        confirmation: &DeliveryConfirmation,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state();
        if state
            .confirmations
            .iter()
            .any(|existing| existing.order_id == confirmation.order_id)
        {
            return Ok(false);
        }
        state.confirmations.push(confirmation.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FulfillmentUpdate, TransitionSource};
    use podbridge_core::{CustomerId, FulfillmentType, ProductId};

    fn seed_order(store: &InMemoryStore, lines: &[&str]) -> OrderId {
        let order_id = OrderId::new("order_1");
        store.add_product(Product {
            id: ProductId::new("prod_1"),
            store_id: Some(StoreId::new("store_1")),
            name: "Poster".to_string(),
            fulfillment_type: FulfillmentType::Pod,
            provider_product_uid: Some("flat_poster".to_string()),
            design_file_url: Some("https://cdn.example.com/poster.pdf".to_string()),
        });
        store.add_order(
            Order {
                id: order_id.clone(),
                customer_id: CustomerId::new("cust_1"),
                customer_email: "buyer@example.com".to_string(),
                status: OrderStatus::Paid,
                currency: Some("USD".to_string()),
                shipping_address: None,
            },
            lines
                .iter()
                .map(|id| OrderItem {
                    id: OrderItemId::new(*id),
                    order_id: order_id.clone(),
                    product_id: ProductId::new("prod_1"),
                    quantity: 1,
                })
                .collect(),
        );
        order_id
    }

    fn reservation(order_id: &OrderId, item: &str) -> NewFulfillmentOrder {
        NewFulfillmentOrder {
            id: FulfillmentOrderId::generate(),
            order_id: order_id.clone(),
            order_item_id: OrderItemId::new(item),
            product_id: ProductId::new("prod_1"),
            store_id: StoreId::new("store_1"),
            external_reference: format!("{order_id}-{item}"),
            shipping_method: "standard".to_string(),
            currency: "USD".to_string(),
            used_platform_account: false,
        }
    }

    #[tokio::test]
    async fn test_reserve_rejects_active_duplicate_but_allows_retry_after_failure() {
        let store = InMemoryStore::new();
        let order_id = seed_order(&store, &["item_1"]);

        let first = store.reserve(&reservation(&order_id, "item_1")).await.expect("reserve");
        let duplicate = store.reserve(&reservation(&order_id, "item_1")).await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

        let released = store
            .commit_transition(&Transition {
                fulfillment_order_id: first.id.clone(),
                order_id: order_id.clone(),
                from: FulfillmentStatus::Pending,
                to: FulfillmentStatus::Failed,
                provider_status: "failed".to_string(),
                update: FulfillmentUpdate {
                    failure_reason: Some("rejected".to_string()),
                    ..FulfillmentUpdate::default()
                },
                source: TransitionSource::Operator,
                at: Utc::now(),
            })
            .await
            .expect("release");
        assert!(released.fulfillment_order.is_some());
        store
            .reserve(&reservation(&order_id, "item_1"))
            .await
            .expect("retry after failure");
    }

    #[tokio::test]
    async fn test_commit_transition_is_compare_and_set() {
        let store = InMemoryStore::new();
        let order_id = seed_order(&store, &["item_1"]);
        let fo = store.reserve(&reservation(&order_id, "item_1")).await.expect("reserve");
        store
            .mark_submitted(&fo.id, "ext_1", Some("created"), Utc::now())
            .await
            .expect("submit");

        let transition = Transition {
            fulfillment_order_id: fo.id.clone(),
            order_id: order_id.clone(),
            from: FulfillmentStatus::Submitted,
            to: FulfillmentStatus::Delivered,
            provider_status: "delivered".to_string(),
            update: FulfillmentUpdate {
                delivered_at: Some(Utc::now()),
                ..FulfillmentUpdate::default()
            },
            source: TransitionSource::Webhook,
            at: Utc::now(),
        };

        let outcome = store.commit_transition(&transition).await.expect("commit");
        assert!(outcome.order_delivered);
        assert_eq!(store.order_status(&order_id), Some(OrderStatus::Delivered));

        let replay = store.commit_transition(&transition).await.expect("commit");
        assert!(replay.fulfillment_order.is_none());
        assert!(!replay.order_delivered);
        assert_eq!(store.timeline(&order_id).len(), 1);
    }

    #[tokio::test]
    async fn test_claim_respects_lease() {
        let store = InMemoryStore::new();
        let event = NewWebhookEvent {
            event_id: ProviderEventId::new("evt_1"),
            event_type: "order_status_updated".to_string(),
            payload: serde_json::json!({}),
        };
        let lease = Duration::from_secs(60);

        assert_eq!(store.claim(&event, lease).await.expect("claim"), ClaimOutcome::Claimed);
        assert_eq!(store.claim(&event, lease).await.expect("claim"), ClaimOutcome::InProgress);

        let renewed = Utc::now() - chrono::Duration::minutes(5);
        store.set_webhook_event_updated_at(&event.event_id, renewed);
        assert_eq!(store.claim(&event, lease).await.expect("claim"), ClaimOutcome::Claimed);

        store.mark_processed(&event.event_id).await.expect("processed");
        assert_eq!(
            store.claim(&event, lease).await.expect("claim"),
            ClaimOutcome::AlreadyProcessed
        );
    }
}
