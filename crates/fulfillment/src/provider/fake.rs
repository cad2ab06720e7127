//! Scripted in-process provider for tests.
//!
//! Successful calls are answered from in-memory state; failures are queued
//! per operation with [`ScriptedFailure`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use podbridge_core::StoreId;
use secrecy::ExposeSecret;

use super::{
    CatalogProduct, CreateOrderRequest, CreatedOrder, FulfillmentProvider, ProductList,
    ProductQuery, ProviderCredential, ProviderError, ProviderOrder, Quote, QuoteRequest,
    ShippingMethod, ShippingMethodsRequest,
};

/// A failure to return from a scripted call.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    Timeout,
    Unavailable(String),
    Unauthorized(String),
    NotFound(String),
    Upstream(u16, String),
    NoCredentials,
}

impl ScriptedFailure {
    fn into_error(self) -> ProviderError {
        match self {
            Self::Timeout => ProviderError::Timeout,
            Self::Unavailable(m) => ProviderError::Unavailable(m),
            Self::Unauthorized(m) => ProviderError::Unauthorized(m),
            Self::NotFound(m) => ProviderError::NotFound(m),
            Self::Upstream(status, message) => ProviderError::Upstream { status, message },
            Self::NoCredentials => ProviderError::NoCredentials("not configured".to_string()),
        }
    }
}

#[derive(Default)]
struct Script {
    next_order_number: u32,
    platform_fallback: bool,
    create_failures: VecDeque<ScriptedFailure>,
    created: Vec<(StoreId, CreateOrderRequest)>,
    remote_orders: HashMap<String, ProviderOrder>,
    get_failure: Option<ScriptedFailure>,
    cancel_failure: Option<ScriptedFailure>,
    cancelled: Vec<String>,
    verify_failure: Option<ScriptedFailure>,
    verified_keys: Vec<String>,
    products: Vec<CatalogProduct>,
}

/// Test double implementing [`FulfillmentProvider`].
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report future orders as created under the platform account.
    pub fn set_platform_fallback(&self, fallback: bool) {
        self.script().platform_fallback = fallback;
    }

    /// Fail the next `create_order` call.
    pub fn fail_next_create(&self, failure: ScriptedFailure) {
        self.script().create_failures.push_back(failure);
    }

    /// Set the state returned by `get_order` for an external id.
    pub fn set_remote_order(&self, order: ProviderOrder) {
        self.script().remote_orders.insert(order.id.clone(), order);
    }

    pub fn fail_get_order(&self, failure: Option<ScriptedFailure>) {
        self.script().get_failure = failure;
    }

    pub fn fail_cancel(&self, failure: Option<ScriptedFailure>) {
        self.script().cancel_failure = failure;
    }

    pub fn fail_verify(&self, failure: Option<ScriptedFailure>) {
        self.script().verify_failure = failure;
    }

    pub fn set_products(&self, products: Vec<CatalogProduct>) {
        self.script().products = products;
    }

    /// Every accepted `create_order` request, in call order.
    #[must_use]
    pub fn created_orders(&self) -> Vec<(StoreId, CreateOrderRequest)> {
        self.script().created.clone()
    }

    /// External ids cancelled remotely.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        self.script().cancelled.clone()
    }

    /// API keys passed to `verify_credentials`.
    #[must_use]
    pub fn verified_keys(&self) -> Vec<String> {
        self.script().verified_keys.clone()
    }
}

#[async_trait]
impl FulfillmentProvider for ScriptedProvider {
    async fn create_order(
        &self,
        store_id: &StoreId,
        request: &CreateOrderRequest,
    ) -> Result<CreatedOrder, ProviderError> {
        let mut script = self.script();
        if let Some(failure) = script.create_failures.pop_front() {
            return Err(failure.into_error());
        }

        script.next_order_number += 1;
        let order = ProviderOrder {
            id: format!("ext_{}", script.next_order_number),
            order_reference_id: Some(request.order_reference_id.clone()),
            fulfillment_status: Some("created".to_string()),
            shipments: Vec::new(),
        };
        script.created.push((store_id.clone(), request.clone()));
        script.remote_orders.insert(order.id.clone(), order.clone());

        Ok(CreatedOrder {
            order,
            used_platform_account: script.platform_fallback,
        })
    }

    async fn get_order(
        &self,
        _store_id: &StoreId,
        external_order_id: &str,
    ) -> Result<ProviderOrder, ProviderError> {
        let script = self.script();
        if let Some(failure) = script.get_failure.clone() {
            return Err(failure.into_error());
        }
        script
            .remote_orders
            .get(external_order_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("order {external_order_id}")))
    }

    async fn cancel_order(
        &self,
        _store_id: &StoreId,
        external_order_id: &str,
    ) -> Result<(), ProviderError> {
        let mut script = self.script();
        if let Some(failure) = script.cancel_failure.clone() {
            return Err(failure.into_error());
        }
        script.cancelled.push(external_order_id.to_owned());
        Ok(())
    }

    async fn list_products(
        &self,
        _store_id: Option<&StoreId>,
        query: &ProductQuery,
    ) -> Result<ProductList, ProviderError> {
        let script = self.script();
        let products: Vec<CatalogProduct> = script
            .products
            .iter()
            .filter(|p| {
                query.search.as_deref().is_none_or(|search| {
                    p.title.as_deref().unwrap_or(&p.product_uid).contains(search)
                })
            })
            .cloned()
            .collect();
        Ok(ProductList {
            total: Some(products.len() as u64),
            products,
        })
    }

    async fn get_product(
        &self,
        _store_id: Option<&StoreId>,
        product_uid: &str,
    ) -> Result<CatalogProduct, ProviderError> {
        self.script()
            .products
            .iter()
            .find(|p| p.product_uid == product_uid)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("product {product_uid}")))
    }

    async fn shipping_methods(
        &self,
        _store_id: Option<&StoreId>,
        _request: &ShippingMethodsRequest,
    ) -> Result<Vec<ShippingMethod>, ProviderError> {
        Ok(Vec::new())
    }

    async fn quote(
        &self,
        _store_id: Option<&StoreId>,
        _request: &QuoteRequest,
    ) -> Result<Quote, ProviderError> {
        Ok(Quote {
            items: Vec::new(),
            extra: serde_json::Map::new(),
        })
    }

    async fn verify_credentials(
        &self,
        credential: &ProviderCredential,
    ) -> Result<(), ProviderError> {
        let mut script = self.script();
        script
            .verified_keys
            .push(credential.api_key.expose_secret().to_owned());
        match script.verify_failure.clone() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}
