//! Request and response shapes of the provider API.
//!
//! Field names follow the provider's camelCase JSON. Catalog and quote
//! responses keep unknown fields in `extra` so they can be passed through.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Default page size for catalog listings.
pub const DEFAULT_CATALOG_LIMIT: u32 = 20;

// =============================================================================
// Orders
// =============================================================================

/// Body of `POST /orders`. The client adds the provider store id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_reference_id: String,
    pub customer_reference_id: String,
    pub currency: String,
    pub items: Vec<OrderItemRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipment_method_uid: Option<String>,
    pub shipping_address: ProviderAddress,
    pub metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub item_reference_id: String,
    pub product_uid: String,
    pub quantity: i32,
    pub files: Vec<PrintFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAddress {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub address_line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_line2: Option<String>,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub post_code: String,
    pub country: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

/// A provider order as returned by create and get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOrder {
    pub id: String,
    #[serde(default)]
    pub order_reference_id: Option<String>,
    /// Raw provider status, e.g. `passed`, `printed`, `shipped`.
    #[serde(default)]
    pub fulfillment_status: Option<String>,
    #[serde(default)]
    pub shipments: Vec<ProviderShipment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderShipment {
    #[serde(default)]
    pub tracking_code: Option<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
    #[serde(default, alias = "shipmentMethodName")]
    pub carrier: Option<String>,
}

/// Result of creating an order, with the account it was created under.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: ProviderOrder,
    pub used_platform_account: bool,
}

// =============================================================================
// Catalog
// =============================================================================

/// Query for `GET /catalogs/products`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl ProductQuery {
    /// Query string pairs, with the default limit applied.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            pairs.push(("category", category.to_owned()));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("search", search.to_owned()));
        }
        pairs.push(("limit", self.limit.unwrap_or(DEFAULT_CATALOG_LIMIT).to_string()));
        pairs.push(("offset", self.offset.unwrap_or(0).to_string()));
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductList {
    #[serde(default)]
    pub products: Vec<CatalogProduct>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub product_uid: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

// =============================================================================
// Shipping and quotes
// =============================================================================

/// Parameters for a shipping method lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingMethodsRequest {
    pub product_uid: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
}

const fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingMethod {
    #[serde(default)]
    pub shipment_method_uid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteItem {
    pub product_uid: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

/// Parameters for a price quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub items: Vec<QuoteItem>,
    pub country: String,
    #[serde(default)]
    pub shipping_method_uid: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedItem {
    pub product_uid: String,
    #[serde(default)]
    pub quantity: Option<u32>,
    pub item_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub items: Vec<QuotedItem>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}
