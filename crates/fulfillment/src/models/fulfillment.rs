//! Fulfillment order records and transition descriptors.

use chrono::{DateTime, Utc};
use podbridge_core::{
    FulfillmentOrderId, FulfillmentStatus, OrderId, OrderItemId, ProductId, StoreId,
};
use serde::{Deserialize, Serialize};

/// Default page size for fulfillment order listings.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Upper bound for fulfillment order listings.
pub const MAX_PAGE_SIZE: i64 = 200;

/// One order line's lifecycle at the print-on-demand provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentOrder {
    pub id: FulfillmentOrderId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub external_order_id: Option<String>,
    pub external_reference: String,
    pub status: FulfillmentStatus,
    /// Raw status string last reported by the provider.
    pub provider_status: Option<String>,
    pub shipping_method: String,
    pub currency: String,
    pub used_platform_account: bool,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
    pub failure_reason: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub produced_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A `PENDING` reservation for an order line, inserted before the provider call.
#[derive(Debug, Clone)]
pub struct NewFulfillmentOrder {
    pub id: FulfillmentOrderId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub product_id: ProductId,
    pub store_id: StoreId,
    pub external_reference: String,
    pub shipping_method: String,
    pub currency: String,
    pub used_platform_account: bool,
}

/// Listing filter for fulfillment orders.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentFilter {
    pub status: Option<FulfillmentStatus>,
    pub order_id: Option<OrderId>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

const fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

impl Default for FulfillmentFilter {
    fn default() -> Self {
        Self {
            status: None,
            order_id: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl FulfillmentFilter {
    /// Clamp paging values into the accepted range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self.offset = self.offset.max(0);
        self
    }
}

/// Shipment tracking details reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingInfo {
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub carrier: Option<String>,
}

impl TrackingInfo {
    /// Whether any field carries data.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tracking_number.is_none() && self.tracking_url.is_none() && self.carrier.is_none()
    }
}

/// Column values written alongside a status change. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FulfillmentUpdate {
    pub produced_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub tracking: TrackingInfo,
    pub failure_reason: Option<String>,
}

/// Where a transition originated; recorded in order timeline metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    Webhook,
    Sync,
    /// Decided here: an operator cancel or a released reservation.
    Operator,
}

impl TransitionSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "provider_webhook",
            Self::Sync => "provider_sync",
            Self::Operator => "operator",
        }
    }
}

/// A planned, validated status change for one fulfillment order.
///
/// Committed atomically together with its parent-order effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub fulfillment_order_id: FulfillmentOrderId,
    pub order_id: OrderId,
    /// Status observed when planning; the update is a compare-and-set on it.
    pub from: FulfillmentStatus,
    pub to: FulfillmentStatus,
    pub provider_status: String,
    pub update: FulfillmentUpdate,
    pub source: TransitionSource,
    pub at: DateTime<Utc>,
}

/// Result of committing a [`Transition`].
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// Updated record, or `None` when the compare-and-set lost a race.
    pub fulfillment_order: Option<FulfillmentOrder>,
    /// This commit observed the last line delivered and moved the parent order.
    pub order_delivered: bool,
}
