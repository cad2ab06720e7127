//! Marketplace order records read and updated through the order repository.

use chrono::{DateTime, Utc};
use podbridge_core::{
    CustomerId, FulfillmentType, OrderId, OrderItemId, OrderStatus, ProductId, StoreId,
};
use serde::{Deserialize, Serialize};

/// Postal address stored on the order (JSONB column).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub company: Option<String>,
    pub address_line1: String,
    #[serde(default)]
    pub address_line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub post_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A marketplace order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub customer_email: String,
    pub status: OrderStatus,
    pub currency: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
}

/// One line of a marketplace order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i32,
}

/// A marketplace product.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub store_id: Option<StoreId>,
    pub name: String,
    pub fulfillment_type: FulfillmentType,
    /// Provider product template identifier.
    pub provider_product_uid: Option<String>,
    pub design_file_url: Option<String>,
}

/// An order line joined with its product and order, as needed for submission.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub order: Order,
    pub item: OrderItem,
    pub product: Product,
}

/// An entry appended to the order's customer-visible timeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub title: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipping_address_deserializes_camel_case() {
        let address: ShippingAddress = serde_json::from_str(
            r#"{
                "firstName": "Ada",
                "lastName": "Lovelace",
                "addressLine1": "12 Analytical Row",
                "city": "London",
                "postCode": "N1 9GU",
                "country": "GB"
            }"#,
        )
        .expect("deserialize");

        assert_eq!(address.first_name, "Ada");
        assert_eq!(address.address_line2, None);
        assert_eq!(address.country, "GB");
    }
}
