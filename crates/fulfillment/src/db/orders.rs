//! Read access to marketplace orders for submission.

use async_trait::async_trait;
use podbridge_core::{
    CustomerId, FulfillmentType, OrderId, OrderItemId, OrderStatus, ProductId, StoreId,
};
use sqlx::PgPool;
use sqlx::types::Json;

use super::RepositoryError;
use crate::models::{Order, OrderItem, OrderLine, Product, ShippingAddress};

/// Order lines joined with product and order data.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Load one line of an order.
    async fn order_line(
        &self,
        order_id: &OrderId,
        order_item_id: &OrderItemId,
    ) -> Result<Option<OrderLine>, RepositoryError>;

    /// Load every line of an order, in item id order.
    async fn order_lines(&self, order_id: &OrderId) -> Result<Vec<OrderLine>, RepositoryError>;
}

/// Internal row type for the order line join.
#[derive(Debug, sqlx::FromRow)]
struct OrderLineRow {
    order_id: OrderId,
    customer_id: CustomerId,
    customer_email: String,
    order_status: OrderStatus,
    currency: Option<String>,
    shipping_address: Option<Json<ShippingAddress>>,
    item_id: OrderItemId,
    quantity: i32,
    product_id: ProductId,
    store_id: Option<StoreId>,
    product_name: String,
    fulfillment_type: FulfillmentType,
    provider_product_uid: Option<String>,
    design_file_url: Option<String>,
}

impl From<OrderLineRow> for OrderLine {
    fn from(row: OrderLineRow) -> Self {
        Self {
            order: Order {
                id: row.order_id.clone(),
                customer_id: row.customer_id,
                customer_email: row.customer_email,
                status: row.order_status,
                currency: row.currency,
                shipping_address: row.shipping_address.map(|Json(address)| address),
            },
            item: OrderItem {
                id: row.item_id,
                order_id: row.order_id,
                product_id: row.product_id.clone(),
                quantity: row.quantity,
            },
            product: Product {
                id: row.product_id,
                store_id: row.store_id,
                name: row.product_name,
                fulfillment_type: row.fulfillment_type,
                provider_product_uid: row.provider_product_uid,
                design_file_url: row.design_file_url,
            },
        }
    }
}

const ORDER_LINE_SELECT: &str = r"
    SELECT
        o.id AS order_id,
        o.customer_id,
        o.customer_email,
        o.status AS order_status,
        o.currency,
        o.shipping_address,
        i.id AS item_id,
        i.quantity,
        p.id AS product_id,
        p.store_id,
        p.name AS product_name,
        p.fulfillment_type,
        p.provider_product_uid,
        p.design_file_url
    FROM order_items i
    JOIN orders o ON o.id = i.order_id
    JOIN products p ON p.id = i.product_id
";

/// `PostgreSQL` implementation of [`OrderRepository`].
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn order_line(
        &self,
        order_id: &OrderId,
        order_item_id: &OrderItemId,
    ) -> Result<Option<OrderLine>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderLineRow>(&format!(
            "{ORDER_LINE_SELECT} WHERE i.order_id = $1 AND i.id = $2"
        ))
        .bind(order_id)
        .bind(order_item_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OrderLine::from))
    }

    async fn order_lines(&self, order_id: &OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderLineRow>(&format!(
            "{ORDER_LINE_SELECT} WHERE i.order_id = $1 ORDER BY i.id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OrderLine::from).collect())
    }
}
