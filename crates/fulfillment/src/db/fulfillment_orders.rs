//! Fulfillment order repository.
//!
//! Owns the duplicate-submission guard (partial unique index on active lines)
//! and the transactional commit of status transitions together with their
//! parent-order effects.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podbridge_core::{FulfillmentOrderId, FulfillmentStatus, OrderId, OrderItemId, OrderStatus};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};

use super::RepositoryError;
use crate::models::{
    FulfillmentFilter, FulfillmentOrder, NewFulfillmentOrder, Transition, TransitionOutcome,
};

/// Message carried by the duplicate-submission conflict.
pub const ALREADY_SUBMITTED: &str = "Order item already submitted";

const FULFILLMENT_COLUMNS: &str = r"
    id, order_id, order_item_id, product_id, store_id, external_order_id,
    external_reference, status, provider_status, shipping_method, currency,
    used_platform_account, tracking_number, tracking_url, carrier, failure_reason,
    submitted_at, produced_at, shipped_at, delivered_at, cancelled_at,
    created_at, updated_at
";

/// Persistence for fulfillment orders.
#[async_trait]
pub trait FulfillmentRepository: Send + Sync {
    /// Insert a `PENDING` reservation for an order line.
    ///
    /// Returns [`RepositoryError::Conflict`] if a non-`FAILED` record already
    /// exists for the same (order, item) pair.
    async fn reserve(&self, new: &NewFulfillmentOrder) -> Result<FulfillmentOrder, RepositoryError>;

    /// Promote a reservation to `SUBMITTED` with the provider's order id.
    async fn mark_submitted(
        &self,
        id: &FulfillmentOrderId,
        external_order_id: &str,
        provider_status: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<FulfillmentOrder, RepositoryError>;

    async fn get(
        &self,
        id: &FulfillmentOrderId,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError>;

    async fn find_by_external_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError>;

    /// The live (non-`FAILED`) record for an order line, if any.
    async fn find_active_for_line(
        &self,
        order_id: &OrderId,
        order_item_id: &OrderItemId,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError>;

    async fn list(
        &self,
        filter: &FulfillmentFilter,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError>;

    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError>;

    /// Non-terminal records with an external id that neither changed nor were
    /// checked against the provider since `idle_before`, least recent first.
    async fn list_stale_active(
        &self,
        idle_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError>;

    /// Note that a record was checked against the provider, whatever the result.
    async fn mark_sync_checked(
        &self,
        id: &FulfillmentOrderId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Apply a transition and its parent-order effects in one transaction.
    async fn commit_transition(
        &self,
        transition: &Transition,
    ) -> Result<TransitionOutcome, RepositoryError>;
}

/// Whether every fulfillment line of an order has been delivered.
///
/// A `FAILED` attempt only counts when nothing replaced it: once a line is
/// resubmitted, its live record decides. Any other status, `CANCELLED`
/// included, keeps the order open.
#[must_use]
pub fn all_lines_delivered<'a>(
    lines: impl IntoIterator<Item = (&'a OrderItemId, FulfillmentStatus)>,
) -> bool {
    let mut items: HashMap<&OrderItemId, bool> = HashMap::new();
    for (item, status) in lines {
        match status {
            FulfillmentStatus::Delivered => {
                items.insert(item, true);
            }
            FulfillmentStatus::Failed => {
                items.entry(item).or_insert(false);
            }
            _ => return false,
        }
    }
    !items.is_empty() && items.values().all(|delivered| *delivered)
}

/// Timeline entry text for a shipment.
#[must_use]
pub fn shipped_timeline(transition: &Transition) -> (String, String, serde_json::Value) {
    let tracking = &transition.update.tracking;
    let carrier = tracking.carrier.as_deref().unwrap_or("carrier");
    (
        "Order Shipped".to_string(),
        format!("Order shipped via {carrier}"),
        json!({
            "fulfillmentOrderId": transition.fulfillment_order_id,
            "trackingNumber": tracking.tracking_number,
            "trackingUrl": tracking.tracking_url,
            "carrier": tracking.carrier,
            "source": transition.source.as_str(),
        }),
    )
}

/// Timeline entry text for a completed delivery.
#[must_use]
pub fn delivered_timeline(transition: &Transition) -> (String, String, serde_json::Value) {
    (
        "Order Delivered".to_string(),
        "All items delivered".to_string(),
        json!({
            "fulfillmentOrderId": transition.fulfillment_order_id,
            "source": transition.source.as_str(),
        }),
    )
}

/// `PostgreSQL` implementation of [`FulfillmentRepository`].
pub struct PgFulfillmentRepository {
    pool: PgPool,
}

impl PgFulfillmentRepository {
    /// Create a new fulfillment order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_timeline(
        tx: &mut Transaction<'_, Postgres>,
        order_id: &OrderId,
        status: OrderStatus,
        (title, description, metadata): (String, String, serde_json::Value),
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO order_timeline (order_id, status, title, description, metadata)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(order_id)
        .bind(status)
        .bind(title)
        .bind(description)
        .bind(metadata)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FulfillmentRepository for PgFulfillmentRepository {
    async fn reserve(
        &self,
        new: &NewFulfillmentOrder,
    ) -> Result<FulfillmentOrder, RepositoryError> {
        sqlx::query_as::<_, FulfillmentOrder>(&format!(
            r"
            INSERT INTO fulfillment_orders (
                id, order_id, order_item_id, product_id, store_id, external_reference,
                status, shipping_method, currency, used_platform_account
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7, $8, $9)
            RETURNING {FULFILLMENT_COLUMNS}
            "
        ))
        .bind(&new.id)
        .bind(&new.order_id)
        .bind(&new.order_item_id)
        .bind(&new.product_id)
        .bind(&new.store_id)
        .bind(&new.external_reference)
        .bind(&new.shipping_method)
        .bind(&new.currency)
        .bind(new.used_platform_account)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique_violation(e, ALREADY_SUBMITTED))
    }

    async fn mark_submitted(
        &self,
        id: &FulfillmentOrderId,
        external_order_id: &str,
        provider_status: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<FulfillmentOrder, RepositoryError> {
        sqlx::query_as::<_, FulfillmentOrder>(&format!(
            r"
            UPDATE fulfillment_orders SET
                status = 'SUBMITTED',
                external_order_id = $2,
                provider_status = $3,
                submitted_at = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            RETURNING {FULFILLMENT_COLUMNS}
            "
        ))
        .bind(id)
        .bind(external_order_id)
        .bind(provider_status)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            RepositoryError::from_unique_violation(e, "External order id already recorded")
        })?
        .ok_or(RepositoryError::NotFound)
    }

    async fn get(
        &self,
        id: &FulfillmentOrderId,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, FulfillmentOrder>(&format!(
            "SELECT {FULFILLMENT_COLUMNS} FROM fulfillment_orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_external_id(
        &self,
        external_order_id: &str,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, FulfillmentOrder>(&format!(
            "SELECT {FULFILLMENT_COLUMNS} FROM fulfillment_orders WHERE external_order_id = $1"
        ))
        .bind(external_order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_active_for_line(
        &self,
        order_id: &OrderId,
        order_item_id: &OrderItemId,
    ) -> Result<Option<FulfillmentOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, FulfillmentOrder>(&format!(
            r"
            SELECT {FULFILLMENT_COLUMNS} FROM fulfillment_orders
            WHERE order_id = $1 AND order_item_id = $2 AND status <> 'FAILED'
            "
        ))
        .bind(order_id)
        .bind(order_item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list(
        &self,
        filter: &FulfillmentFilter,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, FulfillmentOrder>(&format!(
            r"
            SELECT {FULFILLMENT_COLUMNS} FROM fulfillment_orders
            WHERE ($1::fulfillment_status IS NULL OR status = $1)
              AND ($2::text IS NULL OR order_id = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "
        ))
        .bind(filter.status)
        .bind(&filter.order_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, FulfillmentOrder>(&format!(
            r"
            SELECT {FULFILLMENT_COLUMNS} FROM fulfillment_orders
            WHERE order_id = $1
            ORDER BY created_at, id
            "
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_stale_active(
        &self,
        idle_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FulfillmentOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, FulfillmentOrder>(&format!(
            r"
            SELECT {FULFILLMENT_COLUMNS} FROM fulfillment_orders
            WHERE status IN ('SUBMITTED', 'IN_PRODUCTION', 'PRODUCED', 'SHIPPED')
              AND external_order_id IS NOT NULL
              AND GREATEST(updated_at, last_synced_at) < $1
            ORDER BY GREATEST(updated_at, last_synced_at), id
            LIMIT $2
            "
        ))
        .bind(idle_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_sync_checked(
        &self,
        id: &FulfillmentOrderId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE fulfillment_orders SET last_synced_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn commit_transition(
        &self,
        transition: &Transition,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Serialize transitions per order so exactly one commit observes the
        // last delivered line.
        let parent_status: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(&transition.order_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(parent_status) = parent_status else {
            return Err(RepositoryError::DataCorruption(format!(
                "fulfillment order {} references missing order {}",
                transition.fulfillment_order_id, transition.order_id
            )));
        };

        let update = &transition.update;
        let updated = sqlx::query_as::<_, FulfillmentOrder>(&format!(
            r"
            UPDATE fulfillment_orders SET
                status = $3,
                provider_status = $4,
                produced_at = COALESCE($5, produced_at),
                shipped_at = COALESCE($6, shipped_at),
                delivered_at = COALESCE($7, delivered_at),
                cancelled_at = COALESCE($8, cancelled_at),
                tracking_number = COALESCE($9, tracking_number),
                tracking_url = COALESCE($10, tracking_url),
                carrier = COALESCE($11, carrier),
                failure_reason = COALESCE($12, failure_reason),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {FULFILLMENT_COLUMNS}
            "
        ))
        .bind(&transition.fulfillment_order_id)
        .bind(transition.from)
        .bind(transition.to)
        .bind(&transition.provider_status)
        .bind(update.produced_at)
        .bind(update.shipped_at)
        .bind(update.delivered_at)
        .bind(update.cancelled_at)
        .bind(&update.tracking.tracking_number)
        .bind(&update.tracking.tracking_url)
        .bind(&update.tracking.carrier)
        .bind(&update.failure_reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(TransitionOutcome {
                fulfillment_order: None,
                order_delivered: false,
            });
        };

        let mut order_delivered = false;
        match transition.to {
            FulfillmentStatus::Shipped => {
                if parent_status.accepts_shipment() {
                    sqlx::query(
                        "UPDATE orders SET status = 'SHIPPED', updated_at = NOW() WHERE id = $1",
                    )
                    .bind(&transition.order_id)
                    .execute(&mut *tx)
                    .await?;
                }
                Self::append_timeline(
                    &mut tx,
                    &transition.order_id,
                    OrderStatus::Shipped,
                    shipped_timeline(transition),
                )
                .await?;
            }
            FulfillmentStatus::Delivered => {
                let siblings: Vec<(OrderItemId, FulfillmentStatus)> = sqlx::query_as(
                    "SELECT order_item_id, status FROM fulfillment_orders WHERE order_id = $1",
                )
                .bind(&transition.order_id)
                .fetch_all(&mut *tx)
                .await?;

                let lines = siblings.iter().map(|(item, status)| (item, *status));
                if parent_status != OrderStatus::Delivered && all_lines_delivered(lines) {
                    sqlx::query(
                        "UPDATE orders SET status = 'DELIVERED', updated_at = NOW() WHERE id = $1",
                    )
                    .bind(&transition.order_id)
                    .execute(&mut *tx)
                    .await?;
                    Self::append_timeline(
                        &mut tx,
                        &transition.order_id,
                        OrderStatus::Delivered,
                        delivered_timeline(transition),
                    )
                    .await?;
                    order_delivered = true;
                }
            }
            _ => {}
        }

        tx.commit().await?;

        Ok(TransitionOutcome {
            fulfillment_order: Some(updated),
            order_delivered,
        })
    }
}
