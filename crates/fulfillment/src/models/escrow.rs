//! Escrow ledger records (owned by the payments collaborator).

use chrono::{DateTime, Utc};
use podbridge_core::{EscrowId, EscrowStatus, OrderId};
use serde::Serialize;

/// Buyer funds held against an order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EscrowTransaction {
    pub id: EscrowId,
    pub order_id: OrderId,
    pub status: EscrowStatus,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub delivery_confirmed: bool,
    pub delivery_confirmed_at: Option<DateTime<Utc>>,
}

/// Evidence that an order reached the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfirmation {
    pub order_id: OrderId,
    pub confirmed_by: String,
    pub confirmation_type: String,
    pub notes: Option<String>,
}
