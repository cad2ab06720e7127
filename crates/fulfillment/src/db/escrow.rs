//! Escrow ledger collaborator.
//!
//! This integration only ever moves a `HELD` escrow to `PENDING_RELEASE`; the
//! payments service owns the actual release of funds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use podbridge_core::{EscrowId, OrderId};
use sqlx::PgPool;

use super::RepositoryError;
use crate::models::{DeliveryConfirmation, EscrowTransaction};

/// Escrow operations available to the fulfillment integration.
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    async fn find_by_order_id(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<EscrowTransaction>, RepositoryError>;

    /// Move a `HELD` escrow to `PENDING_RELEASE`, marking delivery confirmed.
    ///
    /// Returns `false` if the escrow was not `HELD`.
    async fn transition_to_pending_release(
        &self,
        escrow_id: &EscrowId,
        auto_release_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Record a delivery confirmation unless one already exists for the order.
    ///
    /// Returns `true` if a new confirmation was created.
    async fn record_delivery_confirmation(
        &self,
        confirmation: &DeliveryConfirmation,
    ) -> Result<bool, RepositoryError>;
}

/// `PostgreSQL` implementation of [`EscrowLedger`].
pub struct PgEscrowLedger {
    pool: PgPool,
}

impl PgEscrowLedger {
    /// Create a new escrow ledger.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EscrowLedger for PgEscrowLedger {
    async fn find_by_order_id(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<EscrowTransaction>, RepositoryError> {
        let row = sqlx::query_as::<_, EscrowTransaction>(
            r"
            SELECT id, order_id, status, auto_release_at, delivery_confirmed, delivery_confirmed_at
            FROM escrow_transactions
            WHERE order_id = $1
            ",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn transition_to_pending_release(
        &self,
        escrow_id: &EscrowId,
        auto_release_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE escrow_transactions SET
                status = 'PENDING_RELEASE',
                auto_release_at = $2,
                delivery_confirmed = TRUE,
                delivery_confirmed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'HELD'
            ",
        )
        .bind(escrow_id)
        .bind(auto_release_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_delivery_confirmation(
        &self,
        confirmation: &DeliveryConfirmation,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO delivery_confirmations (order_id, confirmed_by, confirmation_type, notes)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id) DO NOTHING
            ",
        )
        .bind(&confirmation.order_id)
        .bind(&confirmation.confirmed_by)
        .bind(&confirmation.confirmation_type)
        .bind(&confirmation.notes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
