//! Integration tests for PodBridge.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p podbridge-integration-tests
//! ```
//!
//! Everything runs against the fulfillment crate's `test-support` harness:
//! in-memory repositories and a scripted provider, no database or network.
//!
//! # Test Categories
//!
//! - `scenarios` - Submit, duplicate submit, shipped webhook, replay, unknown order
//! - `properties` - Idempotent replay, escrow exactly once, cache TTL, transition completeness
//! - `http_api` - Routes driven through the axum router

use podbridge_core::{EscrowId, EscrowStatus, OrderId};
use podbridge_fulfillment::models::EscrowTransaction;
use podbridge_fulfillment::testing::Harness;

/// Hold buyer funds against an order.
pub fn hold_escrow(h: &Harness, order_id: &str) {
    h.memory.add_escrow(EscrowTransaction {
        id: EscrowId::new(format!("esc_{order_id}")),
        order_id: OrderId::new(order_id),
        status: EscrowStatus::Held,
        auto_release_at: None,
        delivery_confirmed: false,
        delivery_confirmed_at: None,
    });
}
