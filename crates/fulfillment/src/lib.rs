//! PodBridge fulfillment library.
//!
//! Connects a multi-tenant marketplace to a print-on-demand provider:
//! - Per-seller provider credentials, encrypted at rest, with platform fallback
//! - Idempotent submission of order lines as provider orders
//! - Signed, deduplicated webhook ingestion driving a monotonic status machine
//! - Escrow release scheduling once every line of an order is delivered
//!
//! The `podbridge` binary serves the HTTP API over these modules; the
//! `test-support` feature exposes in-memory repositories, a scripted provider
//! and a [`testing::Harness`] for downstream test crates.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod provider;
pub mod routes;
pub mod services;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
