//! PodBridge Core - Shared types library.
//!
//! This crate provides the domain vocabulary used across PodBridge components:
//! - `fulfillment` - Credential resolution, order submission, webhook ingestion
//! - `cli` - Command-line tools for migrations and manual sync
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, fulfillment/order/escrow statuses, credential masking

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
