//! Core types for PodBridge.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod credential;
pub mod id;
pub mod status;

pub use credential::{MASKED_SECRET, mask_api_key};
pub use id::*;
pub use status::*;
