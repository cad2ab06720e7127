//! Domain records shared by repositories, services, and routes.

pub mod credential;
pub mod escrow;
pub mod fulfillment;
pub mod order;
pub mod webhook;

pub use credential::*;
pub use escrow::*;
pub use fulfillment::*;
pub use order::*;
pub use webhook::*;
