//! CLI subcommands.

pub mod connection;
pub mod migrate;
pub mod sync;
