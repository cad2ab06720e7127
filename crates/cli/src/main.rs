//! PodBridge CLI - Database migrations and fulfillment maintenance tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! podbridge-cli migrate
//!
//! # Re-sync one fulfillment order from the provider
//! podbridge-cli sync <fulfillment-order-id>
//!
//! # One pass of the background sync
//! podbridge-cli sync-stale --older-than-secs 3600
//!
//! # Verify a provider API key
//! podbridge-cli test-connection --api-key-env SELLER_KEY --store-id <provider-store-id>
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `sync` - Manual drift correction for one record
//! - `sync-stale` - Drift correction for every record gone quiet
//! - `test-connection` - Provider credential check

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "podbridge-cli")]
#[command(author, version, about = "PodBridge CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Re-read one fulfillment order's status from the provider
    Sync {
        /// Fulfillment order id
        id: String,
    },
    /// Sync every active fulfillment order not updated recently
    SyncStale {
        /// Staleness window in seconds (defaults to `SYNC_STALE_AFTER_SECS`)
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
    /// Test a provider API key and store id
    TestConnection {
        /// Environment variable holding the API key
        #[arg(long)]
        api_key_env: String,

        /// Provider store id
        #[arg(long)]
        store_id: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Sync { id } => {
            commands::sync::one(&id).await?;
        }
        Commands::SyncStale { older_than_secs } => {
            let report = commands::sync::stale(older_than_secs).await?;
            if report.failed > 0 {
                return Err(format!("{} record(s) failed to sync", report.failed).into());
            }
        }
        Commands::TestConnection {
            api_key_env,
            store_id,
        } => {
            commands::connection::test(&api_key_env, &store_id).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_sync_stale_window() {
        let cli = Cli::try_parse_from(["podbridge-cli", "sync-stale", "--older-than-secs", "7200"])
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(
            cli.command,
            Commands::SyncStale {
                older_than_secs: Some(7200)
            }
        ));
    }

    #[test]
    fn test_parses_test_connection() {
        let cli = Cli::try_parse_from([
            "podbridge-cli",
            "test-connection",
            "--api-key-env",
            "SELLER_KEY",
            "--store-id",
            "prov_1",
        ])
        .unwrap_or_else(|e| panic!("{e}"));
        match cli.command {
            Commands::TestConnection {
                api_key_env,
                store_id,
            } => {
                assert_eq!(api_key_env, "SELLER_KEY");
                assert_eq!(store_id, "prov_1");
            }
            _ => panic!("expected test-connection"),
        }
    }
}
