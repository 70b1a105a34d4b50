//! CLI interface for tickwatch
//!
//! Provides subcommands for:
//! - `run`: Ingest NDJSON ticks from stdin and stream notifications to stdout
//! - `aggregate`: Run one aggregation pass now
//! - `unsubscribe`: Remove a persisted subscription
//! - `config`: Show the effective configuration

mod aggregate;
mod run;
mod unsubscribe;

pub use aggregate::AggregateArgs;
pub use run::RunArgs;
pub use unsubscribe::UnsubscribeArgs;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::storage::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "tickwatch")]
#[command(about = "Rolling-window price change tracking, aggregation and alerting")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest ticks from stdin and stream notifications to stdout
    Run(RunArgs),
    /// Run one aggregation pass now
    Aggregate(AggregateArgs),
    /// Remove a persisted subscription
    Unsubscribe(UnsubscribeArgs),
    /// Show the effective configuration
    Config,
}

/// Open the configured database
async fn open_store(config: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(
        &config.storage.database_url,
        config.storage.max_connections,
    )
    .await?
    .with_batch_size(config.flush.batch_size);
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_symbols() {
        let cli = Cli::parse_from(["tickwatch", "run", "--symbol", "AAPL", "-s", "TSLA"]);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.symbols, vec!["AAPL", "TSLA"]),
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, "config.toml");
    }

    #[test]
    fn test_parse_aggregate_interval() {
        let cli = Cli::parse_from(["tickwatch", "-c", "alt.toml", "aggregate", "--interval", "15"]);
        match cli.command {
            Commands::Aggregate(args) => assert_eq!(args.interval, Some(15)),
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.config, "alt.toml");
    }

    #[test]
    fn test_parse_unsubscribe() {
        let cli = Cli::parse_from(["tickwatch", "unsubscribe", "INFY", "--keep-data"]);
        match cli.command {
            Commands::Unsubscribe(args) => {
                assert_eq!(args.symbol, "INFY");
                assert!(args.keep_data);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unsubscribe_requires_symbol() {
        assert!(Cli::try_parse_from(["tickwatch", "unsubscribe"]).is_err());
    }
}
