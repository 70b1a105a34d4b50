//! Unsubscribe command implementation

use clap::Args;

use super::open_store;
use crate::config::Config;
use crate::engine::TickEngine;

#[derive(Args, Debug)]
pub struct UnsubscribeArgs {
    /// Symbol to remove
    pub symbol: String,

    /// Keep stored ticks and aggregates
    #[arg(long)]
    pub keep_data: bool,
}

impl UnsubscribeArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let mut config = config.clone();
        if self.keep_data {
            config.storage.purge_on_unsubscribe = false;
        }

        let store = open_store(&config).await?;
        let engine = TickEngine::new(config, store);
        let report = engine.unsubscribe(&self.symbol).await?;

        println!(
            "Unsubscribed {}: {} ticks, {} aggregates removed",
            report.symbol, report.purged.ticks_removed, report.purged.aggregates_removed
        );
        Ok(())
    }
}
