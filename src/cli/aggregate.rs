//! Aggregate command implementation

use std::sync::Arc;

use clap::Args;

use super::open_store;
use crate::aggregate::AggregationScheduler;
use crate::clock;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Only refresh this interval (minutes)
    #[arg(short, long)]
    pub interval: Option<u32>,
}

impl AggregateArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = open_store(config).await?;
        let intervals = match self.interval {
            Some(interval) => vec![interval],
            None => config.aggregation.intervals_minutes.clone(),
        };
        let scheduler = AggregationScheduler::new(Arc::clone(&store), intervals);

        let report = scheduler.run_all(clock::now_ms()).await;
        for (interval, upserted) in &report.upserted {
            println!("{:>4} min  {} buckets", interval, upserted);
        }
        for (interval, error) in &report.failed {
            println!("{:>4} min  failed: {}", interval, error);
        }

        if !report.is_success() {
            anyhow::bail!("{} aggregation interval(s) failed", report.failed.len());
        }
        Ok(())
    }
}
