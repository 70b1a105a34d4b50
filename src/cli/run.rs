//! Run command implementation

use clap::Args;
use tokio::io::{AsyncWriteExt, BufReader};

use super::open_store;
use crate::config::Config;
use crate::engine::TickEngine;
use crate::feed::{NdjsonFeed, TickFeed};
use crate::subscription::SubscriptionError;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Subscribe to a symbol before ingesting (repeatable)
    #[arg(short, long = "symbol")]
    pub symbols: Vec<String>,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = open_store(config).await?;
        let engine = TickEngine::new(config.clone(), store);
        engine.start().await?;

        for symbol in &self.symbols {
            match engine.subscribe(symbol).await {
                Ok(_) => {}
                Err(SubscriptionError::DuplicateSubscription(_)) => {
                    tracing::debug!(symbol = %symbol, "Already subscribed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let feed = NdjsonFeed::new(BufReader::new(tokio::io::stdin()));
        let rx = feed.subscribe().await?;
        let mut ingestion = engine.spawn_ingestion(rx);
        let mut session = engine.connect();
        let mut stdout = tokio::io::stdout();

        tracing::info!(session = %session.id(), "Streaming notifications to stdout");

        loop {
            tokio::select! {
                result = &mut ingestion => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Ingestion task failed");
                    }
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                    break;
                }
                Some(event) = session.recv() => {
                    let frame = event.to_sse_frame()?;
                    stdout.write_all(frame.as_bytes()).await?;
                    stdout.flush().await?;
                }
            }
        }

        session.close();
        engine.shutdown().await?;
        Ok(())
    }
}
