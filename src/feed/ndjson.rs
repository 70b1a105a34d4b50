//! Newline-delimited JSON tick feed

use super::{RawTick, TickFeed};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// Reads one normalized tick record per line from an async reader
///
/// This is the hand-off point from whatever transport decodes vendor
/// messages: the collaborator writes records, the engine consumes them.
pub struct NdjsonFeed<R> {
    reader: Mutex<Option<R>>,
    buffer_size: usize,
}

impl<R> NdjsonFeed<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Create a feed over the given reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            buffer_size: 1024,
        }
    }

    /// Parse a single line into a raw record
    fn parse_line(line: &str) -> Option<RawTick> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str(line) {
            Ok(raw) => Some(raw),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unparsable tick record");
                None
            }
        }
    }

    /// Run the line reading loop until EOF or receiver drop
    async fn run_read_loop(reader: R, tick_tx: mpsc::Sender<RawTick>) {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(raw) = Self::parse_line(&line) {
                        if tick_tx.send(raw).await.is_err() {
                            tracing::debug!("Tick receiver dropped, stopping feed");
                            break;
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("Tick feed reached end of input");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Tick feed read failed");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl<R> TickFeed for NdjsonFeed<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<RawTick>> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("NDJSON feed already subscribed"))?;

        let (tick_tx, tick_rx) = mpsc::channel(self.buffer_size);
        tokio::spawn(async move {
            Self::run_read_loop(reader, tick_tx).await;
        });

        Ok(tick_rx)
    }
}
