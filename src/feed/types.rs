//! Tick record types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLC + current-price sample for a symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Instrument symbol (e.g., "NSE_EQ|INE002A01018")
    pub symbol: String,
    /// Candle start, epoch milliseconds. Unique within a symbol's window.
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Last traded price at the time the sample was taken
    pub current_price: Decimal,
}

impl Tick {
    /// Durable key of this tick
    pub fn key(&self) -> TickKey {
        TickKey {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// `(symbol, timestamp)` identity of a persisted tick
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickKey {
    pub symbol: String,
    pub timestamp: i64,
}

impl TickKey {
    pub fn new(symbol: impl Into<String>, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
        }
    }
}

/// A normalized feed record before validation
///
/// Every field is optional on the wire; [`Tick::try_from`] rejects records
/// that are missing any of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTick {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub open: Option<Decimal>,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub close: Option<Decimal>,
    #[serde(default, alias = "cmp")]
    pub current_price: Option<Decimal>,
}

impl From<Tick> for RawTick {
    fn from(tick: Tick) -> Self {
        Self {
            symbol: Some(tick.symbol),
            timestamp: Some(tick.timestamp),
            open: Some(tick.open),
            high: Some(tick.high),
            low: Some(tick.low),
            close: Some(tick.close),
            current_price: Some(tick.current_price),
        }
    }
}

/// Feed boundary errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickError {
    /// A required field was absent from the record
    #[error("malformed tick for {symbol}: missing {field}")]
    Malformed { symbol: String, field: &'static str },
}

impl TryFrom<RawTick> for Tick {
    type Error = TickError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        let symbol = match raw.symbol {
            Some(s) if !s.trim().is_empty() => s,
            _ => {
                return Err(TickError::Malformed {
                    symbol: "<unknown>".to_string(),
                    field: "symbol",
                })
            }
        };

        let missing = |field: &'static str| TickError::Malformed {
            symbol: symbol.clone(),
            field,
        };

        Ok(Tick {
            timestamp: raw.timestamp.ok_or_else(|| missing("timestamp"))?,
            open: raw.open.ok_or_else(|| missing("open"))?,
            high: raw.high.ok_or_else(|| missing("high"))?,
            low: raw.low.ok_or_else(|| missing("low"))?,
            close: raw.close.ok_or_else(|| missing("close"))?,
            current_price: raw.current_price.ok_or_else(|| missing("current_price"))?,
            symbol,
        })
    }
}
