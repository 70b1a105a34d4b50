//! SQLite-backed tick, aggregate and subscription store

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::schema::migrate;
use super::{AggregateBucket, PurgeReport, StorageError, SubscriptionStore, TickStore};
use crate::feed::{Tick, TickKey};

/// SQLite caps bound parameters per statement; stay well under it
const MAX_BIND_PARAMS: usize = 30_000;
const TICK_COLUMNS: usize = 7;
const KEYS_PER_STATEMENT: usize = MAX_BIND_PARAMS / 2;

/// SQLx-backed store for ticks, aggregates and subscriptions.
/// Responsible only for persistence and row mapping.
pub struct SqliteStore {
    pool: SqlitePool,
    rows_per_statement: usize,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and migrate it
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        // Every connection to an in-memory URL is a separate database
        if database_url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, migrating the schema first
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        migrate(&pool).await?;
        Ok(Self {
            pool,
            rows_per_statement: MAX_BIND_PARAMS / TICK_COLUMNS,
        })
    }

    /// Limit the number of rows per multi-row INSERT
    pub fn with_batch_size(mut self, rows: usize) -> Self {
        self.rows_per_statement = rows.clamp(1, MAX_BIND_PARAMS / TICK_COLUMNS);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl TickStore for SqliteStore {
    async fn insert_ticks(&self, ticks: &[Tick]) -> Result<u64, StorageError> {
        if ticks.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for chunk in ticks.chunks(self.rows_per_statement) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO ticks (symbol, ts, open, high, low, close, current_price) ",
            );
            qb.push_values(chunk, |mut row, tick| {
                row.push_bind(tick.symbol.clone())
                    .push_bind(tick.timestamp)
                    .push_bind(tick.open.to_string())
                    .push_bind(tick.high.to_string())
                    .push_bind(tick.low.to_string())
                    .push_bind(tick.close.to_string())
                    .push_bind(tick.current_price.to_string());
            });
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    async fn existing_keys(&self, keys: &[TickKey]) -> Result<HashSet<TickKey>, StorageError> {
        let mut found = HashSet::new();
        for chunk in keys.chunks(KEYS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT symbol, ts FROM ticks WHERE (symbol, ts) IN (");
            qb.push_values(chunk, |mut row, key| {
                row.push_bind(key.symbol.clone()).push_bind(key.timestamp);
            });
            qb.push(")");

            let rows = qb.build().fetch_all(&self.pool).await?;
            for r in rows {
                found.insert(TickKey::new(
                    r.try_get::<String, _>("symbol")?,
                    r.try_get::<i64, _>("ts")?,
                ));
            }
        }
        Ok(found)
    }

    async fn refresh_trailing_aggregate(
        &self,
        interval_minutes: u32,
        now_ms: i64,
    ) -> Result<u64, StorageError> {
        let width_ms = i64::from(interval_minutes) * 60_000;
        let bucket_start = AggregateBucket::bucket_for(now_ms, interval_minutes);

        // The WHERE true disambiguates the upsert clause from the join's ON
        let result = sqlx::query(
            r#"
INSERT INTO tick_aggregates (symbol, interval_minutes, bucket_start, pct_change)
SELECT
  w.symbol,
  ?,
  ?,
  CASE
    WHEN CAST(f.close AS REAL) = 0 THEN NULL
    ELSE printf('%.2f',
      ((CAST(l.close AS REAL) - CAST(f.close AS REAL)) / CAST(f.close AS REAL)) * 100.0)
  END
FROM (
  SELECT symbol, MIN(ts) AS first_ts, MAX(ts) AS last_ts
  FROM ticks
  WHERE ts BETWEEN ? AND ?
  GROUP BY symbol
) AS w
JOIN ticks AS f ON f.symbol = w.symbol AND f.ts = w.first_ts
JOIN ticks AS l ON l.symbol = w.symbol AND l.ts = w.last_ts
WHERE true
ON CONFLICT (symbol, interval_minutes, bucket_start)
DO UPDATE SET pct_change = excluded.pct_change;
"#,
        )
        .bind(i64::from(interval_minutes))
        .bind(bucket_start)
        .bind(now_ms - width_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn latest_aggregate(
        &self,
        symbol: &str,
        interval_minutes: u32,
    ) -> Result<Option<AggregateBucket>, StorageError> {
        let row = sqlx::query(
            r#"
SELECT symbol, interval_minutes, bucket_start, pct_change
FROM tick_aggregates
WHERE symbol = ? AND interval_minutes = ?
ORDER BY bucket_start DESC
LIMIT 1;
"#,
        )
        .bind(symbol)
        .bind(i64::from(interval_minutes))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_bucket).transpose()
    }

    async fn aggregate_at(
        &self,
        symbol: &str,
        interval_minutes: u32,
        bucket_start: i64,
    ) -> Result<Option<AggregateBucket>, StorageError> {
        let row = sqlx::query(
            r#"
SELECT symbol, interval_minutes, bucket_start, pct_change
FROM tick_aggregates
WHERE symbol = ? AND interval_minutes = ? AND bucket_start = ?;
"#,
        )
        .bind(symbol)
        .bind(i64::from(interval_minutes))
        .bind(bucket_start)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_bucket).transpose()
    }

    async fn latest_tick(&self, symbol: &str) -> Result<Option<Tick>, StorageError> {
        let row = sqlx::query(
            r#"
SELECT symbol, ts, open, high, low, close, current_price
FROM ticks
WHERE symbol = ?
ORDER BY ts DESC
LIMIT 1;
"#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_tick).transpose()
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn add_subscription(
        &self,
        symbol: &str,
        subscribed_at_ms: i64,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
INSERT INTO subscriptions (symbol, subscribed_at)
VALUES (?, ?)
ON CONFLICT (symbol) DO NOTHING;
"#,
        )
        .bind(symbol)
        .bind(subscribed_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove_subscription(
        &self,
        symbol: &str,
        purge: bool,
    ) -> Result<Option<PurgeReport>, StorageError> {
        // Dropping the transaction on any early return rolls it back
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM subscriptions WHERE symbol = ?;")
            .bind(symbol)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let mut report = PurgeReport::default();
        if purge {
            report.aggregates_removed = sqlx::query("DELETE FROM tick_aggregates WHERE symbol = ?;")
                .bind(symbol)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            report.ticks_removed = sqlx::query("DELETE FROM ticks WHERE symbol = ?;")
                .bind(symbol)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(Some(report))
    }

    async fn list_subscriptions(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT symbol FROM subscriptions ORDER BY symbol;")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("symbol").map_err(StorageError::from))
            .collect()
    }
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_tick(r: &SqliteRow) -> Result<Tick, StorageError> {
    Ok(Tick {
        symbol: r.try_get("symbol")?,
        timestamp: r.try_get("ts")?,
        open: decimal_column(r, "open")?,
        high: decimal_column(r, "high")?,
        low: decimal_column(r, "low")?,
        close: decimal_column(r, "close")?,
        current_price: decimal_column(r, "current_price")?,
    })
}

fn row_to_bucket(r: &SqliteRow) -> Result<AggregateBucket, StorageError> {
    let interval: i64 = r.try_get("interval_minutes")?;
    let interval_minutes = u32::try_from(interval)
        .map_err(|_| StorageError::CorruptRow(format!("interval_minutes out of range: {interval}")))?;

    let pct_change = match r.try_get::<Option<String>, _>("pct_change")? {
        Some(text) => Some(parse_decimal("pct_change", &text)?),
        None => None,
    };

    Ok(AggregateBucket {
        symbol: r.try_get("symbol")?,
        interval_minutes,
        bucket_start: r.try_get("bucket_start")?,
        pct_change,
    })
}

fn decimal_column(r: &SqliteRow, column: &str) -> Result<Decimal, StorageError> {
    let text: String = r.try_get(column)?;
    parse_decimal(column, &text)
}

fn parse_decimal(column: &str, text: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(text.trim())
        .map_err(|e| StorageError::CorruptRow(format!("{column}={text:?}: {e}")))
}
