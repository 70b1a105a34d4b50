use sqlx::SqlitePool;

use super::StorageError;

pub async fn migrate(pool: &SqlitePool) -> Result<(), StorageError> {
    // Ticks. Prices are kept as decimal text so they round-trip exactly.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS ticks (
  symbol TEXT NOT NULL,
  ts INTEGER NOT NULL,
  open TEXT NOT NULL,
  high TEXT NOT NULL,
  low TEXT NOT NULL,
  close TEXT NOT NULL,
  current_price TEXT NOT NULL,
  PRIMARY KEY (symbol, ts)
);
"#,
    )
    .execute(pool)
    .await?;

    // Trailing aggregates
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS tick_aggregates (
  symbol TEXT NOT NULL,
  interval_minutes INTEGER NOT NULL,
  bucket_start INTEGER NOT NULL,
  pct_change TEXT,
  PRIMARY KEY (symbol, interval_minutes, bucket_start)
);
"#,
    )
    .execute(pool)
    .await?;

    // Subscriptions
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS subscriptions (
  symbol TEXT PRIMARY KEY,
  subscribed_at INTEGER NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_ticks_ts ON ticks(ts);"#)
        .execute(pool)
        .await?;

    Ok(())
}
