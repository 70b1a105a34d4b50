//! End-to-end engine tests against a file-backed SQLite database

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;
use tickwatch::change::{last_completed_minute, PctChange};
use tickwatch::clock;
use tickwatch::config::Config;
use tickwatch::engine::TickEngine;
use tickwatch::feed::{RawTick, Tick};
use tickwatch::notify::{Direction, Threshold};
use tickwatch::query::SortOrder;
use tickwatch::storage::{AggregateBucket, SqliteStore, SubscriptionStore, TickStore};
use tickwatch::subscription::SubscriptionError;

const MINUTE: i64 = 60_000;

fn raw(symbol: &str, timestamp: i64, open: Decimal, close: Decimal) -> RawTick {
    RawTick {
        symbol: Some(symbol.to_string()),
        timestamp: Some(timestamp),
        open: Some(open),
        high: Some(open.max(close)),
        low: Some(open.min(close)),
        close: Some(close),
        current_price: Some(close),
    }
}

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.database_url = format!("sqlite://{}", dir.path().join("ticks.db").display());
    config.notify.detection_interval_secs = 1;
    config.notify.dispatch_interval_secs = 1;
    config.notify.thresholds = vec![Threshold {
        interval_minutes: 1,
        threshold_pct: dec!(2),
    }];
    config
}

async fn engine(config: &Config) -> TickEngine<SqliteStore> {
    let store = SqliteStore::connect(&config.storage.database_url, 2)
        .await
        .unwrap();
    TickEngine::new(config.clone(), Arc::new(store))
}

/// One tick per minute from three minutes before the last completed minute
/// through the current minute, each moving from `open` to `close`
fn feed_minutes(engine: &TickEngine<SqliteStore>, symbol: &str, open: Decimal, close: Decimal) {
    let now = clock::now_ms();
    let anchor = last_completed_minute(now);
    for m in -3..=1 {
        engine
            .ingest_at(raw(symbol, anchor + m * MINUTE, open, close), now)
            .unwrap();
    }
}

#[tokio::test]
async fn test_flush_is_idempotent_and_tracks_watermark() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let engine = engine(&config).await;
    engine.subscribe("AAA").await.unwrap();
    feed_minutes(&engine, "AAA", dec!(100), dec!(101));

    let first = engine.flush_now().await.unwrap();
    assert_eq!(first.written, 5);

    let second = engine.flush_now().await.unwrap();
    assert_eq!(second.candidates, 0);
    assert_eq!(second.written, 0);

    let watermark = engine.windows().read().watermark("AAA").unwrap();
    let newest = engine.store().latest_tick("AAA").await.unwrap().unwrap();
    assert_eq!(watermark, newest.timestamp);
}

#[tokio::test]
async fn test_aggregates_visible_in_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let engine = engine(&config).await;
    engine.subscribe("AAA").await.unwrap();

    let now = clock::now_ms();
    // Older than the window; lives only in storage
    let old = Tick::try_from(raw("AAA", now - 8 * MINUTE, dec!(50), dec!(50))).unwrap();
    engine.store().insert_ticks(&[old]).await.unwrap();
    engine
        .ingest_at(raw("AAA", now - 2 * MINUTE, dec!(50), dec!(55)), now)
        .unwrap();
    engine.flush_now().await.unwrap();

    let report = engine.aggregate_now(now).await;
    assert!(report.is_success());

    let bucket_start = AggregateBucket::bucket_for(now, 10);
    let bucket = engine
        .aggregate_at("AAA", 10, bucket_start)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bucket.pct_change, Some(dec!(10.00)));

    let snapshot = engine.snapshot("AAA").await.unwrap();
    assert_eq!(snapshot.change(10), PctChange::Value(dec!(10.00)));
    assert_eq!(snapshot.latest_close, Some(dec!(55)));
}

#[tokio::test]
async fn test_top_movers_orders_subscribed_symbols() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let engine = engine(&config).await;
    for symbol in ["UP", "DOWN", "FLAT", "NEW"] {
        engine.subscribe(symbol).await.unwrap();
    }
    feed_minutes(&engine, "UP", dec!(100), dec!(104));
    feed_minutes(&engine, "DOWN", dec!(100), dec!(97));
    feed_minutes(&engine, "FLAT", dec!(100), dec!(100));

    let desc = engine
        .top_movers(Some(1), SortOrder::Desc, None)
        .await
        .unwrap();
    let names: Vec<&str> = desc.iter().map(|s| s.symbol.as_str()).collect();
    assert_eq!(names, vec!["UP", "FLAT", "DOWN", "NEW"]);

    let asc = engine
        .top_movers(Some(1), SortOrder::Asc, Some(2))
        .await
        .unwrap();
    let names: Vec<&str> = asc.iter().map(|s| s.symbol.as_str()).collect();
    assert_eq!(names, vec!["DOWN", "FLAT"]);
}

#[tokio::test]
async fn test_unsubscribe_purges_and_restart_restores() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);

    {
        let engine = engine(&config).await;
        engine.subscribe("KEEP").await.unwrap();
        engine.subscribe("DROP").await.unwrap();
        feed_minutes(&engine, "KEEP", dec!(1), dec!(1));
        feed_minutes(&engine, "DROP", dec!(1), dec!(1));
        engine.flush_now().await.unwrap();

        let report = engine.unsubscribe("DROP").await.unwrap();
        assert!(report.window_removed);
        assert_eq!(report.purged.ticks_removed, 5);
        assert!(!engine.windows().read().contains("DROP"));

        assert!(matches!(
            engine.unsubscribe("DROP").await,
            Err(SubscriptionError::UnknownSymbol(_))
        ));
        assert!(matches!(
            engine.subscribe("KEEP").await,
            Err(SubscriptionError::DuplicateSubscription(_))
        ));
        engine.shutdown().await.unwrap();
    }

    let engine = engine(&config).await;
    let restored = engine.start().await.unwrap();
    assert_eq!(restored, vec!["KEEP"]);
    assert_eq!(engine.subscribed_symbols(), vec!["KEEP"]);
    assert_eq!(engine.store().list_subscriptions().await.unwrap(), vec!["KEEP"]);
    assert!(engine.store().latest_tick("DROP").await.unwrap().is_none());
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_push_session_receives_breach_once() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let engine = engine(&config).await;
    feed_minutes(&engine, "JUMP", dec!(100), dec!(103));
    feed_minutes(&engine, "CALM", dec!(100), dec!(100.5));

    let mut session = engine.connect();
    let event = tokio::time::timeout(Duration::from_secs(10), session.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.symbol, "JUMP");
    assert_eq!(event.direction, Direction::Up);
    assert_eq!(event.pct_change, dec!(3.00));

    // Cooldown holds the symbol back even though the breach persists
    let again = tokio::time::timeout(Duration::from_millis(2_500), session.recv()).await;
    assert!(again.is_err());

    engine.shutdown().await.unwrap();
    assert!(session.recv().await.is_none());
}

#[tokio::test]
async fn test_shutdown_flushes_late_ticks() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let engine = engine(&config).await;
    engine.start().await.unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let ingestion = engine.spawn_ingestion(rx);
    let now = clock::now_ms();
    tx.send(raw("LATE", now - MINUTE, dec!(5), dec!(6))).await.unwrap();
    tx.send(RawTick::default()).await.unwrap();
    drop(tx);
    let stats = ingestion.await.unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.rejected, 1);

    let report = engine.shutdown().await.unwrap();
    assert_eq!(report.written, 1);
    assert!(engine.store().latest_tick("LATE").await.unwrap().is_some());
}
