//! Integration tests for the NDJSON tick feed

use rust_decimal_macros::dec;
use tickwatch::feed::{NdjsonFeed, Tick, TickFeed};
use tokio::io::BufReader;

const INPUT: &str = r#"{"symbol":"INFY","timestamp":60000,"open":100,"high":101,"low":99,"close":100.5,"cmp":100.5}
not json at all

{"symbol":"TCS","timestamp":60000,"open":"10","high":"11","low":"9","close":"10.5","current_price":"10.4"}
{"symbol":"TCS","close":11}
"#;

#[tokio::test]
async fn test_ndjson_feed_delivers_parsable_records() {
    let feed = NdjsonFeed::new(BufReader::new(INPUT.as_bytes()));
    let mut rx = feed.subscribe().await.unwrap();

    let mut records = Vec::new();
    while let Some(raw) = rx.recv().await {
        records.push(raw);
    }

    // Garbage and blank lines are skipped; partial records still pass through
    assert_eq!(records.len(), 3);

    let ticks: Vec<Tick> = records
        .into_iter()
        .filter_map(|raw| Tick::try_from(raw).ok())
        .collect();
    assert_eq!(ticks.len(), 2);
    assert_eq!(ticks[0].symbol, "INFY");
    assert_eq!(ticks[0].current_price, dec!(100.5));
    assert_eq!(ticks[1].current_price, dec!(10.4));
}

#[tokio::test]
async fn test_ndjson_feed_subscribes_once() {
    let feed = NdjsonFeed::new(BufReader::new(INPUT.as_bytes()));
    assert!(feed.subscribe().await.is_ok());
    assert!(feed.subscribe().await.is_err());
}

#[tokio::test]
async fn test_empty_input_closes_channel() {
    let feed = NdjsonFeed::new(BufReader::new("".as_bytes()));
    let mut rx = feed.subscribe().await.unwrap();
    assert!(rx.recv().await.is_none());
}
