//! Integration tests for configuration loading

use std::io::Write;

use tickwatch::config::Config;
use tickwatch::telemetry::LogFormat;

const EXAMPLE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml.example");

#[test]
fn test_example_config_loads() {
    let config = Config::load(EXAMPLE).unwrap();
    assert_eq!(config.window.retention_secs, 360);
    assert_eq!(config.aggregation.intervals_minutes, vec![10, 15, 30]);
    assert_eq!(config.notify.thresholds.len(), 4);
    assert_eq!(config.telemetry.log_format, LogFormat::Pretty);
    assert!(config.telemetry.metrics_port.is_none());
}

#[test]
fn test_example_matches_defaults() {
    let example = Config::load(EXAMPLE).unwrap();
    let defaults = Config::default();
    assert_eq!(example.notify.thresholds, defaults.notify.thresholds);
    assert_eq!(example.query.memory_intervals, defaults.query.memory_intervals);
    assert_eq!(example.storage.database_url, defaults.storage.database_url);
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[flush]\ninterval_secs = 2\n\n[storage]\ndatabase_url = \"sqlite::memory:\"").unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.flush.interval_secs, 2);
    assert_eq!(config.flush.batch_size, 500);
    assert_eq!(config.storage.database_url, "sqlite::memory:");
}

#[test]
fn test_invalid_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[notify]\nmax_batch = 0").unwrap();
    assert!(Config::load(file.path()).is_err());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[window\nretention_secs = 1").unwrap();
    assert!(Config::load(file.path()).is_err());
}
