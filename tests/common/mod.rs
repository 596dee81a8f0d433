#![allow(dead_code)]

use chrono::{Duration, NaiveDateTime};
use fundcarry::domain::execution::ExecutionConfig;
use fundcarry::domain::paper::PaperExecutionClient;
use fundcarry::domain::pipeline::{CarryConfig, CarryPipeline};
use fundcarry::domain::snapshot::{next_funding_time, parse_timestamp, MarketSnapshot, Venue};
use std::io::Write;

pub fn ts(s: &str) -> NaiveDateTime {
    parse_timestamp(s).unwrap()
}

/// A venue snapshot with flat prices and deep books.
pub fn snapshot(venue: Venue, asset: &str, at: NaiveDateTime, rate: f64) -> MarketSnapshot {
    MarketSnapshot::new(
        venue,
        asset,
        at,
        2000.0,
        2000.0,
        rate,
        1e9,
        next_funding_time(at, 8),
    )
}

pub fn batch(at: NaiveDateTime, rate_a: f64, rate_b: f64) -> Vec<MarketSnapshot> {
    vec![
        snapshot(Venue::A, "ETH", at, rate_a),
        snapshot(Venue::B, "ETH", at, rate_b),
    ]
}

/// `count` batches `step` apart starting at `start`.
pub fn series(
    start: NaiveDateTime,
    step: Duration,
    count: usize,
    rate_a: f64,
    rate_b: f64,
) -> Vec<Vec<MarketSnapshot>> {
    (0..count)
        .map(|i| batch(start + step * i as i32, rate_a, rate_b))
        .collect()
}

pub fn paper_client() -> PaperExecutionClient {
    PaperExecutionClient::new(ExecutionConfig::default(), 10_000.0)
}

pub fn paper_pipeline(config: &CarryConfig) -> CarryPipeline<PaperExecutionClient> {
    config.pipeline(paper_client(), 10_000.0)
}

/// Quotes the batch to the paper venues, then runs the cycle.
pub fn feed(
    pipeline: &mut CarryPipeline<PaperExecutionClient>,
    batch: &[MarketSnapshot],
) -> fundcarry::domain::strategy::StepReport {
    pipeline.engine_mut().client_mut().update_markets(batch);
    pipeline.on_batch(batch).unwrap()
}

pub fn write_temp_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
