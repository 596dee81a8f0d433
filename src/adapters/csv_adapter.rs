//! CSV snapshot replay and export.
//!
//! One row per venue snapshot:
//! `timestamp,venue,asset,spot,perp,funding_rate,liquidity_depth,next_funding`.
//! Rows sharing a timestamp form one batch; batches replay in time order.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;
use tracing::info;

use crate::domain::error::CarryError;
use crate::domain::snapshot::{format_timestamp, parse_timestamp, MarketSnapshot, Venue};
use crate::ports::market_data_port::MarketDataSource;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SnapshotRow {
    timestamp: String,
    venue: String,
    asset: String,
    spot: f64,
    perp: f64,
    funding_rate: f64,
    liquidity_depth: f64,
    next_funding: String,
}

impl SnapshotRow {
    fn from_snapshot(s: &MarketSnapshot) -> Self {
        SnapshotRow {
            timestamp: format_timestamp(s.timestamp),
            venue: s.venue.to_string(),
            asset: s.asset.clone(),
            spot: s.spot,
            perp: s.perp,
            funding_rate: s.funding_rate,
            liquidity_depth: s.liquidity_depth,
            next_funding: format_timestamp(s.next_funding),
        }
    }

    fn into_snapshot(self, line: usize) -> Result<MarketSnapshot, CarryError> {
        let at = |reason: String| CarryError::data(format!("row {line}: {reason}"));
        let venue: Venue = self.venue.parse().map_err(at)?;
        let timestamp = parse_timestamp(&self.timestamp).map_err(at)?;
        let next_funding = parse_timestamp(&self.next_funding).map_err(at)?;
        Ok(MarketSnapshot::new(
            venue,
            &self.asset,
            timestamp,
            self.spot,
            self.perp,
            self.funding_rate,
            self.liquidity_depth,
            next_funding,
        ))
    }
}

pub struct CsvSnapshotSource {
    batches: VecDeque<Vec<MarketSnapshot>>,
}

impl CsvSnapshotSource {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, CarryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CarryError::data(format!("failed to read {}: {}", path.display(), e))
        })?;
        let source = Self::from_reader(content.as_bytes())?;
        info!(path = %path.display(), batches = source.len(), "loaded snapshot replay");
        Ok(source)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, CarryError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut snapshots = Vec::new();
        for (i, result) in rdr.deserialize::<SnapshotRow>().enumerate() {
            // header is line 1
            let line = i + 2;
            let row = result.map_err(|e| CarryError::data(format!("CSV parse error: {e}")))?;
            snapshots.push(row.into_snapshot(line)?);
        }
        snapshots.sort_by_key(|s| s.timestamp);

        let mut batches: VecDeque<Vec<MarketSnapshot>> = VecDeque::new();
        for snapshot in snapshots {
            match batches.back_mut() {
                Some(batch) if batch[0].timestamp == snapshot.timestamp => batch.push(snapshot),
                _ => batches.push_back(vec![snapshot]),
            }
        }
        Ok(CsvSnapshotSource { batches })
    }

    /// Batches not yet replayed.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Minutes between the first two batches, if there are two.
    pub fn step_minutes(&self) -> Option<u32> {
        let first = self.batches.front()?.first()?.timestamp;
        let second = self.batches.get(1)?.first()?.timestamp;
        u32::try_from((second - first).num_minutes()).ok().filter(|m| *m > 0)
    }
}

impl MarketDataSource for CsvSnapshotSource {
    fn next_batch(&mut self) -> Result<Option<Vec<MarketSnapshot>>, CarryError> {
        Ok(self.batches.pop_front())
    }
}

pub fn write_snapshots<'a, W: io::Write>(
    writer: W,
    snapshots: impl IntoIterator<Item = &'a MarketSnapshot>,
) -> Result<usize, CarryError> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut rows = 0;
    for snapshot in snapshots {
        wtr.serialize(SnapshotRow::from_snapshot(snapshot))
            .map_err(|e| CarryError::data(format!("CSV write error: {e}")))?;
        rows += 1;
    }
    wtr.flush()?;
    Ok(rows)
}

pub fn write_snapshots_to_path<'a, P: AsRef<Path>>(
    path: P,
    snapshots: impl IntoIterator<Item = &'a MarketSnapshot>,
) -> Result<usize, CarryError> {
    let file = fs::File::create(path)?;
    write_snapshots(io::BufWriter::new(file), snapshots)
}
