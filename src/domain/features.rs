//! Rolling feature construction from per-venue snapshots.
//!
//! One [`FeaturePoint`] per accepted snapshot. History is bounded by the
//! configured window; points produced before the window fills are marked
//! `valid = false`.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::rolling::{EwmaVariance, RollingWindow};
use crate::domain::snapshot::{MarketSnapshot, Venue};

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureConfig {
    pub window: usize,
    pub ewma_lambda: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            window: 24,
            ewma_lambda: 0.94,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub timestamp: NaiveDateTime,
    pub venue: Venue,
    /// Per-step standard deviation of perp log returns.
    pub realized_vol: f64,
    /// Change in funding rate per step across the window.
    pub funding_momentum: f64,
    /// Z-score of the basis fraction against its window.
    pub basis_zscore: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePoint {
    pub vector: FeatureVector,
    pub valid: bool,
}

#[derive(Debug, Clone)]
struct VenueHistory {
    funding: RollingWindow,
    basis: RollingWindow,
    returns: EwmaVariance,
    last_price: Option<f64>,
    last_timestamp: Option<NaiveDateTime>,
    latest: Option<FeaturePoint>,
}

impl VenueHistory {
    fn new(config: &FeatureConfig) -> Self {
        VenueHistory {
            funding: RollingWindow::new(config.window),
            basis: RollingWindow::new(config.window),
            returns: EwmaVariance::new(config.ewma_lambda),
            last_price: None,
            last_timestamp: None,
            latest: None,
        }
    }
}

pub struct FeatureEngine {
    config: FeatureConfig,
    histories: HashMap<(String, Venue), VenueHistory>,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> Self {
        FeatureEngine {
            config,
            histories: HashMap::new(),
        }
    }

    /// Folds one snapshot into the history for its asset and venue.
    ///
    /// Malformed snapshots and snapshots not strictly newer than the last
    /// accepted one are skipped and leave the history untouched.
    pub fn update(&mut self, snapshot: &MarketSnapshot) -> Option<FeaturePoint> {
        if !snapshot.is_well_formed() {
            debug!(
                asset = %snapshot.asset,
                venue = %snapshot.venue,
                "skipping malformed snapshot"
            );
            return None;
        }

        let history = self
            .histories
            .entry((snapshot.asset.clone(), snapshot.venue))
            .or_insert_with(|| VenueHistory::new(&self.config));

        if let Some(last) = history.last_timestamp {
            if snapshot.timestamp <= last {
                debug!(
                    asset = %snapshot.asset,
                    venue = %snapshot.venue,
                    timestamp = %snapshot.timestamp,
                    "skipping stale snapshot"
                );
                return None;
            }
        }

        if let Some(prev) = history.last_price {
            history.returns.update((snapshot.perp / prev).ln());
        }
        history.last_price = Some(snapshot.perp);
        history.last_timestamp = Some(snapshot.timestamp);

        history.funding.push(snapshot.funding_rate);
        let basis = snapshot.basis_fraction();
        history.basis.push(basis);

        let point = FeaturePoint {
            vector: FeatureVector {
                timestamp: snapshot.timestamp,
                venue: snapshot.venue,
                realized_vol: history.returns.stddev(),
                funding_momentum: history.funding.slope(),
                basis_zscore: history.basis.zscore(basis),
            },
            valid: history.funding.is_full() && history.basis.is_full(),
        };
        history.latest = Some(point.clone());
        Some(point)
    }

    pub fn latest(&self, asset: &str, venue: Venue) -> Option<&FeaturePoint> {
        self.histories
            .get(&(asset.to_string(), venue))
            .and_then(|h| h.latest.as_ref())
    }

    pub fn window(&self) -> usize {
        self.config.window
    }
}
