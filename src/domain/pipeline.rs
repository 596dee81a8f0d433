//! One scheduler tick: snapshots in, step report out.
//!
//! Ties the feature engine, the forecaster and the strategy engine together.
//! Funding settlements are detected here: a venue settles when an accepted
//! snapshot reaches the settlement time published by the previous one, at the
//! rate published with it. A gap spanning several funding intervals settles
//! once per missed interval at that same rate.

use chrono::Duration;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::domain::features::{FeatureConfig, FeatureEngine, FeaturePoint};
use crate::domain::forecast::{AssetQuote, CarryForecaster, ForecastConfig};
use crate::domain::metrics::MINUTES_PER_YEAR;
use crate::domain::portfolio::Marks;
use crate::domain::risk::{RiskLimits, RiskSizer, SizerConfig};
use crate::domain::snapshot::{MarketSnapshot, Venue, VenuePair};
use crate::domain::strategy::{
    Cycle, FundingSettlement, StepReport, StrategyConfig, StrategyEngine,
};
use crate::ports::execution_port::OrderExecutionClient;

type Accepted = (MarketSnapshot, FeaturePoint);

/// Everything the decision stack needs, fixed for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarryConfig {
    pub features: FeatureConfig,
    pub forecast: ForecastConfig,
    pub limits: RiskLimits,
    pub sizer: SizerConfig,
    pub strategy: StrategyConfig,
}

impl CarryConfig {
    pub fn pipeline<C: OrderExecutionClient>(&self, client: C, initial_capital: f64) -> CarryPipeline<C> {
        CarryPipeline::new(
            FeatureEngine::new(self.features.clone()),
            CarryForecaster::new(self.forecast.clone()),
            StrategyEngine::new(
                self.strategy.clone(),
                RiskSizer::new(self.limits.clone(), self.sizer.clone()),
                client,
                initial_capital,
            ),
        )
    }
}

pub struct CarryPipeline<C: OrderExecutionClient> {
    features: FeatureEngine,
    forecaster: CarryForecaster,
    engine: StrategyEngine<C>,
    previous: HashMap<(String, Venue), MarketSnapshot>,
}

impl<C: OrderExecutionClient> CarryPipeline<C> {
    pub fn new(features: FeatureEngine, forecaster: CarryForecaster, engine: StrategyEngine<C>) -> Self {
        CarryPipeline {
            features,
            forecaster,
            engine,
            previous: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &StrategyEngine<C> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StrategyEngine<C> {
        &mut self.engine
    }

    pub fn into_engine(self) -> StrategyEngine<C> {
        self.engine
    }

    pub fn features(&self) -> &FeatureEngine {
        &self.features
    }

    pub fn forecaster(&self) -> &CarryForecaster {
        &self.forecaster
    }

    /// `None` for an empty batch. Assets missing a venue or carrying a
    /// rejected snapshot are left out of this cycle's quotes.
    pub fn on_batch(&mut self, batch: &[MarketSnapshot]) -> Option<StepReport> {
        let timestamp = batch.iter().map(|s| s.timestamp).max()?;
        let mut cycle = Cycle::new(timestamp);
        let mut by_asset: BTreeMap<String, (Option<Accepted>, Option<Accepted>)> = BTreeMap::new();

        for snapshot in batch {
            let Some(point) = self.features.update(snapshot) else {
                continue;
            };
            let settlements = self.detect_settlements(snapshot);
            cycle.funding_settlements.extend(settlements);
            self.previous
                .insert((snapshot.asset.clone(), snapshot.venue), snapshot.clone());
            cycle.marks.update(snapshot);

            let slot = by_asset.entry(snapshot.asset.clone()).or_default();
            let accepted = Some((snapshot.clone(), point));
            match snapshot.venue {
                Venue::A => slot.0 = accepted,
                Venue::B => slot.1 = accepted,
            }
        }

        let quotes: Vec<AssetQuote> = by_asset
            .into_iter()
            .filter_map(|(asset, pair)| match pair {
                (Some((snap_a, feat_a)), Some((snap_b, feat_b))) => Some(AssetQuote {
                    snapshots: VenuePair::new(snap_a, snap_b),
                    features: VenuePair::new(feat_a, feat_b),
                }),
                _ => {
                    debug!(%asset, "asset missing a venue this cycle");
                    None
                }
            })
            .collect();

        cycle.opportunities = self.forecaster.forecast(&quotes);
        if !cycle.opportunities.is_empty() {
            debug!(
                count = cycle.opportunities.len(),
                best_apy = cycle.opportunities[0].adjusted_apy,
                "opportunities forecast"
            );
        }
        Some(self.engine.step(cycle))
    }

    fn detect_settlements(&self, snapshot: &MarketSnapshot) -> Vec<FundingSettlement> {
        let Some(prev) = self
            .previous
            .get(&(snapshot.asset.clone(), snapshot.venue))
        else {
            return Vec::new();
        };
        let interval = self.funding_interval();
        let mut settlements = Vec::new();
        let mut settled_at = prev.next_funding;
        while settled_at <= snapshot.timestamp && settled_at < snapshot.next_funding {
            settlements.push(FundingSettlement {
                venue: snapshot.venue,
                asset: snapshot.asset.clone(),
                settled_at,
                rate: prev.funding_rate,
                price: snapshot.mid_price(),
            });
            match interval {
                Some(step) => settled_at += step,
                None => break,
            }
        }
        if settlements.len() > 1 {
            debug!(
                venue = %snapshot.venue,
                asset = %snapshot.asset,
                missed = settlements.len(),
                "data gap spans several settlements"
            );
        }
        settlements
    }

    /// Settlement spacing implied by the forecaster's annualisation.
    fn funding_interval(&self) -> Option<Duration> {
        let periods = self.forecaster.config().funding_periods_per_year;
        if !(periods.is_finite() && periods > 0.0) {
            return None;
        }
        let seconds = (MINUTES_PER_YEAR * 60.0 / periods).round() as i64;
        Duration::try_seconds(seconds).filter(|d| *d > Duration::zero())
    }

    pub fn marks(&self) -> &Marks {
        self.engine.marks()
    }
}
