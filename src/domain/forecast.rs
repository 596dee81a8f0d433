//! Carry forecasting: funding spread to annualized, confidence-weighted edge.

use chrono::{Duration, NaiveDateTime};

use crate::domain::features::FeaturePoint;
use crate::domain::snapshot::{MarketSnapshot, Venue, VenuePair};

/// 3 settlements a day.
pub const EIGHT_HOUR_PERIODS_PER_YEAR: f64 = 3.0 * 365.0;

/// Shape of the confidence curve beyond the imminent window.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfidenceDecay {
    /// No confidence outside the window.
    Step,
    /// 1 at the window edge, 0 at `horizon` past it.
    Linear { horizon: Duration },
    /// Halves every `half_life` past the window edge.
    Exponential { half_life: Duration },
}

impl ConfidenceDecay {
    pub fn confidence(&self, beyond_window: Duration) -> f64 {
        if beyond_window <= Duration::zero() {
            return 1.0;
        }
        let beyond = beyond_window.num_milliseconds() as f64;
        match self {
            ConfidenceDecay::Step => 0.0,
            ConfidenceDecay::Linear { horizon } => {
                let h = horizon.num_milliseconds() as f64;
                if h <= 0.0 {
                    0.0
                } else {
                    (1.0 - beyond / h).max(0.0)
                }
            }
            ConfidenceDecay::Exponential { half_life } => {
                let hl = half_life.num_milliseconds() as f64;
                if hl <= 0.0 {
                    0.0
                } else {
                    0.5_f64.powf(beyond / hl)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    pub funding_periods_per_year: f64,
    pub imminent_window: Duration,
    /// Confidence-adjusted APY must strictly exceed this.
    pub min_apy: f64,
    pub decay: ConfidenceDecay,
    /// When false, opportunities outside the window are emitted on the
    /// decayed edge alone.
    pub require_imminent: bool,
    /// Confidence multiplier while either venue's features are warming up.
    pub warmup_discount: f64,
    /// Steps of funding momentum projected onto the spread.
    pub momentum_weight: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            funding_periods_per_year: EIGHT_HOUR_PERIODS_PER_YEAR,
            imminent_window: Duration::minutes(5),
            min_apy: 0.05,
            decay: ConfidenceDecay::Linear {
                horizon: Duration::hours(8),
            },
            require_imminent: true,
            warmup_discount: 1.0,
            momentum_weight: 0.0,
        }
    }
}

/// Both venues' latest view of one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetQuote {
    pub snapshots: VenuePair<MarketSnapshot>,
    pub features: VenuePair<FeaturePoint>,
}

impl AssetQuote {
    pub fn asset(&self) -> &str {
        &self.snapshots.a.asset
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub asset: String,
    pub timestamp: NaiveDateTime,
    /// Venue with the lower funding rate.
    pub long_venue: Venue,
    pub short_venue: Venue,
    /// Short-venue rate minus long-venue rate, per period.
    pub funding_spread: f64,
    pub time_to_funding: Duration,
    pub projected_apy: f64,
    pub confidence: f64,
    pub adjusted_apy: f64,
    pub long_price: f64,
    pub short_price: f64,
    /// Larger of the two venues' per-step realized volatility.
    pub volatility: f64,
    /// Thinner of the two venues' liquidity depth.
    pub liquidity_depth: f64,
}

impl Opportunity {
    pub fn price(&self, venue: Venue) -> f64 {
        if venue == self.long_venue {
            self.long_price
        } else {
            self.short_price
        }
    }
}

pub struct CarryForecaster {
    config: ForecastConfig,
}

impl CarryForecaster {
    pub fn new(config: ForecastConfig) -> Self {
        CarryForecaster { config }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn annualize(&self, spread: f64) -> f64 {
        spread * self.config.funding_periods_per_year
    }

    pub fn confidence(&self, time_to_funding: Duration) -> f64 {
        self.config
            .decay
            .confidence(time_to_funding - self.config.imminent_window)
    }

    /// `None` means no actionable edge for this asset this cycle.
    pub fn evaluate(&self, quote: &AssetQuote) -> Option<Opportunity> {
        let a = &quote.snapshots.a;
        let b = &quote.snapshots.b;
        let (long_venue, short_venue) = if a.funding_rate <= b.funding_rate {
            (Venue::A, Venue::B)
        } else {
            (Venue::B, Venue::A)
        };
        let long = quote.snapshots.get(long_venue);
        let short = quote.snapshots.get(short_venue);
        let long_features = &quote.features.get(long_venue).vector;
        let short_features = &quote.features.get(short_venue).vector;

        let spread = short.funding_rate - long.funding_rate
            + self.config.momentum_weight
                * (short_features.funding_momentum - long_features.funding_momentum);
        let projected_apy = self.annualize(spread);

        let time_to_funding = a.time_to_funding().max(b.time_to_funding());
        let imminent = time_to_funding <= self.config.imminent_window;
        if self.config.require_imminent && !imminent {
            return None;
        }

        let mut confidence = self.confidence(time_to_funding);
        if !(quote.features.a.valid && quote.features.b.valid) {
            confidence *= self.config.warmup_discount;
        }
        let adjusted_apy = projected_apy * confidence;
        if !(adjusted_apy > self.config.min_apy) {
            return None;
        }

        Some(Opportunity {
            asset: long.asset.clone(),
            timestamp: a.timestamp.max(b.timestamp),
            long_venue,
            short_venue,
            funding_spread: spread,
            time_to_funding,
            projected_apy,
            confidence,
            adjusted_apy,
            long_price: long.mid_price(),
            short_price: short.mid_price(),
            volatility: long_features.realized_vol.max(short_features.realized_vol),
            liquidity_depth: long.liquidity_depth.min(short.liquidity_depth),
        })
    }

    /// Opportunities across assets, best adjusted APY first.
    pub fn forecast(&self, quotes: &[AssetQuote]) -> Vec<Opportunity> {
        let mut opportunities: Vec<Opportunity> =
            quotes.iter().filter_map(|q| self.evaluate(q)).collect();
        opportunities.sort_by(|x, y| y.adjusted_apy.total_cmp(&x.adjusted_apy));
        opportunities
    }
}
