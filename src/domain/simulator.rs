//! Synthetic two-venue market generator.
//!
//! Funding rates, basis and liquidity depth each follow their own
//! Ornstein-Uhlenbeck process per venue; spot is a shared geometric random
//! walk. `dt` is measured in days. The feed is seeded from a `u64` and every
//! call to [`MarketSimulator::feed`] replays the same sequence.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::domain::error::CarryError;
use crate::domain::snapshot::{next_funding_time, MarketSnapshot, Venue, VenuePair};
use crate::ports::market_data_port::MarketDataSource;

const MINUTES_PER_DAY: f64 = 1440.0;

/// Parameters of a mean-reverting process `dx = θ(μ - x)dt + σ dW`.
#[derive(Debug, Clone, PartialEq)]
pub struct OuParams {
    pub initial: f64,
    pub mean: f64,
    pub reversion: f64,
    pub volatility: f64,
}

impl OuParams {
    pub fn step(&self, x: f64, dt: f64, noise: f64) -> f64 {
        x + self.reversion * (self.mean - x) * dt + self.volatility * dt.sqrt() * noise
    }

    /// Standard deviation of the stationary distribution, `σ / √(2θ)`.
    pub fn stationary_std(&self) -> f64 {
        if self.reversion > 0.0 {
            self.volatility / (2.0 * self.reversion).sqrt()
        } else {
            f64::INFINITY
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VenueProcess {
    /// Funding rate per funding period.
    pub funding: OuParams,
    /// Basis as a fraction of spot.
    pub basis: OuParams,
    /// Liquidity depth in quote notional.
    pub liquidity: OuParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub asset: String,
    pub start: NaiveDateTime,
    pub step_minutes: u32,
    pub steps: usize,
    pub seed: u64,
    pub initial_spot: f64,
    /// Per day.
    pub price_drift: f64,
    /// Per square-root day.
    pub price_volatility: f64,
    pub funding_interval_hours: u32,
    pub liquidity_min: f64,
    pub liquidity_max: f64,
    pub venues: VenuePair<VenueProcess>,
}

impl SimulatorConfig {
    pub fn dt(&self) -> f64 {
        f64::from(self.step_minutes) / MINUTES_PER_DAY
    }

    pub fn step_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.step_minutes))
    }
}

fn default_venue(funding_mean: f64) -> VenueProcess {
    VenueProcess {
        funding: OuParams {
            initial: funding_mean,
            mean: funding_mean,
            reversion: 2.0,
            volatility: 0.0002,
        },
        basis: OuParams {
            initial: 0.0005,
            mean: 0.0005,
            reversion: 6.0,
            volatility: 0.001,
        },
        liquidity: OuParams {
            initial: 1_000_000.0,
            mean: 1_000_000.0,
            reversion: 1.0,
            volatility: 200_000.0,
        },
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        SimulatorConfig {
            asset: "ETH".to_string(),
            start,
            step_minutes: 5,
            steps: 2016,
            seed: 7,
            initial_spot: 2000.0,
            price_drift: 0.0,
            price_volatility: 0.03,
            funding_interval_hours: 8,
            liquidity_min: 100_000.0,
            liquidity_max: 5_000_000.0,
            venues: VenuePair::new(default_venue(0.0001), default_venue(0.0003)),
        }
    }
}

pub struct MarketSimulator {
    config: SimulatorConfig,
}

impl MarketSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        MarketSimulator { config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// A fresh feed positioned at the first step.
    pub fn feed(&self) -> SimulatedFeed {
        SimulatedFeed::new(self.config.clone())
    }

    pub fn generate(&self) -> Vec<VenuePair<MarketSnapshot>> {
        self.feed().collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct VenueState {
    funding: f64,
    basis: f64,
    liquidity: f64,
}

/// Lazy, finite iterator over per-step snapshot pairs.
pub struct SimulatedFeed {
    config: SimulatorConfig,
    rng: StdRng,
    emitted: usize,
    timestamp: NaiveDateTime,
    spot: f64,
    venues: VenuePair<VenueState>,
}

impl SimulatedFeed {
    fn new(config: SimulatorConfig) -> Self {
        let venues = config.venues.map(|_, p| VenueState {
            funding: p.funding.initial,
            basis: p.basis.initial,
            liquidity: p.liquidity.initial.clamp(config.liquidity_min, config.liquidity_max),
        });
        SimulatedFeed {
            rng: StdRng::seed_from_u64(config.seed),
            emitted: 0,
            timestamp: config.start,
            spot: config.initial_spot,
            venues,
            config,
        }
    }

    fn normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    fn advance(&mut self) {
        let dt = self.config.dt();
        let sigma = self.config.price_volatility;
        let shock = self.normal();
        self.spot *= ((self.config.price_drift - 0.5 * sigma * sigma) * dt
            + sigma * dt.sqrt() * shock)
            .exp();

        for venue in Venue::ALL {
            let funding_noise = self.normal();
            let basis_noise = self.normal();
            let liquidity_noise = self.normal();
            let process = self.config.venues.get(venue).clone();
            let (lo, hi) = (self.config.liquidity_min, self.config.liquidity_max);
            let state = self.venues.get_mut(venue);
            state.funding = process.funding.step(state.funding, dt, funding_noise);
            state.basis = process.basis.step(state.basis, dt, basis_noise);
            state.liquidity = process
                .liquidity
                .step(state.liquidity, dt, liquidity_noise)
                .clamp(lo, hi);
        }

        self.timestamp += self.config.step_duration();
    }

    fn snapshot(&self, venue: Venue) -> MarketSnapshot {
        let state = self.venues.get(venue);
        MarketSnapshot::new(
            venue,
            &self.config.asset,
            self.timestamp,
            self.spot,
            self.spot * (1.0 + state.basis),
            state.funding,
            state.liquidity,
            next_funding_time(self.timestamp, self.config.funding_interval_hours),
        )
    }
}

impl Iterator for SimulatedFeed {
    type Item = VenuePair<MarketSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.emitted >= self.config.steps {
            return None;
        }
        if self.emitted > 0 {
            self.advance();
        }
        self.emitted += 1;
        Some(VenuePair::new(self.snapshot(Venue::A), self.snapshot(Venue::B)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.config.steps - self.emitted;
        (remaining, Some(remaining))
    }
}

impl MarketDataSource for SimulatedFeed {
    fn next_batch(&mut self) -> Result<Option<Vec<MarketSnapshot>>, CarryError> {
        Ok(self.next().map(|pair| vec![pair.a, pair.b]))
    }
}
