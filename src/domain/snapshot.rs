//! Market snapshots, venues and the funding settlement schedule.

use chrono::{Duration, NaiveDateTime, Timelike};
use std::fmt;
use std::str::FromStr;

/// Timestamp format used for snapshot files and logs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One of the two perpetual venues the strategy hedges across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Venue {
    A,
    B,
}

impl Venue {
    pub const ALL: [Venue; 2] = [Venue::A, Venue::B];

    pub fn other(self) -> Venue {
        match self {
            Venue::A => Venue::B,
            Venue::B => Venue::A,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::A => write!(f, "A"),
            Venue::B => write!(f, "B"),
        }
    }
}

impl FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "A" => Ok(Venue::A),
            "B" => Ok(Venue::B),
            other => Err(format!("unknown venue '{other}' (expected A or B)")),
        }
    }
}

/// One value per venue.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VenuePair<T> {
    pub a: T,
    pub b: T,
}

impl<T> VenuePair<T> {
    pub fn new(a: T, b: T) -> Self {
        VenuePair { a, b }
    }

    pub fn get(&self, venue: Venue) -> &T {
        match venue {
            Venue::A => &self.a,
            Venue::B => &self.b,
        }
    }

    pub fn get_mut(&mut self, venue: Venue) -> &mut T {
        match venue {
            Venue::A => &mut self.a,
            Venue::B => &mut self.b,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Venue, &T) -> U) -> VenuePair<U> {
        VenuePair {
            a: f(Venue::A, &self.a),
            b: f(Venue::B, &self.b),
        }
    }
}

/// A single venue's view of one asset at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub venue: Venue,
    pub asset: String,
    pub timestamp: NaiveDateTime,
    pub spot: f64,
    pub perp: f64,
    /// Rate paid by longs to shorts per funding period.
    pub funding_rate: f64,
    /// Quote notional available near the touch.
    pub liquidity_depth: f64,
    /// perp - spot
    pub basis: f64,
    pub next_funding: NaiveDateTime,
}

impl MarketSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: Venue,
        asset: &str,
        timestamp: NaiveDateTime,
        spot: f64,
        perp: f64,
        funding_rate: f64,
        liquidity_depth: f64,
        next_funding: NaiveDateTime,
    ) -> Self {
        MarketSnapshot {
            venue,
            asset: asset.to_string(),
            timestamp,
            spot,
            perp,
            funding_rate,
            liquidity_depth,
            basis: perp - spot,
            next_funding,
        }
    }

    /// Fills are simulated against the perp mid.
    pub fn mid_price(&self) -> f64 {
        self.perp
    }

    pub fn basis_fraction(&self) -> f64 {
        if self.spot > 0.0 {
            self.basis / self.spot
        } else {
            0.0
        }
    }

    pub fn time_to_funding(&self) -> Duration {
        let remaining = self.next_funding - self.timestamp;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.spot.is_finite()
            && self.spot > 0.0
            && self.perp.is_finite()
            && self.perp > 0.0
            && self.funding_rate.is_finite()
            && self.liquidity_depth.is_finite()
            && self.liquidity_depth >= 0.0
    }
}

/// First settlement strictly after `from`, with settlements every
/// `interval_hours` starting at midnight.
pub fn next_funding_time(from: NaiveDateTime, interval_hours: u32) -> NaiveDateTime {
    let interval = i64::from(interval_hours.max(1)) * 3600;
    let since_midnight = i64::from(from.num_seconds_from_midnight());
    let midnight = from
        - Duration::seconds(since_midnight)
        - Duration::nanoseconds(i64::from(from.nanosecond()));
    let periods = since_midnight / interval + 1;
    midnight + Duration::seconds(periods * interval)
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| format!("invalid timestamp '{}': {}", s.trim(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        parse_timestamp(s).unwrap()
    }

    fn sample(venue: Venue) -> MarketSnapshot {
        MarketSnapshot::new(
            venue,
            "ETH",
            ts("2024-01-01T07:57:00"),
            2000.0,
            2004.0,
            0.0001,
            500_000.0,
            ts("2024-01-01T08:00:00"),
        )
    }

    #[test]
    fn basis_is_perp_minus_spot() {
        let snap = sample(Venue::A);
        assert!((snap.basis - 4.0).abs() < 1e-12);
        assert!((snap.basis_fraction() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn time_to_funding_counts_down() {
        let snap = sample(Venue::A);
        assert_eq!(snap.time_to_funding(), Duration::minutes(3));
    }

    #[test]
    fn time_to_funding_never_negative() {
        let mut snap = sample(Venue::A);
        snap.timestamp = ts("2024-01-01T08:30:00");
        assert_eq!(snap.time_to_funding(), Duration::zero());
    }

    #[test]
    fn malformed_snapshots_detected() {
        let mut snap = sample(Venue::B);
        assert!(snap.is_well_formed());
        snap.perp = f64::NAN;
        assert!(!snap.is_well_formed());
        let mut snap = sample(Venue::B);
        snap.spot = 0.0;
        assert!(!snap.is_well_formed());
        let mut snap = sample(Venue::B);
        snap.liquidity_depth = -1.0;
        assert!(!snap.is_well_formed());
    }

    #[test]
    fn next_funding_mid_period() {
        assert_eq!(
            next_funding_time(ts("2024-01-01T05:13:20"), 8),
            ts("2024-01-01T08:00:00")
        );
    }

    #[test]
    fn next_funding_strictly_after_settlement() {
        assert_eq!(
            next_funding_time(ts("2024-01-01T08:00:00"), 8),
            ts("2024-01-01T16:00:00")
        );
    }

    #[test]
    fn next_funding_rolls_over_midnight() {
        assert_eq!(
            next_funding_time(ts("2024-01-01T23:59:00"), 8),
            ts("2024-01-02T00:00:00")
        );
    }

    #[test]
    fn hourly_funding() {
        assert_eq!(
            next_funding_time(ts("2024-01-01T10:30:00"), 1),
            ts("2024-01-01T11:00:00")
        );
    }

    #[test]
    fn venue_roundtrip_and_other() {
        assert_eq!("a".parse::<Venue>().unwrap(), Venue::A);
        assert_eq!(Venue::B.to_string(), "B");
        assert_eq!(Venue::A.other(), Venue::B);
        assert!("C".parse::<Venue>().is_err());
    }

    #[test]
    fn venue_pair_access() {
        let mut pair = VenuePair::new(1, 2);
        assert_eq!(*pair.get(Venue::B), 2);
        *pair.get_mut(Venue::A) = 10;
        let doubled = pair.map(|_, v| v * 2);
        assert_eq!(doubled, VenuePair::new(20, 4));
    }
}
