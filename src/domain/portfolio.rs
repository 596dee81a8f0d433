//! Portfolio state and equity tracking.
//!
//! Perpetual legs are margined, so opening a position moves only the fee out
//! of cash; equity is cash plus unrealized PnL at the latest marks.

use chrono::NaiveDateTime;
use std::collections::HashMap;

use super::position::{ClosedPosition, FundingPayment, Position};
use super::snapshot::{MarketSnapshot, Venue};

/// Share of a position's size below which a close leaves it flat.
const CLOSE_DUST: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// Latest mark price per asset and venue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Marks {
    prices: HashMap<(String, Venue), f64>,
}

impl Marks {
    pub fn new() -> Self {
        Marks::default()
    }

    pub fn set(&mut self, asset: &str, venue: Venue, price: f64) {
        self.prices.insert((asset.to_string(), venue), price);
    }

    pub fn update(&mut self, snapshot: &MarketSnapshot) {
        if snapshot.is_well_formed() {
            self.set(&snapshot.asset, snapshot.venue, snapshot.mid_price());
        }
    }

    /// Overwrites with every mark in `other`.
    pub fn merge(&mut self, other: &Marks) {
        for (key, price) in &other.prices {
            self.prices.insert(key.clone(), *price);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn get(&self, asset: &str, venue: Venue) -> Option<f64> {
        self.prices.get(&(asset.to_string(), venue)).copied()
    }

    /// Mark for a position, falling back to its entry price.
    pub fn price_for(&self, position: &Position) -> f64 {
        self.get(&position.asset, position.venue)
            .unwrap_or(position.entry_price)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: Vec<Position>,
    pub closed_positions: Vec<ClosedPosition>,
    pub funding_payments: Vec<FundingPayment>,
    pub equity_curve: Vec<EquityPoint>,
    pub fees_paid: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: Vec::new(),
            closed_positions: Vec::new(),
            funding_payments: Vec::new(),
            equity_curve: Vec::new(),
            fees_paid: 0.0,
        }
    }

    pub fn open(&mut self, position: Position, fee: f64) {
        self.cash -= fee;
        self.fees_paid += fee;
        self.positions.push(position);
    }

    /// Reduces the position on `venue` by `size` and books the realized PnL
    /// of the closed part. The position is removed once the remainder is dust;
    /// fills larger than the position close it entirely.
    pub fn close(
        &mut self,
        venue: Venue,
        asset: &str,
        size: f64,
        exit_price: f64,
        fee: f64,
        closed_at: NaiveDateTime,
    ) -> Option<ClosedPosition> {
        let idx = self
            .positions
            .iter()
            .position(|p| p.venue == venue && p.asset == asset)?;
        let position = &mut self.positions[idx];
        let closed_size = size.clamp(0.0, position.size);
        let pnl = position.side.sign() * closed_size * (exit_price - position.entry_price) - fee;
        let closed = ClosedPosition {
            venue: position.venue,
            asset: position.asset.clone(),
            side: position.side,
            size: closed_size,
            entry_price: position.entry_price,
            exit_price,
            closed_at,
            pnl,
        };
        let remaining = position.size - closed_size;
        if remaining <= position.size * CLOSE_DUST {
            self.positions.remove(idx);
        } else {
            self.positions[idx].size = remaining;
        }
        self.cash += pnl;
        self.fees_paid += fee;
        self.closed_positions.push(closed.clone());
        Some(closed)
    }

    pub fn position(&self, venue: Venue) -> Option<&Position> {
        self.positions.iter().find(|p| p.venue == venue)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_flat(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn apply_funding(&mut self, payment: FundingPayment) {
        self.cash += payment.amount;
        self.funding_payments.push(payment);
    }

    pub fn total_funding(&self) -> f64 {
        self.funding_payments.iter().map(|p| p.amount).sum()
    }

    pub fn unrealized_pnl(&self, marks: &Marks) -> f64 {
        self.positions
            .iter()
            .map(|p| p.unrealized_pnl(marks.price_for(p)))
            .sum()
    }

    pub fn equity(&self, marks: &Marks) -> f64 {
        self.cash + self.unrealized_pnl(marks)
    }

    pub fn gross_notional(&self, marks: &Marks) -> f64 {
        self.positions
            .iter()
            .map(|p| p.notional(marks.price_for(p)))
            .sum()
    }

    /// Signed sum of position sizes across venues.
    pub fn net_delta(&self) -> f64 {
        self.positions.iter().map(Position::signed_size).sum()
    }

    pub fn is_delta_neutral(&self, epsilon: f64) -> bool {
        self.net_delta().abs() <= epsilon
    }

    pub fn record_equity(&mut self, timestamp: NaiveDateTime, equity: f64) {
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }
}
