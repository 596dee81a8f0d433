//! Perpetual positions, closed legs and funding payments.

use chrono::NaiveDateTime;
use std::fmt;

use crate::domain::snapshot::Venue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub venue: Venue,
    pub asset: String,
    pub side: Side,
    /// Units of the underlying, always positive.
    pub size: f64,
    pub entry_price: f64,
    pub leverage: f64,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Short
    }

    pub fn signed_size(&self) -> f64 {
        self.side.sign() * self.size
    }

    pub fn notional(&self, price: f64) -> f64 {
        self.size * price
    }

    pub fn entry_notional(&self) -> f64 {
        self.notional(self.entry_price)
    }

    /// Collateral posted at entry.
    pub fn margin(&self) -> f64 {
        if self.leverage > 0.0 {
            self.entry_notional() / self.leverage
        } else {
            self.entry_notional()
        }
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.signed_size() * (price - self.entry_price)
    }

    /// Funding for one settlement; longs pay a positive rate.
    pub fn funding_payment(&self, mark_price: f64, rate: f64) -> f64 {
        -self.signed_size() * mark_price * rate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub venue: Venue,
    pub asset: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub closed_at: NaiveDateTime,
    /// Price PnL net of the closing fee.
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FundingPayment {
    pub venue: Venue,
    pub asset: String,
    pub settled_at: NaiveDateTime,
    pub rate: f64,
    /// Positive when received.
    pub amount: f64,
}
