//! Order and fill types, execution errors, slippage and fee models.
//!
//! Order `side` is the trade direction: `Long` buys, `Short` sells. Closing a
//! long is therefore a reduce-only `Short` order.

use crate::domain::position::{Position, Side};
use crate::domain::snapshot::Venue;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub venue: Venue,
    pub asset: String,
    pub side: Side,
    pub size: f64,
    pub leverage: f64,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Order that establishes `position`.
    pub fn open(position: &Position) -> Self {
        OrderRequest {
            venue: position.venue,
            asset: position.asset.clone(),
            side: position.side,
            size: position.size,
            leverage: position.leverage,
            reduce_only: false,
        }
    }

    /// Reduce-only order that flattens `position`.
    pub fn close(position: &Position) -> Self {
        OrderRequest {
            venue: position.venue,
            asset: position.asset.clone(),
            side: position.side.opposite(),
            size: position.size,
            leverage: position.leverage,
            reduce_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub venue: Venue,
    pub asset: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub fee: f64,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.size * self.price
    }
}

/// Collateral held at a venue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balance {
    pub available: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("order rejected by venue {venue}: {reason}")]
    Rejected { venue: Venue, reason: String },

    #[error("venue {venue} unavailable: {reason}")]
    Unavailable { venue: Venue, reason: String },

    #[error("no market for {asset} on venue {venue}")]
    NoMarket { venue: Venue, asset: String },

    #[error("venue {venue} filled {filled} of {requested} {asset}")]
    PartialFill {
        venue: Venue,
        asset: String,
        requested: f64,
        filled: f64,
    },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ExecutionError>,
    },
}

impl ExecutionError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Unavailable { .. })
    }

    pub fn venue(&self) -> Option<Venue> {
        match self {
            ExecutionError::Rejected { venue, .. }
            | ExecutionError::Unavailable { venue, .. }
            | ExecutionError::NoMarket { venue, .. }
            | ExecutionError::PartialFill { venue, .. } => Some(*venue),
            ExecutionError::RetriesExhausted { last, .. } => last.venue(),
        }
    }
}

/// Price impact applied to paper fills.
#[derive(Debug, Clone, PartialEq)]
pub enum SlippageModel {
    None,
    FixedBps(f64),
    /// `base_bps + impact_bps * notional / depth`.
    DepthScaled { base_bps: f64, impact_bps: f64 },
}

impl Default for SlippageModel {
    fn default() -> Self {
        SlippageModel::FixedBps(1.0)
    }
}

impl SlippageModel {
    pub fn bps(&self, notional: f64, depth: f64) -> f64 {
        match self {
            SlippageModel::None => 0.0,
            SlippageModel::FixedBps(bps) => *bps,
            SlippageModel::DepthScaled {
                base_bps,
                impact_bps,
            } => {
                let participation = if depth > 0.0 { notional / depth } else { 1.0 };
                base_bps + impact_bps * participation
            }
        }
    }

    /// Adverse execution price: buys fill above the mark, sells below.
    pub fn apply(&self, mark: f64, side: Side, notional: f64, depth: f64) -> f64 {
        mark * (1.0 + side.sign() * self.bps(notional, depth) / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Fraction of fill notional charged per fill.
    pub fee_rate: f64,
    pub slippage: SlippageModel,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            fee_rate: 0.0004,
            slippage: SlippageModel::default(),
        }
    }
}

pub fn calculate_fee(notional: f64, config: &ExecutionConfig) -> f64 {
    notional.abs() * config.fee_rate
}
