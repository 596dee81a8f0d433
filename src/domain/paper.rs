//! Paper execution client: simulated fills against the latest snapshot marks.
//!
//! Fills at the perp mid adjusted by the configured slippage model and
//! charges the fee rate on fill notional. Each venue holds a fixed collateral
//! pool; opening orders lock `notional / leverage` of it and closes release
//! it. PnL is accounted by the portfolio, not here.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::domain::execution::{
    calculate_fee, Balance, ExecutionConfig, ExecutionError, Fill, OrderRequest,
};
use crate::domain::position::Side;
use crate::domain::snapshot::{MarketSnapshot, Venue, VenuePair};
use crate::ports::execution_port::OrderExecutionClient;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Quote {
    price: f64,
    depth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Holding {
    side: Side,
    size: f64,
    margin: f64,
}

pub struct PaperExecutionClient {
    config: ExecutionConfig,
    quotes: HashMap<(String, Venue), Quote>,
    holdings: HashMap<(String, Venue), Holding>,
    collateral: VenuePair<f64>,
    failures: VenuePair<VecDeque<ExecutionError>>,
    fill_count: usize,
}

impl PaperExecutionClient {
    pub fn new(config: ExecutionConfig, collateral_per_venue: f64) -> Self {
        PaperExecutionClient {
            config,
            quotes: HashMap::new(),
            holdings: HashMap::new(),
            collateral: VenuePair::new(collateral_per_venue, collateral_per_venue),
            failures: VenuePair::default(),
            fill_count: 0,
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn update_market(&mut self, snapshot: &MarketSnapshot) {
        if !snapshot.is_well_formed() {
            return;
        }
        self.quotes.insert(
            (snapshot.asset.clone(), snapshot.venue),
            Quote {
                price: snapshot.mid_price(),
                depth: snapshot.liquidity_depth,
            },
        );
    }

    pub fn update_markets(&mut self, snapshots: &[MarketSnapshot]) {
        for snapshot in snapshots {
            self.update_market(snapshot);
        }
    }

    /// Queues `error` for the next order routed to `venue`.
    pub fn inject_failure(&mut self, venue: Venue, error: ExecutionError) {
        self.failures.get_mut(venue).push_back(error);
    }

    pub fn fill_count(&self) -> usize {
        self.fill_count
    }

    fn used_margin(&self, venue: Venue) -> f64 {
        self.holdings
            .iter()
            .filter(|((_, v), _)| *v == venue)
            .map(|(_, h)| h.margin)
            .sum()
    }

    fn reject(venue: Venue, reason: &str) -> ExecutionError {
        ExecutionError::Rejected {
            venue,
            reason: reason.to_string(),
        }
    }
}

impl OrderExecutionClient for PaperExecutionClient {
    fn execute(&mut self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        let venue = order.venue;
        if let Some(error) = self.failures.get_mut(venue).pop_front() {
            return Err(error);
        }
        if !(order.size.is_finite() && order.size > 0.0) {
            return Err(Self::reject(venue, "non-positive size"));
        }

        let key = (order.asset.clone(), venue);
        let quote = self
            .quotes
            .get(&key)
            .copied()
            .ok_or_else(|| ExecutionError::NoMarket {
                venue,
                asset: order.asset.clone(),
            })?;

        let price = self
            .config
            .slippage
            .apply(quote.price, order.side, order.size * quote.price, quote.depth);
        let fee = calculate_fee(order.size * price, &self.config);

        if order.reduce_only {
            let holding = match self.holdings.get(&key) {
                Some(h) if h.side == order.side.opposite() => *h,
                _ => return Err(Self::reject(venue, "reduce-only order with nothing to reduce")),
            };
            if order.size > holding.size * (1.0 + 1e-9) {
                return Err(Self::reject(venue, "reduce-only order exceeds position"));
            }
            let remaining = holding.size - order.size;
            if remaining <= holding.size * 1e-9 {
                self.holdings.remove(&key);
            } else {
                self.holdings.insert(
                    key,
                    Holding {
                        size: remaining,
                        margin: holding.margin * remaining / holding.size,
                        ..holding
                    },
                );
            }
        } else {
            let leverage = if order.leverage > 0.0 { order.leverage } else { 1.0 };
            let margin = order.size * price / leverage;
            let available = self.collateral.get(venue) - self.used_margin(venue);
            if margin + fee > available {
                return Err(Self::reject(venue, "insufficient margin"));
            }
            let holding = match self.holdings.get(&key) {
                None => Holding {
                    side: order.side,
                    size: order.size,
                    margin,
                },
                Some(h) if h.side == order.side => Holding {
                    size: h.size + order.size,
                    margin: h.margin + margin,
                    ..*h
                },
                Some(_) => return Err(Self::reject(venue, "opposing position open")),
            };
            self.holdings.insert(key, holding);
        }

        self.fill_count += 1;
        debug!(
            venue = %venue,
            asset = %order.asset,
            side = %order.side,
            size = order.size,
            price,
            fee,
            "paper fill"
        );
        Ok(Fill {
            venue,
            asset: order.asset.clone(),
            side: order.side,
            size: order.size,
            price,
            fee,
        })
    }

    fn balance(&self, venue: Venue) -> Result<Balance, ExecutionError> {
        let total = *self.collateral.get(venue);
        Ok(Balance {
            available: total - self.used_margin(venue),
            total,
        })
    }
}
