//! Rebalance state machine.
//!
//! The engine is the only writer of its [`Portfolio`]. Each call to
//! [`StrategyEngine::step`] consumes one [`Cycle`] and returns a
//! [`StepReport`]; there is no terminal state.

use chrono::NaiveDateTime;
use std::fmt;
use tracing::{debug, info, warn};

use crate::domain::execution::{ExecutionError, Fill, OrderRequest};
use crate::domain::forecast::Opportunity;
use crate::domain::portfolio::{Marks, Portfolio};
use crate::domain::position::{FundingPayment, Position};
use crate::domain::risk::{RiskSizer, SizingDecision, TargetPair};
use crate::domain::snapshot::Venue;
use crate::ports::execution_port::OrderExecutionClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Idle,
    Monitoring,
    OpportunityDetected,
    Rebalancing,
    Holding,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Monitoring => "monitoring",
            EngineState::OpportunityDetected => "opportunity_detected",
            EngineState::Rebalancing => "rebalancing",
            EngineState::Holding => "holding",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    /// Relative size difference below which a held pair counts as on target.
    pub rebalance_tolerance: f64,
    /// Largest tolerated |signed size sum| once holding.
    pub delta_epsilon: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            rebalance_tolerance: 0.05,
            delta_epsilon: 1e-9,
        }
    }
}

/// One venue's settlement of the rate published before it.
#[derive(Debug, Clone, PartialEq)]
pub struct FundingSettlement {
    pub venue: Venue,
    pub asset: String,
    pub settled_at: NaiveDateTime,
    pub rate: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cycle {
    pub timestamp: NaiveDateTime,
    /// Best first.
    pub opportunities: Vec<Opportunity>,
    pub marks: Marks,
    pub funding_settlements: Vec<FundingSettlement>,
}

impl Cycle {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Cycle {
            timestamp,
            ..Cycle::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub at: NaiveDateTime,
    pub from: EngineState,
    pub to: EngineState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceOutcome {
    /// No opportunity survived sizing.
    NoTarget,
    AlreadyHeld,
    Completed,
    /// `unwound` is true when an orphaned leg was flattened again.
    Failed { error: ExecutionError, unwound: bool },
}

impl RebalanceOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RebalanceOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub timestamp: NaiveDateTime,
    pub state: EngineState,
    pub transitions: Vec<Transition>,
    pub target: Option<TargetPair>,
    pub fills: Vec<Fill>,
    pub outcome: RebalanceOutcome,
    pub funding_paid: f64,
    pub equity: f64,
    pub net_delta: f64,
    /// Sum of leg notionals at the latest marks.
    pub gross_notional: f64,
}

pub struct StrategyEngine<C: OrderExecutionClient> {
    state: EngineState,
    config: StrategyConfig,
    sizer: RiskSizer,
    client: C,
    portfolio: Portfolio,
    marks: Marks,
    history: Vec<Transition>,
}

impl<C: OrderExecutionClient> StrategyEngine<C> {
    pub fn new(config: StrategyConfig, sizer: RiskSizer, client: C, initial_capital: f64) -> Self {
        StrategyEngine {
            state: EngineState::Idle,
            config,
            sizer,
            client,
            portfolio: Portfolio::new(initial_capital),
            marks: Marks::new(),
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn sizer(&self) -> &RiskSizer {
        &self.sizer
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn marks(&self) -> &Marks {
        &self.marks
    }

    /// Every transition since construction.
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn into_portfolio(self) -> Portfolio {
        self.portfolio
    }

    pub fn step(&mut self, cycle: Cycle) -> StepReport {
        let at = cycle.timestamp;
        let mut transitions = Vec::new();
        let mut fills = Vec::new();

        if matches!(self.state, EngineState::Idle | EngineState::Holding) {
            self.transition(EngineState::Monitoring, at, &mut transitions);
        }

        self.marks.merge(&cycle.marks);
        let funding_paid = self.settle_funding(&cycle.funding_settlements);

        let target = self.select_target(&cycle.opportunities);
        let outcome = match &target {
            None => RebalanceOutcome::NoTarget,
            Some(target) => {
                self.transition(EngineState::OpportunityDetected, at, &mut transitions);
                if self.holds(target) {
                    debug!(asset = %target.asset, "portfolio already on target");
                    self.transition(EngineState::Holding, at, &mut transitions);
                    RebalanceOutcome::AlreadyHeld
                } else {
                    self.transition(EngineState::Rebalancing, at, &mut transitions);
                    let outcome = self.rebalance(target, at, &mut fills);
                    match &outcome {
                        RebalanceOutcome::Failed { error, unwound } => {
                            warn!(
                                asset = %target.asset,
                                error = %error,
                                unwound = *unwound,
                                positions = self.portfolio.position_count(),
                                "rebalance failed"
                            );
                            self.transition(EngineState::Monitoring, at, &mut transitions);
                        }
                        _ => {
                            info!(
                                asset = %target.asset,
                                long = %target.long.venue,
                                short = %target.short.venue,
                                size = target.long.size,
                                leverage = target.leverage,
                                apy = target.adjusted_apy,
                                "rebalanced into hedged pair"
                            );
                            self.transition(EngineState::Holding, at, &mut transitions);
                        }
                    }
                    outcome
                }
            }
        };

        let net_delta = self.portfolio.net_delta();
        if self.state == EngineState::Holding && !self.portfolio.is_delta_neutral(self.config.delta_epsilon) {
            warn!(net_delta, "holding a pair that is not delta neutral");
        }

        let equity = self.portfolio.equity(&self.marks);
        let gross_notional = self.portfolio.gross_notional(&self.marks);
        self.portfolio.record_equity(at, equity);

        StepReport {
            timestamp: at,
            state: self.state,
            transitions,
            target,
            fills,
            outcome,
            funding_paid,
            equity,
            net_delta,
            gross_notional,
        }
    }

    fn transition(&mut self, to: EngineState, at: NaiveDateTime, log: &mut Vec<Transition>) {
        debug_assert!(
            !(self.state == EngineState::Rebalancing && to == EngineState::Rebalancing),
            "rebalancing cannot re-enter itself"
        );
        let transition = Transition {
            at,
            from: self.state,
            to,
        };
        debug!(from = %transition.from, to = %transition.to, "state transition");
        self.state = to;
        self.history.push(transition);
        log.push(transition);
    }

    fn settle_funding(&mut self, settlements: &[FundingSettlement]) -> f64 {
        let mut total = 0.0;
        for settlement in settlements {
            let mut held = self
                .portfolio
                .positions
                .iter()
                .filter(|p| p.venue == settlement.venue && p.asset == settlement.asset)
                .peekable();
            if held.peek().is_none() {
                continue;
            }
            let amount: f64 = held
                .map(|p| p.funding_payment(settlement.price, settlement.rate))
                .sum();
            debug!(
                venue = %settlement.venue,
                asset = %settlement.asset,
                rate = settlement.rate,
                amount,
                "funding settled"
            );
            self.portfolio.apply_funding(FundingPayment {
                venue: settlement.venue,
                asset: settlement.asset.clone(),
                settled_at: settlement.settled_at,
                rate: settlement.rate,
                amount,
            });
            total += amount;
        }
        total
    }

    fn select_target(&self, opportunities: &[Opportunity]) -> Option<TargetPair> {
        for opportunity in opportunities {
            match self.sizer.size(opportunity, &self.portfolio, &self.marks) {
                SizingDecision::Target(target) => return Some(target),
                SizingDecision::Abstain(reason) => {
                    debug!(asset = %opportunity.asset, %reason, "sizer abstained");
                }
            }
        }
        None
    }

    fn holds(&self, target: &TargetPair) -> bool {
        if self.portfolio.position_count() != 2 {
            return false;
        }
        let tolerance = self.config.rebalance_tolerance;
        target.legs().iter().all(|leg| {
            self.portfolio.positions.iter().any(|p| {
                p.venue == leg.venue
                    && p.asset == leg.asset
                    && p.side == leg.side
                    && (p.size - leg.size).abs() <= tolerance * leg.size
            })
        })
    }

    /// Closes everything, then opens long, then short at the long leg's
    /// filled size. A leg that fills short of its order fails the rebalance
    /// and whatever was opened is unwound.
    fn rebalance(
        &mut self,
        target: &TargetPair,
        at: NaiveDateTime,
        fills: &mut Vec<Fill>,
    ) -> RebalanceOutcome {
        let mut close_error = None;
        for position in self.portfolio.positions.clone() {
            if let Err(error) = self.close_leg(&position, at, fills) {
                close_error.get_or_insert(error);
            }
        }
        if let Some(error) = close_error {
            return RebalanceOutcome::Failed {
                error,
                unwound: false,
            };
        }

        let long = match self.open_leg(&target.long, fills) {
            Ok(position) => position,
            Err(error) => {
                return RebalanceOutcome::Failed {
                    error,
                    unwound: false,
                };
            }
        };
        if long.size < target.long.size * (1.0 - self.config.rebalance_tolerance) {
            let error = partial_fill(&target.long, long.size);
            let unwound = self.unwind(&long, at, fills);
            return RebalanceOutcome::Failed { error, unwound };
        }

        let short_leg = Position {
            size: long.size,
            ..target.short.clone()
        };
        let epsilon = self.config.delta_epsilon;
        let short = self.open_leg(&short_leg, fills).and_then(|short| {
            if (short.size - long.size).abs() > epsilon {
                Err(partial_fill(&short_leg, short.size))
            } else {
                Ok(short)
            }
        });
        if let Err(error) = short {
            let unwound_short = self.unwind(&short_leg, at, fills);
            let unwound_long = self.unwind(&long, at, fills);
            return RebalanceOutcome::Failed {
                error,
                unwound: unwound_short && unwound_long,
            };
        }

        RebalanceOutcome::Completed
    }

    /// A zero-size fill opens nothing and is reported as a partial fill.
    fn open_leg(&mut self, leg: &Position, fills: &mut Vec<Fill>) -> Result<Position, ExecutionError> {
        let fill = self.client.execute(&OrderRequest::open(leg))?;
        if !(fill.size > 0.0) {
            fills.push(fill);
            return Err(partial_fill(leg, 0.0));
        }
        let position = Position {
            size: fill.size,
            entry_price: fill.price,
            ..leg.clone()
        };
        self.portfolio.open(position.clone(), fill.fee);
        fills.push(fill);
        Ok(position)
    }

    /// Books the filled quantity; anything left open is a partial fill.
    fn close_leg(
        &mut self,
        position: &Position,
        at: NaiveDateTime,
        fills: &mut Vec<Fill>,
    ) -> Result<(), ExecutionError> {
        let fill = self.client.execute(&OrderRequest::close(position))?;
        self.portfolio.close(
            position.venue,
            &position.asset,
            fill.size,
            fill.price,
            fill.fee,
            at,
        );
        fills.push(fill);
        match self.held(position.venue, &position.asset) {
            Some(left) => Err(partial_fill(position, position.size - left.size)),
            None => Ok(()),
        }
    }

    /// Flattens whatever the book holds for `leg`'s venue and asset. True
    /// when nothing is left open there.
    fn unwind(&mut self, leg: &Position, at: NaiveDateTime, fills: &mut Vec<Fill>) -> bool {
        let Some(open) = self.held(leg.venue, &leg.asset).cloned() else {
            return true;
        };
        match self.close_leg(&open, at, fills) {
            Ok(()) => true,
            Err(error) => {
                warn!(venue = %open.venue, asset = %open.asset, %error, "orphan leg left open");
                false
            }
        }
    }

    fn held(&self, venue: Venue, asset: &str) -> Option<&Position> {
        self.portfolio
            .positions
            .iter()
            .find(|p| p.venue == venue && p.asset == asset)
    }
}

fn partial_fill(order: &Position, filled: f64) -> ExecutionError {
    ExecutionError::PartialFill {
        venue: order.venue,
        asset: order.asset.clone(),
        requested: order.size,
        filled,
    }
}
