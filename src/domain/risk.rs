//! Risk-constrained sizing of the hedged pair.
//!
//! Leverage is bounded by the exchange limit, a VaR budget, the inventory
//! cap and the visible liquidity. Both legs carry the same size so the pair's
//! net delta is zero in units; the residual notional mismatch from the price
//! gap between venues must stay within `delta_epsilon`.

use std::collections::HashMap;
use std::fmt;

use crate::domain::forecast::Opportunity;
use crate::domain::portfolio::{Marks, Portfolio};
use crate::domain::position::{Position, Side};

#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    pub default_max_leverage: f64,
    /// Exchange-imposed leverage caps keyed by asset.
    pub max_leverage: HashMap<String, f64>,
    pub max_inventory_notional: f64,
    /// Fraction of equity.
    pub var_budget: f64,
}

impl RiskLimits {
    pub fn max_leverage_for(&self, asset: &str) -> f64 {
        self.max_leverage
            .get(asset)
            .copied()
            .unwrap_or(self.default_max_leverage)
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskLimits {
            default_max_leverage: 3.0,
            max_leverage: HashMap::new(),
            max_inventory_notional: 100_000.0,
            var_budget: 0.03,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizerConfig {
    /// One-sided normal quantile for the VaR confidence level.
    pub var_confidence_z: f64,
    /// Steps in the VaR horizon; per-step volatility is scaled by its root.
    pub var_horizon_steps: f64,
    /// Share of equity committed as collateral, split evenly across legs.
    pub capital_fraction: f64,
    /// Largest share of visible depth a leg may take.
    pub max_depth_fraction: f64,
    /// Largest tolerated |long notional - short notional|.
    pub delta_epsilon: f64,
    pub min_leverage: f64,
    /// Sizes are floored to this increment; 0 disables rounding.
    pub lot_size: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        SizerConfig {
            var_confidence_z: 1.65,
            var_horizon_steps: 288.0,
            capital_fraction: 1.0,
            max_depth_fraction: 0.1,
            delta_epsilon: 50.0,
            min_leverage: 0.05,
            lot_size: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeverageBounds {
    pub exchange: f64,
    pub var: f64,
    pub inventory: f64,
    pub liquidity: f64,
}

impl LeverageBounds {
    pub fn binding(&self) -> f64 {
        self.exchange
            .min(self.var)
            .min(self.inventory)
            .min(self.liquidity)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetPair {
    pub asset: String,
    pub long: Position,
    pub short: Position,
    pub leverage: f64,
    pub bounds: LeverageBounds,
    pub adjusted_apy: f64,
}

impl TargetPair {
    pub fn long_notional(&self) -> f64 {
        self.long.entry_notional()
    }

    pub fn short_notional(&self) -> f64 {
        self.short.entry_notional()
    }

    pub fn notional_mismatch(&self) -> f64 {
        (self.long_notional() - self.short_notional()).abs()
    }

    pub fn legs(&self) -> [&Position; 2] {
        [&self.long, &self.short]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbstainReason {
    NoEquity,
    InvalidPrice,
    NoFeasibleLeverage { leverage: f64 },
    BelowMinimumSize,
    DeltaMismatch { mismatch: f64, epsilon: f64 },
}

impl fmt::Display for AbstainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstainReason::NoEquity => write!(f, "no equity to size against"),
            AbstainReason::InvalidPrice => write!(f, "non-positive leg price"),
            AbstainReason::NoFeasibleLeverage { leverage } => {
                write!(f, "feasible leverage {leverage:.4} below minimum")
            }
            AbstainReason::BelowMinimumSize => write!(f, "size rounds to zero"),
            AbstainReason::DeltaMismatch { mismatch, epsilon } => write!(
                f,
                "leg notional mismatch {mismatch:.2} exceeds tolerance {epsilon:.2}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingDecision {
    Target(TargetPair),
    Abstain(AbstainReason),
}

impl SizingDecision {
    pub fn target(&self) -> Option<&TargetPair> {
        match self {
            SizingDecision::Target(t) => Some(t),
            SizingDecision::Abstain(_) => None,
        }
    }

    pub fn is_abstain(&self) -> bool {
        matches!(self, SizingDecision::Abstain(_))
    }
}

pub struct RiskSizer {
    limits: RiskLimits,
    config: SizerConfig,
}

impl RiskSizer {
    pub fn new(limits: RiskLimits, config: SizerConfig) -> Self {
        RiskSizer { limits, config }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    /// Collateral posted per leg.
    pub fn notional_per_unit_leverage(&self, equity: f64) -> f64 {
        equity * self.config.capital_fraction / 2.0
    }

    pub fn leverage_bounds(&self, opportunity: &Opportunity, equity: f64) -> LeverageBounds {
        let unit = self.notional_per_unit_leverage(equity);
        let horizon_vol = opportunity.volatility * self.config.var_horizon_steps.max(0.0).sqrt();
        let var = if horizon_vol > 0.0 && unit > 0.0 {
            self.limits.var_budget * equity
                / (horizon_vol * self.config.var_confidence_z * unit)
        } else {
            f64::INFINITY
        };
        let per_unit = |cap: f64| if unit > 0.0 { cap / unit } else { 0.0 };
        LeverageBounds {
            exchange: self.limits.max_leverage_for(&opportunity.asset),
            var,
            inventory: per_unit(self.limits.max_inventory_notional),
            liquidity: per_unit(opportunity.liquidity_depth * self.config.max_depth_fraction),
        }
    }

    pub fn size(
        &self,
        opportunity: &Opportunity,
        portfolio: &Portfolio,
        marks: &Marks,
    ) -> SizingDecision {
        self.size_for_equity(opportunity, portfolio.equity(marks))
    }

    pub fn size_for_equity(&self, opportunity: &Opportunity, equity: f64) -> SizingDecision {
        if !(equity > 0.0) {
            return SizingDecision::Abstain(AbstainReason::NoEquity);
        }
        let (long_price, short_price) = (opportunity.long_price, opportunity.short_price);
        if !(long_price > 0.0 && short_price > 0.0) {
            return SizingDecision::Abstain(AbstainReason::InvalidPrice);
        }

        let bounds = self.leverage_bounds(opportunity, equity);
        let leverage = bounds.binding();
        if !leverage.is_finite() || leverage < self.config.min_leverage || leverage <= 0.0 {
            return SizingDecision::Abstain(AbstainReason::NoFeasibleLeverage { leverage });
        }

        let budget = leverage * self.notional_per_unit_leverage(equity);
        let mut size = budget / long_price.max(short_price);
        if self.config.lot_size > 0.0 {
            size = (size / self.config.lot_size).floor() * self.config.lot_size;
        }
        if !(size > 0.0) {
            return SizingDecision::Abstain(AbstainReason::BelowMinimumSize);
        }

        let mismatch = size * (long_price - short_price).abs();
        if mismatch > self.config.delta_epsilon {
            return SizingDecision::Abstain(AbstainReason::DeltaMismatch {
                mismatch,
                epsilon: self.config.delta_epsilon,
            });
        }

        let leg = |venue, side, price| Position {
            venue,
            asset: opportunity.asset.clone(),
            side,
            size,
            entry_price: price,
            leverage,
        };
        SizingDecision::Target(TargetPair {
            asset: opportunity.asset.clone(),
            long: leg(opportunity.long_venue, Side::Long, long_price),
            short: leg(opportunity.short_venue, Side::Short, short_price),
            leverage,
            bounds,
            adjusted_apy: opportunity.adjusted_apy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{parse_timestamp, Venue};
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn opportunity(vol: f64, depth: f64) -> Opportunity {
        Opportunity {
            asset: "ETH".into(),
            timestamp: parse_timestamp("2024-01-01T07:57:00").unwrap(),
            long_venue: Venue::A,
            short_venue: Venue::B,
            funding_spread: 0.0003,
            time_to_funding: Duration::minutes(3),
            projected_apy: 0.3285,
            confidence: 1.0,
            adjusted_apy: 0.3285,
            long_price: 2000.0,
            short_price: 2001.0,
            volatility: vol,
            liquidity_depth: depth,
        }
    }

    fn sizer() -> RiskSizer {
        RiskSizer::new(RiskLimits::default(), SizerConfig::default())
    }

    #[test]
    fn exchange_limit_binds_in_calm_market() {
        let s = sizer();
        let decision = s.size_for_equity(&opportunity(0.0, 10_000_000.0), 10_000.0);
        let target = decision.target().unwrap();
        assert_relative_eq!(target.leverage, 3.0);
        assert_eq!(target.long.venue, Venue::A);
        assert_eq!(target.short.venue, Venue::B);
        assert_eq!(target.long.size, target.short.size);
        // 3x on 5000 collateral per leg, sized off the dearer leg
        assert_relative_eq!(target.short_notional(), 15_000.0, epsilon = 1e-9);
    }

    #[test]
    fn var_limit_binds_in_volatile_market() {
        let s = sizer();
        let opp = opportunity(0.03 / 288.0_f64.sqrt(), 10_000_000.0);
        let target = s.size_for_equity(&opp, 10_000.0).target().cloned().unwrap();
        // 0.03 * 10000 / (0.03 * 1.65 * 5000)
        assert_relative_eq!(target.bounds.var, 0.03 / (0.03 * 1.65) * 2.0, epsilon = 1e-9);
        assert_relative_eq!(target.leverage, target.bounds.var);
    }

    #[test]
    fn inventory_limit_binds_for_large_equity() {
        let s = sizer();
        let target = s
            .size_for_equity(&opportunity(0.0, 1e12), 1_000_000.0)
            .target()
            .cloned()
            .unwrap();
        assert_relative_eq!(target.leverage, 100_000.0 / 500_000.0);
        assert!(target.long_notional() <= 100_000.0 + 1e-6);
    }

    #[test]
    fn liquidity_caps_leverage() {
        let s = sizer();
        let target = s
            .size_for_equity(&opportunity(0.0, 50_000.0), 10_000.0)
            .target()
            .cloned()
            .unwrap();
        assert_relative_eq!(target.leverage, 5_000.0 / 5_000.0);
    }

    #[test]
    fn per_asset_exchange_limit() {
        let mut limits = RiskLimits::default();
        limits.max_leverage.insert("ETH".into(), 2.0);
        let s = RiskSizer::new(limits, SizerConfig::default());
        let target = s
            .size_for_equity(&opportunity(0.0, 1e9), 10_000.0)
            .target()
            .cloned()
            .unwrap();
        assert_relative_eq!(target.leverage, 2.0);
        assert_relative_eq!(s.limits().max_leverage_for("BTC"), 3.0);
    }

    #[test]
    fn abstains_without_equity() {
        let s = sizer();
        assert_eq!(
            s.size_for_equity(&opportunity(0.0, 1e9), 0.0),
            SizingDecision::Abstain(AbstainReason::NoEquity)
        );
    }

    #[test]
    fn abstains_when_leverage_infeasible() {
        let s = RiskSizer::new(
            RiskLimits::default(),
            SizerConfig {
                min_leverage: 0.5,
                ..SizerConfig::default()
            },
        );
        let decision = s.size_for_equity(&opportunity(0.0, 1_000.0), 10_000.0);
        assert!(matches!(
            decision,
            SizingDecision::Abstain(AbstainReason::NoFeasibleLeverage { .. })
        ));
    }

    #[test]
    fn abstains_on_wide_venue_gap() {
        let s = sizer();
        let mut opp = opportunity(0.0, 1e9);
        opp.short_price = 2100.0;
        let decision = s.size_for_equity(&opp, 10_000.0);
        assert!(matches!(
            decision,
            SizingDecision::Abstain(AbstainReason::DeltaMismatch { .. })
        ));
    }

    #[test]
    fn lot_rounding_can_zero_out_size() {
        let s = RiskSizer::new(
            RiskLimits::default(),
            SizerConfig {
                lot_size: 100.0,
                ..SizerConfig::default()
            },
        );
        assert_eq!(
            s.size_for_equity(&opportunity(0.0, 1e9), 10_000.0),
            SizingDecision::Abstain(AbstainReason::BelowMinimumSize)
        );
    }

    #[test]
    fn lot_rounding_floors_size() {
        let s = RiskSizer::new(
            RiskLimits::default(),
            SizerConfig {
                lot_size: 0.5,
                ..SizerConfig::default()
            },
        );
        let target = s
            .size_for_equity(&opportunity(0.0, 1e9), 10_000.0)
            .target()
            .cloned()
            .unwrap();
        assert_relative_eq!(target.long.size, 7.0);
    }

    #[test]
    fn size_uses_portfolio_equity() {
        let s = sizer();
        let portfolio = Portfolio::new(10_000.0);
        let decision = s.size(&opportunity(0.0, 1e9), &portfolio, &Marks::new());
        assert!(!decision.is_abstain());
    }

    #[test]
    fn abstain_reasons_display() {
        let reason = AbstainReason::DeltaMismatch {
            mismatch: 120.0,
            epsilon: 50.0,
        };
        assert_eq!(
            reason.to_string(),
            "leg notional mismatch 120.00 exceeds tolerance 50.00"
        );
    }
}
