//! Configuration validation.
//!
//! Typed configs are validated before a harness is built; raw files are
//! checked for the values the typed structs cannot express (timestamps,
//! enum spellings, per-asset leverage entries).

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::CarryError;
use crate::domain::execution::SlippageModel;
use crate::domain::features::FeatureConfig;
use crate::domain::forecast::{ConfidenceDecay, ForecastConfig};
use crate::domain::pipeline::CarryConfig;
use crate::domain::risk::{RiskLimits, SizerConfig};
use crate::domain::simulator::{OuParams, SimulatorConfig};
use crate::domain::snapshot::{parse_timestamp, Venue};
use crate::domain::strategy::StrategyConfig;
use crate::ports::config_port::ConfigPort;

pub const DECAY_KINDS: [&str; 3] = ["step", "linear", "exponential"];
pub const SLIPPAGE_KINDS: [&str; 3] = ["none", "fixed", "depth"];

fn require(ok: bool, section: &str, key: &str, reason: &str) -> Result<(), CarryError> {
    if ok {
        Ok(())
    } else {
        Err(CarryError::invalid(section, key, reason))
    }
}

fn positive(value: f64, section: &str, key: &str) -> Result<(), CarryError> {
    require(
        value.is_finite() && value > 0.0,
        section,
        key,
        &format!("{key} must be positive"),
    )
}

fn non_negative(value: f64, section: &str, key: &str) -> Result<(), CarryError> {
    require(
        value.is_finite() && value >= 0.0,
        section,
        key,
        &format!("{key} must be non-negative"),
    )
}

fn fraction(value: f64, section: &str, key: &str) -> Result<(), CarryError> {
    require(
        value > 0.0 && value <= 1.0,
        section,
        key,
        &format!("{key} must be in (0, 1]"),
    )
}

pub fn venue_section(venue: Venue) -> &'static str {
    match venue {
        Venue::A => "venue_a",
        Venue::B => "venue_b",
    }
}

fn validate_process(params: &OuParams, section: &str, prefix: &str) -> Result<(), CarryError> {
    require(
        params.initial.is_finite() && params.mean.is_finite(),
        section,
        &format!("{prefix}_mean"),
        "must be finite",
    )?;
    non_negative(params.reversion, section, &format!("{prefix}_reversion"))?;
    non_negative(params.volatility, section, &format!("{prefix}_volatility"))
}

pub fn validate_simulator(config: &SimulatorConfig) -> Result<(), CarryError> {
    let s = "simulator";
    require(!config.asset.trim().is_empty(), s, "asset", "asset must be set")?;
    require(config.steps > 0, s, "steps", "steps must be positive")?;
    require(config.step_minutes > 0, s, "step_minutes", "step_minutes must be positive")?;
    require(
        config.funding_interval_hours > 0 && 24 % config.funding_interval_hours == 0,
        s,
        "funding_interval_hours",
        "funding_interval_hours must divide 24",
    )?;
    positive(config.initial_spot, s, "initial_spot")?;
    require(config.price_drift.is_finite(), s, "price_drift", "price_drift must be finite")?;
    non_negative(config.price_volatility, s, "price_volatility")?;
    positive(config.liquidity_min, s, "liquidity_min")?;
    require(
        config.liquidity_max >= config.liquidity_min,
        s,
        "liquidity_max",
        "liquidity_max must be at least liquidity_min",
    )?;
    for venue in Venue::ALL {
        let process = config.venues.get(venue);
        let section = venue_section(venue);
        validate_process(&process.funding, section, "funding")?;
        validate_process(&process.basis, section, "basis")?;
        validate_process(&process.liquidity, section, "liquidity")?;
    }
    Ok(())
}

pub fn validate_features(config: &FeatureConfig) -> Result<(), CarryError> {
    require(config.window >= 2, "features", "window", "window must be at least 2")?;
    require(
        config.ewma_lambda > 0.0 && config.ewma_lambda < 1.0,
        "features",
        "ewma_lambda",
        "ewma_lambda must be in (0, 1)",
    )
}

pub fn validate_forecast(config: &ForecastConfig) -> Result<(), CarryError> {
    let s = "forecast";
    positive(config.funding_periods_per_year, s, "funding_periods_per_year")?;
    require(
        config.imminent_window >= chrono::Duration::zero(),
        s,
        "imminent_window_minutes",
        "imminent_window_minutes must be non-negative",
    )?;
    require(config.min_apy.is_finite(), s, "min_apy", "min_apy must be finite")?;
    match &config.decay {
        ConfidenceDecay::Step => {}
        ConfidenceDecay::Linear { horizon } => require(
            *horizon > chrono::Duration::zero(),
            s,
            "decay_minutes",
            "decay_minutes must be positive",
        )?,
        ConfidenceDecay::Exponential { half_life } => require(
            *half_life > chrono::Duration::zero(),
            s,
            "decay_minutes",
            "decay_minutes must be positive",
        )?,
    }
    require(
        (0.0..=1.0).contains(&config.warmup_discount),
        s,
        "warmup_discount",
        "warmup_discount must be in [0, 1]",
    )?;
    non_negative(config.momentum_weight, s, "momentum_weight")
}

pub fn validate_limits(limits: &RiskLimits) -> Result<(), CarryError> {
    positive(limits.default_max_leverage, "risk", "max_leverage")?;
    let mut assets: Vec<&String> = limits.max_leverage.keys().collect();
    assets.sort();
    for asset in assets {
        positive(limits.max_leverage[asset], "risk.leverage", asset)?;
    }
    positive(limits.max_inventory_notional, "risk", "max_inventory_notional")?;
    fraction(limits.var_budget, "risk", "var_budget")
}

pub fn validate_sizer(config: &SizerConfig) -> Result<(), CarryError> {
    let s = "sizer";
    positive(config.var_confidence_z, s, "var_confidence_z")?;
    require(
        config.var_horizon_steps >= 1.0,
        s,
        "var_horizon_steps",
        "var_horizon_steps must be at least 1",
    )?;
    fraction(config.capital_fraction, s, "capital_fraction")?;
    fraction(config.max_depth_fraction, s, "max_depth_fraction")?;
    non_negative(config.delta_epsilon, s, "delta_epsilon")?;
    non_negative(config.min_leverage, s, "min_leverage")?;
    non_negative(config.lot_size, s, "lot_size")
}

pub fn validate_strategy(config: &StrategyConfig) -> Result<(), CarryError> {
    require(
        config.rebalance_tolerance >= 0.0 && config.rebalance_tolerance < 1.0,
        "strategy",
        "rebalance_tolerance",
        "rebalance_tolerance must be in [0, 1)",
    )?;
    non_negative(config.delta_epsilon, "strategy", "delta_epsilon")
}

pub fn validate_carry(config: &CarryConfig) -> Result<(), CarryError> {
    validate_features(&config.features)?;
    validate_forecast(&config.forecast)?;
    validate_limits(&config.limits)?;
    validate_sizer(&config.sizer)?;
    validate_strategy(&config.strategy)
}

pub fn validate_backtest(config: &BacktestConfig) -> Result<(), CarryError> {
    let s = "backtest";
    positive(config.initial_capital, s, "initial_capital")?;
    require(
        config.execution.fee_rate >= 0.0 && config.execution.fee_rate < 1.0,
        s,
        "fee_rate",
        "fee_rate must be in [0, 1)",
    )?;
    match config.execution.slippage {
        SlippageModel::None => {}
        SlippageModel::FixedBps(bps) => non_negative(bps, s, "slippage_bps")?,
        SlippageModel::DepthScaled {
            base_bps,
            impact_bps,
        } => {
            non_negative(base_bps, s, "slippage_bps")?;
            non_negative(impact_bps, s, "slippage_impact_bps")?;
        }
    }
    positive(config.venue_collateral, s, "venue_collateral")
}

/// File-level checks run before typed configs are built.
pub fn validate_config(config: &dyn ConfigPort) -> Result<(), CarryError> {
    for (section, key) in VALUED_KEYS {
        require_value(config, section, key)?;
    }
    if let Some(start) = config.get_string("simulator", "start") {
        parse_timestamp(&start).map_err(|reason| CarryError::invalid("simulator", "start", reason))?;
    }
    validate_non_negative_int(config, "simulator", "steps")?;
    validate_non_negative_int(config, "simulator", "seed")?;
    validate_non_negative_int(config, "simulator", "step_minutes")?;
    validate_non_negative_int(config, "features", "window")?;
    validate_kind(config, "forecast", "decay", &DECAY_KINDS)?;
    validate_kind(config, "backtest", "slippage", &SLIPPAGE_KINDS)?;
    for asset in config.keys("risk.leverage") {
        require_value(config, "risk.leverage", &asset)?;
        let raw = config.get_string("risk.leverage", &asset).unwrap_or_default();
        match raw.trim().parse::<f64>() {
            Ok(value) => positive(value, "risk.leverage", &asset)?,
            Err(_) => {
                return Err(CarryError::invalid(
                    "risk.leverage",
                    &asset,
                    format!("expected a number, got '{raw}'"),
                ));
            }
        }
    }
    Ok(())
}

/// Keys that have no meaningful empty value.
const VALUED_KEYS: [(&str, &str); 4] = [
    ("simulator", "asset"),
    ("simulator", "start"),
    ("forecast", "decay"),
    ("backtest", "slippage"),
];

/// A key written without a value is missing, not defaulted.
fn require_value(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), CarryError> {
    let present = config.keys(section).iter().any(|k| k == key);
    let blank = config
        .get_string(section, key)
        .is_none_or(|v| v.trim().is_empty());
    if present && blank {
        Err(CarryError::missing(section, key))
    } else {
        Ok(())
    }
}

fn validate_non_negative_int(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), CarryError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(());
    };
    match raw.trim().parse::<u64>() {
        Ok(_) => Ok(()),
        Err(_) => Err(CarryError::invalid(
            section,
            key,
            format!("expected a non-negative integer, got '{raw}'"),
        )),
    }
}

fn validate_kind(config: &dyn ConfigPort, section: &str, key: &str, kinds: &[&str]) -> Result<(), CarryError> {
    match config.get_string(section, key) {
        Some(kind) if !kinds.contains(&kind.trim().to_lowercase().as_str()) => Err(CarryError::invalid(
            section,
            key,
            format!("expected one of {}", kinds.join(", ")),
        )),
        _ => Ok(()),
    }
}
