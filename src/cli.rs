//! CLI definition and dispatch.

use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use crate::adapters::csv_adapter::{write_snapshots_to_path, CsvSnapshotSource};
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::retry::{RetryPolicy, RetryingClient};
use crate::domain::backtest::{run_with_client, BacktestConfig, BacktestHarness, BacktestResult};
use crate::domain::config_validation::{
    validate_backtest, validate_carry, validate_config, validate_simulator, venue_section,
};
use crate::domain::error::CarryError;
use crate::domain::execution::{ExecutionConfig, SlippageModel};
use crate::domain::features::FeatureConfig;
use crate::domain::forecast::{ConfidenceDecay, ForecastConfig};
use crate::domain::metrics::periods_per_year;
use crate::domain::paper::PaperExecutionClient;
use crate::domain::pipeline::CarryConfig;
use crate::domain::risk::{RiskLimits, SizerConfig};
use crate::domain::simulator::{MarketSimulator, OuParams, SimulatorConfig, VenueProcess};
use crate::domain::snapshot::{parse_timestamp, Venue, VenuePair};
use crate::domain::strategy::StrategyConfig;
use crate::ports::config_port::ConfigPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(
    name = "fundcarry",
    about = "Delta-neutral funding-rate carry engine and backtester"
)]
pub struct Cli {
    /// Debug-level logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest the strategy against the simulated market
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        steps: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Equity-curve CSV; a summary CSV is written beside it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Backtest the strategy against recorded snapshots
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write simulated snapshots to CSV
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        steps: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            steps,
            seed,
            output,
        } => run_backtest(&config, steps, seed, output.as_ref()),
        Command::Replay {
            config,
            data,
            output,
        } => run_replay(&config, &data, output.as_ref()),
        Command::Simulate {
            config,
            output,
            steps,
            seed,
        } => run_simulate(&config, &output, steps, seed),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = CarryError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: CarryError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

/// Integer keys that must fit `T`; absent keys take `default`.
fn get_count<T: TryFrom<i64>>(
    adapter: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, CarryError> {
    let Some(raw) = adapter.get_string(section, key) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| {
            CarryError::invalid(
                section,
                key,
                format!("expected a non-negative integer, got '{raw}'"),
            )
        })
}

/// Whole minutes as a duration; values chrono cannot represent are rejected.
fn get_minutes(
    adapter: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<ChronoDuration, CarryError> {
    let minutes = adapter.get_int(section, key, default);
    ChronoDuration::try_minutes(minutes).ok_or_else(|| {
        CarryError::invalid(section, key, format!("{minutes} minutes is out of range"))
    })
}

fn build_process(adapter: &dyn ConfigPort, section: &str, prefix: &str, default: &OuParams) -> OuParams {
    let key = |name: &str| format!("{prefix}_{name}");
    let mean = adapter.get_double(section, &key("mean"), default.mean);
    OuParams {
        initial: adapter.get_double(section, &key("initial"), mean),
        mean,
        reversion: adapter.get_double(section, &key("reversion"), default.reversion),
        volatility: adapter.get_double(section, &key("volatility"), default.volatility),
    }
}

fn build_venue(adapter: &dyn ConfigPort, venue: Venue, default: &VenueProcess) -> VenueProcess {
    let section = venue_section(venue);
    VenueProcess {
        funding: build_process(adapter, section, "funding", &default.funding),
        basis: build_process(adapter, section, "basis", &default.basis),
        liquidity: build_process(adapter, section, "liquidity", &default.liquidity),
    }
}

pub fn build_simulator_config(adapter: &dyn ConfigPort) -> Result<SimulatorConfig, CarryError> {
    let d = SimulatorConfig::default();
    let s = "simulator";
    let start = match adapter.get_string(s, "start") {
        Some(raw) => parse_timestamp(&raw).map_err(|reason| CarryError::invalid(s, "start", reason))?,
        None => d.start,
    };
    Ok(SimulatorConfig {
        asset: adapter
            .get_string(s, "asset")
            .map(|a| a.trim().to_uppercase())
            .unwrap_or_else(|| d.asset.clone()),
        start,
        step_minutes: get_count(adapter, s, "step_minutes", d.step_minutes)?,
        steps: get_count(adapter, s, "steps", d.steps)?,
        seed: get_count(adapter, s, "seed", d.seed)?,
        initial_spot: adapter.get_double(s, "initial_spot", d.initial_spot),
        price_drift: adapter.get_double(s, "price_drift", d.price_drift),
        price_volatility: adapter.get_double(s, "price_volatility", d.price_volatility),
        funding_interval_hours: get_count(adapter, s, "funding_interval_hours", d.funding_interval_hours)?,
        liquidity_min: adapter.get_double(s, "liquidity_min", d.liquidity_min),
        liquidity_max: adapter.get_double(s, "liquidity_max", d.liquidity_max),
        venues: VenuePair::new(
            build_venue(adapter, Venue::A, &d.venues.a),
            build_venue(adapter, Venue::B, &d.venues.b),
        ),
    })
}

pub fn build_forecast_config(adapter: &dyn ConfigPort) -> Result<ForecastConfig, CarryError> {
    let d = ForecastConfig::default();
    let s = "forecast";
    let decay_minutes = get_minutes(adapter, s, "decay_minutes", 480)?;
    let kind = adapter
        .get_string(s, "decay")
        .map(|k| k.trim().to_lowercase())
        .unwrap_or_else(|| "linear".to_string());
    let decay = match kind.as_str() {
        "step" => ConfidenceDecay::Step,
        "linear" => ConfidenceDecay::Linear {
            horizon: decay_minutes,
        },
        "exponential" => ConfidenceDecay::Exponential {
            half_life: decay_minutes,
        },
        other => {
            return Err(CarryError::invalid(
                s,
                "decay",
                format!("unknown decay kind '{other}'"),
            ));
        }
    };
    Ok(ForecastConfig {
        funding_periods_per_year: adapter.get_double(
            s,
            "funding_periods_per_year",
            d.funding_periods_per_year,
        ),
        imminent_window: get_minutes(
            adapter,
            s,
            "imminent_window_minutes",
            d.imminent_window.num_minutes(),
        )?,
        min_apy: adapter.get_double(s, "min_apy", d.min_apy),
        decay,
        require_imminent: adapter.get_bool(s, "require_imminent", d.require_imminent),
        warmup_discount: adapter.get_double(s, "warmup_discount", d.warmup_discount),
        momentum_weight: adapter.get_double(s, "momentum_weight", d.momentum_weight),
    })
}

/// `[risk.leverage]` keys are asset symbols; the INI layer lower-cases them.
pub fn build_risk_limits(adapter: &dyn ConfigPort) -> RiskLimits {
    let d = RiskLimits::default();
    let max_leverage = adapter
        .keys("risk.leverage")
        .into_iter()
        .map(|asset| {
            let cap = adapter.get_double("risk.leverage", &asset, f64::NAN);
            (asset.to_uppercase(), cap)
        })
        .collect();
    RiskLimits {
        default_max_leverage: adapter.get_double("risk", "max_leverage", d.default_max_leverage),
        max_leverage,
        max_inventory_notional: adapter.get_double(
            "risk",
            "max_inventory_notional",
            d.max_inventory_notional,
        ),
        var_budget: adapter.get_double("risk", "var_budget", d.var_budget),
    }
}

pub fn build_sizer_config(adapter: &dyn ConfigPort) -> SizerConfig {
    let d = SizerConfig::default();
    let s = "sizer";
    SizerConfig {
        var_confidence_z: adapter.get_double(s, "var_confidence_z", d.var_confidence_z),
        var_horizon_steps: adapter.get_double(s, "var_horizon_steps", d.var_horizon_steps),
        capital_fraction: adapter.get_double(s, "capital_fraction", d.capital_fraction),
        max_depth_fraction: adapter.get_double(s, "max_depth_fraction", d.max_depth_fraction),
        delta_epsilon: adapter.get_double(s, "delta_epsilon", d.delta_epsilon),
        min_leverage: adapter.get_double(s, "min_leverage", d.min_leverage),
        lot_size: adapter.get_double(s, "lot_size", d.lot_size),
    }
}

pub fn build_carry_config(adapter: &dyn ConfigPort) -> Result<CarryConfig, CarryError> {
    let features = FeatureConfig::default();
    let strategy = StrategyConfig::default();
    Ok(CarryConfig {
        features: FeatureConfig {
            window: get_count(adapter, "features", "window", features.window)?,
            ewma_lambda: adapter.get_double("features", "ewma_lambda", features.ewma_lambda),
        },
        forecast: build_forecast_config(adapter)?,
        limits: build_risk_limits(adapter),
        sizer: build_sizer_config(adapter),
        strategy: StrategyConfig {
            rebalance_tolerance: adapter.get_double(
                "strategy",
                "rebalance_tolerance",
                strategy.rebalance_tolerance,
            ),
            delta_epsilon: adapter.get_double("strategy", "delta_epsilon", strategy.delta_epsilon),
        },
    })
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, CarryError> {
    let d = BacktestConfig::default();
    let s = "backtest";
    let initial_capital = adapter.get_double(s, "initial_capital", d.initial_capital);
    let slippage_bps = adapter.get_double(s, "slippage_bps", 1.0);
    let kind = adapter
        .get_string(s, "slippage")
        .map(|k| k.trim().to_lowercase())
        .unwrap_or_else(|| "fixed".to_string());
    let slippage = match kind.as_str() {
        "none" => SlippageModel::None,
        "fixed" => SlippageModel::FixedBps(slippage_bps),
        "depth" => SlippageModel::DepthScaled {
            base_bps: slippage_bps,
            impact_bps: adapter.get_double(s, "slippage_impact_bps", 10.0),
        },
        other => {
            return Err(CarryError::invalid(
                s,
                "slippage",
                format!("unknown slippage model '{other}'"),
            ));
        }
    };
    Ok(BacktestConfig {
        initial_capital,
        execution: ExecutionConfig {
            fee_rate: adapter.get_double(s, "fee_rate", d.execution.fee_rate),
            slippage,
        },
        venue_collateral: adapter.get_double(s, "venue_collateral", initial_capital),
    })
}

pub fn build_retry_policy(adapter: &dyn ConfigPort) -> Result<RetryPolicy, CarryError> {
    let d = RetryPolicy::default();
    let s = "backtest";
    let initial_ms = get_count(adapter, s, "retry_backoff_ms", d.initial_backoff.as_millis() as u64)?;
    let max_ms = get_count(adapter, s, "retry_max_backoff_ms", d.max_backoff.as_millis() as u64)?;
    Ok(RetryPolicy {
        max_attempts: get_count(adapter, s, "retry_attempts", d.max_attempts)?,
        initial_backoff: Duration::from_millis(initial_ms),
        max_backoff: Duration::from_millis(max_ms),
        backoff_multiplier: d.backoff_multiplier,
    })
}

/// Paper venues behind the retry decorator.
fn paper_client(
    backtest: &BacktestConfig,
    retry: RetryPolicy,
) -> RetryingClient<PaperExecutionClient> {
    RetryingClient::new(
        PaperExecutionClient::new(backtest.execution.clone(), backtest.venue_collateral),
        retry,
    )
}

struct RunConfig {
    simulator: SimulatorConfig,
    carry: CarryConfig,
    backtest: BacktestConfig,
    retry: RetryPolicy,
}

fn build_run_config(adapter: &dyn ConfigPort) -> Result<RunConfig, CarryError> {
    validate_config(adapter)?;
    let run = RunConfig {
        simulator: build_simulator_config(adapter)?,
        carry: build_carry_config(adapter)?,
        backtest: build_backtest_config(adapter)?,
        retry: build_retry_policy(adapter)?,
    };
    validate_simulator(&run.simulator)?;
    validate_carry(&run.carry)?;
    validate_backtest(&run.backtest)?;
    Ok(run)
}

fn run_backtest(
    config_path: &Path,
    steps: Option<usize>,
    seed: Option<u64>,
    output_path: Option<&PathBuf>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let mut config = match build_run_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    if let Some(steps) = steps {
        config.simulator.steps = steps;
    }
    if let Some(seed) = seed {
        config.simulator.seed = seed;
    }

    eprintln!(
        "Running backtest: {} steps of {} min on {} (seed {})",
        config.simulator.steps,
        config.simulator.step_minutes,
        config.simulator.asset,
        config.simulator.seed,
    );
    let client = paper_client(&config.backtest, config.retry);
    let harness = match BacktestHarness::new(config.simulator, config.carry, config.backtest) {
        Ok(h) => h,
        Err(e) => return fail(e),
    };
    let result = match harness.run_with(client, |c, batch| c.inner_mut().update_markets(batch)) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    print_summary(&result);
    write_report(&result, output_path)
}

fn run_replay(config_path: &Path, data_path: &Path, output_path: Option<&PathBuf>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let config = match build_run_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    eprintln!("Loading snapshots from {}", data_path.display());
    let mut source = match CsvSnapshotSource::from_path(data_path) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    if source.is_empty() {
        return fail(CarryError::data(format!(
            "no snapshots in {}",
            data_path.display()
        )));
    }
    let step_minutes = source.step_minutes().unwrap_or(config.simulator.step_minutes);
    eprintln!("Replaying {} cycles ({} min apart)", source.len(), step_minutes);

    let client = paper_client(&config.backtest, config.retry);
    let result = match run_with_client(
        &mut source,
        &config.carry,
        config.backtest.initial_capital,
        client,
        periods_per_year(step_minutes),
        |c, batch| c.inner_mut().update_markets(batch),
    ) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    print_summary(&result);
    write_report(&result, output_path)
}

fn run_simulate(
    config_path: &Path,
    output_path: &Path,
    steps: Option<usize>,
    seed: Option<u64>,
) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_config(&adapter) {
        return fail(e);
    }
    let mut config = match build_simulator_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    if let Some(steps) = steps {
        config.steps = steps;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Err(e) = validate_simulator(&config) {
        return fail(e);
    }

    let snapshots = MarketSimulator::new(config).generate();
    match write_snapshots_to_path(output_path, snapshots.iter().flat_map(|p| [&p.a, &p.b])) {
        Ok(rows) => {
            eprintln!(
                "Wrote {} snapshots ({} cycles) to {}",
                rows,
                snapshots.len(),
                output_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let config = match build_run_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    eprintln!("\nSimulator:");
    eprintln!(
        "  {} from {}, {} steps of {} min, seed {}",
        config.simulator.asset,
        config.simulator.start,
        config.simulator.steps,
        config.simulator.step_minutes,
        config.simulator.seed,
    );
    eprintln!("\nRisk:");
    eprintln!("  Max leverage:     {:.2}", config.carry.limits.default_max_leverage);
    let mut caps: Vec<_> = config.carry.limits.max_leverage.iter().collect();
    caps.sort_by(|a, b| a.0.cmp(b.0));
    for (asset, cap) in caps {
        eprintln!("    {asset}: {cap:.2}");
    }
    eprintln!("  VaR budget:       {:.2}%", config.carry.limits.var_budget * 100.0);
    eprintln!(
        "  Max inventory:    {:.0}",
        config.carry.limits.max_inventory_notional
    );
    eprintln!("\nForecast:");
    eprintln!("  Min APY:          {:.2}%", config.carry.forecast.min_apy * 100.0);
    eprintln!("  Decay:            {:?}", config.carry.forecast.decay);
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn print_summary(result: &BacktestResult) {
    eprintln!("\n=== Backtest Results ===");
    eprintln!("Steps:            {}", result.steps);
    eprintln!("Final Equity:     {:.2}", result.final_equity);
    eprintln!("Total Return:     {:.4}%", result.total_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", result.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", result.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.3}%", result.max_drawdown * 100.0);
    eprintln!("Funding Events:   {}", result.funding_events);
    eprintln!("Avg Carry:        {:.4}", result.avg_funding_carry);
    eprintln!("Total Funding:    {:.4}", result.total_funding);
    eprintln!("Fees Paid:        {:.4}", result.fees_paid);
    eprintln!(
        "Rebalances:       {} ({} failed)",
        result.rebalances, result.failed_rebalances
    );
}

fn write_report(result: &BacktestResult, output_path: Option<&PathBuf>) -> ExitCode {
    let Some(output) = output_path else {
        return ExitCode::SUCCESS;
    };
    let output = output.display().to_string();
    match CsvReportAdapter::new().write(result, &output) {
        Ok(()) => {
            eprintln!("\nReport written to: {output}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}
