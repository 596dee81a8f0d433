//! Closed-loop backtest over a snapshot source.
//!
//! The harness always trades through the [`PaperExecutionClient`]; market
//! marks reach the client before the pipeline sees each batch.

use tracing::{debug, info};

use crate::domain::config_validation::{validate_backtest, validate_carry, validate_simulator};
use crate::domain::error::CarryError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::metrics::{periods_per_year, Metrics};
use crate::domain::paper::PaperExecutionClient;
use crate::domain::pipeline::CarryConfig;
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::simulator::{MarketSimulator, SimulatorConfig};
use crate::domain::snapshot::MarketSnapshot;
use crate::domain::strategy::RebalanceOutcome;
use crate::ports::execution_port::OrderExecutionClient;
use crate::ports::market_data_port::MarketDataSource;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
    /// Collateral posted at each venue's paper account.
    pub venue_collateral: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 10_000.0,
            execution: ExecutionConfig::default(),
            venue_collateral: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub equity_curve: Vec<EquityPoint>,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Mean net funding per settlement event.
    pub avg_funding_carry: f64,
    pub total_funding: f64,
    pub fees_paid: f64,
    pub total_return: f64,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub funding_events: usize,
    pub rebalances: usize,
    pub failed_rebalances: usize,
    pub steps: usize,
}

impl BacktestResult {
    pub fn from_portfolio(
        portfolio: Portfolio,
        periods_per_year: f64,
        steps: usize,
        rebalances: usize,
        failed_rebalances: usize,
    ) -> Self {
        let metrics = Metrics::compute(&portfolio, periods_per_year);
        let final_equity = portfolio
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(portfolio.initial_capital);
        BacktestResult {
            sharpe_ratio: metrics.sharpe_ratio,
            sortino_ratio: metrics.sortino_ratio,
            max_drawdown: metrics.max_drawdown,
            avg_funding_carry: metrics.avg_funding_carry,
            total_funding: metrics.total_funding,
            fees_paid: metrics.fees_paid,
            total_return: metrics.total_return,
            initial_capital: portfolio.initial_capital,
            final_equity,
            funding_events: metrics.funding_events,
            rebalances,
            failed_rebalances,
            steps,
            equity_curve: portfolio.equity_curve,
        }
    }
}

pub struct BacktestHarness {
    simulator: MarketSimulator,
    carry: CarryConfig,
    backtest: BacktestConfig,
}

impl BacktestHarness {
    /// Rejects malformed configuration before any cycle runs.
    pub fn new(
        simulator: SimulatorConfig,
        carry: CarryConfig,
        backtest: BacktestConfig,
    ) -> Result<Self, CarryError> {
        validate_simulator(&simulator)?;
        validate_carry(&carry)?;
        validate_backtest(&backtest)?;
        Ok(BacktestHarness {
            simulator: MarketSimulator::new(simulator),
            carry,
            backtest,
        })
    }

    pub fn simulator(&self) -> &MarketSimulator {
        &self.simulator
    }

    pub fn backtest(&self) -> &BacktestConfig {
        &self.backtest
    }

    /// Repeatable: every call replays the simulator from its seed.
    pub fn run(&self) -> Result<BacktestResult, CarryError> {
        let mut feed = self.simulator.feed();
        run_source(&mut feed, &self.carry, &self.backtest, self.periods_per_year())
    }

    /// Replays the simulator through a caller-built client, typically a
    /// decorated paper client.
    pub fn run_with<C: OrderExecutionClient>(
        &self,
        client: C,
        on_market: impl FnMut(&mut C, &[MarketSnapshot]),
    ) -> Result<BacktestResult, CarryError> {
        let mut feed = self.simulator.feed();
        run_with_client(
            &mut feed,
            &self.carry,
            self.backtest.initial_capital,
            client,
            self.periods_per_year(),
            on_market,
        )
    }

    fn periods_per_year(&self) -> f64 {
        periods_per_year(self.simulator.config().step_minutes)
    }
}

/// Drives any snapshot source to exhaustion through a fresh pipeline.
pub fn run_source(
    source: &mut dyn MarketDataSource,
    carry: &CarryConfig,
    backtest: &BacktestConfig,
    periods_per_year: f64,
) -> Result<BacktestResult, CarryError> {
    let client = PaperExecutionClient::new(backtest.execution.clone(), backtest.venue_collateral);
    run_with_client(
        source,
        carry,
        backtest.initial_capital,
        client,
        periods_per_year,
        |client, batch| client.update_markets(batch),
    )
}

/// As [`run_source`], trading through `client`. `on_market` sees every batch
/// before the pipeline does, so a simulated venue can quote it.
pub fn run_with_client<C: OrderExecutionClient>(
    source: &mut dyn MarketDataSource,
    carry: &CarryConfig,
    initial_capital: f64,
    client: C,
    periods_per_year: f64,
    mut on_market: impl FnMut(&mut C, &[MarketSnapshot]),
) -> Result<BacktestResult, CarryError> {
    let mut pipeline = carry.pipeline(client, initial_capital);
    let mut steps = 0;
    let mut rebalances = 0;
    let mut failed_rebalances = 0;

    while let Some(batch) = source.next_batch()? {
        on_market(pipeline.engine_mut().client_mut(), &batch);
        let Some(report) = pipeline.on_batch(&batch) else {
            debug!("empty batch");
            continue;
        };
        steps += 1;
        match report.outcome {
            RebalanceOutcome::Completed => rebalances += 1,
            RebalanceOutcome::Failed { .. } => failed_rebalances += 1,
            RebalanceOutcome::NoTarget | RebalanceOutcome::AlreadyHeld => {}
        }
    }

    let portfolio = pipeline.into_engine().into_portfolio();
    let result = BacktestResult::from_portfolio(
        portfolio,
        periods_per_year,
        steps,
        rebalances,
        failed_rebalances,
    );
    info!(
        steps = result.steps,
        rebalances = result.rebalances,
        funding_events = result.funding_events,
        final_equity = result.final_equity,
        sharpe = result.sharpe_ratio,
        "backtest finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::SlippageModel;

    fn simulator(steps: usize) -> SimulatorConfig {
        SimulatorConfig {
            steps,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn rejects_invalid_capital() {
        let backtest = BacktestConfig {
            initial_capital: 0.0,
            ..BacktestConfig::default()
        };
        let result = BacktestHarness::new(simulator(10), CarryConfig::default(), backtest);
        assert!(matches!(result, Err(CarryError::ConfigInvalid { .. })));
    }

    #[test]
    fn rejects_short_feature_window() {
        let mut carry = CarryConfig::default();
        carry.features.window = 1;
        let result = BacktestHarness::new(simulator(10), carry, BacktestConfig::default());
        assert!(matches!(result, Err(CarryError::ConfigInvalid { .. })));
    }

    #[test]
    fn equity_point_per_step() {
        let harness =
            BacktestHarness::new(simulator(50), CarryConfig::default(), BacktestConfig::default())
                .unwrap();
        let result = harness.run().unwrap();
        assert_eq!(result.steps, 50);
        assert_eq!(result.equity_curve.len(), 50);
        assert!((result.initial_capital - 10_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn run_is_deterministic() {
        let harness =
            BacktestHarness::new(simulator(600), CarryConfig::default(), BacktestConfig::default())
                .unwrap();
        let first = harness.run().unwrap();
        let second = harness.run().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn run_with_paper_client_matches_run() {
        let harness =
            BacktestHarness::new(simulator(300), CarryConfig::default(), BacktestConfig::default())
                .unwrap();
        let bt = harness.backtest().clone();
        let client = PaperExecutionClient::new(bt.execution, bt.venue_collateral);
        let decorated = harness
            .run_with(client, |c, batch| c.update_markets(batch))
            .unwrap();
        assert_eq!(decorated, harness.run().unwrap());
    }

    #[test]
    fn default_market_trades_and_settles() {
        // One day of 5-minute steps crosses three settlements.
        let backtest = BacktestConfig {
            execution: ExecutionConfig {
                fee_rate: 0.0,
                slippage: SlippageModel::None,
            },
            ..BacktestConfig::default()
        };
        let harness =
            BacktestHarness::new(simulator(289), CarryConfig::default(), backtest).unwrap();
        let result = harness.run().unwrap();
        assert!(result.rebalances >= 1);
        assert!(result.funding_events >= 1);
        assert_eq!(result.failed_rebalances, 0);
        assert!(result.max_drawdown >= 0.0);
    }

    #[test]
    fn zero_steps_rejected() {
        let mut config = simulator(1);
        config.steps = 0;
        let result = BacktestHarness::new(config, CarryConfig::default(), BacktestConfig::default());
        assert!(result.is_err());
    }
}
