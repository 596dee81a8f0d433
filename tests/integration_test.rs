//! End-to-end tests of the carry pipeline through the paper venues.
//!
//! Tests cover:
//! - The canonical 0.01% / 0.04% spread cycle
//! - Settlement of the published rate on a held pair
//! - Identical rates never leaving Monitoring
//! - Truthful portfolio state after execution failures
//! - Determinism and state-machine shape over full simulated runs

mod common;

use approx::assert_relative_eq;
use chrono::Duration;
use common::*;
use fundcarry::adapters::retry::{RetryPolicy, RetryingClient, Sleeper};
use fundcarry::domain::backtest::{BacktestConfig, BacktestHarness};
use fundcarry::domain::execution::ExecutionError;
use fundcarry::domain::pipeline::CarryConfig;
use fundcarry::domain::simulator::{MarketSimulator, SimulatorConfig};
use fundcarry::domain::snapshot::Venue;
use fundcarry::domain::strategy::{EngineState, RebalanceOutcome};
use fundcarry::ports::execution_port::OrderExecutionClient;

fn path(report: &fundcarry::domain::strategy::StepReport) -> Vec<(EngineState, EngineState)> {
    report.transitions.iter().map(|t| (t.from, t.to)).collect()
}

mod carry_cycle {
    use super::*;

    #[test]
    fn spread_of_three_basis_points_opens_hedged_pair() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        let report = feed(&mut pipeline, &batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004));

        assert_eq!(
            path(&report),
            vec![
                (EngineState::Idle, EngineState::Monitoring),
                (EngineState::Monitoring, EngineState::OpportunityDetected),
                (EngineState::OpportunityDetected, EngineState::Rebalancing),
                (EngineState::Rebalancing, EngineState::Holding),
            ]
        );
        assert_eq!(report.outcome, RebalanceOutcome::Completed);

        let target = report.target.as_ref().unwrap();
        assert_eq!(target.long.venue, Venue::A);
        assert_eq!(target.short.venue, Venue::B);
        assert_relative_eq!(target.adjusted_apy, 0.3285, max_relative = 1e-9);

        let portfolio = pipeline.engine().portfolio();
        assert_eq!(portfolio.position_count(), 2);
        assert!(portfolio.is_delta_neutral(1e-9));
        assert_eq!(report.fills.len(), 2);
    }

    #[test]
    fn held_pair_is_not_churned() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        feed(&mut pipeline, &batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004));
        let report = feed(&mut pipeline, &batch(ts("2024-01-01T07:58:00"), 0.0001, 0.0004));

        assert_eq!(report.outcome, RebalanceOutcome::AlreadyHeld);
        assert_eq!(report.state, EngineState::Holding);
        assert!(report.fills.is_empty());
        assert_eq!(pipeline.engine().client().fill_count(), 2);
    }

    #[test]
    fn settlement_pays_the_spread() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        feed(&mut pipeline, &batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004));
        let size = pipeline.engine().portfolio().positions[0].size;

        let report = feed(&mut pipeline, &batch(ts("2024-01-01T08:00:00"), 0.0002, 0.0002));

        assert_relative_eq!(report.funding_paid, size * 2000.0 * 0.0003, max_relative = 1e-9);
        let portfolio = pipeline.engine().portfolio();
        assert_eq!(portfolio.funding_payments.len(), 2);
        assert!(portfolio.total_funding() > 0.0);
    }

    #[test]
    fn distant_settlement_is_not_actionable() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        let report = feed(&mut pipeline, &batch(ts("2024-01-01T04:00:00"), 0.0001, 0.0004));
        assert_eq!(report.state, EngineState::Monitoring);
        assert!(pipeline.engine().portfolio().is_flat());
    }

    #[test]
    fn identical_rates_stay_monitoring() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        let start = ts("2024-01-01T07:00:00");
        for batch in series(start, Duration::minutes(5), 200, 0.0003, 0.0003) {
            let report = feed(&mut pipeline, &batch);
            assert_eq!(report.state, EngineState::Monitoring);
            assert!(report.target.is_none());
        }
        let engine = pipeline.engine();
        assert_eq!(engine.history().len(), 1);
        assert!(engine.portfolio().is_flat());
        assert_eq!(engine.client().fill_count(), 0);
    }

    #[test]
    fn identical_simulated_funding_never_trades() {
        let mut config = SimulatorConfig {
            steps: 600,
            ..SimulatorConfig::default()
        };
        for process in [&mut config.venues.a, &mut config.venues.b] {
            process.funding.initial = 0.0002;
            process.funding.mean = 0.0002;
            process.funding.volatility = 0.0;
        }
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        for pair in MarketSimulator::new(config).feed() {
            let report = feed(&mut pipeline, &[pair.a, pair.b]);
            assert_eq!(report.state, EngineState::Monitoring);
        }
        assert!(pipeline.engine().portfolio().is_flat());
    }
}

mod execution_failures {
    use super::*;

    fn rejected(venue: Venue) -> ExecutionError {
        ExecutionError::Rejected {
            venue,
            reason: "post-only would cross".into(),
        }
    }

    #[test]
    fn short_leg_failure_unwinds_long() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        pipeline
            .engine_mut()
            .client_mut()
            .inject_failure(Venue::B, rejected(Venue::B));

        let report = feed(&mut pipeline, &batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004));

        assert_eq!(
            report.outcome,
            RebalanceOutcome::Failed {
                error: rejected(Venue::B),
                unwound: true
            }
        );
        assert_eq!(report.state, EngineState::Monitoring);
        assert_eq!(
            path(&report).last(),
            Some(&(EngineState::Rebalancing, EngineState::Monitoring))
        );

        let engine = pipeline.engine();
        assert!(engine.portfolio().is_flat());
        assert_eq!(engine.portfolio().closed_positions.len(), 1);
        assert!(engine.portfolio().fees_paid > 0.0);
        assert!(report.equity < 10_000.0);
        let balance = engine.client().balance(Venue::A).unwrap();
        assert_relative_eq!(balance.available, balance.total, max_relative = 1e-9);
    }

    #[test]
    fn long_leg_failure_leaves_portfolio_flat() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        pipeline
            .engine_mut()
            .client_mut()
            .inject_failure(Venue::A, rejected(Venue::A));

        let report = feed(&mut pipeline, &batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004));

        assert!(matches!(
            report.outcome,
            RebalanceOutcome::Failed { unwound: false, .. }
        ));
        assert!(report.fills.is_empty());
        assert!(pipeline.engine().portfolio().is_flat());
        assert_relative_eq!(report.equity, 10_000.0);
    }

    #[test]
    fn engine_recovers_on_next_cycle() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        pipeline
            .engine_mut()
            .client_mut()
            .inject_failure(Venue::B, rejected(Venue::B));
        feed(&mut pipeline, &batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004));

        let report = feed(&mut pipeline, &batch(ts("2024-01-01T07:58:00"), 0.0001, 0.0004));

        assert_eq!(
            path(&report),
            vec![
                (EngineState::Monitoring, EngineState::OpportunityDetected),
                (EngineState::OpportunityDetected, EngineState::Rebalancing),
                (EngineState::Rebalancing, EngineState::Holding),
            ]
        );
        assert_eq!(pipeline.engine().portfolio().position_count(), 2);
    }

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: std::time::Duration) {}
    }

    #[test]
    fn transient_outage_is_retried_through() {
        let client = RetryingClient::with_sleeper(paper_client(), RetryPolicy::default(), NoSleep);
        let mut pipeline = CarryConfig::default().pipeline(client, 10_000.0);
        let outage = ExecutionError::Unavailable {
            venue: Venue::A,
            reason: "502 bad gateway".into(),
        };
        pipeline
            .engine_mut()
            .client_mut()
            .inner_mut()
            .inject_failure(Venue::A, outage);

        let batch = batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004);
        pipeline
            .engine_mut()
            .client_mut()
            .inner_mut()
            .update_markets(&batch);
        let report = pipeline.on_batch(&batch).unwrap();

        assert_eq!(report.outcome, RebalanceOutcome::Completed);
        assert_eq!(report.state, EngineState::Holding);
    }

    #[test]
    fn persistent_outage_exhausts_retries() {
        let client = RetryingClient::with_sleeper(paper_client(), RetryPolicy::default(), NoSleep);
        let mut pipeline = CarryConfig::default().pipeline(client, 10_000.0);
        for _ in 0..3 {
            pipeline
                .engine_mut()
                .client_mut()
                .inner_mut()
                .inject_failure(
                    Venue::A,
                    ExecutionError::Unavailable {
                        venue: Venue::A,
                        reason: "timeout".into(),
                    },
                );
        }

        let batch = batch(ts("2024-01-01T07:57:00"), 0.0001, 0.0004);
        pipeline
            .engine_mut()
            .client_mut()
            .inner_mut()
            .update_markets(&batch);
        let report = pipeline.on_batch(&batch).unwrap();

        match report.outcome {
            RebalanceOutcome::Failed { error, .. } => assert!(matches!(
                error,
                ExecutionError::RetriesExhausted { attempts: 3, .. }
            )),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(pipeline.engine().portfolio().is_flat());
    }
}

mod full_runs {
    use super::*;

    fn simulator(steps: usize, seed: u64) -> SimulatorConfig {
        SimulatorConfig {
            steps,
            seed,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn same_seed_same_equity_curve() {
        let run = || {
            BacktestHarness::new(
                simulator(1000, 11),
                CarryConfig::default(),
                BacktestConfig::default(),
            )
            .unwrap()
            .run()
            .unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.equity_curve, second.equity_curve);
        assert_eq!(first.sharpe_ratio.to_bits(), second.sharpe_ratio.to_bits());
    }

    #[test]
    fn different_seeds_different_markets() {
        let a = MarketSimulator::new(simulator(50, 1)).generate();
        let b = MarketSimulator::new(simulator(50, 2)).generate();
        assert_ne!(a, b);
    }

    #[test]
    fn rebalancing_never_reenters_itself() {
        let mut pipeline = paper_pipeline(&CarryConfig::default());
        for pair in MarketSimulator::new(simulator(2016, 3)).feed() {
            feed(&mut pipeline, &[pair.a, pair.b]);
        }
        let history = pipeline.engine().history();
        assert!(!history.is_empty());
        for t in history {
            if t.from == EngineState::Rebalancing {
                assert!(
                    matches!(t.to, EngineState::Holding | EngineState::Monitoring),
                    "unexpected exit from rebalancing: {t:?}"
                );
            }
        }
        for pair in history.windows(2) {
            assert_eq!(pair[0].to, pair[1].from);
        }
    }

    #[test]
    fn week_of_funding_settles_every_interval() {
        let result = BacktestHarness::new(
            simulator(2016, 7),
            CarryConfig::default(),
            BacktestConfig::default(),
        )
        .unwrap()
        .run()
        .unwrap();
        assert_eq!(result.steps, 2016);
        assert_eq!(result.equity_curve.len(), 2016);
        assert!(result.rebalances >= 1);
        // 7 days of 8-hour settlements, held portfolio only
        assert!(result.funding_events <= 21);
        assert!(result.max_drawdown >= 0.0 && result.max_drawdown < 1.0);
    }
}
