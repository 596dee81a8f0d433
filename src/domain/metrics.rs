//! Performance statistics over an equity curve and funding history.

use super::portfolio::{EquityPoint, Portfolio};
use super::position::FundingPayment;

pub const MINUTES_PER_YEAR: f64 = 525_600.0;

/// Step returns per year for a fixed step length.
pub fn periods_per_year(step_minutes: u32) -> f64 {
    if step_minutes == 0 {
        0.0
    } else {
        MINUTES_PER_YEAR / step_minutes as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of steps below the running peak.
    pub max_drawdown_duration: usize,
    pub funding_events: usize,
    pub avg_funding_carry: f64,
    pub total_funding: f64,
    pub fees_paid: f64,
}

impl Metrics {
    pub fn compute(portfolio: &Portfolio, periods_per_year: f64) -> Self {
        let equity_curve = &portfolio.equity_curve;
        let initial_capital = portfolio.initial_capital;

        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve);
        let returns = step_returns(equity_curve);
        let events = funding_events(&portfolio.funding_payments);

        Metrics {
            total_return,
            sharpe_ratio: sharpe_ratio(&returns, periods_per_year),
            sortino_ratio: sortino_ratio(&returns, periods_per_year),
            max_drawdown,
            max_drawdown_duration,
            funding_events: events.len(),
            avg_funding_carry: mean(&events),
            total_funding: portfolio.total_funding(),
            fees_paid: portfolio.fees_paid,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Simple returns between consecutive equity points.
pub fn step_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev > 0.0 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

/// Annualized Sharpe with population standard deviation and zero risk-free
/// rate. 0 when there are no returns or no dispersion.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = mean(returns);
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev > 0.0 {
        mean / stddev * periods_per_year.sqrt()
    } else {
        0.0
    }
}

pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let downside = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / n;
    let downside_stddev = downside.sqrt();
    if downside_stddev > 0.0 {
        mean(returns) / downside_stddev * periods_per_year.sqrt()
    } else {
        0.0
    }
}

/// Largest peak-to-trough decline as a fraction of the peak.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    compute_drawdown(equity_curve).0
}

fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, usize) {
    let Some(first) = equity_curve.first() else {
        return (0.0, 0);
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    let mut max_duration = 0usize;
    let mut duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
            duration += 1;
            max_duration = max_duration.max(duration);
        }
    }

    (max_dd, max_duration)
}

/// Net funding per settlement timestamp, in settlement order.
pub fn funding_events(payments: &[FundingPayment]) -> Vec<f64> {
    let mut events: Vec<(chrono::NaiveDateTime, f64)> = Vec::new();
    for payment in payments {
        match events.last_mut() {
            Some((at, total)) if *at == payment.settled_at => *total += payment.amount,
            _ => events.push((payment.settled_at, payment.amount)),
        }
    }
    events.into_iter().map(|(_, total)| total).collect()
}

/// Mean net funding per settlement event; 0 without events.
pub fn average_carry(payments: &[FundingPayment]) -> f64 {
    mean(&funding_events(payments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{parse_timestamp, Venue};
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDateTime};

    fn start() -> NaiveDateTime {
        parse_timestamp("2024-01-01T00:00:00").unwrap()
    }

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: start() + Duration::minutes(5 * i as i64),
                equity,
            })
            .collect()
    }

    fn payment(hour: i64, venue: Venue, amount: f64) -> FundingPayment {
        FundingPayment {
            venue,
            asset: "ETH".into(),
            settled_at: start() + Duration::hours(hour),
            rate: 0.0001,
            amount,
        }
    }

    #[test]
    fn periods_per_year_for_five_minute_steps() {
        assert_relative_eq!(periods_per_year(5), 105_120.0);
        assert_eq!(periods_per_year(0), 0.0);
    }

    #[test]
    fn step_returns_simple() {
        let r = step_returns(&curve(&[100.0, 110.0, 99.0]));
        assert_relative_eq!(r[0], 0.1);
        assert_relative_eq!(r[1], -0.1, epsilon = 1e-12);
    }

    #[test]
    fn sharpe_closed_form() {
        // mean 0.01, population stdev 0.01
        let returns = [0.0, 0.02];
        assert_relative_eq!(sharpe_ratio(&returns, 4.0), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn sharpe_zero_without_dispersion_or_data() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 252.0), 0.0);
        assert_eq!(sharpe_ratio(&[], 252.0), 0.0);
        assert_eq!(sharpe_ratio(&step_returns(&curve(&[100.0])), 252.0), 0.0);
    }

    #[test]
    fn drawdown_closed_form() {
        let c = curve(&[100.0, 120.0, 90.0, 110.0, 60.0, 130.0]);
        assert_relative_eq!(max_drawdown(&c), 0.5);
        assert_eq!(compute_drawdown(&c).1, 3);
    }

    #[test]
    fn drawdown_zero_for_rising_curve() {
        assert_eq!(max_drawdown(&curve(&[1.0, 2.0, 3.0])), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn sortino_only_penalizes_losses() {
        assert_eq!(sortino_ratio(&[0.01, 0.02], 252.0), 0.0);
        assert!(sortino_ratio(&[0.02, -0.01], 252.0) > 0.0);
    }

    #[test]
    fn funding_events_group_by_settlement() {
        let payments = vec![
            payment(8, Venue::A, -0.4),
            payment(8, Venue::B, 1.6),
            payment(16, Venue::A, -0.2),
            payment(16, Venue::B, 1.0),
        ];
        let events = funding_events(&payments);
        assert_eq!(events.len(), 2);
        assert_relative_eq!(events[0], 1.2, epsilon = 1e-12);
        assert_relative_eq!(average_carry(&payments), 1.0, epsilon = 1e-12);
        assert_eq!(average_carry(&[]), 0.0);
    }

    #[test]
    fn compute_from_portfolio() {
        let mut portfolio = Portfolio::new(100.0);
        for point in curve(&[100.0, 110.0, 105.0]) {
            portfolio.record_equity(point.timestamp, point.equity);
        }
        portfolio.apply_funding(payment(8, Venue::B, 2.0));
        let m = Metrics::compute(&portfolio, 252.0);
        assert_relative_eq!(m.total_return, 0.05);
        assert_relative_eq!(m.max_drawdown, 5.0 / 110.0);
        assert_eq!(m.funding_events, 1);
        assert_relative_eq!(m.avg_funding_carry, 2.0);
        assert_relative_eq!(m.total_funding, 2.0);
    }
}
