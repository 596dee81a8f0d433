//! CSV report adapter implementing ReportPort.
//!
//! Writes the equity curve (with running drawdown) to `output_path` and a
//! `metric,value` summary next to it as `<stem>_summary.csv`.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::CarryError;
use crate::domain::snapshot::format_timestamp;
use crate::ports::report_port::ReportPort;

#[derive(Serialize)]
struct EquityRow {
    timestamp: String,
    equity: f64,
    drawdown: f64,
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    metric: &'a str,
    value: String,
}

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        CsvReportAdapter
    }

    pub fn summary_path(output_path: &str) -> PathBuf {
        let path = Path::new(output_path);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        path.with_file_name(format!("{stem}_summary.csv"))
    }

    fn write_equity(result: &BacktestResult, path: &Path) -> Result<(), CarryError> {
        let mut wtr = csv::Writer::from_path(path).map_err(report_error)?;
        let mut peak = f64::MIN;
        for point in &result.equity_curve {
            peak = peak.max(point.equity);
            let drawdown = if peak > 0.0 {
                (peak - point.equity) / peak
            } else {
                0.0
            };
            wtr.serialize(EquityRow {
                timestamp: format_timestamp(point.timestamp),
                equity: point.equity,
                drawdown,
            })
            .map_err(report_error)?;
        }
        wtr.flush().map_err(|e| CarryError::Report {
            reason: e.to_string(),
        })
    }

    fn write_summary(result: &BacktestResult, path: &Path) -> Result<(), CarryError> {
        let rows = [
            ("initial_capital", format!("{:.2}", result.initial_capital)),
            ("final_equity", format!("{:.2}", result.final_equity)),
            ("total_return", format!("{:.6}", result.total_return)),
            ("sharpe_ratio", format!("{:.4}", result.sharpe_ratio)),
            ("sortino_ratio", format!("{:.4}", result.sortino_ratio)),
            ("max_drawdown", format!("{:.6}", result.max_drawdown)),
            ("avg_funding_carry", format!("{:.6}", result.avg_funding_carry)),
            ("total_funding", format!("{:.6}", result.total_funding)),
            ("fees_paid", format!("{:.6}", result.fees_paid)),
            ("funding_events", result.funding_events.to_string()),
            ("rebalances", result.rebalances.to_string()),
            ("failed_rebalances", result.failed_rebalances.to_string()),
            ("steps", result.steps.to_string()),
        ];
        let mut wtr = csv::Writer::from_path(path).map_err(report_error)?;
        for (metric, value) in rows {
            wtr.serialize(SummaryRow { metric, value })
                .map_err(report_error)?;
        }
        wtr.flush().map_err(|e| CarryError::Report {
            reason: e.to_string(),
        })
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn report_error(e: csv::Error) -> CarryError {
    CarryError::Report {
        reason: e.to_string(),
    }
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_path: &str) -> Result<(), CarryError> {
        let path = Path::new(output_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CarryError::Report {
                reason: format!("failed to create {}: {}", parent.display(), e),
            })?;
        }
        Self::write_equity(result, path)?;
        let summary = Self::summary_path(output_path);
        Self::write_summary(result, &summary)?;
        info!(path = output_path, summary = %summary.display(), "report written");
        Ok(())
    }
}
