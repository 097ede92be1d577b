use crate::{
    analyzer::{daily::DailyMetrics, PerformanceSummary},
    error::EngineError,
    executor::BacktestReport,
    optimizer::OptimizationResult,
    position::Transaction,
    Timed,
};
use csv::Writer;
use std::{
    io::Write as _,
    path::{Path, PathBuf},
};
use tracing::info;

/// Which report files a run writes, each gated by its configured path.
#[derive(Debug, Clone, Default)]
pub struct ReportConfig {
    pub summary: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
    pub daily: Option<PathBuf>,
    pub trades: Option<PathBuf>,
    pub positions: Option<PathBuf>,
    pub returns: Option<PathBuf>,
    pub equities: Option<PathBuf>,
    pub optimization: Option<PathBuf>,
}

impl ReportConfig {
    pub fn any_enabled(&self) -> bool {
        self.summary.is_some()
            || self.summary_json.is_some()
            || self.daily.is_some()
            || self.trades.is_some()
            || self.positions.is_some()
            || self.returns.is_some()
            || self.equities.is_some()
            || self.optimization.is_some()
    }
}

/// Write every enabled report for one finished backtest.
pub fn write_reports(report: &BacktestReport, config: &ReportConfig) -> Result<(), EngineError> {
    if let Some(path) = &config.summary {
        write_summary(path, &report.summary)?;
    }
    if let Some(path) = &config.summary_json {
        write_summary_json(path, &report.summary)?;
    }
    if let Some(path) = &config.daily {
        write_daily_csv(path, &report.daily)?;
    }
    if let Some(path) = &config.trades {
        write_trades_csv(path, &report.transactions)?;
    }
    if let Some(path) = &config.positions {
        write_positions_csv(path, &report.transactions)?;
    }
    if let Some(path) = &config.returns {
        write_timed_csv(path, "return", &report.returns)?;
    }
    if let Some(path) = &config.equities {
        write_timed_csv(path, "equity", &report.equities)?;
    }
    Ok(())
}

fn create_parents(path: &Path) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Human-readable key metrics block.
pub fn write_summary(path: &Path, summary: &PerformanceSummary) -> Result<(), EngineError> {
    create_parents(path)?;
    let mut file = std::fs::File::create(path)?;

    writeln!(file, "================ Performance Summary ================")?;
    writeln!(file, "Initial Capital:            {:>16.2}", summary.initial_capital)?;
    writeln!(file, "Final Portfolio Value:      {:>16.2}", summary.final_portfolio_value)?;
    writeln!(file, "Trading Period (days):      {:>16.1}", summary.trading_period_days)?;
    writeln!(file, "Cumulative Return:          {:>15.2}%", summary.cum_return * 100.0)?;
    writeln!(file, "Annual Return:              {:>15.2}%", summary.annual_return * 100.0)?;
    writeln!(file, "Monthly Return:             {:>15.2}%", summary.monthly_return * 100.0)?;
    writeln!(file, "Total Net Profit:           {:>16.2}", summary.total_net_profit)?;
    writeln!(file, "Gross Profit:               {:>16.2}", summary.gross_profit)?;
    writeln!(file, "Gross Loss:                 {:>16.2}", summary.gross_loss)?;
    writeln!(file, "Commission Paid:            {:>16.2}", summary.commission_paid)?;
    writeln!(file, "Slippage Paid:              {:>16.2}", summary.slippage_paid)?;
    writeln!(file, "Max. Drawdown:              {:>16.2}", summary.max_drawdown)?;
    writeln!(file, "Max. Drawdown (%):          {:>15.2}%", summary.max_drawdown_pct * 100.0)?;
    writeln!(file, "Longest DD Duration (days): {:>16.1}", summary.longest_dd_duration_days)?;
    writeln!(file, "Return on Max. Drawdown:    {:>16.2}", summary.ret_on_max_dd)?;
    writeln!(file, "Account Size Required:      {:>16.2}", summary.acct_size_required)?;
    writeln!(file, "Return on Acct Size Req.:   {:>16.2}", summary.ret_on_acct_size_required)?;
    writeln!(file, "Sharpe Ratio:               {:>16.4}", summary.sharpe_ratio)?;
    writeln!(file, "Total Trades:               {:>16}", summary.total_trades)?;
    writeln!(file, "Open Trades:                {:>16}", summary.open_trades)?;
    writeln!(file, "Winning Trades:             {:>16}", summary.winning_trades)?;
    writeln!(file, "Losing Trades:              {:>16}", summary.losing_trades)?;
    writeln!(file, "Percent Profitable:         {:>15.2}%", summary.percent_profitable * 100.0)?;
    writeln!(file, "Avg. Winning Trade:         {:>16.2}", summary.avg_winning_trade)?;
    writeln!(file, "Avg. Losing Trade:          {:>16.2}", summary.avg_losing_trade)?;
    writeln!(file, "Ratio Avg Win / Avg Loss:   {:>16.2}", summary.ratio_avg_win_avg_loss)?;
    writeln!(file, "=====================================================")?;

    info!(file = %path.display(), "summary written");
    Ok(())
}

/// Machine-readable key metrics, for downstream tooling.
pub fn write_summary_json(path: &Path, summary: &PerformanceSummary) -> Result<(), EngineError> {
    create_parents(path)?;
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, summary)
        .map_err(|error| EngineError::Report(error.to_string()))?;
    info!(file = %path.display(), "json summary written");
    Ok(())
}

/// One row per trading day.
pub fn write_daily_csv(path: &Path, rows: &[DailyMetrics]) -> Result<(), EngineError> {
    create_parents(path)?;
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "trading_day",
        "equity",
        "cash",
        "margin",
        "pos_profit",
        "realized_profit",
        "trades",
        "traded_volume",
        "today_position",
        "commissions",
        "slippages",
        "cum_realized_profit",
        "cum_trades",
        "cum_traded_volume",
        "cum_commissions",
        "cum_slippages",
    ])?;

    for row in rows {
        writer.write_record([
            row.trading_day.to_string(),
            format!("{:.2}", row.equity),
            format!("{:.2}", row.cash),
            format!("{:.2}", row.margin),
            format!("{:.2}", row.pos_profit),
            format!("{:.2}", row.realized_profit),
            row.trades.to_string(),
            row.traded_volume.to_string(),
            row.today_position.to_string(),
            format!("{:.2}", row.commissions),
            format!("{:.2}", row.slippages),
            format!("{:.2}", row.cum_realized_profit),
            row.cum_trades.to_string(),
            row.cum_traded_volume.to_string(),
            format!("{:.2}", row.cum_commissions),
            format!("{:.2}", row.cum_slippages),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// One entry row and one exit row per round trip.
pub fn write_trades_csv(path: &Path, transactions: &[Transaction]) -> Result<(), EngineError> {
    create_parents(path)?;
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["datetime", "instrument", "action", "shares", "price", "signal"])?;

    for transaction in transactions {
        writer.write_record([
            transaction.entry_datetime.to_rfc3339(),
            transaction.instrument.to_string(),
            transaction.entry_type.as_str().to_string(),
            transaction.shares.to_string(),
            format!("{:.4}", transaction.entry_price),
            transaction
                .entry_signal
                .as_ref()
                .map(|signal| signal.to_string())
                .unwrap_or_default(),
        ])?;
        writer.write_record([
            transaction.exit_datetime.to_rfc3339(),
            transaction.instrument.to_string(),
            transaction.exit_type.as_str().to_string(),
            transaction.shares.to_string(),
            format!("{:.4}", transaction.exit_price),
            transaction
                .exit_signal
                .as_ref()
                .map(|signal| signal.to_string())
                .unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// One row per closed transaction with excursion and cumulative PnL
/// columns.
pub fn write_positions_csv(path: &Path, transactions: &[Transaction]) -> Result<(), EngineError> {
    create_parents(path)?;
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "instrument",
        "direction",
        "shares",
        "entry_datetime",
        "entry_price",
        "entry_type",
        "exit_datetime",
        "exit_price",
        "exit_type",
        "entry_signal",
        "exit_signal",
        "realized_pnl",
        "cum_pnl",
        "run_up",
        "drawdown",
        "commissions",
        "slippages",
        "duration_bars",
    ])?;

    let mut cum_pnl = 0.0;
    for transaction in transactions {
        cum_pnl += transaction.realized_pnl;
        writer.write_record([
            transaction.instrument.to_string(),
            format!("{:?}", transaction.direction),
            transaction.shares.to_string(),
            transaction.entry_datetime.to_rfc3339(),
            format!("{:.4}", transaction.entry_price),
            transaction.entry_type.as_str().to_string(),
            transaction.exit_datetime.to_rfc3339(),
            format!("{:.4}", transaction.exit_price),
            transaction.exit_type.as_str().to_string(),
            transaction
                .entry_signal
                .as_ref()
                .map(|signal| signal.to_string())
                .unwrap_or_default(),
            transaction
                .exit_signal
                .as_ref()
                .map(|signal| signal.to_string())
                .unwrap_or_default(),
            format!("{:.2}", transaction.realized_pnl),
            format!("{:.2}", cum_pnl),
            format!("{:.2}", transaction.run_up),
            format!("{:.2}", transaction.drawdown),
            format!("{:.2}", transaction.commissions),
            format!("{:.2}", transaction.slippages),
            transaction.duration.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn write_timed_csv(path: &Path, header: &str, series: &[Timed<f64>]) -> Result<(), EngineError> {
    create_parents(path)?;
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["datetime", header])?;
    for timed in series {
        writer.write_record([timed.time.to_rfc3339(), format!("{:.6}", timed.value)])?;
    }
    writer.flush()?;
    Ok(())
}

/// One row per evaluated parameter tuple with its scalar metrics.
pub fn write_optimization_csv(
    path: &Path,
    result: &OptimizationResult,
) -> Result<(), EngineError> {
    create_parents(path)?;
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "position",
        "parameters",
        "cum_return",
        "net_profit",
        "sharpe_ratio",
        "max_drawdown",
        "ret_on_max_dd",
        "score",
    ])?;

    for outcome in &result.outcomes {
        let parameters = outcome
            .params
            .iter()
            .flat_map(|tuple| tuple.iter())
            .map(|param| format!("{}={}", param.name, param.value))
            .collect::<Vec<_>>()
            .join(" ");

        writer.write_record([
            outcome.position.to_string(),
            parameters,
            format!("{:.6}", outcome.metrics.cum_returns),
            format!("{:.2}", outcome.metrics.total_net_profits),
            format!("{:.4}", outcome.metrics.sharpe_ratio),
            format!("{:.2}", outcome.metrics.max_drawdown),
            format!("{:.4}", outcome.metrics.ret_on_max_dd),
            format!("{:.6}", outcome.score),
        ])?;
    }

    writer.flush()?;
    info!(file = %path.display(), rows = result.outcomes.len(), "optimization report written");
    Ok(())
}
