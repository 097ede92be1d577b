use crate::{
    analyzer::{
        daily::{DailyMetrics, DailyMetricsAnalyzer},
        drawdown::DrawdownAnalyzer,
        returns::ReturnsAnalyzer,
        sharpe::SharpeRatio,
        trades::TradesAnalyzer,
    },
    broker::BacktestingBroker,
    position::Transaction,
    Timed,
};
use chrono::{DateTime, Utc};
use hindsight_data::bar::Bar;
use serde::{Deserialize, Serialize};

/// Per-trading-day equity/activity aggregation.
pub mod daily;

/// Peak-to-trough decline tracking.
pub mod drawdown;

/// Per-bar and cumulative return series.
pub mod returns;

/// Risk-adjusted return ratio.
pub mod sharpe;

/// Win/loss statistics over round trips.
pub mod trades;

const AVERAGE_DAYS_PER_YEAR: f64 = 365.2425;
const AVERAGE_DAYS_PER_MONTH: f64 = AVERAGE_DAYS_PER_YEAR / 12.0;

/// The fixed analyzer set attached to every executor's broker.
#[derive(Debug)]
pub struct AnalyzerSuite {
    initial_cash: f64,
    equities: Vec<Timed<f64>>,
    returns: ReturnsAnalyzer,
    drawdown: DrawdownAnalyzer,
    trades: TradesAnalyzer,
    daily: Option<DailyMetricsAnalyzer>,
}

impl AnalyzerSuite {
    pub fn new(initial_cash: f64, daily_metrics: bool) -> Self {
        Self {
            initial_cash,
            equities: Vec::new(),
            returns: ReturnsAnalyzer::new(),
            drawdown: DrawdownAnalyzer::new(),
            trades: TradesAnalyzer::new(),
            daily: daily_metrics.then(DailyMetricsAnalyzer::new),
        }
    }

    /// Observe the broker after it fully processed one bar.
    pub fn on_bar_end(&mut self, broker: &BacktestingBroker, bar: &Bar) {
        let equity = broker.equity();
        self.equities.push(Timed::new(equity, bar.datetime));
        self.returns.on_equity(bar.datetime, equity);
        self.drawdown.on_equity(bar.datetime, equity);
        if let Some(daily) = &mut self.daily {
            daily.on_bar_end(bar.datetime, broker);
        }
    }

    pub fn on_new_trading_day(&mut self, prev: DateTime<Utc>, curr: DateTime<Utc>) {
        if let Some(daily) = &mut self.daily {
            daily.on_new_trading_day(prev, curr);
        }
    }

    pub fn on_transaction(&mut self, transaction: &Transaction) {
        self.trades.on_transaction(transaction);
        if let Some(daily) = &mut self.daily {
            daily.on_transaction(transaction);
        }
    }

    /// Seal in-progress aggregations at end of run.
    pub fn finalize(&mut self) {
        if let Some(daily) = &mut self.daily {
            daily.finalize();
        }
    }

    pub fn equities(&self) -> &[Timed<f64>] {
        &self.equities
    }

    pub fn returns(&self) -> &ReturnsAnalyzer {
        &self.returns
    }

    pub fn trades(&self) -> &TradesAnalyzer {
        &self.trades
    }

    pub fn daily_rows(&self) -> &[DailyMetrics] {
        self.daily.as_ref().map(|daily| daily.rows()).unwrap_or(&[])
    }

    /// Produce the full performance summary for one finished run.
    pub fn summary(&self, broker: &BacktestingBroker) -> PerformanceSummary {
        let final_value = self
            .equities
            .last()
            .map(|timed| timed.value)
            .unwrap_or(self.initial_cash);

        let trading_period_days = match (broker.first_bar_datetime(), broker.last_bar_datetime()) {
            (Some(first), Some(last)) => {
                (last.signed_duration_since(first).num_seconds() as f64 / 86_400.0).max(0.0)
            }
            _ => 0.0,
        };

        let cum_return = self.returns.cumulative_return();
        let (annual_return, monthly_return) = if trading_period_days > 0.0 {
            (
                cum_return * AVERAGE_DAYS_PER_YEAR / trading_period_days,
                cum_return * AVERAGE_DAYS_PER_MONTH / trading_period_days,
            )
        } else {
            (0.0, 0.0)
        };

        let sharpe = SharpeRatio::calculate(
            0.0,
            self.returns.mean_return(),
            self.returns.std_dev_returns(),
        );

        let total_net_profit = final_value - self.initial_cash;
        let max_drawdown = self.drawdown.max_drawdown();
        let ret_on_max_dd = if max_drawdown != 0.0 {
            total_net_profit / max_drawdown
        } else {
            0.0
        };
        let acct_size_required = broker.max_margin_required();
        let ret_on_acct_size_required = if acct_size_required != 0.0 {
            total_net_profit / acct_size_required
        } else {
            0.0
        };

        PerformanceSummary {
            initial_capital: self.initial_cash,
            final_portfolio_value: final_value,
            trading_period_days,
            cum_return,
            annual_return,
            monthly_return,
            total_net_profit,
            gross_profit: self.trades.gross_profit(),
            gross_loss: self.trades.gross_loss(),
            commission_paid: broker.total_commissions(),
            slippage_paid: broker.total_slippages(),
            max_drawdown,
            max_drawdown_pct: self.drawdown.max_drawdown_pct(),
            max_dd_begin: self.drawdown.max_drawdown_begin(),
            max_dd_end: self.drawdown.max_drawdown_end(),
            longest_dd_duration_days: self.drawdown.longest_duration().num_seconds() as f64
                / 86_400.0,
            ret_on_max_dd,
            acct_size_required,
            ret_on_acct_size_required,
            sharpe_ratio: sharpe.value,
            total_trades: self.trades.total(),
            open_trades: broker.open_volume(),
            winning_trades: self.trades.winning(),
            losing_trades: self.trades.losing(),
            percent_profitable: self.trades.percent_profitable(),
            avg_winning_trade: self.trades.avg_winning_trade(),
            avg_losing_trade: self.trades.avg_losing_trade(),
            ratio_avg_win_avg_loss: self.trades.ratio_avg_win_avg_loss(),
            avg_profit: self.trades.avg_profit(),
            max_profit: self.trades.max_profit(),
            min_profit: self.trades.min_profit(),
        }
    }
}

/// Full key-metric set of one finished backtest.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PerformanceSummary {
    pub initial_capital: f64,
    pub final_portfolio_value: f64,
    pub trading_period_days: f64,
    pub cum_return: f64,
    pub annual_return: f64,
    pub monthly_return: f64,
    pub total_net_profit: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub commission_paid: f64,
    pub slippage_paid: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub max_dd_begin: DateTime<Utc>,
    pub max_dd_end: DateTime<Utc>,
    pub longest_dd_duration_days: f64,
    pub ret_on_max_dd: f64,
    pub acct_size_required: f64,
    pub ret_on_acct_size_required: f64,
    pub sharpe_ratio: f64,
    pub total_trades: u64,
    pub open_trades: i64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub percent_profitable: f64,
    pub avg_winning_trade: f64,
    pub avg_losing_trade: f64,
    pub ratio_avg_win_avg_loss: f64,
    pub avg_profit: f64,
    pub max_profit: f64,
    pub min_profit: f64,
}

impl PerformanceSummary {
    /// Compressed metric set used for ranking optimization outcomes.
    pub fn simplified(&self) -> SimplifiedMetrics {
        SimplifiedMetrics {
            cum_returns: self.cum_return,
            total_net_profits: self.total_net_profit,
            sharpe_ratio: self.sharpe_ratio,
            max_drawdown: self.max_drawdown,
            ret_on_max_dd: self.ret_on_max_dd,
        }
    }
}

/// Scalar outcome metrics handed to the optimizer.
#[derive(Debug, Copy, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SimplifiedMetrics {
    pub cum_returns: f64,
    pub total_net_profits: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub ret_on_max_dd: f64,
}
