use crate::{broker::BacktestingBroker, position::Transaction};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One per-trading-day record of portfolio state and activity.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DailyMetrics {
    pub trading_day: NaiveDate,
    pub equity: f64,
    pub cash: f64,
    pub margin: f64,
    pub pos_profit: f64,
    /// PnL realized during this trading day.
    pub realized_profit: f64,
    pub trades: u64,
    pub traded_volume: i64,
    pub today_position: i64,
    pub commissions: f64,
    pub slippages: f64,
    pub cum_realized_profit: f64,
    pub cum_trades: u64,
    pub cum_traded_volume: i64,
    pub cum_commissions: f64,
    pub cum_slippages: f64,
}

/// Broker state captured at the end of one bar. Rows are sealed from the
/// snapshot of the last bar before the day boundary, because the boundary
/// is observed only after the broker has ingested the next day's first bar.
#[derive(Debug, Clone, Copy, Default)]
struct Snapshot {
    equity: f64,
    cash: f64,
    margin: f64,
    pos_profit: f64,
    fills: u64,
    traded_volume: i64,
    commissions: f64,
    slippages: f64,
    open_volume: i64,
    realized: f64,
}

/// Aggregates per-day metrics, sealing one row on each `new-trading-day`
/// broker event.
///
/// The broker's cumulative fill counter is the single authority for trade
/// counts; this analyzer only snapshots and diffs it at day boundaries.
#[derive(Debug, Default)]
pub struct DailyMetricsAnalyzer {
    rows: Vec<DailyMetrics>,
    current_day: Option<NaiveDate>,
    snapshot: Snapshot,
    realized_cum: f64,
    // Cumulative values at the previous sealed row.
    prev: Snapshot,
}

impl DailyMetricsAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[DailyMetrics] {
        &self.rows
    }

    /// Capture broker state after one fully processed bar.
    pub fn on_bar_end(&mut self, bar_datetime: DateTime<Utc>, broker: &BacktestingBroker) {
        if self.current_day.is_none() {
            self.current_day = Some(bar_datetime.date_naive());
        }
        self.snapshot = Snapshot {
            equity: broker.equity(),
            cash: broker.cash(),
            margin: broker.margin(),
            pos_profit: broker.pos_profit(),
            fills: broker.fills(),
            traded_volume: broker.traded_volume(),
            commissions: broker.total_commissions(),
            slippages: broker.total_slippages(),
            open_volume: broker.open_volume(),
            realized: self.realized_cum,
        };
    }

    pub fn on_transaction(&mut self, transaction: &Transaction) {
        self.realized_cum += transaction.realized_pnl;
    }

    /// Seal the row for the day ending at `prev`.
    pub fn on_new_trading_day(&mut self, prev: DateTime<Utc>, curr: DateTime<Utc>) {
        let day = self
            .current_day
            .take()
            .unwrap_or_else(|| prev.date_naive());
        self.seal_row(day);
        self.current_day = Some(curr.date_naive());
    }

    /// Seal the final in-progress row at end of run.
    pub fn finalize(&mut self) {
        if let Some(day) = self.current_day.take() {
            self.seal_row(day);
        }
    }

    fn seal_row(&mut self, day: NaiveDate) {
        let snap = self.snapshot;

        self.rows.push(DailyMetrics {
            trading_day: day,
            equity: snap.equity,
            cash: snap.cash,
            margin: snap.margin,
            pos_profit: snap.pos_profit,
            realized_profit: snap.realized - self.prev.realized,
            trades: snap.fills - self.prev.fills,
            traded_volume: snap.traded_volume - self.prev.traded_volume,
            today_position: snap.open_volume,
            commissions: snap.commissions - self.prev.commissions,
            slippages: snap.slippages - self.prev.slippages,
            cum_realized_profit: snap.realized,
            cum_trades: snap.fills,
            cum_traded_volume: snap.traded_volume,
            cum_commissions: snap.commissions,
            cum_slippages: snap.slippages,
        });

        self.prev = snap;
    }
}
