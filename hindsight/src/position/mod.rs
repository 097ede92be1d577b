use crate::{
    broker::order::{Order, OrderEvent},
    position::stops::{check_stop_condition, CalcMethod, ExitRequest, ProfitLevel, StopCondition, StopKind},
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use hindsight_data::{bar::Bar, contract::Contract};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::warn;

/// Stop-loss / take-profit / trailing-stop conditions over position lots.
pub mod stops;

/// Position direction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }
}

/// Entry/exit classification tags carried by sub-positions and
/// transactions.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub enum SignalType {
    #[default]
    Unknown,
    EntryLong,
    IncreaseLong,
    ReduceLong,
    ExitLong,
    EntryShort,
    IncreaseShort,
    ReduceShort,
    ExitShort,
    StopLoss,
    TakeProfit,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Unknown => "Unknown",
            SignalType::EntryLong => "EntryLong",
            SignalType::IncreaseLong => "IncreaseLong",
            SignalType::ReduceLong => "ReduceLong",
            SignalType::ExitLong => "ExitLong",
            SignalType::EntryShort => "EntryShort",
            SignalType::IncreaseShort => "IncreaseShort",
            SignalType::ReduceShort => "ReduceShort",
            SignalType::ExitShort => "ExitShort",
            SignalType::StopLoss => "StopLoss",
            SignalType::TakeProfit => "TakeProfit",
        }
    }
}

/// How a fill changed the position, reported to the strategy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PositionEvent {
    Opened,
    Changed,
    Closed,
}

/// One row of the position ledger: an atomic unit of exposure created by
/// one opening fill and closed as one unit.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubPosition {
    pub id: u64,
    pub entry_order_id: u64,
    pub entry_datetime: DateTime<Utc>,
    pub entry_trigger_price: f64,
    pub entry_price: f64,
    /// Signed open shares; positive long, negative short. Drained toward
    /// zero by exits.
    pub shares: i64,
    pub initial_shares: i64,
    pub commissions: f64,
    pub slippages: f64,
    pub exit_order_id: Option<u64>,
    pub exit_datetime: Option<DateTime<Utc>>,
    pub exit_price: f64,
    pub realized_pnl: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    /// Lifetime in bar counts.
    pub duration: u64,
    pub entry_type: SignalType,
    pub exit_type: SignalType,
    /// Free-text tag carried by the opening order.
    pub entry_signal: Option<SmolStr>,
}

/// Immutable record of one closed unit of exposure.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    pub instrument: SmolStr,
    pub sub_pos_id: u64,
    pub direction: Direction,
    pub shares: i64,
    pub entry_datetime: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_datetime: DateTime<Utc>,
    pub exit_price: f64,
    pub commissions: f64,
    pub slippages: f64,
    pub realized_pnl: f64,
    pub entry_type: SignalType,
    pub exit_type: SignalType,
    /// Free-text tag carried by the opening order.
    pub entry_signal: Option<SmolStr>,
    /// Free-text tag carried by the closing order.
    pub exit_signal: Option<SmolStr>,
    pub duration: u64,
    /// Best favourable excursion of the lot, in currency.
    pub run_up: f64,
    /// Worst adverse excursion of the lot, in currency.
    pub drawdown: f64,
}

/// Lightweight snapshot handed to strategy hooks; strategies act on
/// positions through the context using these identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionHandle {
    pub id: u64,
    pub instrument: SmolStr,
    pub direction: Direction,
    pub shares: i64,
    pub avg_fill_price: f64,
    pub last_sub_pos_id: u64,
}

/// Aggregation of all sub-positions for one (instrument, side) pair within
/// one runtime.
///
/// Invariants: when `total_shares == 0` every stop condition is inactive;
/// the average fill price tracks remaining open lots only; a sub-position
/// has at most one active exit order at a time.
#[derive(Debug)]
pub struct Position {
    pub id: u64,
    instrument: SmolStr,
    direction: Direction,
    contract: Contract,
    total_shares: i64,
    avg_fill_price: f64,
    realized_pnl: f64,
    commissions: f64,
    slippages: f64,
    entry_datetime: Option<DateTime<Utc>>,
    exit_datetime: Option<DateTime<Utc>>,
    duration: u64,
    hist_highest: f64,
    hist_lowest: f64,
    last_bar: Option<Bar>,
    next_sub_pos_id: u64,
    sub_positions: Vec<SubPosition>,
    stop_conditions: Vec<StopCondition>,
    /// Exit order id -> (targeted sub-position id, classification).
    exit_orders: FnvHashMap<u64, (u64, SignalType)>,
}

impl Position {
    pub fn new(id: u64, instrument: SmolStr, direction: Direction, contract: Contract) -> Self {
        Self {
            id,
            instrument,
            direction,
            contract,
            total_shares: 0,
            avg_fill_price: 0.0,
            realized_pnl: 0.0,
            commissions: 0.0,
            slippages: 0.0,
            entry_datetime: None,
            exit_datetime: None,
            duration: 0,
            hist_highest: f64::MIN,
            hist_lowest: f64::MAX,
            last_bar: None,
            next_sub_pos_id: 0,
            sub_positions: Vec::new(),
            stop_conditions: Vec::new(),
            exit_orders: FnvHashMap::default(),
        }
    }

    pub fn instrument(&self) -> &SmolStr {
        &self.instrument
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn total_shares(&self) -> i64 {
        self.total_shares
    }

    pub fn avg_fill_price(&self) -> f64 {
        self.avg_fill_price
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn commissions(&self) -> f64 {
        self.commissions
    }

    pub fn slippages(&self) -> f64 {
        self.slippages
    }

    pub fn entry_datetime(&self) -> Option<DateTime<Utc>> {
        self.entry_datetime
    }

    pub fn exit_datetime(&self) -> Option<DateTime<Utc>> {
        self.exit_datetime
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn is_open(&self) -> bool {
        self.total_shares != 0
    }

    pub fn sub_positions(&self) -> &[SubPosition] {
        &self.sub_positions
    }

    pub fn open_sub_positions(&self) -> impl Iterator<Item = &SubPosition> {
        self.sub_positions.iter().filter(|sub| sub.shares != 0)
    }

    pub fn stop_conditions(&self) -> &[StopCondition] {
        &self.stop_conditions
    }

    pub fn handle(&self) -> PositionHandle {
        PositionHandle {
            id: self.id,
            instrument: self.instrument.clone(),
            direction: self.direction,
            shares: self.total_shares,
            avg_fill_price: self.avg_fill_price,
            last_sub_pos_id: self.next_sub_pos_id,
        }
    }

    /// Unrealized PnL of the open lots at `price`, in currency.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        let multiplier = self.contract.multiplier;
        self.open_sub_positions()
            .map(|sub| {
                let point = if sub.shares > 0 {
                    price - sub.entry_price
                } else {
                    sub.entry_price - price
                };
                point * sub.shares.abs() as f64 * multiplier
            })
            .sum()
    }

    /// Whether an exit order is already pending against `sub_pos_id`
    /// (0 checks the aggregate).
    pub fn exit_active(&self, sub_pos_id: u64) -> bool {
        self.exit_orders
            .values()
            .any(|(target, _)| *target == sub_pos_id || *target == 0 || sub_pos_id == 0)
    }

    /// Record that `order_id` is an exit targeting `sub_pos_id`.
    pub fn register_exit_order(&mut self, order_id: u64, sub_pos_id: u64, signal: SignalType) {
        if let Some(sub) = self
            .sub_positions
            .iter_mut()
            .find(|sub| sub.id == sub_pos_id)
        {
            sub.exit_order_id = Some(order_id);
        }
        self.exit_orders.insert(order_id, (sub_pos_id, signal));
    }

    /// Forget a failed exit order so the lot can be targeted again.
    pub fn release_exit_order(&mut self, order_id: u64) {
        if let Some((sub_pos_id, _)) = self.exit_orders.remove(&order_id) {
            if let Some(sub) = self
                .sub_positions
                .iter_mut()
                .find(|sub| sub.id == sub_pos_id)
            {
                sub.exit_order_id = None;
            }
        }
    }

    /// Apply an opening fill, creating one lot per execution.
    pub fn on_entry_fill(&mut self, event: &OrderEvent) -> PositionEvent {
        let Some(execution) = event.execution else {
            return PositionEvent::Changed;
        };
        let order = &event.order;

        let was_flat = self.total_shares == 0;
        let entry_type = match (self.direction, was_flat) {
            (Direction::Long, true) => SignalType::EntryLong,
            (Direction::Long, false) => SignalType::IncreaseLong,
            (Direction::Short, true) => SignalType::EntryShort,
            (Direction::Short, false) => SignalType::IncreaseShort,
        };

        self.next_sub_pos_id += 1;
        let shares = execution.quantity * self.direction.sign();
        self.sub_positions.push(SubPosition {
            id: self.next_sub_pos_id,
            entry_order_id: order.id,
            entry_datetime: execution.datetime,
            entry_trigger_price: order
                .stop_price
                .or(order.limit_price)
                .unwrap_or(execution.price),
            entry_price: execution.price,
            shares,
            initial_shares: shares,
            commissions: execution.commission,
            slippages: execution.slippage,
            exit_order_id: None,
            exit_datetime: None,
            exit_price: 0.0,
            realized_pnl: 0.0,
            highest_price: execution.price,
            lowest_price: execution.price,
            duration: 0,
            entry_type,
            exit_type: SignalType::Unknown,
            entry_signal: order.signal.clone(),
        });

        self.total_shares += shares;
        self.commissions += execution.commission;
        self.slippages += execution.slippage;
        if was_flat {
            self.entry_datetime = Some(execution.datetime);
            self.exit_datetime = None;
            self.duration = 0;
        }
        self.refresh_avg_fill_price();

        if was_flat {
            PositionEvent::Opened
        } else {
            PositionEvent::Changed
        }
    }

    /// Apply a closing fill: drain the targeted lot (or lots FIFO), record
    /// realized PnL, and produce a [`Transaction`] per emptied lot.
    pub fn on_exit_fill(&mut self, event: &OrderEvent) -> (PositionEvent, Vec<Transaction>) {
        let Some(execution) = event.execution else {
            return (PositionEvent::Changed, Vec::new());
        };
        let order = &event.order;

        let (target, signal) = self
            .exit_orders
            .remove(&order.id)
            .unwrap_or((0, SignalType::Unknown));

        let mut transactions = Vec::new();
        let mut remaining = execution.quantity;
        let total_quantity = execution.quantity.max(1);
        let multiplier = self.contract.multiplier;
        let sign = self.direction.sign();

        for index in 0..self.sub_positions.len() {
            if remaining == 0 {
                break;
            }
            let sub = &mut self.sub_positions[index];
            if sub.shares == 0 {
                continue;
            }
            if target != 0 && sub.id != target {
                continue;
            }

            let take = sub.shares.abs().min(remaining);
            let pnl = (execution.price - sub.entry_price) * take as f64 * multiplier * sign as f64;

            // Split the execution's fees across the lots it touches.
            let share = take as f64 / total_quantity as f64;
            let fee_commission = execution.commission * share;
            let fee_slippage = execution.slippage * share;

            sub.shares -= take * sign;
            sub.commissions += fee_commission;
            sub.slippages += fee_slippage;
            sub.realized_pnl += pnl - fee_commission - fee_slippage;
            sub.exit_price = execution.price;
            sub.exit_datetime = Some(execution.datetime);
            sub.exit_order_id = Some(order.id);

            let fully_closed = sub.shares == 0;
            sub.exit_type = match signal {
                SignalType::StopLoss | SignalType::TakeProfit => signal,
                _ => match (self.direction, fully_closed) {
                    (Direction::Long, true) => SignalType::ExitLong,
                    (Direction::Long, false) => SignalType::ReduceLong,
                    (Direction::Short, true) => SignalType::ExitShort,
                    (Direction::Short, false) => SignalType::ReduceShort,
                },
            };

            self.realized_pnl += pnl - fee_commission - fee_slippage;
            self.commissions += fee_commission;
            self.slippages += fee_slippage;
            remaining -= take;

            if fully_closed {
                let (run_up, drawdown) = excursions(sub, multiplier);
                transactions.push(Transaction {
                    instrument: self.instrument.clone(),
                    sub_pos_id: sub.id,
                    direction: self.direction,
                    shares: sub.initial_shares.abs(),
                    entry_datetime: sub.entry_datetime,
                    entry_price: sub.entry_price,
                    exit_datetime: execution.datetime,
                    exit_price: execution.price,
                    commissions: sub.commissions,
                    slippages: sub.slippages,
                    realized_pnl: sub.realized_pnl,
                    entry_type: sub.entry_type,
                    exit_type: sub.exit_type,
                    entry_signal: sub.entry_signal.clone(),
                    exit_signal: order.signal.clone(),
                    duration: sub.duration,
                    run_up,
                    drawdown,
                });
            }
        }

        if remaining > 0 {
            warn!(
                position = self.id,
                instrument = %self.instrument,
                order = order.id,
                remaining,
                "exit fill larger than open lots"
            );
        }

        self.total_shares = self.sub_positions.iter().map(|sub| sub.shares).sum();
        self.refresh_avg_fill_price();

        let event_kind = if self.total_shares == 0 {
            self.exit_datetime = Some(execution.datetime);
            self.deactivate_stop_conditions();
            PositionEvent::Closed
        } else {
            PositionEvent::Changed
        };

        (event_kind, transactions)
    }

    fn refresh_avg_fill_price(&mut self) {
        let mut value = 0.0;
        let mut shares = 0i64;
        for sub in self.sub_positions.iter().filter(|sub| sub.shares != 0) {
            value += sub.entry_price * sub.shares.abs() as f64;
            shares += sub.shares.abs();
        }
        self.avg_fill_price = if shares != 0 {
            value / shares as f64
        } else {
            0.0
        };
    }

    fn deactivate_stop_conditions(&mut self) {
        for condition in &mut self.stop_conditions {
            condition.active = false;
        }
    }

    /// Per-bar bookkeeping: track extremes and lot durations, then evaluate
    /// every stop condition. Conditions whose target already has a pending
    /// exit order are skipped (one active exit per lot).
    pub fn on_bar(&mut self, bar: &Bar) -> Vec<ExitRequest> {
        if bar.instrument != self.instrument {
            return Vec::new();
        }

        self.duration += 1;
        self.hist_highest = self.hist_highest.max(bar.high);
        self.hist_lowest = self.hist_lowest.min(bar.low);

        for sub in &mut self.sub_positions {
            if sub.shares != 0 {
                sub.highest_price = sub.highest_price.max(bar.high);
                sub.lowest_price = sub.lowest_price.min(bar.low);
                sub.duration += 1;
            }
        }

        let mut requests = Vec::new();
        let last_bar = self.last_bar.clone();
        for condition in &mut self.stop_conditions {
            // Refresh the live share count the condition protects.
            let open_shares = if condition.sub_pos_id == 0 {
                self.total_shares
            } else {
                self.sub_positions
                    .iter()
                    .find(|sub| sub.id == condition.sub_pos_id)
                    .map(|sub| sub.shares)
                    .unwrap_or(0)
            };
            condition.shares = open_shares;

            if let Some(request) =
                check_stop_condition(condition, bar, last_bar.as_ref(), &self.contract)
            {
                requests.push(request);
            }
        }
        self.last_bar = Some(bar.clone());

        // Drop requests whose target already has a pending exit order.
        requests.retain(|request| {
            if self.exit_active(request.sub_pos_id) {
                warn!(
                    position = self.id,
                    sub_pos = request.sub_pos_id,
                    "exit order already active, dropping stop request"
                );
                false
            } else {
                true
            }
        });
        requests
    }

    /// Build a request closing `sub_pos_id` (0 = the whole position) at
    /// market.
    pub fn close_request(&self, sub_pos_id: u64, immediately: bool) -> Option<ExitRequest> {
        if self.exit_active(sub_pos_id) {
            warn!(
                position = self.id,
                sub_pos = sub_pos_id,
                "exit order already active, dropping close request"
            );
            return None;
        }

        let shares = if sub_pos_id == 0 {
            self.total_shares
        } else {
            self.sub_positions
                .iter()
                .find(|sub| sub.id == sub_pos_id)
                .map(|sub| sub.shares)
                .unwrap_or(0)
        };
        if shares == 0 {
            return None;
        }

        Some(ExitRequest {
            sub_pos_id,
            shares,
            stop_price: None,
            limit_price: None,
            immediately,
            take_profit: false,
        })
    }

    /// Attach a fixed-amount stop loss.
    pub fn set_stop_loss_amount(&mut self, amount: f64, sub_pos_id: u64, immediately: bool) {
        self.push_condition(
            StopKind::StopLoss {
                amount,
                calc: CalcMethod::Fixed,
            },
            sub_pos_id,
            immediately,
        );
    }

    /// Attach a percent-of-entry stop loss.
    pub fn set_stop_loss_pct(&mut self, pct: f64, sub_pos_id: u64, immediately: bool) {
        self.push_condition(
            StopKind::StopLoss {
                amount: pct,
                calc: CalcMethod::Percentage,
            },
            sub_pos_id,
            immediately,
        );
    }

    /// Attach a single-threshold profit target.
    pub fn set_stop_profit_pct(&mut self, returns: f64, sub_pos_id: u64, immediately: bool) {
        self.push_condition(StopKind::ProfitTarget { returns }, sub_pos_id, immediately);
    }

    /// Attach a percent trailing stop: arms at `returns`, exits when the
    /// giveback from the extreme exceeds `1 − drawdown`.
    pub fn set_trailing_stop(
        &mut self,
        returns: f64,
        drawdown: f64,
        sub_pos_id: u64,
        immediately: bool,
    ) {
        self.push_condition(
            StopKind::TrailingStop {
                levels: vec![ProfitLevel {
                    returns,
                    drawdown,
                    triggered: false,
                }],
                profit_calc: CalcMethod::Percentage,
                drawdown_calc: CalcMethod::Percentage,
            },
            sub_pos_id,
            immediately,
        );
    }

    /// Attach a trailing stop armed by an absolute currency profit.
    pub fn set_percent_trailing(
        &mut self,
        amount: f64,
        drawdown: f64,
        sub_pos_id: u64,
        immediately: bool,
    ) {
        self.push_condition(
            StopKind::TrailingStop {
                levels: vec![ProfitLevel {
                    returns: amount,
                    drawdown,
                    triggered: false,
                }],
                profit_calc: CalcMethod::Fixed,
                drawdown_calc: CalcMethod::Percentage,
            },
            sub_pos_id,
            immediately,
        );
    }

    fn push_condition(&mut self, kind: StopKind, sub_pos_id: u64, immediately: bool) {
        let (shares, fill_price) = if sub_pos_id == 0 {
            (self.total_shares, self.avg_fill_price)
        } else {
            match self
                .sub_positions
                .iter()
                .find(|sub| sub.id == sub_pos_id)
            {
                Some(sub) => (sub.shares, sub.entry_price),
                None => {
                    warn!(position = self.id, sub_pos = sub_pos_id, "unknown sub-position for stop");
                    return;
                }
            }
        };

        let mut condition = StopCondition::new(kind, shares, sub_pos_id, fill_price);
        condition.immediately = immediately;
        self.stop_conditions.push(condition);
    }

    /// Build the exit order an [`ExitRequest`] describes.
    pub fn build_exit_order(&self, order_id: u64, request: &ExitRequest) -> Order {
        use crate::broker::order::{ExecTiming, OrderAction};

        let action = match self.direction {
            Direction::Long => OrderAction::Sell,
            Direction::Short => OrderAction::BuyToCover,
        };
        let quantity = request.shares.abs();

        let mut order = match (request.stop_price, request.limit_price) {
            (Some(stop), None) => Order::stop(order_id, action, self.instrument.clone(), quantity, stop),
            (None, Some(limit)) => {
                Order::limit(order_id, action, self.instrument.clone(), quantity, limit)
            }
            (Some(stop), Some(limit)) => Order::stop_limit(
                order_id,
                action,
                self.instrument.clone(),
                quantity,
                stop,
                limit,
            ),
            (None, None) => Order::market(order_id, action, self.instrument.clone(), quantity),
        };

        if request.immediately {
            order = order.with_exec_timing(ExecTiming::IntraBar);
        }
        let signal = if request.take_profit {
            SignalType::TakeProfit
        } else if request.stop_price.is_some() {
            SignalType::StopLoss
        } else {
            SignalType::Unknown
        };
        if signal != SignalType::Unknown {
            order = order.with_signal(signal.as_str());
        }
        order
    }

    /// Classification a pending [`ExitRequest`] should register under.
    pub fn exit_signal(request: &ExitRequest) -> SignalType {
        if request.take_profit {
            SignalType::TakeProfit
        } else if request.stop_price.is_some() {
            SignalType::StopLoss
        } else {
            SignalType::Unknown
        }
    }
}

fn excursions(sub: &SubPosition, multiplier: f64) -> (f64, f64) {
    let shares = sub.initial_shares.abs() as f64;
    if sub.initial_shares > 0 {
        (
            (sub.highest_price - sub.entry_price) * shares * multiplier,
            (sub.entry_price - sub.lowest_price) * shares * multiplier,
        )
    } else {
        (
            (sub.entry_price - sub.lowest_price) * shares * multiplier,
            (sub.highest_price - sub.entry_price) * shares * multiplier,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::order::{ExecutionInfo, OrderAction, OrderEventKind};
    use hindsight_data::test_utils::{bar, time_plus_mins};

    fn fill_event(
        order: Order,
        price: f64,
        quantity: i64,
        datetime: DateTime<Utc>,
    ) -> OrderEvent {
        OrderEvent::new(datetime, OrderEventKind::Filled, order).with_execution(ExecutionInfo {
            datetime,
            price,
            quantity,
            commission: 0.0,
            slippage: 0.0,
        })
    }

    fn long_position() -> Position {
        Position::new(1, SmolStr::new("rb"), Direction::Long, Contract::new("rb"))
    }

    #[test]
    fn test_entry_and_increase() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut position = long_position();

        let event = fill_event(Order::market(1, OrderAction::Buy, "rb", 10), 100.0, 10, base);
        assert_eq!(position.on_entry_fill(&event), PositionEvent::Opened);
        assert_eq!(position.total_shares(), 10);
        assert_eq!(position.avg_fill_price(), 100.0);
        assert_eq!(position.sub_positions()[0].entry_type, SignalType::EntryLong);

        let event = fill_event(
            Order::market(2, OrderAction::Buy, "rb", 10),
            110.0,
            10,
            time_plus_mins(base, 1),
        );
        assert_eq!(position.on_entry_fill(&event), PositionEvent::Changed);
        assert_eq!(position.total_shares(), 20);
        assert_eq!(position.avg_fill_price(), 105.0);
        assert_eq!(position.sub_positions()[1].entry_type, SignalType::IncreaseLong);
    }

    #[test]
    fn test_exit_produces_transaction_and_closes() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut position = long_position();

        let entry = fill_event(
            Order::market(1, OrderAction::Buy, "rb", 10).with_signal("breakout"),
            100.0,
            10,
            base,
        );
        position.on_entry_fill(&entry);

        // Track an excursion bar before the exit.
        position.on_bar(&bar("rb", time_plus_mins(base, 1), 100.0, 104.0, 97.0, 103.0, 1));

        let exit = fill_event(
            Order::market(2, OrderAction::Sell, "rb", 10),
            103.0,
            10,
            time_plus_mins(base, 2),
        );
        let (event, transactions) = position.on_exit_fill(&exit);

        assert_eq!(event, PositionEvent::Closed);
        assert_eq!(position.total_shares(), 0);
        assert_eq!(position.avg_fill_price(), 0.0);
        assert_eq!(transactions.len(), 1);

        let transaction = &transactions[0];
        assert_eq!(transaction.shares, 10);
        assert_eq!(transaction.realized_pnl, 30.0);
        assert_eq!(transaction.exit_type, SignalType::ExitLong);
        // The opening order's tag survives into the record even though the
        // exit carried none.
        assert_eq!(transaction.entry_signal.as_deref(), Some("breakout"));
        assert_eq!(transaction.exit_signal, None);
        assert_eq!(transaction.run_up, 40.0); // (104 - 100) * 10
        assert_eq!(transaction.drawdown, 30.0); // (100 - 97) * 10
        assert_eq!(transaction.duration, 1);
    }

    #[test]
    fn test_partial_exit_reduces_fifo() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut position = long_position();

        position.on_entry_fill(&fill_event(
            Order::market(1, OrderAction::Buy, "rb", 6),
            100.0,
            6,
            base,
        ));
        position.on_entry_fill(&fill_event(
            Order::market(2, OrderAction::Buy, "rb", 4),
            110.0,
            4,
            base,
        ));

        let (event, transactions) = position.on_exit_fill(&fill_event(
            Order::market(3, OrderAction::Sell, "rb", 8),
            120.0,
            8,
            time_plus_mins(base, 1),
        ));

        assert_eq!(event, PositionEvent::Changed);
        // First lot fully closed, second reduced to 2.
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].sub_pos_id, 1);
        assert_eq!(transactions[0].realized_pnl, 120.0); // (120-100)*6
        assert_eq!(position.total_shares(), 2);
        assert_eq!(position.avg_fill_price(), 110.0);
        assert_eq!(position.sub_positions()[1].exit_type, SignalType::ReduceLong);
    }

    #[test]
    fn test_stop_conditions_deactivate_on_close() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut position = long_position();

        position.on_entry_fill(&fill_event(
            Order::market(1, OrderAction::Buy, "rb", 10),
            100.0,
            10,
            base,
        ));
        position.set_stop_loss_pct(0.01, 0, true);
        assert!(position.stop_conditions()[0].active);

        position.on_exit_fill(&fill_event(
            Order::market(2, OrderAction::Sell, "rb", 10),
            101.0,
            10,
            time_plus_mins(base, 1),
        ));

        assert!(!position.stop_conditions()[0].active);
        // A closed position generates no further stop requests.
        let requests = position.on_bar(&bar("rb", time_plus_mins(base, 2), 50.0, 50.0, 50.0, 50.0, 1));
        assert!(requests.is_empty());
    }

    #[test]
    fn test_stop_loss_emits_single_request() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut position = long_position();

        position.on_entry_fill(&fill_event(
            Order::market(1, OrderAction::Buy, "rb", 10),
            100.0,
            10,
            base,
        ));
        position.set_stop_loss_pct(0.01, 0, true);

        let requests =
            position.on_bar(&bar("rb", time_plus_mins(base, 1), 100.0, 101.0, 98.0, 99.0, 1));
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].stop_price, Some(99.0));
        assert_eq!(requests[0].shares, 10);

        // Register the exit; the identical next bar must not stack another.
        let order = position.build_exit_order(7, &requests[0]);
        position.register_exit_order(order.id, requests[0].sub_pos_id, SignalType::StopLoss);

        let requests =
            position.on_bar(&bar("rb", time_plus_mins(base, 2), 100.0, 101.0, 98.0, 99.0, 1));
        assert!(requests.is_empty());
    }

    #[test]
    fn test_per_lot_stop_uses_lot_entry_price() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut position = long_position();

        position.on_entry_fill(&fill_event(
            Order::market(1, OrderAction::Buy, "rb", 5),
            100.0,
            5,
            base,
        ));
        position.on_entry_fill(&fill_event(
            Order::market(2, OrderAction::Buy, "rb", 5),
            200.0,
            5,
            base,
        ));

        // Aggregate average is 150, but the per-lot stop anchors at 200.
        position.set_stop_loss_pct(0.01, 2, true);
        assert_eq!(position.stop_conditions()[0].avg_fill_price, 200.0);

        // 198 = 200 * 0.99: triggers the lot-2 stop only.
        let requests =
            position.on_bar(&bar("rb", time_plus_mins(base, 1), 199.0, 200.0, 197.0, 199.0, 1));
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].sub_pos_id, 2);
        assert_eq!(requests[0].shares, 5);
    }
}
