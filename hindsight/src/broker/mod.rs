use crate::{
    broker::{
        fill::{BarFillStrategy, FillInfo, FillStrategy, TickFillStrategy},
        order::{ExecTiming, ExecutionInfo, Order, OrderEvent, OrderEventKind, OrderState},
    },
    error::EngineError,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use hindsight_data::{
    bar::{Bar, Resolution},
    contract::Contract,
    session::{hhmmss_to_secs, secs_of_day},
};
use smol_str::SmolStr;
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

/// Fill policies applied per bar resolution.
pub mod fill;

/// Orders, their state machine and lifecycle events.
pub mod order;

/// Default trading-day end time (15:15:00), matching the close of the
/// Chinese futures day session.
pub const DEFAULT_TRADING_DAY_END_TIME: u32 = 151_500;

/// Backtesting broker configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct BrokerConfig {
    pub cash: f64,
    pub allow_negative_cash: bool,
    /// Trading-day boundary in HHMMSS form; 0 falls back to calendar-date
    /// changes.
    pub trading_day_end_time: u32,
    pub notify_new_trading_day: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cash: 1_000_000.0,
            allow_negative_cash: false,
            trading_day_end_time: DEFAULT_TRADING_DAY_END_TIME,
            notify_new_trading_day: false,
        }
    }
}

/// One ledger row: an open lot with signed shares at its entry price.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SubPosItem {
    pub shares: i64,
    pub price: f64,
}

/// The broker's mirror of one instrument's position across all runtimes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerPos {
    pub total_shares: i64,
    pub avg_price: f64,
    pub last_price: f64,
    pub lots: VecDeque<SubPosItem>,
}

/// Notifications produced by the broker, drained and routed by the
/// executor after each processing step.
#[derive(Debug, Clone)]
pub enum BrokerNotice {
    Order(OrderEvent),
    NewTradingDay {
        prev: DateTime<Utc>,
        curr: DateTime<Utc>,
    },
}

/// Simulates order matching, sub-position lots and cash/margin/equity
/// accounting against historical bars.
///
/// All order state transitions are triggered by the broker. Fills settle
/// per execution:
/// `notional = price × qty × multiplier`, `margin = notional × margin_ratio`,
/// opening reduces cash by `margin + commission + slippage`, closing pops
/// lots FIFO and returns their margin plus realized PnL to cash.
#[derive(Debug)]
pub struct BacktestingBroker {
    config: BrokerConfig,
    cash: f64,
    available_cash: f64,
    equity: f64,
    pos_profit: f64,
    margin: f64,
    max_margin_required: f64,
    total_commissions: f64,
    total_slippages: f64,
    fills: u64,
    traded_volume: i64,
    closed_volume: i64,
    contracts: FnvHashMap<SmolStr, Contract>,
    default_contract: Contract,
    positions: BTreeMap<SmolStr, BrokerPos>,
    active_orders: BTreeMap<u64, Order>,
    last_bars: FnvHashMap<SmolStr, Bar>,
    first_bar_datetime: Option<DateTime<Utc>>,
    last_bar_datetime: Option<DateTime<Utc>>,
    bar_fill: BarFillStrategy,
    tick_fill: TickFillStrategy,
    notices: VecDeque<BrokerNotice>,
}

impl BacktestingBroker {
    pub fn new(config: BrokerConfig) -> Result<Self, EngineError> {
        if config.cash <= 0.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "broker cash must be greater than 0, got {}",
                config.cash
            )));
        }

        Ok(Self {
            cash: config.cash,
            available_cash: config.cash,
            equity: config.cash,
            pos_profit: 0.0,
            margin: 0.0,
            max_margin_required: 0.0,
            total_commissions: 0.0,
            total_slippages: 0.0,
            fills: 0,
            traded_volume: 0,
            closed_volume: 0,
            contracts: FnvHashMap::default(),
            default_contract: Contract::default(),
            positions: BTreeMap::new(),
            active_orders: BTreeMap::new(),
            last_bars: FnvHashMap::default(),
            first_bar_datetime: None,
            last_bar_datetime: None,
            bar_fill: BarFillStrategy,
            tick_fill: TickFillStrategy,
            notices: VecDeque::new(),
            config,
        })
    }

    pub fn register_contract(&mut self, contract: Contract) {
        if contract.instrument.is_empty() {
            return;
        }
        self.contracts.insert(contract.instrument.clone(), contract);
    }

    pub fn contract(&self, instrument: &str) -> &Contract {
        self.contracts.get(instrument).unwrap_or(&self.default_contract)
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn available_cash(&self) -> f64 {
        self.available_cash
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn max_margin_required(&self) -> f64 {
        self.max_margin_required
    }

    pub fn pos_profit(&self) -> f64 {
        self.pos_profit
    }

    pub fn total_commissions(&self) -> f64 {
        self.total_commissions
    }

    pub fn total_slippages(&self) -> f64 {
        self.total_slippages
    }

    /// Number of executions committed so far. This counter is the single
    /// authority for daily trade counts.
    pub fn fills(&self) -> u64 {
        self.fills
    }

    pub fn traded_volume(&self) -> i64 {
        self.traded_volume
    }

    pub fn closed_volume(&self) -> i64 {
        self.closed_volume
    }

    pub fn first_bar_datetime(&self) -> Option<DateTime<Utc>> {
        self.first_bar_datetime
    }

    pub fn last_bar_datetime(&self) -> Option<DateTime<Utc>> {
        self.last_bar_datetime
    }

    pub fn position(&self, instrument: &str) -> Option<&BrokerPos> {
        self.positions.get(instrument)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&SmolStr, &BrokerPos)> {
        self.positions.iter()
    }

    /// Total absolute open shares across all instruments.
    pub fn open_volume(&self) -> i64 {
        self.positions
            .values()
            .flat_map(|pos| pos.lots.iter())
            .map(|lot| lot.shares.abs())
            .sum()
    }

    pub fn shares(&self, instrument: &str) -> i64 {
        self.positions
            .get(instrument)
            .map(|pos| pos.total_shares)
            .unwrap_or(0)
    }

    pub fn long_shares(&self, instrument: &str) -> i64 {
        self.positions
            .get(instrument)
            .map(|pos| pos.lots.iter().filter(|lot| lot.shares > 0).map(|lot| lot.shares).sum())
            .unwrap_or(0)
    }

    pub fn short_shares(&self, instrument: &str) -> i64 {
        self.positions
            .get(instrument)
            .map(|pos| pos.lots.iter().filter(|lot| lot.shares < 0).map(|lot| lot.shares).sum())
            .unwrap_or(0)
    }

    pub fn active_order(&self, id: u64) -> Option<&Order> {
        self.active_orders.get(&id)
    }

    pub fn last_bar(&self, instrument: &str) -> Option<&Bar> {
        self.last_bars.get(instrument)
    }

    /// Drain the pending notifications, oldest first.
    pub fn take_notices(&mut self) -> Vec<BrokerNotice> {
        self.notices.drain(..).collect()
    }

    fn emit_order_event(&mut self, kind: OrderEventKind, order: &Order) {
        let datetime = self.last_bar_datetime.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let event = OrderEvent::new(datetime, kind, order.clone());
        self.notices.push_back(BrokerNotice::Order(event));
    }

    /// Submit a new order. Sell/cover quantities larger than the held lot
    /// sum indicate a strategy bug and fail synchronously.
    pub fn submit_order(&mut self, mut order: Order) -> Result<(), EngineError> {
        if !order.is_initial() {
            return Err(EngineError::OrderAlreadyProcessed(order.id));
        }

        match order.action {
            order::OrderAction::Sell => {
                let held = self.long_shares(&order.instrument);
                if held < order.quantity {
                    return Err(EngineError::InsufficientShares {
                        instrument: order.instrument.clone(),
                        action: "sell",
                        held,
                        requested: order.quantity,
                    });
                }
            }
            order::OrderAction::BuyToCover => {
                let held = self.short_shares(&order.instrument).abs();
                if held < order.quantity {
                    return Err(EngineError::InsufficientShares {
                        instrument: order.instrument.clone(),
                        action: "cover",
                        held,
                        requested: order.quantity,
                    });
                }
            }
            _ => {}
        }

        order.switch_state(OrderState::Submitted);
        order.submitted_at = self.last_bar_datetime;
        self.emit_order_event(OrderEventKind::Submitted, &order);

        let id = order.id;
        let intra_bar = order.exec_timing == ExecTiming::IntraBar;
        let instrument = order.instrument.clone();
        self.active_orders.insert(id, order);

        // Protective stops must be matched against the bar that produced
        // them rather than the next one.
        if intra_bar {
            match self.last_bars.get(&instrument).cloned() {
                Some(bar) => self.process_single_order(id, &bar),
                None => warn!(
                    order = id,
                    %instrument,
                    "no bar available to process intra-bar order"
                ),
            }
        }

        Ok(())
    }

    pub fn cancel_order(&mut self, id: u64) {
        let Some(mut order) = self.active_orders.remove(&id) else {
            return;
        };
        order.switch_state(OrderState::Canceled);
        let datetime = self.last_bar_datetime.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let event = OrderEvent::new(datetime, OrderEventKind::Canceled, order)
            .with_reason("Canceled");
        self.notices.push_back(BrokerNotice::Order(event));
    }

    /// Ingest one bar: detect trading-day boundaries, process the active
    /// orders for the bar's instrument and mark equity to the close.
    pub fn on_bar(&mut self, bar: &Bar) {
        self.save_curr_bar(bar);
        self.process_orders(bar);
        self.update_equity_with_bar(bar);
    }

    fn save_curr_bar(&mut self, bar: &Bar) {
        if self.first_bar_datetime.is_none() {
            self.first_bar_datetime = Some(bar.datetime);
        }

        if self.config.notify_new_trading_day {
            if let Some(last) = self.last_bar_datetime {
                if is_new_trading_day(last, bar.datetime, self.config.trading_day_end_time) {
                    self.notices.push_back(BrokerNotice::NewTradingDay {
                        prev: last,
                        curr: bar.datetime,
                    });
                }
            }
        }

        if self.last_bar_datetime.map(|last| bar.datetime > last).unwrap_or(true) {
            self.last_bar_datetime = Some(bar.datetime);
        }

        self.last_bars.insert(bar.instrument.clone(), bar.clone());
    }

    fn process_orders(&mut self, bar: &Bar) {
        if self.active_orders.is_empty() {
            return;
        }

        // Expire any non-GTC stragglers regardless of instrument.
        let all_ids: Vec<u64> = self.active_orders.keys().copied().collect();
        for id in all_ids {
            self.try_expire(id, bar.datetime);
        }

        // Freeze the set processed on this event so orders placed while
        // handling it wait for the next bar.
        let ids: Vec<u64> = self
            .active_orders
            .iter()
            .filter(|(_, order)| order.instrument == bar.instrument)
            .map(|(id, _)| *id)
            .collect();

        for id in ids {
            self.process_single_order(id, bar);
        }
    }

    fn try_expire(&mut self, id: u64, datetime: DateTime<Utc>) -> bool {
        let Some(order) = self.active_orders.get(&id) else {
            return false;
        };
        if order.good_till_canceled {
            return false;
        }

        let submitted_expired = order.is_submitted()
            && order
                .submitted_at
                .map(|at| datetime.date_naive().pred_opt().unwrap_or(datetime.date_naive()) > at.date_naive())
                .unwrap_or(false);
        let accepted_expired = (order.is_accepted() || order.is_partially_filled())
            && order
                .accepted_at
                .map(|at| datetime.date_naive() > at.date_naive())
                .unwrap_or(false);

        if submitted_expired || accepted_expired {
            let mut order = self
                .active_orders
                .remove(&id)
                .unwrap_or_else(|| unreachable!());
            order.switch_state(OrderState::Canceled);
            self.emit_expired(&order);
            true
        } else {
            false
        }
    }

    fn emit_expired(&mut self, order: &Order) {
        let datetime = self.last_bar_datetime.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let event = OrderEvent::new(datetime, OrderEventKind::Canceled, order.clone())
            .with_reason("Expired");
        self.notices.push_back(BrokerNotice::Order(event));
    }

    fn reject(&mut self, mut order: Order, reason: &str) {
        order.switch_state(OrderState::Rejected);
        let datetime = self.last_bar_datetime.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let event = OrderEvent::new(datetime, OrderEventKind::Rejected, order)
            .with_reason(SmolStr::new(reason));
        self.notices.push_back(BrokerNotice::Order(event));
    }

    fn process_single_order(&mut self, id: u64, bar: &Bar) {
        let Some(mut order) = self.active_orders.remove(&id) else {
            return;
        };

        if order.instrument != bar.instrument {
            self.active_orders.insert(id, order);
            return;
        }

        // Switch from SUBMITTED -> ACCEPTED on first sight of a bar.
        if order.is_submitted() {
            order.accepted_at = Some(bar.datetime);
            order.switch_state(OrderState::Accepted);
            self.emit_order_event(OrderEventKind::Accepted, &order);
        }

        if !order.is_active() {
            return;
        }

        // A day bar shaped like a '-' offers no trade to match against.
        if bar.resolution >= Resolution::Day && bar.is_degenerate() {
            warn!(
                instrument = %bar.instrument,
                datetime = %bar.datetime,
                "no possibility of trading at this bar"
            );
            self.reject(order, "Rejected");
            return;
        }

        let fill = if bar.resolution == Resolution::Tick {
            self.tick_fill.fill(&mut order, bar)
        } else {
            self.bar_fill.fill(&mut order, bar)
        };

        if let Some(fill) = fill {
            if !self.commit_order_execution(&mut order, bar, fill) {
                // Rejected inside commit; order already consumed.
                return;
            }
        }

        if !order.is_active() {
            return;
        }

        // Non-GTC orders on daily or coarser bars expire right now rather
        // than waiting for the next bar.
        if !order.good_till_canceled
            && bar.resolution >= Resolution::Day
            && order
                .accepted_at
                .map(|at| bar.datetime.date_naive() >= at.date_naive())
                .unwrap_or(false)
        {
            order.switch_state(OrderState::Canceled);
            self.emit_expired(&order);
            return;
        }

        self.active_orders.insert(id, order);
    }

    /// Settle one execution: fees, margin, lots and cash. Returns false if
    /// the order was rejected for insufficient cash.
    fn commit_order_execution(&mut self, order: &mut Order, bar: &Bar, fill: FillInfo) -> bool {
        let price = fill.price;
        let quantity = fill.quantity;

        let contract = self.contract(&order.instrument).clone();
        let multiplier = contract.multiplier;
        let margin_ratio = contract.margin_ratio;

        let first_fill = order.filled == 0;
        let commission = contract.commission.calculate(price, quantity, multiplier, first_fill);
        let slippage = contract.slippage.calculate(price, quantity, multiplier);

        let notional = price * quantity as f64 * multiplier;
        let margin_required = margin_ratio * notional;

        let is_open = order.action.is_open();
        let shares_delta = if order.action.is_buy() { quantity } else { -quantity };

        if is_open {
            let outflow = margin_required + commission + slippage;
            let resulting_cash = self.cash - outflow;
            let resulting_available = self.available_cash - outflow;

            if (resulting_available <= 0.0 || resulting_cash <= 0.0) && !self.config.allow_negative_cash
            {
                warn!(
                    available = self.available_cash,
                    instrument = %order.instrument,
                    order = order.id,
                    quantity = order.remaining(),
                    "not enough cash to fill order"
                );
                self.reject(order.clone(), "Insufficient cash");
                return false;
            }

            let execution = ExecutionInfo {
                datetime: bar.datetime,
                price,
                quantity,
                commission,
                slippage,
            };
            order.add_execution(execution);

            let position = self.positions.entry(order.instrument.clone()).or_default();
            position.lots.push_back(SubPosItem { shares: shares_delta, price });
            if position.total_shares == 0 {
                position.avg_price = price;
            } else {
                let cost = position.total_shares.abs() as f64 * position.avg_price
                    + quantity as f64 * price;
                let total = position.total_shares + shares_delta;
                position.avg_price = if total != 0 { (cost / total as f64).abs() } else { 0.0 };
            }
            position.total_shares += shares_delta;
            position.last_price = bar.close;

            self.cash = resulting_cash;
            self.margin += margin_required;
            if self.margin > self.max_margin_required {
                self.max_margin_required = self.margin;
            }

            self.total_commissions += commission;
            self.total_slippages += slippage;
            self.fills += 1;
            self.traded_volume += quantity;

            let execution = *order.executions.last().unwrap_or_else(|| unreachable!());
            self.update_equity_with_bar(bar);
            self.notify_fill(order, execution);
            true
        } else {
            let Some(position) = self.positions.get_mut(&order.instrument) else {
                warn!(instrument = %order.instrument, order = order.id, "no position to close");
                self.reject(order.clone(), "Rejected");
                return false;
            };

            let execution = ExecutionInfo {
                datetime: bar.datetime,
                price,
                quantity,
                commission,
                slippage,
            };
            order.add_execution(execution);

            // Pop lots FIFO, skipping lots on the opposite side of the exit.
            let closing_longs = shares_delta < 0;
            let mut remaining = quantity;
            let mut profit = 0.0;
            let mut returned_margin = 0.0;

            position.lots.retain_mut(|lot| {
                if remaining == 0 {
                    return true;
                }
                let lot_is_long = lot.shares > 0;
                if lot_is_long != closing_longs {
                    return true;
                }

                let take = lot.shares.abs().min(remaining);
                let lot_pnl = if lot_is_long {
                    (price - lot.price) * take as f64 * multiplier
                } else {
                    (lot.price - price) * take as f64 * multiplier
                };
                profit += lot_pnl;
                returned_margin += lot.price * take as f64 * multiplier * margin_ratio;
                remaining -= take;

                let signed_take = if lot_is_long { take } else { -take };
                lot.shares -= signed_take;
                lot.shares != 0
            });

            profit -= commission + slippage;

            position.total_shares += shares_delta;
            position.last_price = bar.close;

            self.margin -= returned_margin;
            if self.margin < -1e-9 {
                warn!(margin = self.margin, "margin dropped below zero");
                self.margin = 0.0;
            }
            self.cash += returned_margin + profit;

            self.total_commissions += commission;
            self.total_slippages += slippage;
            self.fills += 1;
            self.traded_volume += quantity;
            self.closed_volume += quantity;

            let execution = *order.executions.last().unwrap_or_else(|| unreachable!());
            self.update_equity_with_bar(bar);
            self.notify_fill(order, execution);
            true
        }
    }

    fn notify_fill(&mut self, order: &Order, execution: ExecutionInfo) {
        let kind = if order.is_filled() {
            OrderEventKind::Filled
        } else {
            OrderEventKind::PartiallyFilled
        };
        let datetime = execution.datetime;
        let event = OrderEvent::new(datetime, kind, order.clone()).with_execution(execution);
        self.notices.push_back(BrokerNotice::Order(event));
    }

    /// Mark every open lot to the latest price and refresh equity,
    /// position profit and available cash.
    fn update_equity_with_bar(&mut self, bar: &Bar) {
        self.pos_profit = 0.0;
        let mut portfolio_value = 0.0;

        for (instrument, position) in &mut self.positions {
            if *instrument == bar.instrument {
                position.last_price = bar.close;
            }
            let mark_price = position.last_price;

            let contract = self
                .contracts
                .get(instrument)
                .unwrap_or(&self.default_contract);
            let multiplier = contract.multiplier;
            let margin_ratio = contract.margin_ratio;

            for lot in &position.lots {
                if lot.shares == 0 {
                    continue;
                }
                let point_profit = if lot.shares > 0 {
                    mark_price - lot.price
                } else {
                    lot.price - mark_price
                };
                let profit = lot.shares.abs() as f64 * point_profit * multiplier;
                let cost = lot.price * lot.shares.abs() as f64 * multiplier * margin_ratio;

                self.pos_profit += profit;
                portfolio_value += cost + profit;
            }
        }

        self.equity = self.cash + portfolio_value;
        self.available_cash = self.equity - self.margin;
    }
}

/// Trading-day boundary detection.
///
/// With a configured end-time, a boundary occurs when the current bar moved
/// past the end-time the previous bar had not reached yet, or when the
/// calendar date advanced around it.
pub fn is_new_trading_day(last: DateTime<Utc>, curr: DateTime<Utc>, end_time_hhmmss: u32) -> bool {
    if end_time_hhmmss == 0 {
        return curr.date_naive() > last.date_naive();
    }

    let end_secs = hhmmss_to_secs(end_time_hhmmss);
    let last_secs = secs_of_day(last);
    let curr_secs = secs_of_day(curr);
    let last_date = last.date_naive();
    let curr_date = curr.date_naive();

    if curr_secs > end_secs {
        if last_secs <= end_secs {
            true
        } else {
            last_date < curr_date
        }
    } else {
        last_date < curr_date && last_secs <= end_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::order::OrderAction;
    use chrono::{NaiveDate, TimeZone};
    use hindsight_data::{contract::CommissionKind, test_utils::bar};

    fn datetime(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(hour, minute, 0)
                .unwrap(),
        )
    }

    fn broker_with_cash(cash: f64) -> BacktestingBroker {
        BacktestingBroker::new(BrokerConfig {
            cash,
            ..BrokerConfig::default()
        })
        .unwrap()
    }

    fn find_fills(notices: &[BrokerNotice]) -> Vec<&OrderEvent> {
        notices
            .iter()
            .filter_map(|notice| match notice {
                BrokerNotice::Order(event)
                    if matches!(
                        event.kind,
                        OrderEventKind::Filled | OrderEventKind::PartiallyFilled
                    ) =>
                {
                    Some(event)
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_market_buy_settles_cash_and_lots() {
        let mut broker = broker_with_cash(10_000.0);
        broker
            .submit_order(Order::market(1, OrderAction::Buy, "rb", 10))
            .unwrap();

        broker.on_bar(&bar("rb", datetime(9, 0), 100.0, 100.0, 100.0, 100.0, 1));

        let notices = broker.take_notices();
        let fills = find_fills(&notices);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].execution.unwrap().price, 100.0);

        // Full-margin default: cash drops by the notional.
        assert_eq!(broker.cash(), 9_000.0);
        assert_eq!(broker.shares("rb"), 10);
        assert_eq!(broker.long_shares("rb"), 10);
        assert_eq!(broker.margin(), 1_000.0);
        // Equity = cash + reserved notional + unrealized PnL (zero here).
        assert_eq!(broker.equity(), 10_000.0);
        assert_eq!(broker.available_cash(), 9_000.0);
    }

    #[test]
    fn test_round_trip_realizes_pnl() {
        let mut broker = broker_with_cash(10_000.0);
        broker
            .submit_order(Order::market(1, OrderAction::Buy, "rb", 10))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 0), 100.0, 100.0, 100.0, 100.0, 1));
        broker.take_notices();

        broker
            .submit_order(Order::market(2, OrderAction::Sell, "rb", 10))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 1), 110.0, 110.0, 110.0, 110.0, 1));

        let notices = broker.take_notices();
        assert_eq!(find_fills(&notices).len(), 1);

        // (110 - 100) * 10 profit, margin returned.
        assert_eq!(broker.cash(), 10_100.0);
        assert_eq!(broker.equity(), 10_100.0);
        assert_eq!(broker.margin(), 0.0);
        assert_eq!(broker.shares("rb"), 0);
        assert_eq!(broker.closed_volume(), 10);
    }

    #[test]
    fn test_fifo_lot_closing() {
        let mut broker = broker_with_cash(100_000.0);
        broker
            .submit_order(Order::market(1, OrderAction::Buy, "rb", 5))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 0), 100.0, 100.0, 100.0, 100.0, 1));
        broker
            .submit_order(Order::market(2, OrderAction::Buy, "rb", 5))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 1), 110.0, 110.0, 110.0, 110.0, 1));
        broker.take_notices();

        // Sell 7: consumes the 100-entry lot fully and 2 from the 110 lot.
        broker
            .submit_order(Order::market(3, OrderAction::Sell, "rb", 7))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 2), 120.0, 120.0, 120.0, 120.0, 1));

        let position = broker.position("rb").unwrap();
        assert_eq!(position.total_shares, 3);
        assert_eq!(position.lots.len(), 1);
        assert_eq!(position.lots[0].shares, 3);
        assert_eq!(position.lots[0].price, 110.0);
    }

    #[test]
    fn test_insufficient_cash_rejects() {
        let mut broker = broker_with_cash(500.0);
        broker.on_bar(&bar("rb", datetime(9, 0), 100.0, 100.0, 100.0, 100.0, 1));
        broker.take_notices();

        broker
            .submit_order(Order::market(1, OrderAction::Buy, "rb", 10))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 1), 100.0, 100.0, 100.0, 100.0, 1));

        let notices = broker.take_notices();
        let rejected = notices.iter().any(|notice| {
            matches!(
                notice,
                BrokerNotice::Order(event) if event.kind == OrderEventKind::Rejected
            )
        });
        assert!(rejected);
        assert_eq!(broker.cash(), 500.0);
        assert_eq!(broker.shares("rb"), 0);
    }

    #[test]
    fn test_sell_without_shares_is_fatal() {
        let mut broker = broker_with_cash(10_000.0);
        let result = broker.submit_order(Order::market(1, OrderAction::Sell, "rb", 1));
        assert!(matches!(result, Err(EngineError::InsufficientShares { .. })));
    }

    #[test]
    fn test_short_round_trip_with_multiplier_and_margin() {
        let mut broker = broker_with_cash(10_000.0);
        broker.register_contract(Contract {
            multiplier: 10.0,
            margin_ratio: 0.1,
            ..Contract::new("IF")
        });

        broker
            .submit_order(Order::market(1, OrderAction::SellShort, "IF", 1))
            .unwrap();
        broker.on_bar(&bar("IF", datetime(9, 0), 200.0, 200.0, 200.0, 200.0, 1));
        broker.take_notices();

        // Margin = 200 * 1 * 10 * 0.1 = 200.
        assert_eq!(broker.margin(), 200.0);
        assert_eq!(broker.cash(), 9_800.0);
        assert_eq!(broker.shares("IF"), -1);

        broker
            .submit_order(Order::market(2, OrderAction::BuyToCover, "IF", 1))
            .unwrap();
        broker.on_bar(&bar("IF", datetime(9, 1), 197.5, 197.5, 197.5, 197.5, 1));

        // PnL = (200 - 197.5) * 1 * 10 = 25.
        assert_eq!(broker.cash(), 10_025.0);
        assert_eq!(broker.equity(), 10_025.0);
        assert_eq!(broker.margin(), 0.0);
    }

    #[test]
    fn test_commission_reduces_cash() {
        let mut broker = broker_with_cash(10_000.0);
        broker.register_contract(Contract {
            commission: CommissionKind::FixedPerTrade(5.0),
            ..Contract::new("rb")
        });

        broker
            .submit_order(Order::market(1, OrderAction::Buy, "rb", 10))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 0), 100.0, 100.0, 100.0, 100.0, 1));

        assert_eq!(broker.cash(), 10_000.0 - 1_000.0 - 5.0);
        assert_eq!(broker.total_commissions(), 5.0);
    }

    #[test]
    fn test_non_gtc_order_expires_after_a_day() {
        let mut broker = broker_with_cash(10_000.0);
        broker.on_bar(&bar("rb", datetime(9, 0), 100.0, 100.0, 100.0, 100.0, 1));
        broker.take_notices();

        // Limit far below the market so it never fills.
        broker
            .submit_order(Order::limit(1, OrderAction::Buy, "rb", 1, 50.0))
            .unwrap();
        broker.on_bar(&bar("rb", datetime(9, 1), 100.0, 100.0, 100.0, 100.0, 1));
        broker.take_notices();
        assert!(broker.active_order(1).is_some());

        // Next calendar day: the accepted order expires.
        let next_day = Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 1, 3)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        );
        broker.on_bar(&bar("rb", next_day, 100.0, 100.0, 100.0, 100.0, 1));

        let notices = broker.take_notices();
        let expired = notices.iter().any(|notice| {
            matches!(
                notice,
                BrokerNotice::Order(event)
                    if event.kind == OrderEventKind::Canceled
                        && event.reason.as_deref() == Some("Expired")
            )
        });
        assert!(expired);
        assert!(broker.active_order(1).is_none());
    }

    #[test]
    fn test_degenerate_day_bar_rejects_orders() {
        let mut broker = broker_with_cash(10_000.0);
        broker
            .submit_order(Order::market(1, OrderAction::Buy, "rb", 1))
            .unwrap();

        let mut day_bar = bar("rb", datetime(9, 0), 100.0, 100.0, 100.0, 100.0, 1);
        day_bar.resolution = Resolution::Day;
        broker.on_bar(&day_bar);

        let notices = broker.take_notices();
        let rejected = notices.iter().any(|notice| {
            matches!(
                notice,
                BrokerNotice::Order(event) if event.kind == OrderEventKind::Rejected
            )
        });
        assert!(rejected);
    }

    #[test]
    fn test_new_trading_day_detection() {
        struct TestCase {
            last: DateTime<Utc>,
            curr: DateTime<Utc>,
            expected: bool,
        }

        let end = DEFAULT_TRADING_DAY_END_TIME;
        let cases = vec![
            // TC0: crossing 15:15 within one day
            TestCase { last: datetime(15, 14), curr: datetime(15, 16), expected: true },
            // TC1: both before the boundary
            TestCase { last: datetime(15, 13), curr: datetime(15, 14), expected: false },
            // TC2: both after the boundary, same date
            TestCase { last: datetime(15, 16), curr: datetime(15, 17), expected: false },
            // TC3: date advances with both times before the boundary
            TestCase {
                last: datetime(10, 0),
                curr: Utc.from_utc_datetime(
                    &NaiveDate::from_ymd_opt(2024, 1, 3)
                        .unwrap()
                        .and_hms_opt(10, 0, 0)
                        .unwrap(),
                ),
                expected: true,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(
                is_new_trading_day(test.last, test.curr, end),
                test.expected,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_intra_bar_order_fills_on_current_bar() {
        let mut broker = broker_with_cash(100_000.0);
        // Bar with a wide range arrives first.
        broker.on_bar(&bar("rb", datetime(9, 0), 100.0, 110.0, 90.0, 105.0, 1));
        broker.take_notices();

        // Intra-bar buy limit at 95 fills against the current bar.
        broker
            .submit_order(
                Order::limit(1, OrderAction::Buy, "rb", 1, 95.0)
                    .with_exec_timing(ExecTiming::IntraBar),
            )
            .unwrap();

        let notices = broker.take_notices();
        let fills = find_fills(&notices);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].execution.unwrap().price, 95.0);

        // The same limit without intra-bar timing stays pending.
        broker
            .submit_order(Order::limit(2, OrderAction::Buy, "rb", 1, 95.0))
            .unwrap();
        assert!(find_fills(&broker.take_notices()).is_empty());
        assert!(broker.active_order(2).is_some());
    }
}
