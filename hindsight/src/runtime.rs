use crate::{
    broker::{
        order::{ExecTiming, Order, OrderAction, OrderEvent, OrderEventKind},
        BacktestingBroker,
    },
    error::EngineError,
    position::{
        stops::ExitRequest, Direction, Position, PositionEvent, SignalType, Transaction,
    },
    strategy::{ParamItem, Strategy},
    IdGenerator,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use hindsight_data::{
    bar::{Bar, Resolution},
    composer::BarComposer,
    contract::Contract,
    feed::BarFeed,
    series::BarSeries,
    session::{ActivePeriod, TradingSession},
};
use smol_str::SmolStr;
use std::fmt;
use tracing::{debug, warn};

/// A historical-data look-back: the `count` bars ending at `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub instrument: SmolStr,
    pub to: DateTime<Utc>,
    pub count: usize,
}

/// Where an order placed by this runtime routes on fill.
#[derive(Debug, Clone)]
struct OrderRoute {
    direction: Direction,
    opening: bool,
}

fn route_for(action: OrderAction) -> OrderRoute {
    match action {
        OrderAction::Buy => OrderRoute { direction: Direction::Long, opening: true },
        OrderAction::Sell => OrderRoute { direction: Direction::Long, opening: false },
        OrderAction::SellShort => OrderRoute { direction: Direction::Short, opening: true },
        OrderAction::BuyToCover => OrderRoute { direction: Direction::Short, opening: false },
    }
}

/// An aggregated higher-resolution series assembled from one instrument's
/// input bars.
#[derive(Debug)]
struct Aggregation {
    instrument: SmolStr,
    composer: BarComposer,
    series: BarSeries,
}

/// State of one runtime, shared with strategy callbacks through [`Ctx`].
pub struct RuntimeCore {
    id: u64,
    name: SmolStr,
    main_instrument: SmolStr,
    subscribe_all: bool,
    bar_series: FnvHashMap<SmolStr, BarSeries>,
    aggregations: Vec<Aggregation>,
    last_bars: FnvHashMap<SmolStr, Bar>,
    long_positions: FnvHashMap<SmolStr, Position>,
    short_positions: FnvHashMap<SmolStr, Position>,
    our_orders: FnvHashMap<u64, OrderRoute>,
    active_periods: Vec<ActivePeriod>,
    active: bool,
    history_feeds: Vec<BarFeed>,
    pending_history: Vec<DataRequest>,
    transactions: Vec<Transaction>,
    params: Vec<ParamItem>,
}

impl fmt::Debug for RuntimeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("main_instrument", &self.main_instrument)
            .field("active", &self.active)
            .finish()
    }
}

impl RuntimeCore {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn main_instrument(&self) -> &SmolStr {
        &self.main_instrument
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn add_active_period(&mut self, period: ActivePeriod) {
        self.active_periods.push(period);
    }

    fn position(&self, direction: Direction, instrument: &str) -> Option<&Position> {
        match direction {
            Direction::Long => self.long_positions.get(instrument),
            Direction::Short => self.short_positions.get(instrument),
        }
    }

    fn position_mut(&mut self, direction: Direction, instrument: &str) -> Option<&mut Position> {
        match direction {
            Direction::Long => self.long_positions.get_mut(instrument),
            Direction::Short => self.short_positions.get_mut(instrument),
        }
    }

    fn checked_active(&mut self, datetime: DateTime<Utc>) -> SessionTransition {
        if self.active_periods.is_empty() {
            return SessionTransition::Unchanged;
        }

        let in_period = self
            .active_periods
            .iter()
            .any(|period| period.contains(datetime));

        match (self.active, in_period) {
            (true, false) => {
                self.active = false;
                SessionTransition::Deactivated
            }
            (false, true) => {
                self.active = true;
                SessionTransition::Activated
            }
            _ => SessionTransition::Unchanged,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SessionTransition {
    Unchanged,
    Activated,
    Deactivated,
}

/// The view strategy callbacks act through: market state reads, order
/// placement and stop-condition registration.
#[derive(Debug)]
pub struct Ctx<'a> {
    core: &'a mut RuntimeCore,
    broker: &'a mut BacktestingBroker,
    ids: &'a mut IdGenerator,
}

impl<'a> Ctx<'a> {
    fn new(
        core: &'a mut RuntimeCore,
        broker: &'a mut BacktestingBroker,
        ids: &'a mut IdGenerator,
    ) -> Self {
        Self { core, broker, ids }
    }
}

impl Ctx<'_> {
    pub fn main_instrument(&self) -> &SmolStr {
        &self.core.main_instrument
    }

    pub fn cash(&self) -> f64 {
        self.broker.cash()
    }

    pub fn available_cash(&self) -> f64 {
        self.broker.available_cash()
    }

    pub fn equity(&self) -> f64 {
        self.broker.equity()
    }

    pub fn contract(&self, instrument: &str) -> &Contract {
        self.broker.contract(instrument)
    }

    pub fn tick_size(&self, instrument: &str) -> f64 {
        self.broker.contract(instrument).tick_size
    }

    pub fn last_bar(&self, instrument: &str) -> Option<&Bar> {
        self.core.last_bars.get(instrument)
    }

    pub fn last_price(&self, instrument: &str) -> Option<f64> {
        self.core.last_bars.get(instrument).map(|bar| bar.close)
    }

    pub fn bar_series(&self, instrument: &str) -> Option<&BarSeries> {
        self.core.bar_series.get(instrument)
    }

    pub fn long_position(&self, instrument: &str) -> Option<&Position> {
        self.core.position(Direction::Long, instrument)
    }

    pub fn short_position(&self, instrument: &str) -> Option<&Position> {
        self.core.position(Direction::Short, instrument)
    }

    /// Net signed shares this runtime holds in `instrument`.
    pub fn position_size(&self, instrument: &str) -> i64 {
        let long = self
            .long_position(instrument)
            .map(|position| position.total_shares())
            .unwrap_or(0);
        let short = self
            .short_position(instrument)
            .map(|position| position.total_shares())
            .unwrap_or(0);
        long + short
    }

    /// Assemble a higher-resolution series from `instrument`'s bars
    /// (intraday slices within `session`, or across days for
    /// [`Resolution::Day`]/[`Resolution::Week`] output). Returns a handle
    /// for [`Ctx::aggregated_series`], or `None` when the requested
    /// composition is not a strict upsampling.
    pub fn aggregate_bar_series(
        &mut self,
        instrument: impl Into<SmolStr>,
        session: TradingSession,
        input_resolution: Resolution,
        output_resolution: Resolution,
        output_interval: u32,
    ) -> Option<usize> {
        let composer = if output_resolution >= Resolution::Day {
            BarComposer::across_day(input_resolution, output_resolution)?
        } else {
            BarComposer::intraday(session, input_resolution, output_resolution, output_interval)?
        };

        self.core.aggregations.push(Aggregation {
            instrument: instrument.into(),
            composer,
            series: BarSeries::new(output_resolution, output_interval.max(1)),
        });
        Some(self.core.aggregations.len() - 1)
    }

    /// The sealed bars of an aggregation created with
    /// [`Ctx::aggregate_bar_series`].
    pub fn aggregated_series(&self, handle: usize) -> Option<&BarSeries> {
        self.core.aggregations.get(handle).map(|agg| &agg.series)
    }

    /// Queue a historical look-back; bars arrive through
    /// [`Strategy::on_historical_data`](crate::strategy::Strategy::on_historical_data)
    /// after the current hook returns.
    pub fn request_historical_data(
        &mut self,
        instrument: impl Into<SmolStr>,
        to: DateTime<Utc>,
        count: usize,
    ) {
        self.core.pending_history.push(DataRequest {
            instrument: instrument.into(),
            to,
            count,
        });
    }

    pub fn cancel_order(&mut self, order_id: u64) {
        self.broker.cancel_order(order_id);
    }

    /// Buy to open. `price <= 0` places a market order, otherwise a limit
    /// at `price`. Returns the order id (0 when dropped by session gating).
    pub fn buy(
        &mut self,
        instrument: &str,
        quantity: i64,
        price: f64,
        immediately: bool,
        signal: Option<&str>,
    ) -> Result<u64, EngineError> {
        self.place(OrderAction::Buy, instrument, quantity, price, immediately, signal)
    }

    /// Sell to close an existing long.
    pub fn sell(
        &mut self,
        instrument: &str,
        quantity: i64,
        price: f64,
        immediately: bool,
        signal: Option<&str>,
    ) -> Result<u64, EngineError> {
        self.place(OrderAction::Sell, instrument, quantity, price, immediately, signal)
    }

    /// Sell short to open.
    pub fn sell_short(
        &mut self,
        instrument: &str,
        quantity: i64,
        price: f64,
        immediately: bool,
        signal: Option<&str>,
    ) -> Result<u64, EngineError> {
        self.place(OrderAction::SellShort, instrument, quantity, price, immediately, signal)
    }

    /// Buy back an existing short.
    pub fn buy_to_cover(
        &mut self,
        instrument: &str,
        quantity: i64,
        price: f64,
        immediately: bool,
        signal: Option<&str>,
    ) -> Result<u64, EngineError> {
        self.place(OrderAction::BuyToCover, instrument, quantity, price, immediately, signal)
    }

    /// Convenience: flip any open short first, then buy `quantity`.
    pub fn open_long(&mut self, instrument: &str, quantity: i64) -> Result<u64, EngineError> {
        let short = self
            .short_position(instrument)
            .map(|position| position.total_shares())
            .unwrap_or(0);
        if short < 0 {
            self.buy_to_cover(instrument, short.abs(), 0.0, false, None)?;
        }
        self.buy(instrument, quantity, 0.0, false, None)
    }

    /// Convenience: flip any open long first, then sell short `quantity`.
    pub fn open_short(&mut self, instrument: &str, quantity: i64) -> Result<u64, EngineError> {
        let long = self
            .long_position(instrument)
            .map(|position| position.total_shares())
            .unwrap_or(0);
        if long > 0 {
            self.sell(instrument, long, 0.0, false, None)?;
        }
        self.sell_short(instrument, quantity, 0.0, false, None)
    }

    /// Close one side of one instrument at market.
    pub fn close_position(
        &mut self,
        direction: Direction,
        instrument: &str,
        immediately: bool,
    ) -> Result<(), EngineError> {
        let Some(request) = self
            .core
            .position(direction, instrument)
            .and_then(|position| position.close_request(0, immediately))
        else {
            return Ok(());
        };
        submit_exit_request(self.core, self.broker, self.ids, direction, instrument, &request)
    }

    /// Close one sub-position (lot) at market.
    pub fn close_sub_position(
        &mut self,
        direction: Direction,
        instrument: &str,
        sub_pos_id: u64,
        immediately: bool,
    ) -> Result<(), EngineError> {
        let Some(request) = self
            .core
            .position(direction, instrument)
            .and_then(|position| position.close_request(sub_pos_id, immediately))
        else {
            return Ok(());
        };
        submit_exit_request(self.core, self.broker, self.ids, direction, instrument, &request)
    }

    /// Send market exits for every open position of this runtime.
    pub fn close_all_positions(&mut self, immediately: bool) -> Result<(), EngineError> {
        close_all_positions(self.core, self.broker, self.ids, immediately)
    }

    /// Attach a percent stop loss to a position (`sub_pos_id` 0 targets
    /// the aggregate).
    pub fn set_stop_loss_pct(
        &mut self,
        direction: Direction,
        instrument: &str,
        pct: f64,
        sub_pos_id: u64,
    ) {
        if let Some(position) = self.core.position_mut(direction, instrument) {
            position.set_stop_loss_pct(pct, sub_pos_id, true);
        }
    }

    /// Attach a fixed-amount stop loss.
    pub fn set_stop_loss_amount(
        &mut self,
        direction: Direction,
        instrument: &str,
        amount: f64,
        sub_pos_id: u64,
    ) {
        if let Some(position) = self.core.position_mut(direction, instrument) {
            position.set_stop_loss_amount(amount, sub_pos_id, true);
        }
    }

    /// Attach a single-threshold profit target.
    pub fn set_stop_profit_pct(
        &mut self,
        direction: Direction,
        instrument: &str,
        returns: f64,
        sub_pos_id: u64,
    ) {
        if let Some(position) = self.core.position_mut(direction, instrument) {
            position.set_stop_profit_pct(returns, sub_pos_id, true);
        }
    }

    /// Attach a percent trailing stop.
    pub fn set_trailing_stop(
        &mut self,
        direction: Direction,
        instrument: &str,
        returns: f64,
        drawdown: f64,
        sub_pos_id: u64,
    ) {
        if let Some(position) = self.core.position_mut(direction, instrument) {
            position.set_trailing_stop(returns, drawdown, sub_pos_id, true);
        }
    }

    /// Attach a trailing stop armed by an absolute currency profit.
    pub fn set_percent_trailing(
        &mut self,
        direction: Direction,
        instrument: &str,
        amount: f64,
        drawdown: f64,
        sub_pos_id: u64,
    ) {
        if let Some(position) = self.core.position_mut(direction, instrument) {
            position.set_percent_trailing(amount, drawdown, sub_pos_id, true);
        }
    }

    fn place(
        &mut self,
        action: OrderAction,
        instrument: &str,
        quantity: i64,
        price: f64,
        immediately: bool,
        signal: Option<&str>,
    ) -> Result<u64, EngineError> {
        if !self.core.active {
            warn!(
                runtime = self.core.id,
                %instrument,
                ?action,
                "runtime inactive, dropping order"
            );
            return Ok(0);
        }

        let id = self.ids.next_order_id();
        let mut order = if price > 0.0 {
            Order::limit(id, action, SmolStr::new(instrument), quantity, price)
        } else {
            Order::market(id, action, SmolStr::new(instrument), quantity)
        };
        if immediately {
            order = order.with_exec_timing(ExecTiming::IntraBar);
        }
        if let Some(signal) = signal {
            order = order.with_signal(signal);
        }

        let route = route_for(action);
        self.broker.submit_order(order)?;
        if !route.opening {
            if let Some(position) = self.core.position_mut(route.direction, instrument) {
                position.register_exit_order(id, 0, SignalType::Unknown);
            }
        }
        self.core.our_orders.insert(id, route);
        Ok(id)
    }
}

fn close_all_positions(
    core: &mut RuntimeCore,
    broker: &mut BacktestingBroker,
    ids: &mut IdGenerator,
    immediately: bool,
) -> Result<(), EngineError> {
    let mut targets = Vec::new();
    for (instrument, position) in &core.long_positions {
        if position.is_open() {
            targets.push((Direction::Long, instrument.clone()));
        }
    }
    for (instrument, position) in &core.short_positions {
        if position.is_open() {
            targets.push((Direction::Short, instrument.clone()));
        }
    }

    for (direction, instrument) in targets {
        let Some(request) = core
            .position(direction, &instrument)
            .and_then(|position| position.close_request(0, immediately))
        else {
            continue;
        };
        submit_exit_request(core, broker, ids, direction, &instrument, &request)?;
    }
    Ok(())
}

/// Turn an [`ExitRequest`] into a broker order, registering its routing on
/// both the runtime and the position.
fn submit_exit_request(
    core: &mut RuntimeCore,
    broker: &mut BacktestingBroker,
    ids: &mut IdGenerator,
    direction: Direction,
    instrument: &str,
    request: &ExitRequest,
) -> Result<(), EngineError> {
    let id = ids.next_order_id();
    let Some(position) = core.position_mut(direction, instrument) else {
        return Ok(());
    };

    let order = position.build_exit_order(id, request);
    let action = order.action;
    broker.submit_order(order)?;

    if let Some(position) = core.position_mut(direction, instrument) {
        position.register_exit_order(id, request.sub_pos_id, Position::exit_signal(request));
    }
    core.our_orders.insert(id, route_for(action));
    Ok(())
}

/// One execution context binding one strategy callback to one main
/// instrument inside an executor.
pub struct Runtime {
    core: RuntimeCore,
    strategy: Box<dyn Strategy>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").field("core", &self.core).finish()
    }
}

impl Runtime {
    pub fn new(
        id: u64,
        name: impl Into<SmolStr>,
        main_instrument: impl Into<SmolStr>,
        subscribe_all: bool,
        params: Vec<ParamItem>,
        history_feeds: Vec<BarFeed>,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        Self {
            core: RuntimeCore {
                id,
                name: name.into(),
                main_instrument: main_instrument.into(),
                subscribe_all,
                bar_series: FnvHashMap::default(),
                aggregations: Vec::new(),
                last_bars: FnvHashMap::default(),
                long_positions: FnvHashMap::default(),
                short_positions: FnvHashMap::default(),
                our_orders: FnvHashMap::default(),
                active_periods: Vec::new(),
                active: true,
                history_feeds,
                pending_history: Vec::new(),
                transactions: Vec::new(),
                params,
            },
            strategy,
        }
    }

    pub fn core(&self) -> &RuntimeCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut RuntimeCore {
        &mut self.core
    }

    /// Completed round trips recorded so far; drained by the executor.
    pub fn drain_transactions(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.core.transactions)
    }

    /// Run the creation hooks: `on_create`, one `on_set_parameter` per
    /// configured parameter, then `on_start`.
    pub fn start(&mut self, broker: &mut BacktestingBroker, ids: &mut IdGenerator) {
        let Runtime { core, strategy } = self;
        let mut ctx = Ctx::new(core, broker, ids);
        strategy.on_create(&mut ctx);

        let params = core.params.clone();
        let count = params.len();
        for (index, param) in params.iter().enumerate() {
            strategy.on_set_parameter(&param.name, &param.value, index + 1 == count);
        }

        let mut ctx = Ctx::new(core, broker, ids);
        strategy.on_start(&mut ctx);
        debug!(runtime = core.id, name = %core.name, "runtime started");
    }

    /// Handle one bar: session gating, series update, stop-condition pass,
    /// then the strategy's `on_bar`/`on_bars` hooks.
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) -> Result<(), EngineError> {
        let Runtime { core, strategy } = self;

        match core.checked_active(bar.datetime) {
            SessionTransition::Deactivated => {
                debug!(runtime = core.id, datetime = %bar.datetime, "session closed");
                close_all_positions(core, broker, ids, true)?;
                return Ok(());
            }
            SessionTransition::Activated => {
                debug!(runtime = core.id, datetime = %bar.datetime, "session opened");
            }
            SessionTransition::Unchanged => {
                if !core.active {
                    return Ok(());
                }
            }
        }

        // 1: record the bar (feeding any indicator pipelines).
        let series = core
            .bar_series
            .entry(bar.instrument.clone())
            .or_insert_with(|| BarSeries::new(bar.resolution, bar.interval.max(1) as u32));
        series.push_bar(bar.clone());
        core.last_bars.insert(bar.instrument.clone(), bar.clone());

        for aggregation in &mut core.aggregations {
            if aggregation.instrument == bar.instrument {
                if let Some(sealed) = aggregation.composer.push(bar) {
                    aggregation.series.push_bar(sealed);
                }
            }
        }

        // 2: per-bar stop-condition machinery, possibly exiting intra-bar.
        for direction in [Direction::Long, Direction::Short] {
            let requests = match core.position_mut(direction, &bar.instrument) {
                Some(position) => position.on_bar(bar),
                None => Vec::new(),
            };
            for request in requests {
                submit_exit_request(core, broker, ids, direction, &bar.instrument, &request)?;
            }
        }

        // 3: the strategy acts.
        let mut ctx = Ctx::new(core, broker, ids);
        strategy.on_bar(&mut ctx, bar);

        let bars: Vec<Bar> = core.last_bars.values().cloned().collect();
        let mut ctx = Ctx::new(core, broker, ids);
        strategy.on_bars(&mut ctx, &bars);

        // 4: deliver any queued historical-data requests.
        Self::deliver_history(core, strategy.as_mut(), broker, ids);

        Ok(())
    }

    fn deliver_history(
        core: &mut RuntimeCore,
        strategy: &mut dyn Strategy,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) {
        while !core.pending_history.is_empty() {
            let requests = std::mem::take(&mut core.pending_history);
            for request in requests {
                let mut bars = Vec::with_capacity(request.count);
                if let Some(feed) = core
                    .history_feeds
                    .iter()
                    .find(|feed| feed.instrument() == &request.instrument)
                {
                    feed.bars_back(request.to, request.count, |bar, _| bars.push(bar.clone()));
                }

                let total = bars.len();
                for (index, bar) in bars.iter().enumerate() {
                    let mut ctx = Ctx::new(core, broker, ids);
                    strategy.on_historical_data(&mut ctx, bar, index + 1 == total);
                }
            }
        }
    }

    pub fn on_time_elapsed(
        &mut self,
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) {
        let Runtime { core, strategy } = self;
        let mut ctx = Ctx::new(core, broker, ids);
        strategy.on_time_elapsed(&mut ctx, prev, next);
    }

    /// Route one broker order event into positions and strategy hooks.
    pub fn on_order_event(
        &mut self,
        event: &OrderEvent,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) -> Result<(), EngineError> {
        let Runtime { core, strategy } = self;

        let Some(route) = core.our_orders.get(&event.order.id).cloned() else {
            return Ok(());
        };

        match event.kind {
            OrderEventKind::Filled | OrderEventKind::PartiallyFilled => {
                let instrument = event.order.instrument.clone();

                let position_event = if route.opening {
                    let position = match route.direction {
                        Direction::Long => {
                            core.long_positions.entry(instrument.clone()).or_insert_with(|| {
                                Position::new(
                                    ids.next_position_id(),
                                    instrument.clone(),
                                    Direction::Long,
                                    broker.contract(&instrument).clone(),
                                )
                            })
                        }
                        Direction::Short => {
                            core.short_positions.entry(instrument.clone()).or_insert_with(|| {
                                Position::new(
                                    ids.next_position_id(),
                                    instrument.clone(),
                                    Direction::Short,
                                    broker.contract(&instrument).clone(),
                                )
                            })
                        }
                    };
                    position.on_entry_fill(event)
                } else {
                    let Some(position) = core.position_mut(route.direction, &instrument) else {
                        warn!(order = event.order.id, %instrument, "fill for unknown position");
                        return Ok(());
                    };
                    let (position_event, transactions) = position.on_exit_fill(event);
                    core.transactions.extend(transactions);
                    position_event
                };

                let handle = core
                    .position(route.direction, &instrument)
                    .map(|position| position.handle());

                if let Some(handle) = handle {
                    let mut ctx = Ctx::new(core, broker, ids);
                    match position_event {
                        PositionEvent::Opened => strategy.on_position_opened(&mut ctx, &handle),
                        PositionEvent::Changed => strategy.on_position_changed(&mut ctx, &handle),
                        PositionEvent::Closed => strategy.on_position_closed(&mut ctx, &handle),
                    }
                }

                let mut ctx = Ctx::new(core, broker, ids);
                match event.kind {
                    OrderEventKind::Filled => strategy.on_order_filled(&mut ctx, event),
                    _ => strategy.on_order_partially_filled(&mut ctx, event),
                }

                if !event.order.is_active() {
                    core.our_orders.remove(&event.order.id);
                }
            }
            OrderEventKind::Canceled | OrderEventKind::Rejected => {
                if !route.opening {
                    if let Some(position) =
                        core.position_mut(route.direction, &event.order.instrument)
                    {
                        position.release_exit_order(event.order.id);
                    }
                }
                core.our_orders.remove(&event.order.id);

                let mut ctx = Ctx::new(core, broker, ids);
                strategy.on_order_failed(&mut ctx, event);
            }
            OrderEventKind::Submitted | OrderEventKind::Accepted => {}
        }

        Ok(())
    }

    /// Teardown hooks.
    pub fn stop(&mut self, broker: &mut BacktestingBroker, ids: &mut IdGenerator) {
        let Runtime { core, strategy } = self;
        let mut ctx = Ctx::new(core, broker, ids);
        strategy.on_stop(&mut ctx);
        let mut ctx = Ctx::new(core, broker, ids);
        strategy.on_destroy(&mut ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerConfig, BrokerNotice};
    use hindsight_data::test_utils::{bar, time_plus_mins};

    /// Drains broker notices into the runtime until quiescent.
    fn pump(
        runtime: &mut Runtime,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) {
        loop {
            let notices = broker.take_notices();
            if notices.is_empty() {
                break;
            }
            for notice in notices {
                if let BrokerNotice::Order(event) = notice {
                    runtime.on_order_event(&event, broker, ids).unwrap();
                }
            }
        }
    }

    #[derive(Debug, Default)]
    struct BuyOnceStrategy {
        bought: bool,
        opened: u32,
        closed: u32,
    }

    impl Strategy for BuyOnceStrategy {
        fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
            if !self.bought {
                self.bought = true;
                ctx.buy(&bar.instrument, 10, 0.0, false, Some("entry")).unwrap();
            }
        }

        fn on_position_opened(&mut self, ctx: &mut Ctx<'_>, position: &crate::position::PositionHandle) {
            self.opened += 1;
            ctx.set_stop_loss_pct(position.direction, &position.instrument, 0.01, 0);
        }

        fn on_position_closed(&mut self, _: &mut Ctx<'_>, _: &crate::position::PositionHandle) {
            self.closed += 1;
        }
    }

    #[test]
    fn test_stop_loss_round_trip() {
        let mut broker = BacktestingBroker::new(BrokerConfig {
            cash: 10_000.0,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut ids = IdGenerator::new();
        let mut runtime = Runtime::new(
            1,
            "test",
            "rb",
            false,
            Vec::new(),
            Vec::new(),
            Box::new(BuyOnceStrategy::default()),
        );

        let base = DateTime::<Utc>::MIN_UTC;

        // Bar 0: strategy buys 10 at market (fills next bar).
        let bar0 = bar("rb", base, 100.0, 100.0, 100.0, 100.0, 1);
        broker.on_bar(&bar0);
        pump(&mut runtime, &mut broker, &mut ids);
        runtime.on_bar(&bar0, &mut broker, &mut ids).unwrap();
        pump(&mut runtime, &mut broker, &mut ids);

        // Bar 1: fill at open 100, then low 98 trips the 1% stop at 99.
        let bar1 = bar("rb", time_plus_mins(base, 1), 100.0, 101.0, 98.0, 99.0, 1);
        broker.on_bar(&bar1);
        pump(&mut runtime, &mut broker, &mut ids);
        runtime.on_bar(&bar1, &mut broker, &mut ids).unwrap();
        pump(&mut runtime, &mut broker, &mut ids);

        let strategy_state = {
            let transactions = runtime.drain_transactions();
            assert_eq!(transactions.len(), 1);
            let transaction = &transactions[0];
            assert_eq!(transaction.exit_price, 99.0);
            assert_eq!(transaction.realized_pnl, -10.0);
            assert_eq!(transaction.exit_type, SignalType::StopLoss);
            transaction.realized_pnl
        };

        assert_eq!(strategy_state, -10.0);
        assert_eq!(broker.cash(), 9_990.0);
        assert_eq!(broker.equity(), 9_990.0);
        assert_eq!(broker.shares("rb"), 0);

        let position = runtime.core().position(Direction::Long, "rb").unwrap();
        assert_eq!(position.total_shares(), 0);
    }

    #[test]
    fn test_session_deactivation_closes_positions() {
        let mut broker = BacktestingBroker::new(BrokerConfig {
            cash: 10_000.0,
            ..BrokerConfig::default()
        })
        .unwrap();
        let mut ids = IdGenerator::new();
        let mut runtime = Runtime::new(
            1,
            "test",
            "rb",
            false,
            Vec::new(),
            Vec::new(),
            Box::new(BuyOnceStrategy::default()),
        );

        let base = DateTime::<Utc>::MIN_UTC;
        runtime.core_mut().add_active_period(ActivePeriod {
            begin: base,
            end: time_plus_mins(base, 1),
        });

        let bar0 = bar("rb", base, 100.0, 100.0, 100.0, 100.0, 1);
        broker.on_bar(&bar0);
        runtime.on_bar(&bar0, &mut broker, &mut ids).unwrap();
        pump(&mut runtime, &mut broker, &mut ids);

        let bar1 = bar("rb", time_plus_mins(base, 1), 100.0, 100.0, 100.0, 100.0, 1);
        broker.on_bar(&bar1);
        pump(&mut runtime, &mut broker, &mut ids);
        runtime.on_bar(&bar1, &mut broker, &mut ids).unwrap();
        pump(&mut runtime, &mut broker, &mut ids);
        assert_eq!(broker.shares("rb"), 10);

        // Past the active period: the runtime closes everything intra-bar.
        let bar2 = bar("rb", time_plus_mins(base, 5), 102.0, 102.0, 102.0, 102.0, 1);
        broker.on_bar(&bar2);
        pump(&mut runtime, &mut broker, &mut ids);
        runtime.on_bar(&bar2, &mut broker, &mut ids).unwrap();
        pump(&mut runtime, &mut broker, &mut ids);

        assert!(!runtime.core().is_active());
        assert_eq!(broker.shares("rb"), 0);
        // (102 - 100) * 10 profit realized.
        assert_eq!(broker.cash(), 10_020.0);
    }
}
