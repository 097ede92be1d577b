use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::warn;

/// Order type, driving the fill policy applied against each bar.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Order action. `Buy`/`SellShort` open exposure, `Sell`/`BuyToCover`
/// close it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum OrderAction {
    Buy,
    Sell,
    SellShort,
    BuyToCover,
}

impl OrderAction {
    /// Whether a fill of this action opens new exposure.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderAction::Buy | OrderAction::SellShort)
    }

    /// Whether this action consumes cash on the buy side of the book.
    pub fn is_buy(&self) -> bool {
        matches!(self, OrderAction::Buy | OrderAction::BuyToCover)
    }
}

/// Order lifecycle states. Terminal states (`Filled`, `Canceled`,
/// `Rejected`) are sticky — no transition leaves them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum OrderState {
    Initial,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected
        )
    }

    fn can_switch_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (Initial, Submitted) | (Initial, Canceled) | (Initial, Rejected) => true,
            (Submitted, Accepted) | (Submitted, Canceled) | (Submitted, Rejected) => true,
            (Accepted, PartiallyFilled)
            | (Accepted, Filled)
            | (Accepted, Canceled)
            | (Accepted, Rejected) => true,
            (PartiallyFilled, PartiallyFilled)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Canceled)
            | (PartiallyFilled, Rejected) => true,
            _ => false,
        }
    }
}

/// When the broker matches an order: against the next bar (default), or
/// against the bar that produced it (protective stops).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
pub enum ExecTiming {
    #[default]
    NextBar,
    IntraBar,
}

/// One execution against an order.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct ExecutionInfo {
    pub datetime: DateTime<Utc>,
    pub price: f64,
    pub quantity: i64,
    pub commission: f64,
    pub slippage: f64,
}

/// An order, unique by id within one executor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub id: u64,
    pub order_type: OrderType,
    pub action: OrderAction,
    pub instrument: SmolStr,
    pub quantity: i64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub good_till_canceled: bool,
    pub all_or_none: bool,
    pub fill_on_close: bool,
    pub exec_timing: ExecTiming,
    pub state: OrderState,
    /// Set once the stop leg of a stop-limit order has triggered.
    pub stop_hit: bool,
    pub filled: i64,
    pub avg_fill_price: f64,
    pub executions: Vec<ExecutionInfo>,
    pub signal: Option<SmolStr>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        id: u64,
        order_type: OrderType,
        action: OrderAction,
        instrument: impl Into<SmolStr>,
        quantity: i64,
    ) -> Self {
        Self {
            id,
            order_type,
            action,
            instrument: instrument.into(),
            quantity,
            limit_price: None,
            stop_price: None,
            good_till_canceled: false,
            all_or_none: false,
            fill_on_close: false,
            exec_timing: ExecTiming::NextBar,
            state: OrderState::Initial,
            stop_hit: false,
            filled: 0,
            avg_fill_price: 0.0,
            executions: Vec::new(),
            signal: None,
            submitted_at: None,
            accepted_at: None,
        }
    }

    pub fn market(id: u64, action: OrderAction, instrument: impl Into<SmolStr>, quantity: i64) -> Self {
        Self::new(id, OrderType::Market, action, instrument, quantity)
    }

    pub fn limit(
        id: u64,
        action: OrderAction,
        instrument: impl Into<SmolStr>,
        quantity: i64,
        limit_price: f64,
    ) -> Self {
        let mut order = Self::new(id, OrderType::Limit, action, instrument, quantity);
        order.limit_price = Some(limit_price);
        order
    }

    pub fn stop(
        id: u64,
        action: OrderAction,
        instrument: impl Into<SmolStr>,
        quantity: i64,
        stop_price: f64,
    ) -> Self {
        let mut order = Self::new(id, OrderType::Stop, action, instrument, quantity);
        order.stop_price = Some(stop_price);
        order
    }

    pub fn stop_limit(
        id: u64,
        action: OrderAction,
        instrument: impl Into<SmolStr>,
        quantity: i64,
        stop_price: f64,
        limit_price: f64,
    ) -> Self {
        let mut order = Self::new(id, OrderType::StopLimit, action, instrument, quantity);
        order.stop_price = Some(stop_price);
        order.limit_price = Some(limit_price);
        order
    }

    pub fn with_signal(mut self, signal: impl Into<SmolStr>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    pub fn with_exec_timing(mut self, timing: ExecTiming) -> Self {
        self.exec_timing = timing;
        self
    }

    pub fn with_good_till_canceled(mut self, gtc: bool) -> Self {
        self.good_till_canceled = gtc;
        self
    }

    pub fn with_fill_on_close(mut self, fill_on_close: bool) -> Self {
        self.fill_on_close = fill_on_close;
        self
    }

    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled
    }

    pub fn is_initial(&self) -> bool {
        self.state == OrderState::Initial
    }

    pub fn is_submitted(&self) -> bool {
        self.state == OrderState::Submitted
    }

    pub fn is_accepted(&self) -> bool {
        self.state == OrderState::Accepted
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }

    pub fn is_partially_filled(&self) -> bool {
        self.state == OrderState::PartiallyFilled
    }

    pub fn is_canceled(&self) -> bool {
        self.state == OrderState::Canceled
    }

    /// Move to `next` state. Invalid transitions (in particular any attempt
    /// to leave a terminal state) are ignored with a warning, keeping
    /// terminal states sticky.
    pub fn switch_state(&mut self, next: OrderState) {
        if self.state.can_switch_to(next) {
            self.state = next;
        } else {
            warn!(
                order = self.id,
                from = ?self.state,
                to = ?next,
                "ignoring invalid order state transition"
            );
        }
    }

    /// Record an execution, updating the filled quantity, average fill
    /// price and state (`PartiallyFilled` or `Filled`).
    pub fn add_execution(&mut self, info: ExecutionInfo) {
        let filled_before = self.filled as f64;
        let total = filled_before + info.quantity as f64;
        if total > 0.0 {
            self.avg_fill_price =
                (self.avg_fill_price * filled_before + info.price * info.quantity as f64) / total;
        }
        self.filled += info.quantity;
        self.executions.push(info);

        debug_assert!(self.filled <= self.quantity);
        if self.filled >= self.quantity {
            self.switch_state(OrderState::Filled);
        } else {
            self.switch_state(OrderState::PartiallyFilled);
        }
    }
}

/// Kinds of order lifecycle notifications the broker emits.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum OrderEventKind {
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// A snapshot of an order at a lifecycle transition, delivered to
/// strategies and analyzers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderEvent {
    pub datetime: DateTime<Utc>,
    pub kind: OrderEventKind,
    pub order: Order,
    pub execution: Option<ExecutionInfo>,
    pub reason: Option<SmolStr>,
}

impl OrderEvent {
    pub fn new(datetime: DateTime<Utc>, kind: OrderEventKind, order: Order) -> Self {
        Self {
            datetime,
            kind,
            order,
            execution: None,
            reason: None,
        }
    }

    pub fn with_execution(mut self, execution: ExecutionInfo) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<SmolStr>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
