use crate::broker::order::OrderEvent;
use chrono::{DateTime, Utc};
use derive_more::From;
use hindsight_data::bar::Bar;

/// Tagged engine event carrying a timestamp and a typed payload.
///
/// All subscribers inside one executor observe these synchronously, in
/// non-decreasing timestamp order.
#[derive(Debug, Clone, From)]
pub enum EngineEvent {
    /// A bar closed on one of the registered feeds.
    NewBar(Bar),
    /// An order changed state (submitted, accepted, filled, ...).
    OrderUpdate(OrderEvent),
    /// The dispatcher moved from one timestamp to a strictly later one.
    #[from(skip)]
    TimeElapsed {
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
    },
    /// The broker detected a trading-day boundary.
    #[from(skip)]
    NewTradingDay {
        prev: DateTime<Utc>,
        curr: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Timestamp the event is attributed to.
    pub fn datetime(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::NewBar(bar) => bar.datetime,
            EngineEvent::OrderUpdate(event) => event.datetime,
            EngineEvent::TimeElapsed { next, .. } => *next,
            EngineEvent::NewTradingDay { curr, .. } => *curr,
        }
    }
}
