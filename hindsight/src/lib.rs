#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Hindsight
//! Hindsight is a Rust engine for event-driven backtesting and parameter
//! optimization of algorithmic trading strategies.
//! * **Deterministic**: one executor is strictly single-threaded and
//!   cooperative — bars are pulled sequentially and every subscriber
//!   observes events synchronously in timestamp order.
//! * **Faithful**: the simulated broker models the full order lifecycle,
//!   bar-shape fill policies, FIFO sub-position lots, margin/commission/
//!   slippage accounting and intra-bar protective stops.
//! * **Parallel where it pays**: optimizations replay shared immutable bar
//!   data across worker threads, one independent executor per parameter
//!   tuple.
//!
//! ## Overview
//! At a high level it provides:
//! * A [`Dispatcher`](dispatch::Dispatcher) merging bar feeds by timestamp.
//! * A [`BacktestingBroker`](broker::BacktestingBroker) with an order state
//!   machine, fill strategies and a sub-position ledger.
//! * A [`Position`](position::Position) abstraction layering stop-loss /
//!   take-profit / trailing-stop conditions over sub-position lots.
//! * Per-strategy [`Runtime`](runtime::Runtime)s driven by
//!   [`Process`](process::Process)es inside an [`Executor`](executor::Executor).
//! * Performance [`analyzer`]s (returns, Sharpe, drawdown, trades, daily
//!   metrics) and report writers.
//! * An [`Optimizer`](optimizer::Optimizer) enumerating or genetically
//!   searching the strategy parameter space.

/// Subscribe to broker events and compute returns, Sharpe, drawdown, trade
/// statistics and daily metrics.
pub mod analyzer;

/// The simulated broker: orders, fill policies, ledger and accounting.
pub mod broker;

/// N-way merge of bar feeds by timestamp into a synchronous event stream.
pub mod dispatch;

/// Defines all possible errors in Hindsight.
pub mod error;

/// Tagged engine events: new-bar, order-update, time-elapsed,
/// new-trading-day.
pub mod event;

/// One independent backtest: dispatcher + broker + processes + analyzers.
pub mod executor;

/// Provides default Hindsight tracing logging initialisers.
pub mod logging;

/// Exhaustive and genetic search over strategy parameter spaces.
pub mod optimizer;

/// Per-(instrument, side) aggregate of sub-position lots with stop
/// conditions.
pub mod position;

/// Binds one strategy configuration to the runtimes it spawns as
/// instruments appear.
pub mod process;

/// Report writers: summary text plus CSV trade/position/return outputs.
pub mod report;

/// One execution context binding one strategy callback to one main
/// instrument.
pub mod runtime;

/// XML scenario files describing broker, data streams, strategies and
/// reports.
pub mod scenario;

/// The strategy callback contract, parameters and the static strategy
/// registry.
pub mod strategy;

pub use hindsight_data::Timed;

/// Allocates order and position identifiers unique within one executor.
#[derive(Debug, Default, Clone)]
pub struct IdGenerator {
    next_order_id: u64,
    next_position_id: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next_order_id: 0,
            next_position_id: 0,
        }
    }

    pub fn next_order_id(&mut self) -> u64 {
        self.next_order_id += 1;
        self.next_order_id
    }

    pub fn next_position_id(&mut self) -> u64 {
        self.next_position_id += 1;
        self.next_position_id
    }
}
