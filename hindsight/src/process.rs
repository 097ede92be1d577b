use crate::{
    broker::{order::OrderEvent, BacktestingBroker},
    error::EngineError,
    position::Transaction,
    runtime::Runtime,
    strategy::{StrategyConfig, StrategyCreator},
    IdGenerator,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use hindsight_data::{bar::Bar, feed::BarFeed, session::ActivePeriod};
use smol_str::SmolStr;
use std::fmt;
use tracing::info;

/// Binds one strategy configuration to the runtimes it spawns as
/// instruments appear.
///
/// A subscribe-all process lazily creates one runtime per instrument on the
/// first bar for it; an explicit subscription drives a single runtime keyed
/// by the first configured instrument, which receives the bars of every
/// subscribed instrument.
pub struct Process {
    config: StrategyConfig,
    creator: StrategyCreator,
    history_feeds: Vec<BarFeed>,
    session_table: FnvHashMap<SmolStr, Vec<ActivePeriod>>,
    runtimes: Vec<Runtime>,
    index: FnvHashMap<SmolStr, usize>,
    next_runtime_id: u64,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("strategy", &self.config.name)
            .field("runtimes", &self.runtimes.len())
            .finish()
    }
}

impl Process {
    pub fn new(
        config: StrategyConfig,
        creator: StrategyCreator,
        history_feeds: Vec<BarFeed>,
        session_table: FnvHashMap<SmolStr, Vec<ActivePeriod>>,
    ) -> Self {
        Self {
            config,
            creator,
            history_feeds,
            session_table,
            runtimes: Vec::new(),
            index: FnvHashMap::default(),
            next_runtime_id: 0,
        }
    }

    pub fn name(&self) -> &SmolStr {
        &self.config.name
    }

    pub fn runtimes(&self) -> &[Runtime] {
        &self.runtimes
    }

    fn subscribes(&self, instrument: &SmolStr) -> bool {
        self.config.subscribe_all || self.config.instruments.contains(instrument)
    }

    fn runtime_key(&self, instrument: &SmolStr) -> SmolStr {
        if self.config.subscribe_all {
            instrument.clone()
        } else {
            self.config
                .instruments
                .first()
                .cloned()
                .unwrap_or_else(|| instrument.clone())
        }
    }

    fn runtime_for(
        &mut self,
        instrument: &SmolStr,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) -> usize {
        let key = self.runtime_key(instrument);
        if let Some(index) = self.index.get(&key) {
            return *index;
        }

        self.next_runtime_id += 1;
        let name = SmolStr::new(format!("{}@{key}", self.config.name));
        let mut runtime = Runtime::new(
            self.next_runtime_id,
            name.clone(),
            key.clone(),
            self.config.subscribe_all,
            self.config.params.clone(),
            self.history_feeds.clone(),
            (self.creator)(),
        );
        if let Some(periods) = self.session_table.get(&key) {
            for period in periods {
                runtime.core_mut().add_active_period(*period);
            }
        }
        runtime.start(broker, ids);
        info!(strategy = %self.config.name, runtime = %name, "runtime spawned");

        let index = self.runtimes.len();
        self.runtimes.push(runtime);
        self.index.insert(key, index);
        index
    }

    /// Route one bar to the owning runtime, spawning it if needed.
    pub fn on_bar(
        &mut self,
        bar: &Bar,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) -> Result<(), EngineError> {
        if !self.subscribes(&bar.instrument) {
            return Ok(());
        }

        let index = self.runtime_for(&bar.instrument, broker, ids);
        self.runtimes[index].on_bar(bar, broker, ids)
    }

    pub fn on_order_event(
        &mut self,
        event: &OrderEvent,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) -> Result<(), EngineError> {
        for runtime in &mut self.runtimes {
            runtime.on_order_event(event, broker, ids)?;
        }
        Ok(())
    }

    pub fn on_time_elapsed(
        &mut self,
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
        broker: &mut BacktestingBroker,
        ids: &mut IdGenerator,
    ) {
        for runtime in &mut self.runtimes {
            runtime.on_time_elapsed(prev, next, broker, ids);
        }
    }

    /// Completed round trips across all runtimes since the last drain.
    pub fn drain_transactions(&mut self) -> Vec<Transaction> {
        let mut transactions = Vec::new();
        for runtime in &mut self.runtimes {
            transactions.extend(runtime.drain_transactions());
        }
        transactions
    }

    /// Teardown hooks on every runtime.
    pub fn stop(&mut self, broker: &mut BacktestingBroker, ids: &mut IdGenerator) {
        for runtime in &mut self.runtimes {
            runtime.stop(broker, ids);
        }
    }
}
