use crate::{
    analyzer::{daily::DailyMetrics, AnalyzerSuite, PerformanceSummary, SimplifiedMetrics},
    broker::{BacktestingBroker, BrokerConfig, BrokerNotice},
    dispatch::{DispatchHandler, Dispatcher},
    error::EngineError,
    position::Transaction,
    process::Process,
    strategy::{StrategyConfig, StrategyRegistry},
    IdGenerator, Timed,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use hindsight_data::{bar::Bar, feed::storage::DataStorage, session::ActivePeriod};
use smol_str::SmolStr;
use tracing::{debug, info};

/// Per-executor configuration.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub broker: BrokerConfig,
    /// Aggregate daily metrics (enables trading-day notifications).
    pub daily_metrics: bool,
}

/// The complete result set of one finished backtest.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub summary: PerformanceSummary,
    pub daily: Vec<DailyMetrics>,
    pub transactions: Vec<Transaction>,
    pub returns: Vec<Timed<f64>>,
    pub cumulative_returns: Vec<Timed<f64>>,
    pub equities: Vec<Timed<f64>>,
}

impl BacktestReport {
    pub fn simplified(&self) -> SimplifiedMetrics {
        self.summary.simplified()
    }
}

/// One independent backtest: a dispatcher over cloned feeds, a broker
/// initialised from the contract table, one process per strategy
/// configuration, and the analyzer suite.
#[derive(Debug)]
pub struct Executor {
    id: u64,
    tag: u64,
    broker: BacktestingBroker,
    dispatcher: Dispatcher,
    processes: Vec<Process>,
    analyzers: AnalyzerSuite,
    ids: IdGenerator,
    transactions: Vec<Transaction>,
}

impl Executor {
    pub fn new(
        storage: &DataStorage,
        config: ExecutorConfig,
        strategies: &[StrategyConfig],
        registry: &StrategyRegistry,
    ) -> Result<Self, EngineError> {
        let mut broker_config = config.broker.clone();
        if config.daily_metrics {
            broker_config.notify_new_trading_day = true;
        }
        let initial_cash = broker_config.cash;
        let mut broker = BacktestingBroker::new(broker_config)?;

        for contract in storage.contracts() {
            broker.register_contract(contract);
        }

        let mut dispatcher = Dispatcher::new();
        let feeds = storage.clone_feeds();

        // Session table: the tradable periods each instrument's feed
        // discovered, used for runtime activation gating.
        let mut session_table: FnvHashMap<SmolStr, Vec<ActivePeriod>> = FnvHashMap::default();
        for feed in &feeds {
            session_table
                .entry(feed.instrument().clone())
                .or_default()
                .extend(feed.tradable_periods().iter().copied());
        }

        let history_feeds = feeds.clone();
        for feed in feeds {
            dispatcher.register(feed);
        }

        let mut processes = Vec::with_capacity(strategies.len());
        for config in strategies {
            config.validate()?;
            let creator = registry
                .creator(&config.entry)
                .ok_or_else(|| EngineError::NoSuchStrategy(config.entry.clone()))?;
            processes.push(Process::new(
                config.clone(),
                creator,
                history_feeds.clone(),
                session_table.clone(),
            ));
        }

        Ok(Self {
            id: 0,
            tag: 0,
            broker,
            dispatcher,
            processes,
            analyzers: AnalyzerSuite::new(initial_cash, config.daily_metrics),
            ids: IdGenerator::new(),
            transactions: Vec::new(),
        })
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Opaque marker carried through optimizer scheduling.
    pub fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn broker(&self) -> &BacktestingBroker {
        &self.broker
    }

    /// Replay the feeds to exhaustion and produce the run's result set.
    pub fn run(mut self) -> Result<BacktestReport, EngineError> {
        info!(executor = self.id, "backtest started");

        let mut dispatcher = std::mem::take(&mut self.dispatcher);
        dispatcher.run(&mut self)?;
        self.dispatcher = dispatcher;

        // Teardown: strategy hooks, then seal analyzers.
        let Self {
            broker,
            processes,
            ids,
            ..
        } = &mut self;
        for process in processes.iter_mut() {
            process.stop(broker, ids);
        }
        self.drain_events()?;
        self.analyzers.finalize();

        let summary = self.analyzers.summary(&self.broker);
        info!(
            executor = self.id,
            cum_return = summary.cum_return,
            net_profit = summary.total_net_profit,
            trades = summary.total_trades,
            "backtest finished"
        );

        Ok(BacktestReport {
            summary,
            daily: self.analyzers.daily_rows().to_vec(),
            transactions: self.transactions,
            returns: self.analyzers.returns().returns().to_vec(),
            cumulative_returns: self.analyzers.returns().cumulative().to_vec(),
            equities: self.analyzers.equities().to_vec(),
        })
    }

    /// Route queued broker notices to processes and analyzers until the
    /// queue runs dry (routing may trigger intra-bar fills that queue
    /// more).
    fn drain_events(&mut self) -> Result<(), EngineError> {
        loop {
            let notices = self.broker.take_notices();
            if notices.is_empty() {
                break;
            }

            for notice in notices {
                match notice {
                    BrokerNotice::Order(event) => {
                        for process in &mut self.processes {
                            process.on_order_event(&event, &mut self.broker, &mut self.ids)?;
                        }
                    }
                    BrokerNotice::NewTradingDay { prev, curr } => {
                        debug!(%prev, %curr, "new trading day");
                        self.analyzers.on_new_trading_day(prev, curr);
                    }
                }
            }

            self.collect_transactions();
        }
        Ok(())
    }

    fn collect_transactions(&mut self) {
        for process in &mut self.processes {
            for transaction in process.drain_transactions() {
                self.analyzers.on_transaction(&transaction);
                self.transactions.push(transaction);
            }
        }
    }
}

impl DispatchHandler for Executor {
    fn on_time_elapsed(
        &mut self,
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        for process in &mut self.processes {
            process.on_time_elapsed(prev, next, &mut self.broker, &mut self.ids);
        }
        self.drain_events()
    }

    fn on_bar(&mut self, _feed_id: u32, bar: Bar) -> Result<(), EngineError> {
        // 1: the broker consumes the bar first (fills pending orders,
        //    detects trading-day boundaries, marks equity).
        self.broker.on_bar(&bar);
        self.drain_events()?;

        // 2: strategies observe the bar and may place orders; intra-bar
        //    orders fill inside this step.
        for process in &mut self.processes {
            process.on_bar(&bar, &mut self.broker, &mut self.ids)?;
        }
        self.drain_events()?;

        // 3: analyzers observe the fully settled bar.
        self.analyzers.on_bar_end(&self.broker, &bar);
        Ok(())
    }
}
