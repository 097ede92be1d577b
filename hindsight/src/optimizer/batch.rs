use crate::{
    analyzer::SimplifiedMetrics,
    broker::BrokerConfig,
    error::EngineError,
    executor::{Executor, ExecutorConfig},
    optimizer::space::ParameterSpace,
    strategy::{StrategyConfig, StrategyRegistry},
};
use crossbeam_channel::unbounded;
use hindsight_data::feed::storage::DataStorage;
use parking_lot::Mutex;
use std::thread;
use tracing::debug;

/// Runs one executor per parameter-space position across a pool of worker
/// threads.
///
/// Workers share the immutable bar data through feed clones; each executor
/// owns its broker and position ledger, so there is no shared mutable
/// state. Completion is signalled through a channel the scheduler blocks
/// on. Both optimization modes drive their evaluations through this
/// runner.
#[derive(Debug)]
pub struct BatchRunner<'a> {
    storage: &'a DataStorage,
    broker_config: BrokerConfig,
    strategies: &'a [StrategyConfig],
    registry: &'a StrategyRegistry,
    workers: usize,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        storage: &'a DataStorage,
        broker_config: BrokerConfig,
        strategies: &'a [StrategyConfig],
        registry: &'a StrategyRegistry,
        workers: usize,
    ) -> Self {
        let workers = if workers == 0 {
            thread::available_parallelism()
                .map(|workers| workers.get())
                .unwrap_or(1)
        } else {
            workers
        };

        Self {
            storage,
            broker_config,
            strategies,
            registry,
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Backtest every position, returning metrics in input order.
    pub fn run(
        &self,
        space: &ParameterSpace,
        positions: &[u64],
    ) -> Result<Vec<SimplifiedMetrics>, EngineError> {
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let (job_tx, job_rx) = unbounded::<(usize, u64)>();
        for job in positions.iter().copied().enumerate() {
            job_tx
                .send(job)
                .map_err(|error| EngineError::Worker(error.to_string()))?;
        }
        drop(job_tx);

        let workers = self.workers.min(positions.len());
        debug!(positions = positions.len(), workers, "batch started");

        let results: Mutex<Vec<Option<Result<SimplifiedMetrics, EngineError>>>> =
            Mutex::new((0..positions.len()).map(|_| None).collect());

        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let results = &results;
                scope.spawn(move || {
                    while let Ok((index, position)) = job_rx.recv() {
                        let result = self.run_one(space, position, index as u64);
                        results.lock()[index] = Some(result);
                    }
                    debug!(worker, "batch worker finished");
                });
            }
        });

        let mut metrics = Vec::with_capacity(positions.len());
        for (index, slot) in results.into_inner().into_iter().enumerate() {
            match slot {
                Some(result) => metrics.push(result?),
                None => {
                    return Err(EngineError::Worker(format!(
                        "batch lost the result for position index {index}"
                    )));
                }
            }
        }

        Ok(metrics)
    }

    fn run_one(
        &self,
        space: &ParameterSpace,
        position: u64,
        tag: u64,
    ) -> Result<SimplifiedMetrics, EngineError> {
        let strategies = space.apply(self.strategies, position);

        let config = ExecutorConfig {
            broker: self.broker_config.clone(),
            daily_metrics: false,
        };
        let mut executor = Executor::new(self.storage, config, &strategies, self.registry)?;
        executor.set_id(position + 1);
        executor.set_tag(tag);

        let report = executor.run()?;
        Ok(report.simplified())
    }
}
