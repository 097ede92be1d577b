use crate::{
    analyzer::SimplifiedMetrics,
    broker::BrokerConfig,
    error::EngineError,
    optimizer::{batch::BatchRunner, genetic::Population, space::ParameterSpace},
    strategy::{ParamItem, StrategyConfig, StrategyRegistry},
};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Worker pool scheduling executors per parameter tuple.
pub mod batch;

/// Genetic population search over position indices.
pub mod genetic;

/// Lazy mixed-radix enumeration of the parameter Cartesian product.
pub mod space;

pub use genetic::GeneticConfig;

/// Search mode over the parameter space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    #[default]
    Exhaustive,
    Genetic,
}

/// Weighted combination of outcome metrics ranking parameter tuples.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct FitnessWeights {
    pub cum_returns: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            cum_returns: 1.0,
            max_drawdown: 0.0,
            sharpe_ratio: 0.0,
        }
    }
}

impl FitnessWeights {
    pub fn score(&self, metrics: &SimplifiedMetrics) -> f64 {
        self.cum_returns * metrics.cum_returns
            + self.max_drawdown * metrics.max_drawdown
            + self.sharpe_ratio * metrics.sharpe_ratio
    }
}

/// Optimizer configuration.
#[derive(Debug, Clone, Default)]
pub struct OptimizerConfig {
    pub mode: OptimizationMode,
    /// Worker threads; 0 selects the detected CPU count.
    pub workers: usize,
    pub weights: FitnessWeights,
    pub genetic: GeneticConfig,
}

/// One evaluated parameter tuple.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub position: u64,
    pub params: Vec<Vec<ParamItem>>,
    pub metrics: SimplifiedMetrics,
    pub score: f64,
}

/// Every evaluated tuple plus the winner.
#[derive(Debug, Clone, Default)]
pub struct OptimizationResult {
    pub outcomes: Vec<OptimizationOutcome>,
    pub best: Option<OptimizationOutcome>,
}

/// Enumerates or genetically searches the strategy parameter space,
/// scheduling one executor per tuple across the worker pool and ranking
/// outcomes by fitness score.
#[derive(Debug)]
pub struct Optimizer<'a> {
    storage: &'a hindsight_data::feed::storage::DataStorage,
    broker_config: BrokerConfig,
    strategies: Vec<StrategyConfig>,
    registry: &'a StrategyRegistry,
    config: OptimizerConfig,
    space: ParameterSpace,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        storage: &'a hindsight_data::feed::storage::DataStorage,
        broker_config: BrokerConfig,
        strategies: Vec<StrategyConfig>,
        registry: &'a StrategyRegistry,
        config: OptimizerConfig,
    ) -> Self {
        let space = ParameterSpace::build(&strategies);
        info!(space_size = space.total(), mode = ?config.mode, "parameter space built");

        Self {
            storage,
            broker_config,
            strategies,
            registry,
            config,
            space,
        }
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn run(&self) -> Result<OptimizationResult, EngineError> {
        if self.space.total() == 0 {
            warn!("parameter space is empty, optimization is a no-op");
            return Ok(OptimizationResult::default());
        }

        match self.config.mode {
            OptimizationMode::Exhaustive => self.run_exhaustive(),
            OptimizationMode::Genetic => self.run_genetic(),
        }
    }

    fn runner(&self) -> BatchRunner<'_> {
        BatchRunner::new(
            self.storage,
            self.broker_config.clone(),
            &self.strategies,
            self.registry,
            self.config.workers,
        )
    }

    fn outcome(&self, position: u64, metrics: SimplifiedMetrics) -> OptimizationOutcome {
        OptimizationOutcome {
            position,
            params: self.space.decode(position),
            metrics,
            score: self.config.weights.score(&metrics),
        }
    }

    fn run_exhaustive(&self) -> Result<OptimizationResult, EngineError> {
        let positions: Vec<u64> = (0..self.space.total()).collect();
        let metrics = self.runner().run(&self.space, &positions)?;

        let outcomes: Vec<OptimizationOutcome> = positions
            .into_iter()
            .zip(metrics)
            .map(|(position, metrics)| self.outcome(position, metrics))
            .collect();

        let best = outcomes
            .iter()
            .max_by(|left, right| {
                left.score
                    .partial_cmp(&right.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned();

        Ok(OptimizationResult { outcomes, best })
    }

    fn run_genetic(&self) -> Result<OptimizationResult, EngineError> {
        let runner = self.runner();
        let mut evaluated: FnvHashMap<u64, SimplifiedMetrics> = FnvHashMap::default();

        let mut population = Population::new(self.config.genetic.clone(), self.space.total());
        population.run(&mut |chromosomes: &[u64]| {
            // Only backtest chromosomes not seen in an earlier generation.
            let fresh: Vec<u64> = {
                let mut fresh: Vec<u64> = chromosomes
                    .iter()
                    .copied()
                    .filter(|position| !evaluated.contains_key(position))
                    .collect();
                fresh.sort_unstable();
                fresh.dedup();
                fresh
            };

            if !fresh.is_empty() {
                let metrics = runner.run(&self.space, &fresh)?;
                for (position, metrics) in fresh.into_iter().zip(metrics) {
                    evaluated.insert(position, metrics);
                }
            }

            Ok(chromosomes
                .iter()
                .map(|position| {
                    let metrics = evaluated.get(position).copied().unwrap_or_default();
                    self.config.weights.score(&metrics)
                })
                .collect())
        })?;

        let mut outcomes: Vec<OptimizationOutcome> = evaluated
            .into_iter()
            .map(|(position, metrics)| self.outcome(position, metrics))
            .collect();
        outcomes.sort_by_key(|outcome| outcome.position);

        let best = population
            .elitist()
            .and_then(|elitist| {
                outcomes
                    .iter()
                    .find(|outcome| outcome.position == elitist.chromosome)
            })
            .cloned();

        Ok(OptimizationResult { outcomes, best })
    }
}
