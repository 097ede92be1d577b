use clap::Parser;
use hindsight::{
    error::EngineError,
    executor::{Executor, ExecutorConfig},
    logging::{init_json_logging, init_logging},
    optimizer::{Optimizer, OptimizerConfig},
    report::{write_optimization_csv, write_reports},
    scenario::Scenario,
    strategy::StrategyRegistry,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};

/// Event-driven backtesting and parameter-optimization engine.
#[derive(Debug, Parser)]
#[command(name = "engine", version, about)]
struct Args {
    /// Scenario file describing broker, data streams, strategies and
    /// reports.
    scenario: PathBuf,

    /// Emit JSON-formatted logs.
    #[arg(long)]
    json_logs: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.json_logs {
        init_json_logging();
    } else {
        init_logging();
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), EngineError> {
    let scenario = Scenario::from_file(&args.scenario)?;
    let storage = scenario.load_storage()?;
    let registry = StrategyRegistry::with_builtins();

    if scenario.is_optimization() {
        let optimizer = Optimizer::new(
            &storage,
            scenario.broker.clone(),
            scenario.strategies.clone(),
            &registry,
            OptimizerConfig {
                mode: scenario.mode,
                workers: scenario.cores,
                ..OptimizerConfig::default()
            },
        );

        let result = optimizer.run()?;
        if let Some(best) = &result.best {
            info!(
                position = best.position,
                score = best.score,
                cum_return = best.metrics.cum_returns,
                "optimization finished"
            );
        }

        if let Some(path) = &scenario.report.optimization {
            write_optimization_csv(path, &result)?;
        }
    } else {
        let executor = Executor::new(
            &storage,
            ExecutorConfig {
                broker: scenario.broker.clone(),
                daily_metrics: scenario.report.daily.is_some(),
            },
            &scenario.strategies,
            &registry,
        )?;

        let report = executor.run()?;
        write_reports(&report, &scenario.report)?;
        info!(
            cum_return = report.summary.cum_return,
            net_profit = report.summary.total_net_profit,
            trades = report.summary.total_trades,
            "backtest finished"
        );
    }

    Ok(())
}
