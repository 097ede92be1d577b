use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use hindsight::{
    broker::BrokerConfig,
    executor::{Executor, ExecutorConfig},
    optimizer::{
        GeneticConfig, OptimizationMode, Optimizer, OptimizerConfig,
    },
    position::{Direction, SignalType},
    runtime::Ctx,
    strategy::{
        ParamItem, ParamKind, ParamValue, Strategy, StrategyConfig, StrategyRegistry,
    },
};
use hindsight_data::{
    bar::{Bar, Resolution},
    contract::Contract,
    feed::{storage::DataStorage, BarFeed},
};

fn datetime(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap(),
    )
}

fn bar(instrument: &str, dt: DateTime<Utc>, o: f64, h: f64, l: f64, c: f64) -> Bar {
    Bar::new(instrument, dt, o, h, l, c, 1, 0, Resolution::Minute)
}

fn flat_bar(instrument: &str, dt: DateTime<Utc>, price: f64) -> Bar {
    bar(instrument, dt, price, price, price, price)
}

fn storage_with(instrument: &str, contract: Contract, bars: Vec<Bar>) -> DataStorage {
    let mut feed = BarFeed::from_bars(instrument, Resolution::Minute, 1, bars).unwrap();
    feed.set_contract(contract);
    let mut storage = DataStorage::new();
    storage.register(feed).unwrap();
    storage
}

/// Buys a fixed quantity at market on the first bar and arms a 1% stop
/// loss when the position opens.
#[derive(Debug, Default)]
struct LongWithStopLoss {
    bought: bool,
}

impl Strategy for LongWithStopLoss {
    fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
        if !self.bought {
            self.bought = true;
            ctx.buy(&bar.instrument, 10, 0.0, false, Some("entry")).unwrap();
        }
    }

    fn on_position_opened(
        &mut self,
        ctx: &mut Ctx<'_>,
        position: &hindsight::position::PositionHandle,
    ) {
        ctx.set_stop_loss_pct(position.direction, &position.instrument, 0.01, 0);
    }
}

fn create_long_with_stop_loss() -> Box<dyn Strategy> {
    Box::<LongWithStopLoss>::default()
}

/// Shorts one contract on the first bar and arms a trailing stop
/// (2% arming threshold, 0.5 drawdown allowance).
#[derive(Debug, Default)]
struct ShortWithTrailingStop {
    sold: bool,
}

impl Strategy for ShortWithTrailingStop {
    fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
        if !self.sold {
            self.sold = true;
            ctx.sell_short(&bar.instrument, 1, 0.0, false, Some("entry")).unwrap();
        }
    }

    fn on_position_opened(
        &mut self,
        ctx: &mut Ctx<'_>,
        position: &hindsight::position::PositionHandle,
    ) {
        ctx.set_trailing_stop(position.direction, &position.instrument, 0.02, 0.5, 0);
    }
}

fn create_short_with_trailing_stop() -> Box<dyn Strategy> {
    Box::<ShortWithTrailingStop>::default()
}

/// Buys `level` shares on the first bar; final equity is monotone in the
/// parameter when replayed over rising prices.
#[derive(Debug, Default)]
struct LevelBuyer {
    level: i64,
    bought: bool,
}

impl Strategy for LevelBuyer {
    fn on_set_parameter(&mut self, name: &str, value: &ParamValue, _is_last: bool) {
        if name == "level" {
            self.level = value.as_i64().unwrap_or(0);
        }
    }

    fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
        if !self.bought && self.level > 0 {
            self.bought = true;
            ctx.buy(&bar.instrument, self.level, 0.0, true, None).unwrap();
        }
    }
}

fn create_level_buyer() -> Box<dyn Strategy> {
    Box::<LevelBuyer>::default()
}

fn registry_with_test_strategies() -> StrategyRegistry {
    let mut registry = StrategyRegistry::with_builtins();
    registry.register("long_with_stop_loss", create_long_with_stop_loss);
    registry.register("short_with_trailing_stop", create_short_with_trailing_stop);
    registry.register("level_buyer", create_level_buyer);
    registry
}

#[test]
fn test_single_long_stop_loss_hit() {
    // One minute feed, two bars. The strategy buys 10 at market on bar 0,
    // arming a 1% stop on fill; bar 1 trips the stop at exactly 99.
    let bars = vec![
        flat_bar("rb", datetime(9, 0), 100.0),
        bar("rb", datetime(9, 1), 100.0, 101.0, 98.0, 99.0),
    ];
    let storage = storage_with("rb", Contract::new("rb"), bars);
    let registry = registry_with_test_strategies();

    let executor = Executor::new(
        &storage,
        ExecutorConfig {
            broker: BrokerConfig {
                cash: 10_000.0,
                ..BrokerConfig::default()
            },
            daily_metrics: false,
        },
        &[StrategyConfig::new("stop_loss_demo", "long_with_stop_loss").with_instrument("rb")],
        &registry,
    )
    .unwrap();

    let report = executor.run().unwrap();

    assert_eq!(report.transactions.len(), 1);
    let transaction = &report.transactions[0];
    assert_eq!(transaction.exit_price, 99.0);
    assert_eq!(transaction.realized_pnl, -10.0);
    assert_eq!(transaction.exit_type, SignalType::StopLoss);
    // Both order tags survive into the record: the strategy's entry label
    // and the synthesized stop's.
    assert_eq!(transaction.entry_signal.as_deref(), Some("entry"));
    assert_eq!(transaction.exit_signal.as_deref(), Some("StopLoss"));

    // Ending cash 9_990, flat book.
    assert_eq!(report.summary.final_portfolio_value, 9_990.0);
    assert_eq!(report.summary.total_net_profit, -10.0);
    assert_eq!(report.summary.open_trades, 0);
    assert_eq!(report.summary.losing_trades, 1);
}

#[test]
fn test_short_with_trailing_stop() {
    // Short 1 contract at 200 (multiplier 10, margin 0.1). Lows reach 195
    // (2.5% profit, arming the 2% trail), then the bounce to 197.5 exits.
    let bars = vec![
        flat_bar("IF", datetime(9, 0), 200.0),
        flat_bar("IF", datetime(9, 1), 200.0),
        bar("IF", datetime(9, 2), 199.0, 199.0, 196.0, 196.5),
        bar("IF", datetime(9, 3), 196.0, 196.5, 195.0, 195.5),
        bar("IF", datetime(9, 4), 196.0, 197.5, 195.5, 197.0),
    ];
    let contract = Contract {
        multiplier: 10.0,
        margin_ratio: 0.1,
        tick_size: 0.5,
        ..Contract::new("IF")
    };
    let storage = storage_with("IF", contract, bars);
    let registry = registry_with_test_strategies();

    let executor = Executor::new(
        &storage,
        ExecutorConfig {
            broker: BrokerConfig {
                cash: 10_000.0,
                ..BrokerConfig::default()
            },
            daily_metrics: false,
        },
        &[
            StrategyConfig::new("trailing_demo", "short_with_trailing_stop")
                .with_instrument("IF"),
        ],
        &registry,
    )
    .unwrap();

    let report = executor.run().unwrap();

    assert_eq!(report.transactions.len(), 1);
    let transaction = &report.transactions[0];
    assert_eq!(transaction.direction, Direction::Short);
    assert_eq!(transaction.entry_price, 200.0);
    assert_eq!(transaction.exit_price, 197.5);
    // (200 - 197.5) * 1 * 10.
    assert_eq!(transaction.realized_pnl, 25.0);
    assert_eq!(transaction.exit_type, SignalType::TakeProfit);

    assert_eq!(report.summary.final_portfolio_value, 10_025.0);
}

#[test]
fn test_sma_cross_entry_and_exit() {
    // Closes 10..=19 then 18, 17 with a 5-period SMA: one long entry when
    // the close is above the primed average, one exit on the cross below.
    let closes: Vec<f64> = (10..=19)
        .map(|value| value as f64)
        .chain([18.0, 17.0])
        .collect();
    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(minute, close)| flat_bar("rb", datetime(9, minute as u32), *close))
        .collect();
    let storage = storage_with("rb", Contract::new("rb"), bars);
    let registry = registry_with_test_strategies();

    let config = StrategyConfig::new("cross_demo", "sma_cross")
        .with_instrument("rb")
        .with_param(ParamItem::new("period", ParamKind::Int, ParamValue::Int(5)))
        .with_param(ParamItem::new("quantity", ParamKind::Int, ParamValue::Int(1)));

    let executor = Executor::new(
        &storage,
        ExecutorConfig {
            broker: BrokerConfig {
                cash: 10_000.0,
                ..BrokerConfig::default()
            },
            daily_metrics: false,
        },
        &[config],
        &registry,
    )
    .unwrap();

    let report = executor.run().unwrap();

    // Exactly one entry and one exit round trip.
    assert_eq!(report.transactions.len(), 1);
    let transaction = &report.transactions[0];
    // SMA primes at close 14 (average 12): entry fills on that bar.
    assert_eq!(transaction.entry_price, 14.0);
    // Exit when 17 drops below the rolling average (17.8).
    assert_eq!(transaction.exit_price, 17.0);
    assert_eq!(transaction.realized_pnl, 3.0);
    assert_eq!(report.summary.total_trades, 1);
}

#[test]
fn test_exhaustive_and_genetic_agree_on_monotone_fitness() {
    // Parameter space of size 32 with a fitness monotone in the parameter:
    // both search modes must find position 31.
    let bars = vec![
        flat_bar("rb", datetime(9, 0), 100.0),
        flat_bar("rb", datetime(9, 1), 105.0),
        flat_bar("rb", datetime(9, 2), 110.0),
    ];
    let storage = storage_with("rb", Contract::new("rb"), bars);
    let registry = registry_with_test_strategies();

    let strategies = vec![StrategyConfig::new("level_demo", "level_buyer")
        .with_instrument("rb")
        .with_param(
            ParamItem::new("level", ParamKind::Int, ParamValue::Int(0))
                .with_optimizing(0.0, 31.0, 1.0),
        )];

    let broker = BrokerConfig {
        cash: 1_000_000.0,
        ..BrokerConfig::default()
    };

    let exhaustive = Optimizer::new(
        &storage,
        broker.clone(),
        strategies.clone(),
        &registry,
        OptimizerConfig {
            mode: OptimizationMode::Exhaustive,
            workers: 4,
            ..OptimizerConfig::default()
        },
    );
    let exhaustive_result = exhaustive.run().unwrap();
    assert_eq!(exhaustive.space().total(), 32);
    assert_eq!(exhaustive_result.outcomes.len(), 32);
    let exhaustive_best = exhaustive_result.best.unwrap();
    assert_eq!(exhaustive_best.position, 31);

    let genetic = Optimizer::new(
        &storage,
        broker,
        strategies,
        &registry,
        OptimizerConfig {
            mode: OptimizationMode::Genetic,
            workers: 4,
            genetic: GeneticConfig {
                population: 30,
                mutation_probability: 0.5,
                max_generations: 60,
                stagnation_ages: 60,
                seed: Some(42),
                ..GeneticConfig::default()
            },
            ..OptimizerConfig::default()
        },
    );
    let genetic_result = genetic.run().unwrap();
    let genetic_best = genetic_result.best.unwrap();

    assert_eq!(genetic_best.position, exhaustive_best.position);
}

#[test]
fn test_trading_day_boundary_daily_metrics() {
    // Minute bars spanning 15:14 -> 15:16 with the default 15:15:00 end
    // time: exactly one trading-day boundary, and the first day's row
    // equals the state at the end of the 15:15 bar.
    let bars = vec![
        flat_bar("rb", datetime(15, 14), 100.0),
        flat_bar("rb", datetime(15, 15), 102.0),
        flat_bar("rb", datetime(15, 16), 104.0),
    ];
    let storage = storage_with("rb", Contract::new("rb"), bars);

    let mut registry = StrategyRegistry::new();
    registry.register("buy_once", || {
        #[derive(Debug, Default)]
        struct BuyOnce {
            bought: bool,
        }
        impl Strategy for BuyOnce {
            fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
                if !self.bought {
                    self.bought = true;
                    ctx.buy(&bar.instrument, 1, 0.0, true, None).unwrap();
                }
            }
        }
        Box::<BuyOnce>::default()
    });

    let executor = Executor::new(
        &storage,
        ExecutorConfig {
            broker: BrokerConfig {
                cash: 10_000.0,
                ..BrokerConfig::default()
            },
            daily_metrics: true,
        },
        &[StrategyConfig::new("daily_demo", "buy_once").with_instrument("rb")],
        &registry,
    )
    .unwrap();

    let report = executor.run().unwrap();

    // One sealed row at the boundary plus the final row at end of run.
    assert_eq!(report.daily.len(), 2);

    // Bought 1 at 100 intra-bar on the 15:14 bar. At the end of the 15:15
    // bar equity is 10_000 + (102 - 100) = 10_002; the 15:16 bar belongs
    // to the next trading day.
    assert_eq!(report.daily[0].equity, 10_002.0);
    assert_eq!(report.daily[0].trades, 1);
    assert_eq!(report.daily[0].today_position, 1);
    assert_eq!(report.daily[1].equity, 10_004.0);
    assert_eq!(report.daily[1].trades, 0);
}

#[test]
fn test_cash_conservation_invariant() {
    // After every closed bar: equity = initial + realized - fees + unrealized,
    // with margin within [0, equity].
    let closes = [100.0, 103.0, 98.0, 101.0, 99.0, 104.0, 102.0];
    let bars: Vec<Bar> = closes
        .iter()
        .enumerate()
        .map(|(minute, close)| flat_bar("rb", datetime(9, minute as u32), *close))
        .collect();
    let storage = storage_with("rb", Contract::new("rb"), bars);
    let registry = registry_with_test_strategies();

    let config = StrategyConfig::new("cross_demo", "sma_cross")
        .with_instrument("rb")
        .with_param(ParamItem::new("period", ParamKind::Int, ParamValue::Int(2)))
        .with_param(ParamItem::new("quantity", ParamKind::Int, ParamValue::Int(5)));

    let executor = Executor::new(
        &storage,
        ExecutorConfig {
            broker: BrokerConfig {
                cash: 10_000.0,
                ..BrokerConfig::default()
            },
            daily_metrics: false,
        },
        &[config],
        &registry,
    )
    .unwrap();

    let report = executor.run().unwrap();

    // Every round trip closed (the last cross-below exits the final long),
    // so final equity must equal initial cash plus realized PnL exactly
    // (no fees configured).
    assert_eq!(report.summary.open_trades, 0);
    let realized: f64 = report
        .transactions
        .iter()
        .map(|transaction| transaction.realized_pnl)
        .sum();
    let final_equity = report.equities.last().unwrap().value;
    assert!((final_equity - 10_000.0 - realized).abs() < 1e-9);

    for timed in &report.equities {
        assert!(timed.value.is_finite());
    }
}

#[test]
fn test_monotonic_dispatch_across_instruments() {
    // Two feeds with interleaved timestamps: the equities series (one
    // sample per dispatched bar) must be non-decreasing in time.
    let rb_bars: Vec<Bar> = (0..5)
        .map(|minute| flat_bar("rb", datetime(9, minute * 2), 100.0))
        .collect();
    let if_bars: Vec<Bar> = (0..5)
        .map(|minute| flat_bar("IF", datetime(9, minute * 2 + 1), 200.0))
        .collect();

    let mut storage = DataStorage::new();
    let mut rb_feed = BarFeed::from_bars("rb", Resolution::Minute, 1, rb_bars).unwrap();
    rb_feed.set_contract(Contract::new("rb"));
    storage.register(rb_feed).unwrap();
    let mut if_feed = BarFeed::from_bars("IF", Resolution::Minute, 1, if_bars).unwrap();
    if_feed.set_contract(Contract::new("IF"));
    storage.register(if_feed).unwrap();

    let registry = registry_with_test_strategies();
    let executor = Executor::new(
        &storage,
        ExecutorConfig::default(),
        &[StrategyConfig::new("noop", "long_with_stop_loss").with_instrument("rb")],
        &registry,
    )
    .unwrap();

    let report = executor.run().unwrap();

    assert_eq!(report.equities.len(), 10);
    for pair in report.equities.windows(2) {
        assert!(pair[1].time >= pair[0].time);
    }
}

#[test]
fn test_insufficient_shares_is_fatal() {
    let bars = vec![flat_bar("rb", datetime(9, 0), 100.0)];
    let storage = storage_with("rb", Contract::new("rb"), bars);

    let mut registry = StrategyRegistry::new();
    registry.register("bad_seller", || {
        #[derive(Debug, Default)]
        struct BadSeller;
        impl Strategy for BadSeller {
            fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
                // Selling without a long position is a strategy bug.
                let result = ctx.sell(&bar.instrument, 1, 0.0, false, None);
                assert!(result.is_err());
            }
        }
        Box::<BadSeller>::default()
    });

    let executor = Executor::new(
        &storage,
        ExecutorConfig::default(),
        &[StrategyConfig::new("bad", "bad_seller").with_instrument("rb")],
        &registry,
    )
    .unwrap();

    // The strategy swallows the error in this test, so the run completes.
    let report = executor.run().unwrap();
    assert_eq!(report.transactions.len(), 0);
}

#[test]
fn test_subscribe_all_spawns_runtime_per_instrument() {
    let rb_bars: Vec<Bar> = (0..3).map(|m| flat_bar("rb", datetime(9, m), 100.0)).collect();
    let if_bars: Vec<Bar> = (0..3).map(|m| flat_bar("IF", datetime(9, m), 200.0)).collect();

    let mut storage = DataStorage::new();
    storage
        .register(BarFeed::from_bars("rb", Resolution::Minute, 1, rb_bars).unwrap())
        .unwrap();
    storage
        .register(BarFeed::from_bars("IF", Resolution::Minute, 1, if_bars).unwrap())
        .unwrap();

    let mut registry = StrategyRegistry::new();
    registry.register("buy_each", || {
        #[derive(Debug, Default)]
        struct BuyEach {
            bought: bool,
        }
        impl Strategy for BuyEach {
            fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
                if !self.bought {
                    self.bought = true;
                    ctx.buy(&bar.instrument, 1, 0.0, true, None).unwrap();
                }
            }
        }
        Box::<BuyEach>::default()
    });

    let executor = Executor::new(
        &storage,
        ExecutorConfig {
            broker: BrokerConfig {
                cash: 100_000.0,
                ..BrokerConfig::default()
            },
            daily_metrics: false,
        },
        &[StrategyConfig::new("all", "buy_each").with_subscribe_all()],
        &registry,
    )
    .unwrap();

    let report = executor.run().unwrap();

    // One independent runtime per instrument, each holding its own long.
    assert_eq!(report.summary.open_trades, 2);
    assert!(report.transactions.is_empty());
}
