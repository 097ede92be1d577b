use crate::{
    broker::order::OrderEvent,
    error::EngineError,
    position::PositionHandle,
    runtime::Ctx,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use hindsight_data::bar::Bar;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// Parameter value kinds accepted by strategies.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
}

/// A typed strategy parameter value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    /// Parse `raw` according to `kind`.
    pub fn parse(kind: ParamKind, raw: &str) -> Result<Self, EngineError> {
        let raw = raw.trim();
        match kind {
            ParamKind::Str => Ok(ParamValue::Str(raw.to_string())),
            ParamKind::Int => raw
                .parse::<i64>()
                .or_else(|_| raw.parse::<f64>().map(|float| float as i64))
                .map(ParamValue::Int)
                .map_err(|_| EngineError::ConfigInvalid(format!("invalid int parameter '{raw}'"))),
            ParamKind::Float => raw
                .parse::<f64>()
                .map(ParamValue::Float)
                .map_err(|_| EngineError::ConfigInvalid(format!("invalid float parameter '{raw}'"))),
            ParamKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(ParamValue::Bool(true)),
                "false" | "0" | "no" => Ok(ParamValue::Bool(false)),
                other => Err(EngineError::ConfigInvalid(format!(
                    "invalid bool parameter '{other}'"
                ))),
            },
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) => Some(*value),
            ParamValue::Float(value) => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(value) => Some(*value),
            ParamValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(value) => write!(f, "{value}"),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Float(value) => write!(f, "{value}"),
            ParamValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

/// An optimizable `(start, end, step)` range attached to a parameter.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct OptimizingRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

/// One strategy parameter: name, type, current value and optional
/// optimization range.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParamItem {
    pub name: SmolStr,
    pub kind: ParamKind,
    pub value: ParamValue,
    pub optimizing: Option<OptimizingRange>,
}

impl ParamItem {
    pub fn new(name: impl Into<SmolStr>, kind: ParamKind, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            optimizing: None,
        }
    }

    pub fn with_optimizing(mut self, start: f64, end: f64, step: f64) -> Self {
        self.optimizing = Some(OptimizingRange { start, end, step });
        self
    }
}

/// Binds a strategy registry entry to the instruments it subscribes and the
/// parameters it receives.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyConfig {
    pub name: SmolStr,
    pub description: String,
    pub author: String,
    /// Registry key of the creator building the strategy object.
    pub entry: SmolStr,
    pub instruments: Vec<SmolStr>,
    /// Spawn one runtime per instrument as bars for it appear.
    pub subscribe_all: bool,
    pub params: Vec<ParamItem>,
}

impl StrategyConfig {
    pub fn new(name: impl Into<SmolStr>, entry: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            author: String::new(),
            entry: entry.into(),
            instruments: Vec::new(),
            subscribe_all: false,
            params: Vec::new(),
        }
    }

    pub fn with_instrument(mut self, instrument: impl Into<SmolStr>) -> Self {
        self.instruments.push(instrument.into());
        self
    }

    pub fn with_subscribe_all(mut self) -> Self {
        self.subscribe_all = true;
        self
    }

    pub fn with_param(mut self, param: ParamItem) -> Self {
        self.params.push(param);
        self
    }

    /// Whether any parameter carries an optimization range.
    pub fn has_optimizing(&self) -> bool {
        self.params.iter().any(|param| param.optimizing.is_some())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.name.is_empty() {
            return Err(EngineError::ConfigInvalid("strategy name is empty".into()));
        }
        if self.entry.is_empty() {
            return Err(EngineError::ConfigInvalid(format!(
                "strategy '{}' has no creator entry",
                self.name
            )));
        }
        if self.instruments.is_empty() && !self.subscribe_all {
            return Err(EngineError::ConfigInvalid(format!(
                "strategy '{}' subscribes no instruments",
                self.name
            )));
        }
        Ok(())
    }
}

/// The strategy callback contract. Every hook is optional except
/// [`Strategy::on_bar`]; unused hooks are no-ops.
///
/// Strategies never hold references into the engine: they observe events,
/// read state through the [`Ctx`] and act through its order/stop helpers.
#[allow(unused_variables)]
pub trait Strategy {
    /// Once on instantiation, before parameters are applied.
    fn on_create(&mut self, ctx: &mut Ctx<'_>) {}

    /// Once per configured parameter before the run starts.
    fn on_set_parameter(&mut self, name: &str, value: &ParamValue, is_last: bool) {}

    /// After all parameters are applied.
    fn on_start(&mut self, ctx: &mut Ctx<'_>) {}

    /// Each bar for the runtime's instruments.
    fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar);

    /// Aggregated view across all subscribed instruments, after
    /// [`Strategy::on_bar`].
    fn on_bars(&mut self, ctx: &mut Ctx<'_>, bars: &[Bar]) {}

    fn on_position_opened(&mut self, ctx: &mut Ctx<'_>, position: &PositionHandle) {}

    fn on_position_changed(&mut self, ctx: &mut Ctx<'_>, position: &PositionHandle) {}

    fn on_position_closed(&mut self, ctx: &mut Ctx<'_>, position: &PositionHandle) {}

    fn on_order_filled(&mut self, ctx: &mut Ctx<'_>, event: &OrderEvent) {}

    fn on_order_partially_filled(&mut self, ctx: &mut Ctx<'_>, event: &OrderEvent) {}

    fn on_order_failed(&mut self, ctx: &mut Ctx<'_>, event: &OrderEvent) {}

    /// On each dispatcher tick boundary.
    fn on_time_elapsed(&mut self, ctx: &mut Ctx<'_>, prev: DateTime<Utc>, next: DateTime<Utc>) {}

    /// Delivery of bars requested via [`Ctx::request_historical_data`].
    fn on_historical_data(&mut self, ctx: &mut Ctx<'_>, bar: &Bar, is_last: bool) {}

    fn on_stop(&mut self, ctx: &mut Ctx<'_>) {}

    fn on_destroy(&mut self, ctx: &mut Ctx<'_>) {}
}

impl fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Strategy")
    }
}

/// Creator callback producing a fresh strategy instance.
pub type StrategyCreator = fn() -> Box<dyn Strategy>;

/// Static registry of strategy creators keyed by name.
///
/// Strategies are compiled into the binary and registered here; scenario
/// files reference them by entry name.
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    creators: FnvHashMap<SmolStr, StrategyCreator>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in demonstration strategies.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("sma_cross", builtin::create_sma_cross);
        registry
    }

    pub fn register(&mut self, name: impl Into<SmolStr>, creator: StrategyCreator) {
        self.creators.insert(name.into(), creator);
    }

    /// The raw creator callback registered under `name`.
    pub fn creator(&self, name: &str) -> Option<StrategyCreator> {
        self.creators.get(name).copied()
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Strategy>, EngineError> {
        self.creators
            .get(name)
            .map(|creator| creator())
            .ok_or_else(|| EngineError::NoSuchStrategy(SmolStr::new(name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.creators.contains_key(name)
    }
}

/// Built-in demonstration strategies, available under fixed registry names.
pub mod builtin {
    use super::*;
    use hindsight_ta::{
        cross::{Cross, CrossEvent},
        ma::Sma,
        EventWindow,
    };

    /// Close-over-SMA crossover: goes long when the close moves above its
    /// moving average, exits on the move back below. Orders execute against
    /// the signalling bar.
    pub struct SmaCross {
        period: usize,
        quantity: i64,
        sma: Sma,
        cross: Cross,
    }

    impl fmt::Debug for SmaCross {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("SmaCross").field("period", &self.period).finish()
        }
    }

    impl Default for SmaCross {
        fn default() -> Self {
            Self {
                period: 5,
                quantity: 1,
                sma: Sma::new(5),
                cross: Cross::new(),
            }
        }
    }

    impl Strategy for SmaCross {
        fn on_set_parameter(&mut self, name: &str, value: &ParamValue, _is_last: bool) {
            match name {
                "period" => {
                    if let Some(period) = value.as_i64() {
                        self.period = period.max(2) as usize;
                    }
                }
                "quantity" => {
                    if let Some(quantity) = value.as_i64() {
                        self.quantity = quantity.max(1);
                    }
                }
                _ => {}
            }
        }

        fn on_start(&mut self, _ctx: &mut Ctx<'_>) {
            self.sma = Sma::new(self.period);
            self.cross = Cross::new();
        }

        fn on_bar(&mut self, ctx: &mut Ctx<'_>, bar: &Bar) {
            self.sma.on_new_value(bar.datetime, bar.close);
            let average = self.sma.value();
            if average.is_nan() {
                return;
            }

            let open_shares = ctx
                .long_position(&bar.instrument)
                .map(|position| position.total_shares())
                .unwrap_or(0);

            // A cross already in progress when the average primes still
            // counts as an upward move.
            let event = self.cross.update(bar.close, average);
            if open_shares == 0 && (event == CrossEvent::Above || bar.close > average) {
                let _ = ctx.buy(&bar.instrument, self.quantity, 0.0, true, Some("cross_above"));
            } else if open_shares > 0 && bar.close < average {
                let _ = ctx.sell(&bar.instrument, open_shares, 0.0, true, Some("cross_below"));
            }
        }
    }

    pub fn create_sma_cross() -> Box<dyn Strategy> {
        Box::<SmaCross>::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_value_parse() {
        struct TestCase {
            kind: ParamKind,
            raw: &'static str,
            expected: Option<ParamValue>,
        }

        let cases = vec![
            // TC0: plain integer
            TestCase {
                kind: ParamKind::Int,
                raw: "42",
                expected: Some(ParamValue::Int(42)),
            },
            // TC1: optimizer-produced float narrowed to int
            TestCase {
                kind: ParamKind::Int,
                raw: "12.000000",
                expected: Some(ParamValue::Int(12)),
            },
            // TC2: float
            TestCase {
                kind: ParamKind::Float,
                raw: "0.015",
                expected: Some(ParamValue::Float(0.015)),
            },
            // TC3: bool
            TestCase {
                kind: ParamKind::Bool,
                raw: "true",
                expected: Some(ParamValue::Bool(true)),
            },
            // TC4: malformed int
            TestCase { kind: ParamKind::Int, raw: "abc", expected: None },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let actual = ParamValue::parse(test.kind, test.raw).ok();
            assert_eq!(actual, test.expected, "TC{index} failed");
        }
    }

    #[test]
    fn test_config_validation() {
        let valid = StrategyConfig::new("demo", "sma_cross").with_instrument("rb2405");
        assert!(valid.validate().is_ok());

        let no_entry = StrategyConfig::new("demo", "").with_instrument("rb2405");
        assert!(matches!(no_entry.validate(), Err(EngineError::ConfigInvalid(_))));

        let no_instruments = StrategyConfig::new("demo", "sma_cross");
        assert!(no_instruments.validate().is_err());

        let subscribe_all = StrategyConfig::new("demo", "sma_cross").with_subscribe_all();
        assert!(subscribe_all.validate().is_ok());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = StrategyRegistry::with_builtins();
        assert!(registry.contains("sma_cross"));
        assert!(registry.create("sma_cross").is_ok());
        assert!(matches!(
            registry.create("missing"),
            Err(EngineError::NoSuchStrategy(_))
        ));
    }
}
