use crate::{
    broker::BrokerConfig,
    error::EngineError,
    optimizer::OptimizationMode,
    report::ReportConfig,
    strategy::{ParamItem, ParamKind, ParamValue, StrategyConfig},
};
use hindsight_data::{
    bar::Resolution,
    contract::{CommissionKind, Contract, SlippageKind},
    feed::storage::{DataStorage, FileFormat},
};
use serde::Deserialize;
use smol_str::SmolStr;
use std::path::{Path, PathBuf};
use tracing::info;

/// One data stream declared by a scenario: source file, resolution and the
/// instrument's contract.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub name: SmolStr,
    pub resolution: Resolution,
    pub path: PathBuf,
    pub format: FileFormat,
    pub realtime: bool,
    pub contract: Contract,
}

/// A fully parsed scenario file: environment, broker, data streams,
/// strategies and report outputs.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub cores: usize,
    pub mode: OptimizationMode,
    pub broker: BrokerConfig,
    pub streams: Vec<StreamConfig>,
    pub strategies: Vec<StrategyConfig>,
    pub report: ReportConfig,
}

impl Scenario {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let scenario = Self::from_xml(&content)?;
        info!(
            file = %path.as_ref().display(),
            streams = scenario.streams.len(),
            strategies = scenario.strategies.len(),
            "scenario loaded"
        );
        Ok(scenario)
    }

    pub fn from_xml(xml: &str) -> Result<Self, EngineError> {
        let raw: ScenarioXml = quick_xml::de::from_str(xml)?;
        Scenario::try_from(raw)
    }

    /// Presence of any `optimizing` node switches the run to optimization.
    pub fn is_optimization(&self) -> bool {
        self.strategies.iter().any(StrategyConfig::has_optimizing)
    }

    /// Load every declared stream into a fresh [`DataStorage`].
    pub fn load_storage(&self) -> Result<DataStorage, EngineError> {
        let mut storage = DataStorage::new();
        for stream in &self.streams {
            storage.load_file(
                &stream.path,
                stream.format,
                stream.name.clone(),
                stream.resolution,
                stream.contract.clone(),
            )?;
        }
        Ok(storage)
    }
}

#[derive(Debug, Deserialize)]
struct ScenarioXml {
    environment: Option<EnvironmentXml>,
    broker: BrokerXml,
    datastreams: DatastreamsXml,
    #[serde(rename = "strategy", default)]
    strategies: Vec<StrategyXml>,
    report: Option<ReportXml>,
}

#[derive(Debug, Deserialize)]
struct EnvironmentXml {
    #[serde(rename = "@cores")]
    cores: Option<usize>,
    #[serde(rename = "@mode")]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrokerXml {
    #[serde(rename = "@cash")]
    cash: f64,
    #[serde(rename = "@tradingdayend")]
    trading_day_end: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DatastreamsXml {
    #[serde(rename = "datastream", default)]
    streams: Vec<DatastreamXml>,
}

#[derive(Debug, Deserialize)]
struct DatastreamXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@resolution")]
    resolution: String,
    #[serde(rename = "@path")]
    path: String,
    #[serde(rename = "@format")]
    format: String,
    #[serde(rename = "@realtime")]
    realtime: Option<bool>,
    contract: Option<ContractXml>,
}

#[derive(Debug, Deserialize)]
struct ContractXml {
    #[serde(rename = "@multiplier")]
    multiplier: Option<f64>,
    #[serde(rename = "@ticksize")]
    tick_size: Option<f64>,
    #[serde(rename = "@marginratio")]
    margin_ratio: Option<f64>,
    #[serde(rename = "@productid")]
    product_id: Option<String>,
    commission: Option<FeeXml>,
    slippage: Option<FeeXml>,
}

#[derive(Debug, Deserialize)]
struct FeeXml {
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "@value")]
    value: f64,
}

#[derive(Debug, Deserialize)]
struct StrategyXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@description")]
    description: Option<String>,
    #[serde(rename = "@author")]
    author: Option<String>,
    #[serde(rename = "@entry")]
    entry: String,
    #[serde(rename = "@stream")]
    stream: Option<String>,
    #[serde(rename = "parameter", default)]
    parameters: Vec<ParameterXml>,
}

#[derive(Debug, Deserialize)]
struct ParameterXml {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@type")]
    kind: String,
    #[serde(rename = "@value")]
    value: String,
    optimizing: Option<OptimizingXml>,
}

#[derive(Debug, Deserialize)]
struct OptimizingXml {
    #[serde(rename = "@start")]
    start: f64,
    #[serde(rename = "@end")]
    end: f64,
    #[serde(rename = "@step")]
    step: f64,
}

#[derive(Debug, Deserialize)]
struct ReportXml {
    #[serde(rename = "@summary")]
    summary: Option<String>,
    #[serde(rename = "@summaryjson")]
    summary_json: Option<String>,
    #[serde(rename = "@daily")]
    daily: Option<String>,
    #[serde(rename = "@trades")]
    trades: Option<String>,
    #[serde(rename = "@positions")]
    positions: Option<String>,
    #[serde(rename = "@returns")]
    returns: Option<String>,
    #[serde(rename = "@equities")]
    equities: Option<String>,
    #[serde(rename = "@optimization")]
    optimization: Option<String>,
}

fn parse_resolution(raw: &str) -> Result<Resolution, EngineError> {
    match raw.to_ascii_lowercase().as_str() {
        "trade" | "tick" => Ok(Resolution::Tick),
        "second" => Ok(Resolution::Second),
        "minute" => Ok(Resolution::Minute),
        "hour" => Ok(Resolution::Hour),
        "day" => Ok(Resolution::Day),
        "week" => Ok(Resolution::Week),
        other => Err(EngineError::Scenario(format!("unknown resolution '{other}'"))),
    }
}

fn parse_param_kind(raw: &str) -> Result<ParamKind, EngineError> {
    match raw.to_ascii_lowercase().as_str() {
        "string" | "str" => Ok(ParamKind::Str),
        "int" | "integer" => Ok(ParamKind::Int),
        "double" | "float" => Ok(ParamKind::Float),
        "bool" | "boolean" => Ok(ParamKind::Bool),
        other => Err(EngineError::Scenario(format!("unknown parameter type '{other}'"))),
    }
}

fn parse_commission(fee: &FeeXml) -> Result<CommissionKind, EngineError> {
    match fee.kind.to_ascii_lowercase().as_str() {
        "none" | "no" => Ok(CommissionKind::None),
        "fixed" | "fixed_per_trade" => Ok(CommissionKind::FixedPerTrade(fee.value)),
        "percent" | "percentage" | "trade_percentage" => {
            Ok(CommissionKind::PercentOfNotional(fee.value))
        }
        other => Err(EngineError::Scenario(format!("unknown commission type '{other}'"))),
    }
}

fn parse_slippage(fee: &FeeXml) -> Result<SlippageKind, EngineError> {
    match fee.kind.to_ascii_lowercase().as_str() {
        "none" | "no" => Ok(SlippageKind::None),
        "fixed" | "fixed_per_trade" => Ok(SlippageKind::FixedPerTrade(fee.value)),
        "percent" | "percentage" | "trade_percentage" => {
            Ok(SlippageKind::PercentOfNotional(fee.value))
        }
        other => Err(EngineError::Scenario(format!("unknown slippage type '{other}'"))),
    }
}

impl TryFrom<ScenarioXml> for Scenario {
    type Error = EngineError;

    fn try_from(raw: ScenarioXml) -> Result<Self, Self::Error> {
        if raw.broker.cash <= 0.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "broker cash must be greater than 0, got {}",
                raw.broker.cash
            )));
        }

        let mode = match raw
            .environment
            .as_ref()
            .and_then(|environment| environment.mode.as_deref())
        {
            None | Some("exhaustive") => OptimizationMode::Exhaustive,
            Some("genetic") => OptimizationMode::Genetic,
            Some(other) => {
                return Err(EngineError::Scenario(format!(
                    "unknown optimization mode '{other}'"
                )));
            }
        };

        let mut streams = Vec::with_capacity(raw.datastreams.streams.len());
        for stream in &raw.datastreams.streams {
            let name = SmolStr::new(&stream.name);
            let mut contract = Contract::new(name.clone());
            if let Some(node) = &stream.contract {
                if let Some(multiplier) = node.multiplier {
                    contract.multiplier = multiplier;
                }
                if let Some(tick_size) = node.tick_size {
                    contract.tick_size = tick_size;
                }
                if let Some(margin_ratio) = node.margin_ratio {
                    contract.margin_ratio = margin_ratio;
                }
                if let Some(product_id) = &node.product_id {
                    contract.product_id = SmolStr::new(product_id);
                }
                if let Some(fee) = &node.commission {
                    contract.commission = parse_commission(fee)?;
                }
                if let Some(fee) = &node.slippage {
                    contract.slippage = parse_slippage(fee)?;
                }
            }

            streams.push(StreamConfig {
                name,
                resolution: parse_resolution(&stream.resolution)?,
                path: PathBuf::from(&stream.path),
                format: stream.format.parse()?,
                realtime: stream.realtime.unwrap_or(false),
                contract,
            });
        }

        let mut strategies = Vec::with_capacity(raw.strategies.len());
        for strategy in &raw.strategies {
            let mut config = StrategyConfig::new(strategy.name.as_str(), strategy.entry.as_str());
            config.description = strategy.description.clone().unwrap_or_default();
            config.author = strategy.author.clone().unwrap_or_default();
            match &strategy.stream {
                Some(stream) if stream == "*" => config.subscribe_all = true,
                Some(stream) => config.instruments.push(SmolStr::new(stream)),
                None => config.subscribe_all = true,
            }

            for parameter in &strategy.parameters {
                let kind = parse_param_kind(&parameter.kind)?;
                let value = ParamValue::parse(kind, &parameter.value)?;
                let mut item = ParamItem::new(parameter.name.as_str(), kind, value);
                if let Some(optimizing) = &parameter.optimizing {
                    item = item.with_optimizing(optimizing.start, optimizing.end, optimizing.step);
                }
                config.params.push(item);
            }

            config.validate()?;
            strategies.push(config);
        }

        let report = raw
            .report
            .map(|report| ReportConfig {
                summary: report.summary.map(PathBuf::from),
                summary_json: report.summary_json.map(PathBuf::from),
                daily: report.daily.map(PathBuf::from),
                trades: report.trades.map(PathBuf::from),
                positions: report.positions.map(PathBuf::from),
                returns: report.returns.map(PathBuf::from),
                equities: report.equities.map(PathBuf::from),
                optimization: report.optimization.map(PathBuf::from),
            })
            .unwrap_or_default();

        Ok(Scenario {
            cores: raw
                .environment
                .as_ref()
                .and_then(|environment| environment.cores)
                .unwrap_or(0),
            mode,
            broker: BrokerConfig {
                cash: raw.broker.cash,
                trading_day_end_time: raw
                    .broker
                    .trading_day_end
                    .unwrap_or(crate::broker::DEFAULT_TRADING_DAY_END_TIME),
                ..BrokerConfig::default()
            },
            streams,
            strategies,
            report,
        })
    }
}
