use hindsight_data::error::DataError;
use smol_str::SmolStr;
use thiserror::Error;

/// All possible errors raised while configuring or running backtests.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("market data: {0}")]
    Data(#[from] DataError),

    #[error("no strategy registered under '{0}'")]
    NoSuchStrategy(SmolStr),

    #[error(
        "not enough shares to {action} {instrument}: held {held}, requested {requested}"
    )]
    InsufficientShares {
        instrument: SmolStr,
        action: &'static str,
        held: i64,
        requested: i64,
    },

    #[error("order {0} was already processed")]
    OrderAlreadyProcessed(u64),

    #[error("scenario file: {0}")]
    Scenario(String),

    #[error("optimizer worker failed: {0}")]
    Worker(String),

    #[error("report: {0}")]
    Report(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::DeError> for EngineError {
    fn from(error: quick_xml::DeError) -> Self {
        Self::Scenario(error.to_string())
    }
}
