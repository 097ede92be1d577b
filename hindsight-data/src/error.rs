use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use thiserror::Error;

/// All possible errors raised while loading or replaying market data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error(
        "timeline inverted in {file} at record {index}: {prev} followed by {curr}"
    )]
    TimelineInverted {
        file: String,
        index: usize,
        prev: DateTime<Utc>,
        curr: DateTime<Utc>,
    },

    #[error(
        "invalid price for {instrument} at {datetime}: O={open} H={high} L={low} C={close}"
    )]
    InvalidPrice {
        instrument: SmolStr,
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("duplicate data stream registered: ({name}, {resolution}, {interval})")]
    DuplicateStream {
        name: SmolStr,
        resolution: crate::bar::Resolution,
        interval: u32,
    },

    #[error("unrecognised datetime field '{0}'")]
    InvalidDateTime(String),

    #[error("unrecognised numeric field '{0}'")]
    InvalidNumber(String),

    #[error("CSV header is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("{file}: record {index} is truncated ({len} of {expected} bytes)")]
    TruncatedRecord {
        file: String,
        index: usize,
        len: usize,
        expected: usize,
    },

    #[error("unknown data file format '{0}'")]
    UnknownFormat(String),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
