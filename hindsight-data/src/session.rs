use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Convert an HHMMSS integer time-of-day into seconds since midnight.
pub fn hhmmss_to_secs(hhmmss: u32) -> u32 {
    (hhmmss / 10000) * 3600 + ((hhmmss % 10000) / 100) * 60 + hhmmss % 100
}

/// Seconds since midnight of a timestamp.
pub fn secs_of_day(datetime: DateTime<Utc>) -> u32 {
    datetime.num_seconds_from_midnight()
}

/// A contiguous seconds-of-day range within which an instrument trades.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct TradablePeriod {
    pub begin: u32,
    pub end: u32,
}

impl TradablePeriod {
    /// Build from HHMMSS open/close times.
    pub fn from_hhmmss(open: u32, close: u32) -> Self {
        Self {
            begin: hhmmss_to_secs(open),
            end: hhmmss_to_secs(close),
        }
    }

    pub fn contains(&self, sec_of_day: u32) -> bool {
        sec_of_day >= self.begin && sec_of_day < self.end
    }

    pub fn duration_secs(&self) -> u32 {
        self.end.saturating_sub(self.begin)
    }
}

/// Ordered list of [`TradablePeriod`]s making up one trading day.
pub type TradingSession = Vec<TradablePeriod>;

/// A datetime range during which a runtime is active. Outside all of its
/// active periods a runtime closes positions and drops new orders.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
pub struct ActivePeriod {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ActivePeriod {
    pub fn contains(&self, datetime: DateTime<Utc>) -> bool {
        datetime >= self.begin && datetime <= self.end
    }
}
