use crate::error::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// Time unit of a [`Bar`]. Units are ordered from finest to coarsest, so
/// `Resolution::Tick < Resolution::Day` holds.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Default,
    Deserialize,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Tick,
    Second,
    #[default]
    Minute,
    Hour,
    Day,
    Week,
}

impl Resolution {
    /// Number of seconds covered by one unit of this [`Resolution`].
    ///
    /// A tick has no duration and returns 0.
    pub fn seconds(&self) -> u32 {
        match self {
            Resolution::Tick => 0,
            Resolution::Second => 1,
            Resolution::Minute => 60,
            Resolution::Hour => 60 * 60,
            Resolution::Day => 60 * 60 * 24,
            Resolution::Week => 60 * 60 * 24 * 7,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resolution::Tick => "tick",
            Resolution::Second => "second",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
            Resolution::Week => "week",
        };
        write!(f, "{name}")
    }
}

/// Optional level-1 quote fields carried by tick-resolution [`Bar`]s.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
pub struct Level1Quote {
    pub last_price: f64,
    pub bid_price: f64,
    pub bid_size: i64,
    pub ask_price: f64,
    pub ask_size: i64,
}

/// Immutable summary of trading within one fixed time slice of one instrument.
///
/// Invariants checked by [`Bar::validate`]: `low <= open,close <= high`,
/// positive prices and non-negative volume. A degenerate bar with
/// `high == low` is flagged by [`Bar::is_degenerate`] — no trading is
/// possible inside such a bar.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Bar {
    pub instrument: SmolStr,
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub open_interest: i64,
    pub resolution: Resolution,
    /// Multiplier of `resolution` (eg/ 5 with [`Resolution::Minute`] for 5m bars).
    pub interval: u32,
    pub quote: Option<Level1Quote>,
}

impl Bar {
    pub fn new(
        instrument: impl Into<SmolStr>,
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
        open_interest: i64,
        resolution: Resolution,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            datetime,
            open,
            high,
            low,
            close,
            volume,
            open_interest,
            resolution,
            interval: 1,
            quote: None,
        }
    }

    /// Check the price/volume invariants of this [`Bar`].
    pub fn validate(&self) -> Result<(), DataError> {
        let prices_positive =
            self.open > 0.0 && self.high > 0.0 && self.low > 0.0 && self.close > 0.0;
        let range_consistent = self.low <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high;

        if !prices_positive || !range_consistent {
            return Err(DataError::InvalidPrice {
                instrument: self.instrument.clone(),
                datetime: self.datetime,
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.volume < 0 {
            return Err(DataError::InvalidPrice {
                instrument: self.instrument.clone(),
                datetime: self.datetime,
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        Ok(())
    }

    /// A bar whose shape looks like a `-` offers no possibility of trading.
    pub fn is_degenerate(&self) -> bool {
        (self.high - self.low).abs() < f64::EPSILON
    }

    /// Effective traded price of a tick bar, otherwise the close.
    pub fn last_price(&self) -> f64 {
        match &self.quote {
            Some(quote) if self.resolution == Resolution::Tick => quote.last_price,
            _ => self.close,
        }
    }

    /// Typical price `(high + low + close) / 3`.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::bar;
    use chrono::DateTime;

    #[test]
    fn test_resolution_ordering() {
        assert!(Resolution::Tick < Resolution::Second);
        assert!(Resolution::Minute < Resolution::Day);
        assert!(Resolution::Day < Resolution::Week);
    }

    #[test]
    fn test_bar_validate() {
        struct TestCase {
            input: Bar,
            expected_ok: bool,
        }

        let time = DateTime::<Utc>::MIN_UTC;

        let cases = vec![
            // TC0: well formed bar
            TestCase {
                input: bar("rb2405", time, 100.0, 101.0, 99.0, 100.5, 10),
                expected_ok: true,
            },
            // TC1: high below low
            TestCase {
                input: bar("rb2405", time, 100.0, 98.0, 99.0, 100.0, 10),
                expected_ok: false,
            },
            // TC2: open above high
            TestCase {
                input: bar("rb2405", time, 102.0, 101.0, 99.0, 100.0, 10),
                expected_ok: false,
            },
            // TC3: close below low
            TestCase {
                input: bar("rb2405", time, 100.0, 101.0, 99.0, 98.0, 10),
                expected_ok: false,
            },
            // TC4: non-positive price
            TestCase {
                input: bar("rb2405", time, 0.0, 101.0, 0.0, 100.0, 10),
                expected_ok: false,
            },
            // TC5: negative volume
            TestCase {
                input: bar("rb2405", time, 100.0, 101.0, 99.0, 100.0, -1),
                expected_ok: false,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(test.input.validate().is_ok(), test.expected_ok, "TC{index} failed");
        }
    }

    #[test]
    fn test_bar_is_degenerate() {
        let time = DateTime::<Utc>::MIN_UTC;
        assert!(bar("a", time, 100.0, 100.0, 100.0, 100.0, 1).is_degenerate());
        assert!(!bar("a", time, 100.0, 101.0, 99.0, 100.0, 1).is_degenerate());
    }
}
