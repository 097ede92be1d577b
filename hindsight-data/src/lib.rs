#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Hindsight-Data
//! Market data foundations for the Hindsight backtesting engine.
//!
//! Provides the immutable [`Bar`](bar::Bar) record, per-instrument
//! [`Contract`](contract::Contract) metadata, bounded newest-first
//! [`SequenceDataSeries`](series::SequenceDataSeries), cheaply clonable
//! [`BarFeed`](feed::BarFeed)s over shared immutable data, on-disk loaders
//! (CSV, packed binary, time-series binary), and the
//! [`BarComposer`](composer::BarComposer) that assembles higher-resolution
//! bars from lower-resolution streams.

use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// Immutable OHLCV bar record and its resolution/interval tagging.
pub mod bar;

/// Higher-resolution bar assembly from lower-resolution input streams.
pub mod composer;

/// Per-instrument static metadata: multiplier, tick size, margin, fees.
pub mod contract;

/// Defines all possible errors in Hindsight-Data.
pub mod error;

/// Bar feeds, on-disk loaders and the shared data storage registry.
pub mod feed;

/// Trading session arithmetic (seconds-of-day periods, HHMMSS conversion).
pub mod session;

/// Bounded, append-only, newest-index-0 time-stamped sequences.
pub mod series;

/// A timed value.
#[derive(
    Debug, Copy, Clone, PartialEq, PartialOrd, Default, Deserialize, Serialize, Constructor,
)]
pub struct Timed<T> {
    pub value: T,
    pub time: DateTime<Utc>,
}

/// Hindsight-Data test utilities.
pub mod test_utils {
    use crate::bar::{Bar, Resolution};
    use chrono::{DateTime, TimeDelta, Utc};
    use smol_str::SmolStr;

    pub fn time_plus_secs(base: DateTime<Utc>, plus: i64) -> DateTime<Utc> {
        base.checked_add_signed(TimeDelta::seconds(plus)).unwrap()
    }

    pub fn time_plus_mins(base: DateTime<Utc>, plus: i64) -> DateTime<Utc> {
        base.checked_add_signed(TimeDelta::minutes(plus)).unwrap()
    }

    pub fn time_plus_days(base: DateTime<Utc>, plus: i64) -> DateTime<Utc> {
        base.checked_add_signed(TimeDelta::days(plus)).unwrap()
    }

    pub fn bar(
        instrument: &str,
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Bar {
        Bar {
            instrument: SmolStr::new(instrument),
            datetime,
            open,
            high,
            low,
            close,
            volume,
            open_interest: 0,
            resolution: Resolution::Minute,
            interval: 1,
            quote: None,
        }
    }
}
