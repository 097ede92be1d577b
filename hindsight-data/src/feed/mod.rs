use crate::{
    bar::{Bar, Resolution},
    contract::Contract,
    error::DataError,
    session::ActivePeriod,
};
use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use std::sync::Arc;

/// CSV bar loader (`date,time[,ms],open,high,low,close,volume,openint`).
pub mod csv;

/// Packed binary bar loader (68-byte records with a hot-contract flag).
pub mod packed;

/// Shared registry of loaded data streams.
pub mod storage;

/// Time-series binary bar loader (104-byte packed records).
pub mod tseries;

/// Lazy sequence of bars for one instrument at one resolution.
///
/// The underlying bar data is shared immutably ([`Arc`]), so cloning a feed
/// is cheap and yields an independent read cursor positioned at the start.
/// This is what lets `E` executors replay one dataset in parallel without
/// duplicating it.
#[derive(Debug)]
pub struct BarFeed {
    id: u32,
    instrument: SmolStr,
    resolution: Resolution,
    interval: u32,
    contract: Contract,
    bars: Arc<[Bar]>,
    tradable_periods: Arc<[ActivePeriod]>,
    cursor: usize,
}

impl BarFeed {
    /// Build a feed over in-memory bars, checking the stream invariants:
    /// strictly non-decreasing datetimes and valid prices.
    pub fn from_bars(
        instrument: impl Into<SmolStr>,
        resolution: Resolution,
        interval: u32,
        bars: Vec<Bar>,
    ) -> Result<Self, DataError> {
        let instrument = instrument.into();
        validate_stream("<memory>", &bars)?;

        let tradable_periods: Arc<[ActivePeriod]> = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Arc::from(vec![ActivePeriod {
                begin: first.datetime,
                end: last.datetime,
            }]),
            _ => Arc::from(Vec::new()),
        };

        Ok(Self {
            id: 0,
            instrument,
            resolution,
            interval,
            contract: Contract::default(),
            bars: Arc::from(bars),
            tradable_periods,
            cursor: 0,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub fn instrument(&self) -> &SmolStr {
        &self.instrument
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn set_contract(&mut self, contract: Contract) {
        self.contract = contract;
    }

    /// Contiguous datetime ranges within which the instrument is active.
    pub fn tradable_periods(&self) -> &[ActivePeriod] {
        &self.tradable_periods
    }

    pub fn set_tradable_periods(&mut self, periods: Vec<ActivePeriod>) {
        self.tradable_periods = Arc::from(periods);
    }

    /// Timestamp of the next unconsumed bar, `None` at EOF.
    pub fn peek_datetime(&self) -> Option<DateTime<Utc>> {
        self.bars.get(self.cursor).map(|bar| bar.datetime)
    }

    /// Consume and return the next bar.
    pub fn next_bar(&mut self) -> Option<Bar> {
        let bar = self.bars.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(bar)
    }

    pub fn eof(&self) -> bool {
        self.cursor >= self.bars.len()
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Deliver the `count` bars ending at `to` (inclusive) synchronously,
    /// oldest first. The callback receives `is_last = true` on the final bar.
    pub fn bars_back(
        &self,
        to: DateTime<Utc>,
        count: usize,
        mut callback: impl FnMut(&Bar, bool),
    ) -> usize {
        let end = self.bars.partition_point(|bar| bar.datetime <= to);
        let start = end.saturating_sub(count);
        let window = &self.bars[start..end];

        for (offset, bar) in window.iter().enumerate() {
            callback(bar, offset + 1 == window.len());
        }

        window.len()
    }
}

// Clones share the bar data but restart reading from the beginning.
impl Clone for BarFeed {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            instrument: self.instrument.clone(),
            resolution: self.resolution,
            interval: self.interval,
            contract: self.contract.clone(),
            bars: Arc::clone(&self.bars),
            tradable_periods: Arc::clone(&self.tradable_periods),
            cursor: 0,
        }
    }
}

/// Check stream-level invariants over a slice of bars.
pub(crate) fn validate_stream(file: &str, bars: &[Bar]) -> Result<(), DataError> {
    let mut prev: Option<DateTime<Utc>> = None;
    for (index, bar) in bars.iter().enumerate() {
        bar.validate()?;
        if let Some(prev) = prev {
            if bar.datetime < prev {
                return Err(DataError::TimelineInverted {
                    file: file.to_string(),
                    index,
                    prev,
                    curr: bar.datetime,
                });
            }
        }
        prev = Some(bar.datetime);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{bar, time_plus_mins};

    fn feed_of(closes: &[f64]) -> BarFeed {
        let base = DateTime::<Utc>::MIN_UTC;
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                bar("rb2405", time_plus_mins(base, i as i64), *close, *close, *close, *close, 1)
            })
            .collect();
        BarFeed::from_bars("rb2405", Resolution::Minute, 1, bars).unwrap()
    }

    #[test]
    fn test_feed_iteration_and_eof() {
        let mut feed = feed_of(&[10.0, 11.0, 12.0]);

        assert_eq!(feed.peek_datetime(), Some(DateTime::<Utc>::MIN_UTC));
        assert_eq!(feed.next_bar().unwrap().close, 10.0);
        assert_eq!(feed.next_bar().unwrap().close, 11.0);
        assert!(!feed.eof());
        assert_eq!(feed.next_bar().unwrap().close, 12.0);
        assert!(feed.eof());
        assert_eq!(feed.next_bar(), None);
        assert_eq!(feed.peek_datetime(), None);
    }

    #[test]
    fn test_clone_shares_data_with_fresh_cursor() {
        let mut feed = feed_of(&[10.0, 11.0, 12.0]);
        feed.next_bar();
        feed.next_bar();

        let mut clone = feed.clone();
        assert_eq!(clone.peek_datetime(), Some(DateTime::<Utc>::MIN_UTC));
        assert_eq!(clone.next_bar().unwrap().close, 10.0);

        // Original cursor is unaffected by the clone.
        assert_eq!(feed.next_bar().unwrap().close, 12.0);
    }

    #[test]
    fn test_timeline_inversion_is_fatal() {
        let base = DateTime::<Utc>::MIN_UTC;
        let bars = vec![
            bar("rb2405", time_plus_mins(base, 1), 10.0, 10.0, 10.0, 10.0, 1),
            bar("rb2405", base, 10.0, 10.0, 10.0, 10.0, 1),
        ];

        let result = BarFeed::from_bars("rb2405", Resolution::Minute, 1, bars);
        assert!(matches!(result, Err(DataError::TimelineInverted { index: 1, .. })));
    }

    #[test]
    fn test_bars_back_window() {
        let feed = feed_of(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let base = DateTime::<Utc>::MIN_UTC;

        let mut seen = Vec::new();
        let delivered =
            feed.bars_back(time_plus_mins(base, 3), 2, |bar, is_last| seen.push((bar.close, is_last)));

        assert_eq!(delivered, 2);
        assert_eq!(seen, vec![(12.0, false), (13.0, true)]);

        // Fewer bars than requested at the start of the stream.
        let mut seen = Vec::new();
        let delivered = feed.bars_back(base, 4, |bar, is_last| seen.push((bar.close, is_last)));
        assert_eq!(delivered, 1);
        assert_eq!(seen, vec![(10.0, true)]);
    }
}
