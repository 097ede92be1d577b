use crate::{
    bar::{Bar, Resolution},
    session::{secs_of_day, TradingSession},
};
use chrono::{DateTime, Datelike, Utc};
use tracing::warn;

/// Assembles higher-resolution bars from a lower-resolution input stream.
///
/// Two composition modes:
/// - *Intraday slicing*: the trading session is partitioned into equal
///   `slice_period` slices; each input bar lands in the slice containing its
///   timestamp and a slice is sealed into one output bar when the slice
///   index advances.
/// - *Across-day aggregation*: for [`Resolution::Day`]/[`Resolution::Week`]
///   output, a new output bar begins at the first input whose date (or ISO
///   week) differs from the previous input's.
///
/// Sealed bars carry `(first-open, max-high, min-low, last-close,
/// sum-volume, last-open-interest)` and the timestamp of the closed slice's
/// last input bar. Tick inputs initialise OHLC from the first traded price
/// and forward the latest level-1 quote onto the sealed bar.
#[derive(Debug)]
pub struct BarComposer {
    mode: Mode,
    input_resolution: Resolution,
    output_resolution: Resolution,
    output_interval: u32,
    pending: Option<Accumulator>,
}

#[derive(Debug)]
enum Mode {
    Intraday {
        session: TradingSession,
        slice_period: u32,
        current_slice: Option<usize>,
        last_input_date: Option<DateTime<Utc>>,
    },
    AcrossDay,
}

#[derive(Debug)]
struct Accumulator {
    template: Bar,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    open_interest: i64,
    last_input_datetime: DateTime<Utc>,
}

impl Accumulator {
    fn start(bar: &Bar, tick_input: bool) -> Self {
        let (open, high, low, close) = if tick_input {
            let price = bar.last_price();
            (price, price, price, price)
        } else {
            (bar.open, bar.high, bar.low, bar.close)
        };

        Self {
            template: bar.clone(),
            open,
            high,
            low,
            close,
            volume: bar.volume,
            open_interest: bar.open_interest,
            last_input_datetime: bar.datetime,
        }
    }

    fn update(&mut self, bar: &Bar, tick_input: bool) {
        let (high, low, close) = if tick_input {
            let price = bar.last_price();
            (price, price, price)
        } else {
            (bar.high, bar.low, bar.close)
        };

        self.high = self.high.max(high);
        self.low = self.low.min(low);
        self.close = close;
        self.volume += bar.volume;
        self.open_interest = bar.open_interest;
        self.template.quote = bar.quote;
        self.last_input_datetime = bar.datetime;
    }

    fn seal(self, resolution: Resolution, interval: u32) -> Bar {
        Bar {
            instrument: self.template.instrument,
            datetime: self.last_input_datetime,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            open_interest: self.open_interest,
            resolution,
            interval,
            quote: self.template.quote,
        }
    }
}

impl BarComposer {
    /// Intraday slicing composer (eg/ tick→minute, minute→5-minute).
    ///
    /// Returns `None` when the requested composition is not a strict
    /// upsampling (input resolution must be finer than output).
    pub fn intraday(
        session: TradingSession,
        input_resolution: Resolution,
        output_resolution: Resolution,
        output_interval: u32,
    ) -> Option<Self> {
        if input_resolution >= output_resolution || output_resolution >= Resolution::Day {
            warn!(
                %input_resolution,
                %output_resolution,
                "rejecting intraday composition request"
            );
            return None;
        }

        let slice_period = output_resolution.seconds() * output_interval.max(1);
        Some(Self {
            mode: Mode::Intraday {
                session,
                slice_period,
                current_slice: None,
                last_input_date: None,
            },
            input_resolution,
            output_resolution,
            output_interval: output_interval.max(1),
            pending: None,
        })
    }

    /// Across-day composer (minute→day, minute→week).
    pub fn across_day(input_resolution: Resolution, output_resolution: Resolution) -> Option<Self> {
        if input_resolution >= output_resolution || output_resolution < Resolution::Day {
            warn!(
                %input_resolution,
                %output_resolution,
                "rejecting across-day composition request"
            );
            return None;
        }

        Some(Self {
            mode: Mode::AcrossDay,
            input_resolution,
            output_resolution,
            output_interval: 1,
            pending: None,
        })
    }

    pub fn output_resolution(&self) -> Resolution {
        self.output_resolution
    }

    /// Feed one input bar; returns a sealed output bar when a slice closed.
    pub fn push(&mut self, bar: &Bar) -> Option<Bar> {
        let tick_input = self.input_resolution == Resolution::Tick;
        let output_resolution = self.output_resolution;
        let output_interval = self.output_interval;

        match &mut self.mode {
            Mode::Intraday {
                session,
                slice_period,
                current_slice,
                last_input_date,
            } => {
                // A date rollover restarts the slice sequence, sealing any
                // accumulation left from the previous day.
                let mut sealed = None;
                if let Some(last) = *last_input_date {
                    if bar.datetime.date_naive() != last.date_naive() {
                        *current_slice = None;
                        sealed = self
                            .pending
                            .take()
                            .map(|acc| acc.seal(output_resolution, output_interval));
                    }
                }
                *last_input_date = Some(bar.datetime);

                let slice = slice_index(session, *slice_period, secs_of_day(bar.datetime));
                let Some(slice) = slice else {
                    // Input bar falls outside the trading session.
                    return sealed;
                };

                match *current_slice {
                    None => {
                        *current_slice = Some(slice);
                        self.pending = Some(Accumulator::start(bar, tick_input));
                        sealed
                    }
                    Some(current) if slice > current => {
                        let previous = self
                            .pending
                            .replace(Accumulator::start(bar, tick_input))
                            .map(|acc| acc.seal(output_resolution, output_interval));
                        *current_slice = Some(slice);
                        sealed.or(previous)
                    }
                    Some(current) if slice < current => {
                        // Out-of-order input inside one day. Drop it.
                        sealed
                    }
                    Some(_) => {
                        if let Some(acc) = self.pending.as_mut() {
                            acc.update(bar, tick_input);
                        }
                        sealed
                    }
                }
            }
            Mode::AcrossDay => {
                let boundary = match (&self.pending, output_resolution) {
                    (None, _) => false,
                    (Some(acc), Resolution::Week) => {
                        acc.last_input_datetime.iso_week() != bar.datetime.iso_week()
                    }
                    (Some(acc), _) => {
                        acc.last_input_datetime.date_naive() != bar.datetime.date_naive()
                    }
                };

                if boundary {
                    let sealed = self
                        .pending
                        .replace(Accumulator::start(bar, tick_input))
                        .map(|acc| acc.seal(output_resolution, output_interval));
                    sealed
                } else {
                    match self.pending.as_mut() {
                        Some(acc) => {
                            acc.update(bar, tick_input);
                            None
                        }
                        None => {
                            self.pending = Some(Accumulator::start(bar, tick_input));
                            None
                        }
                    }
                }
            }
        }
    }

    /// Seal the in-progress accumulation, if any. Call at end of stream.
    pub fn flush(&mut self) -> Option<Bar> {
        self.pending
            .take()
            .map(|acc| acc.seal(self.output_resolution, self.output_interval))
    }
}

/// Slice index of `sec_of_day` across the session periods, counting slices
/// of earlier periods first. `None` outside every period.
fn slice_index(session: &TradingSession, slice_period: u32, sec_of_day: u32) -> Option<usize> {
    if slice_period == 0 {
        return None;
    }

    let mut preceding = 0usize;
    for period in session {
        if period.contains(sec_of_day) {
            let offset = ((sec_of_day - period.begin) / slice_period) as usize;
            return Some(preceding + offset);
        }
        preceding += (period.duration_secs() / slice_period) as usize;
    }

    None
}
