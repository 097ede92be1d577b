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

//! # Hindsight-TA
//! Rolling event-window technical indicators for the Hindsight backtesting
//! engine.
//!
//! Every indicator is an [`EventWindow`]: it accepts timestamped input
//! values one at a time, exposes [`EventWindow::value`] (NaN until the
//! window is primed), and is a deterministic function of its input stream.
//! Filters never mutate their source series and pass NaN through until
//! primed, so pipelines of windows compose safely.

use chrono::{DateTime, Utc};
use hindsight_data::series::SequenceDataSeries;
use std::collections::VecDeque;

/// Cross-above / cross-below detection over paired series values.
pub mod cross;

/// Moving averages: simple, weighted, exponential and adaptive (Kaufman).
pub mod ma;

/// Momentum indicators: RSI, Stochastic %K/%D and MACD.
pub mod momentum;

/// Range windows: highest/lowest-in-window and Wilder's ATR.
pub mod range;

/// A rolling fixed-size window filter: accepts inputs of type
/// [`EventWindow::Input`], computes an output once `window_size` values have
/// arrived.
pub trait EventWindow {
    type Input;

    /// Number of input values required before [`EventWindow::value`] is
    /// meaningful.
    fn window_size(&self) -> usize;

    fn on_new_value(&mut self, time: DateTime<Utc>, value: Self::Input);

    /// Latest output, NaN until the window is primed.
    fn value(&self) -> f64;

    fn window_full(&self) -> bool;
}

/// Bounded oldest-first storage shared by the window implementations.
/// Index 0 is the oldest stored value.
#[derive(Debug, Clone)]
pub struct Window {
    size: usize,
    values: VecDeque<f64>,
}

impl Window {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            values: VecDeque::with_capacity(size.max(1)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.size
    }

    /// Push a value, returning the evicted oldest value when full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.is_full() {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    /// Value at `index`, oldest first.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn newest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn oldest(&self) -> Option<f64> {
        self.values.front().copied()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

/// Subscribes one [`EventWindow`] to an input stream and emits the window's
/// output into its own [`SequenceDataSeries`] — the building block of
/// indicator pipeline graphs.
#[derive(Debug)]
pub struct EventBasedFilter<W: EventWindow> {
    window: W,
    output: SequenceDataSeries<f64>,
}

impl<W: EventWindow> EventBasedFilter<W> {
    pub fn new(window: W) -> Self {
        Self {
            window,
            output: SequenceDataSeries::new(),
        }
    }

    pub fn with_max_len(window: W, max_len: usize) -> Self {
        Self {
            window,
            output: SequenceDataSeries::with_max_len(max_len),
        }
    }

    /// Forward one input value and append the window's output to the
    /// filter's series.
    pub fn push(&mut self, time: DateTime<Utc>, value: W::Input) -> f64 {
        self.window.on_new_value(time, value);
        let output = self.window.value();
        self.output.append(time, output);
        output
    }

    pub fn value(&self) -> f64 {
        self.window.value()
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn output(&self) -> &SequenceDataSeries<f64> {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ma::Sma;

    #[test]
    fn test_window_eviction_order() {
        let mut window = Window::new(3);
        assert_eq!(window.push(1.0), None);
        assert_eq!(window.push(2.0), None);
        assert_eq!(window.push(3.0), None);
        assert!(window.is_full());

        assert_eq!(window.push(4.0), Some(1.0));
        assert_eq!(window.oldest(), Some(2.0));
        assert_eq!(window.newest(), Some(4.0));
    }

    #[test]
    fn test_filter_emits_into_its_own_series() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut filter = EventBasedFilter::new(Sma::new(2));

        assert!(filter.push(base, 10.0).is_nan());
        assert_eq!(filter.push(base, 20.0), 15.0);
        assert_eq!(filter.push(base, 30.0), 25.0);

        let output = filter.output();
        assert_eq!(output.len(), 3);
        assert_eq!(output.get(0), Some(&25.0));
        assert_eq!(output.get(1), Some(&15.0));
        assert!(output.get(2).unwrap().is_nan());
    }
}
