use crate::{
    ma::{Ema, Sma},
    EventWindow, Window,
};
use chrono::{DateTime, Utc};
use hindsight_data::bar::Bar;
use std::collections::VecDeque;

/// Relative strength index with Wilder smoothing.
///
/// The window holds `period + 1` values because gains/losses are diffs with
/// the previous value. The first average gain/loss is a plain mean over the
/// window, subsequent averages are smoothed:
/// `avg = (prev_avg × (N − 1) + current) / N`.
#[derive(Debug, Clone)]
pub struct Rsi {
    window: Window,
    period: usize,
    prev_gain: f64,
    prev_loss: f64,
    value: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            window: Window::new(period + 1),
            period: period.max(2),
            prev_gain: f64::NAN,
            prev_loss: f64::NAN,
            value: f64::NAN,
        }
    }
}

fn gain_loss_one(prev: f64, next: f64) -> (f64, f64) {
    let change = next - prev;
    if change < 0.0 {
        (0.0, change.abs())
    } else {
        (change, 0.0)
    }
}

impl EventWindow for Rsi {
    type Input = f64;

    fn window_size(&self) -> usize {
        self.window.size()
    }

    fn on_new_value(&mut self, _: DateTime<Utc>, value: f64) {
        self.window.push(value);

        if value.is_nan() || !self.window.is_full() {
            return;
        }

        let (avg_gain, avg_loss) = if self.prev_gain.is_nan() {
            let mut gain = 0.0;
            let mut loss = 0.0;
            for index in 1..self.window.len() {
                let (step_gain, step_loss) = gain_loss_one(
                    self.window.get(index - 1).unwrap_or(f64::NAN),
                    self.window.get(index).unwrap_or(f64::NAN),
                );
                gain += step_gain;
                loss += step_loss;
            }
            (gain / self.period as f64, loss / self.period as f64)
        } else {
            let newest = self.window.newest().unwrap_or(f64::NAN);
            let previous = self.window.get(self.window.len() - 2).unwrap_or(f64::NAN);
            let (gain, loss) = gain_loss_one(previous, newest);
            let period = self.period as f64;
            (
                (self.prev_gain * (period - 1.0) + gain) / period,
                (self.prev_loss * (period - 1.0) + loss) / period,
            )
        };

        self.value = if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - 100.0 / (1.0 + rs)
        };

        self.prev_gain = avg_gain;
        self.prev_loss = avg_loss;
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn window_full(&self) -> bool {
        self.window.is_full()
    }
}

/// Stochastic oscillator.
///
/// `%K = (close − lowest_low) / (highest_high − lowest_low) × 100` over the
/// last `period` bars, `%D` a simple moving average of `%K`.
#[derive(Debug, Clone)]
pub struct Stochastic {
    period: usize,
    bars: VecDeque<(f64, f64, f64)>,
    d: Sma,
    k_value: f64,
}

impl Stochastic {
    pub fn new(period: usize, d_period: usize) -> Self {
        Self {
            period: period.max(2),
            bars: VecDeque::new(),
            d: Sma::new(d_period.max(2)),
            k_value: f64::NAN,
        }
    }

    /// Latest smoothed `%D` value.
    pub fn d(&self) -> f64 {
        self.d.value()
    }
}

impl EventWindow for Stochastic {
    type Input = Bar;

    fn window_size(&self) -> usize {
        self.period
    }

    fn on_new_value(&mut self, time: DateTime<Utc>, bar: Bar) {
        if self.bars.len() == self.period {
            self.bars.pop_front();
        }
        self.bars.push_back((bar.high, bar.low, bar.close));

        if self.bars.len() < self.period {
            return;
        }

        let highest_high = self
            .bars
            .iter()
            .map(|(high, _, _)| *high)
            .fold(f64::MIN, f64::max);
        let lowest_low = self
            .bars
            .iter()
            .map(|(_, low, _)| *low)
            .fold(f64::MAX, f64::min);
        let close = bar.close;

        self.k_value = if highest_high > lowest_low {
            (close - lowest_low) / (highest_high - lowest_low) * 100.0
        } else {
            f64::NAN
        };
        self.d.on_new_value(time, self.k_value);
    }

    fn value(&self) -> f64 {
        self.k_value
    }

    fn window_full(&self) -> bool {
        self.bars.len() == self.period
    }
}

/// Moving average convergence/divergence.
///
/// The fast EMA is delayed by `slow − fast` bars so both EMAs produce their
/// first value on the same bar, matching TA-Lib output. The MACD line is
/// `fast EMA − slow EMA`, the signal line an EMA of the MACD line, and the
/// histogram their difference.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    fast_skip: usize,
    macd_value: f64,
    signal_value: f64,
    histogram_value: f64,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
            signal: Ema::new(signal_period),
            fast_skip: slow_period.saturating_sub(fast_period),
            macd_value: f64::NAN,
            signal_value: f64::NAN,
            histogram_value: f64::NAN,
        }
    }

    pub fn signal(&self) -> f64 {
        self.signal_value
    }

    pub fn histogram(&self) -> f64 {
        self.histogram_value
    }
}

impl EventWindow for Macd {
    type Input = f64;

    fn window_size(&self) -> usize {
        self.slow.window_size()
    }

    fn on_new_value(&mut self, time: DateTime<Utc>, value: f64) {
        let mut diff = f64::NAN;

        self.slow.on_new_value(time, value);
        if self.fast_skip > 0 {
            self.fast_skip -= 1;
        } else {
            self.fast.on_new_value(time, value);
            if self.fast.window_full() {
                diff = self.fast.value() - self.slow.value();
            }
        }

        self.signal.on_new_value(time, diff);
        if self.signal.window_full() {
            self.macd_value = diff;
            self.signal_value = self.signal.value();
            self.histogram_value = self.macd_value - self.signal_value;
        }
    }

    fn value(&self) -> f64 {
        self.macd_value
    }

    fn window_full(&self) -> bool {
        self.signal.window_full()
    }
}
