use crate::{EventWindow, Window};
use chrono::{DateTime, Utc};

/// Simple moving average over a rolling window.
///
/// Once primed the mean is maintained incrementally:
/// `value += (incoming - evicted) / N`.
#[derive(Debug, Clone)]
pub struct Sma {
    window: Window,
    value: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            window: Window::new(period),
            value: f64::NAN,
        }
    }
}

impl EventWindow for Sma {
    type Input = f64;

    fn window_size(&self) -> usize {
        self.window.size()
    }

    fn on_new_value(&mut self, _: DateTime<Utc>, value: f64) {
        let evicted = self.window.push(value);

        if !value.is_nan() && self.window.is_full() {
            if self.value.is_nan() {
                self.value = self.window.mean();
            } else if let Some(evicted) = evicted {
                self.value += (value - evicted) / self.window.size() as f64;
            }
        }
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn window_full(&self) -> bool {
        self.window.is_full()
    }
}

/// Weighted moving average: the first full window is seeded with the mean,
/// then `value += (incoming - value) * weight / N`.
#[derive(Debug, Clone)]
pub struct WeightedMa {
    window: Window,
    multiplier: f64,
    value: f64,
}

impl WeightedMa {
    pub fn new(period: usize, weight: f64) -> Self {
        Self {
            window: Window::new(period),
            multiplier: weight / period.max(1) as f64,
            value: f64::NAN,
        }
    }
}

impl EventWindow for WeightedMa {
    type Input = f64;

    fn window_size(&self) -> usize {
        self.window.size()
    }

    fn on_new_value(&mut self, _: DateTime<Utc>, value: f64) {
        self.window.push(value);

        if !value.is_nan() && self.window.is_full() {
            if self.value.is_nan() {
                self.value = self.window.mean();
            } else {
                self.value = (value - self.value) * self.multiplier + self.value;
            }
        }
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn window_full(&self) -> bool {
        self.window.is_full()
    }
}

/// Exponential moving average with multiplier `2 / (N + 1)`, seeded with the
/// mean of the first full window.
#[derive(Debug, Clone)]
pub struct Ema {
    window: Window,
    multiplier: f64,
    value: f64,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            window: Window::new(period),
            multiplier: 2.0 / (period as f64 + 1.0),
            value: f64::NAN,
        }
    }
}

impl EventWindow for Ema {
    type Input = f64;

    fn window_size(&self) -> usize {
        self.window.size()
    }

    fn on_new_value(&mut self, _: DateTime<Utc>, value: f64) {
        self.window.push(value);

        if !value.is_nan() && self.window.is_full() {
            if self.value.is_nan() {
                self.value = self.window.mean();
            } else {
                self.value = (value - self.value) * self.multiplier + self.value;
            }
        }
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn window_full(&self) -> bool {
        self.window.is_full()
    }
}

/// Kaufman adaptive moving average.
///
/// The window holds `eff_ratio_len + 1` values so the efficiency ratio can
/// compare the newest value against the one `eff_ratio_len` back:
/// `er = |newest - oldest| / Σ|step|`, smoothing constant
/// `sc = (er × (fast − slow) + slow)²` with `fast = 2/(fast_len+1)` and
/// `slow = 2/(slow_len+1)`.
#[derive(Debug, Clone)]
pub struct Kama {
    window: Window,
    eff_ratio_len: usize,
    fast_sc: f64,
    slow_sc: f64,
    value: f64,
}

impl Kama {
    pub fn new(eff_ratio_len: usize, fast_len: usize, slow_len: usize) -> Self {
        Self {
            window: Window::new(eff_ratio_len + 1),
            eff_ratio_len,
            fast_sc: 2.0 / (fast_len as f64 + 1.0),
            slow_sc: 2.0 / (slow_len as f64 + 1.0),
            value: f64::NAN,
        }
    }
}

impl EventWindow for Kama {
    type Input = f64;

    fn window_size(&self) -> usize {
        self.window.size()
    }

    fn on_new_value(&mut self, _: DateTime<Utc>, value: f64) {
        self.window.push(value);

        if value.is_nan() || !self.window.is_full() {
            return;
        }

        if self.value.is_nan() {
            self.value = value;
            return;
        }

        let mut volatility = 0.0;
        for index in 0..self.eff_ratio_len {
            let prev = self.window.get(index).unwrap_or(f64::NAN);
            let next = self.window.get(index + 1).unwrap_or(f64::NAN);
            volatility += (next - prev).abs();
        }

        let direction = (self.window.get(self.eff_ratio_len).unwrap_or(f64::NAN)
            - self.window.get(0).unwrap_or(f64::NAN))
        .abs();
        let eff_ratio = if volatility > 0.0 {
            direction / volatility
        } else {
            0.0
        };

        let smooth = eff_ratio * (self.fast_sc - self.slow_sc) + self.slow_sc;
        let constant = smooth * smooth;

        self.value += constant * (value - self.value);
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn window_full(&self) -> bool {
        self.window.is_full()
    }
}
