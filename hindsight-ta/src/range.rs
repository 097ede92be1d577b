use crate::{EventWindow, Window};
use chrono::{DateTime, Utc};
use hindsight_data::bar::Bar;
use std::collections::VecDeque;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Extreme {
    Highest,
    Lowest,
}

/// Highest- or lowest-in-window over the last `period` values, maintained
/// with a monotonic deque so each input is pushed and popped at most once.
#[derive(Debug, Clone)]
pub struct ExtremeWindow {
    extreme: Extreme,
    period: usize,
    count: usize,
    seen: usize,
    deque: VecDeque<(f64, usize)>,
}

impl ExtremeWindow {
    fn new(extreme: Extreme, period: usize) -> Self {
        Self {
            extreme,
            period: period.max(1),
            count: 0,
            seen: 0,
            deque: VecDeque::new(),
        }
    }

    pub fn highest(period: usize) -> Self {
        Self::new(Extreme::Highest, period)
    }

    pub fn lowest(period: usize) -> Self {
        Self::new(Extreme::Lowest, period)
    }
}

impl EventWindow for ExtremeWindow {
    type Input = f64;

    fn window_size(&self) -> usize {
        self.period
    }

    fn on_new_value(&mut self, _: DateTime<Utc>, value: f64) {
        if value.is_nan() {
            return;
        }

        let extreme = self.extreme;
        let keep = move |frontier: f64| match extreme {
            // A new value dominates smaller (or equal) older highs.
            Extreme::Highest => frontier > value,
            Extreme::Lowest => frontier < value,
        };

        while let Some((frontier, _)) = self.deque.back() {
            if keep(*frontier) {
                break;
            }
            self.deque.pop_back();
        }
        self.deque.push_back((value, self.seen));

        while let Some((_, index)) = self.deque.front() {
            if *index + self.period > self.seen {
                break;
            }
            self.deque.pop_front();
        }

        self.seen += 1;
        self.count = (self.count + 1).min(self.period);
    }

    fn value(&self) -> f64 {
        if self.count < self.period {
            return f64::NAN;
        }
        self.deque.front().map(|(value, _)| *value).unwrap_or(f64::NAN)
    }

    fn window_full(&self) -> bool {
        self.count == self.period
    }
}

/// Average true range with Wilder smoothing:
/// `atr = (atr × (N − 1) + tr) / N`, seeded with the mean of the first full
/// window of true ranges.
#[derive(Debug, Clone)]
pub struct Atr {
    window: Window,
    prev_close: f64,
    value: f64,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            window: Window::new(period),
            prev_close: f64::NAN,
            value: f64::NAN,
        }
    }

    fn true_range(&self, bar: &Bar) -> f64 {
        if self.prev_close.is_nan() {
            // No previous close yet: the plain range stands in.
            bar.high - bar.low
        } else {
            let range = bar.high - bar.low;
            let high_gap = (bar.high - self.prev_close).abs();
            let low_gap = (bar.low - self.prev_close).abs();
            range.max(high_gap).max(low_gap)
        }
    }
}

impl EventWindow for Atr {
    type Input = Bar;

    fn window_size(&self) -> usize {
        self.window.size()
    }

    fn on_new_value(&mut self, _: DateTime<Utc>, bar: Bar) {
        let tr = self.true_range(&bar);
        self.window.push(tr);
        self.prev_close = bar.close;

        if self.window.is_full() {
            if self.value.is_nan() {
                self.value = self.window.mean();
            } else {
                let period = self.window.size() as f64;
                self.value = (self.value * (period - 1.0) + tr) / period;
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hindsight_data::test_utils::bar;

    #[test]
    fn test_highest_in_window() {
        let time = DateTime::<Utc>::MIN_UTC;
        let mut highest = ExtremeWindow::highest(3);

        let inputs = [1.0, 3.0, -1.0, -3.0, 5.0, 3.0, 6.0, 7.0];
        let expected = [
            f64::NAN,
            f64::NAN,
            3.0,
            3.0,
            5.0,
            5.0,
            6.0,
            7.0,
        ];

        for (index, (input, want)) in inputs.iter().zip(expected).enumerate() {
            highest.on_new_value(time, *input);
            let actual = highest.value();
            if want.is_nan() {
                assert!(actual.is_nan(), "TC{index} failed");
            } else {
                assert_relative_eq!(actual, want);
            }
        }
    }

    #[test]
    fn test_lowest_in_window() {
        let time = DateTime::<Utc>::MIN_UTC;
        let mut lowest = ExtremeWindow::lowest(3);

        let inputs = [1.0, 3.0, -1.0, -3.0, 5.0, 3.0, 6.0, 7.0];
        let expected = [
            f64::NAN,
            f64::NAN,
            -1.0,
            -3.0,
            -3.0,
            -3.0,
            3.0,
            3.0,
        ];

        for (index, (input, want)) in inputs.iter().zip(expected).enumerate() {
            lowest.on_new_value(time, *input);
            let actual = lowest.value();
            if want.is_nan() {
                assert!(actual.is_nan(), "TC{index} failed");
            } else {
                assert_relative_eq!(actual, want);
            }
        }
    }

    #[test]
    fn test_atr_wilder_smoothing() {
        let time = DateTime::<Utc>::MIN_UTC;
        let mut atr = Atr::new(2);

        // First bar has no previous close: tr = high - low = 2.
        atr.on_new_value(time, bar("rb", time, 10.0, 11.0, 9.0, 10.0, 1));
        assert!(atr.value().is_nan());

        // tr = max(12-10, |12-10|, |10-10|) = 2; seeded with mean(2, 2) = 2.
        atr.on_new_value(time, bar("rb", time, 10.0, 12.0, 10.0, 11.0, 1));
        assert_relative_eq!(atr.value(), 2.0);

        // tr = max(14-11, |14-11|, |11-11|) = 3; atr = (2*1 + 3)/2 = 2.5.
        atr.on_new_value(time, bar("rb", time, 11.0, 14.0, 11.0, 13.0, 1));
        assert_relative_eq!(atr.value(), 2.5);
    }
}
