use chrono::{DateTime, TimeDelta, Utc};

/// Peak-to-trough decline tracker over the equity curve.
///
/// Records the maximum drawdown in both currency and percentage terms with
/// its begin/end datetimes, and the longest time spent below a previous
/// peak.
#[derive(Debug)]
pub struct DrawdownAnalyzer {
    peak: Option<f64>,
    time_peak: DateTime<Utc>,
    max_drawdown: f64,
    max_drawdown_pct: f64,
    max_dd_begin: DateTime<Utc>,
    max_dd_end: DateTime<Utc>,
    longest_duration: TimeDelta,
}

impl Default for DrawdownAnalyzer {
    fn default() -> Self {
        Self {
            peak: None,
            time_peak: DateTime::<Utc>::MIN_UTC,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
            max_dd_begin: DateTime::<Utc>::MIN_UTC,
            max_dd_end: DateTime::<Utc>::MIN_UTC,
            longest_duration: TimeDelta::zero(),
        }
    }
}

impl DrawdownAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_equity(&mut self, time: DateTime<Utc>, equity: f64) {
        let Some(peak) = self.peak else {
            self.peak = Some(equity);
            self.time_peak = time;
            return;
        };

        if equity > peak {
            self.peak = Some(equity);
            self.time_peak = time;
            return;
        }

        // Still in (or deepening) a drawdown period.
        let drawdown = peak - equity;
        let drawdown_pct = if peak != 0.0 { drawdown / peak } else { 0.0 };
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            self.max_drawdown_pct = drawdown_pct;
            self.max_dd_begin = self.time_peak;
            self.max_dd_end = time;
        }

        let duration = time.signed_duration_since(self.time_peak);
        if duration > self.longest_duration {
            self.longest_duration = duration;
        }
    }

    /// Maximum drawdown in currency.
    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    /// Maximum drawdown as a fraction of the preceding peak.
    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    pub fn max_drawdown_begin(&self) -> DateTime<Utc> {
        self.max_dd_begin
    }

    pub fn max_drawdown_end(&self) -> DateTime<Utc> {
        self.max_dd_end
    }

    /// Longest time spent below a previous equity peak.
    pub fn longest_duration(&self) -> TimeDelta {
        self.longest_duration
    }
}
