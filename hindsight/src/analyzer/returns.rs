use crate::Timed;
use chrono::{DateTime, Utc};

/// Tracks per-bar and cumulative returns of the portfolio equity curve.
#[derive(Debug, Default)]
pub struct ReturnsAnalyzer {
    initial_equity: Option<f64>,
    last_equity: Option<f64>,
    returns: Vec<Timed<f64>>,
    cumulative: Vec<Timed<f64>>,
}

impl ReturnsAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_equity(&mut self, time: DateTime<Utc>, equity: f64) {
        let initial = *self.initial_equity.get_or_insert(equity);

        if let Some(last) = self.last_equity {
            let period_return = if last != 0.0 { equity / last - 1.0 } else { 0.0 };
            self.returns.push(Timed::new(period_return, time));
        }
        let cumulative = if initial != 0.0 { equity / initial - 1.0 } else { 0.0 };
        self.cumulative.push(Timed::new(cumulative, time));

        self.last_equity = Some(equity);
    }

    /// Period-over-period returns, oldest first.
    pub fn returns(&self) -> &[Timed<f64>] {
        &self.returns
    }

    /// Cumulative return relative to the first observed equity.
    pub fn cumulative(&self) -> &[Timed<f64>] {
        &self.cumulative
    }

    pub fn cumulative_return(&self) -> f64 {
        self.cumulative.last().map(|timed| timed.value).unwrap_or(0.0)
    }

    pub fn mean_return(&self) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        self.returns.iter().map(|timed| timed.value).sum::<f64>() / self.returns.len() as f64
    }

    pub fn std_dev_returns(&self) -> f64 {
        let count = self.returns.len();
        if count < 2 {
            return 0.0;
        }
        let mean = self.mean_return();
        let variance = self
            .returns
            .iter()
            .map(|timed| (timed.value - mean).powi(2))
            .sum::<f64>()
            / (count - 1) as f64;
        variance.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hindsight_data::test_utils::time_plus_days;

    #[test]
    fn test_returns_accumulate() {
        let base = DateTime::<Utc>::MIN_UTC;
        let mut analyzer = ReturnsAnalyzer::new();

        analyzer.on_equity(base, 100.0);
        analyzer.on_equity(time_plus_days(base, 1), 110.0);
        analyzer.on_equity(time_plus_days(base, 2), 99.0);

        let returns: Vec<f64> = analyzer.returns().iter().map(|timed| timed.value).collect();
        assert_eq!(returns.len(), 2);
        assert_relative_eq!(returns[0], 0.1);
        assert_relative_eq!(returns[1], -0.1);
        assert_relative_eq!(analyzer.cumulative_return(), -0.01);
    }
}
