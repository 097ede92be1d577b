use serde::{Deserialize, Serialize};

/// Trading days per year used when annualizing daily statistics.
pub const ANNUAL_TRADING_DAYS: f64 = 252.0;

/// Risk-adjusted return: excess mean return per unit of return volatility.
///
/// See docs: <https://www.investopedia.com/articles/07/sharpe_ratio.asp>
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
pub struct SharpeRatio {
    pub value: f64,
}

impl SharpeRatio {
    /// Calculate from per-period statistics. A zero standard deviation
    /// yields an infinite ratio.
    pub fn calculate(risk_free_return: f64, mean_return: f64, std_dev_returns: f64) -> Self {
        if std_dev_returns == 0.0 {
            Self { value: f64::INFINITY }
        } else {
            Self {
                value: (mean_return - risk_free_return) / std_dev_returns,
            }
        }
    }

    /// Scale from one observation frequency to another, assuming IID
    /// returns: multiply by the square root of the period ratio.
    pub fn scale(self, periods_per_target: f64) -> Self {
        Self {
            value: self.value * periods_per_target.sqrt(),
        }
    }

    /// Annualize a daily ratio over 252 trading days.
    pub fn annualize_daily(self) -> Self {
        self.scale(ANNUAL_TRADING_DAYS)
    }
}
