use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Commission scheme charged per fill.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum CommissionKind {
    #[default]
    None,
    /// Fixed amount charged once per trade (only the first fill pays).
    FixedPerTrade(f64),
    /// Percentage of traded notional. 0.01 means 1% and must be below 1.
    PercentOfNotional(f64),
}

impl CommissionKind {
    /// Commission for a fill of `quantity` at `price`.
    ///
    /// `first_fill` distinguishes the opening execution of an order so that
    /// the fixed-per-trade scheme charges exactly once.
    pub fn calculate(&self, price: f64, quantity: i64, multiplier: f64, first_fill: bool) -> f64 {
        match *self {
            CommissionKind::None => 0.0,
            CommissionKind::FixedPerTrade(amount) => {
                if first_fill {
                    amount
                } else {
                    0.0
                }
            }
            CommissionKind::PercentOfNotional(percentage) => {
                price * quantity as f64 * multiplier * percentage
            }
        }
    }
}

/// Slippage scheme charged per fill.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SlippageKind {
    #[default]
    None,
    /// Fixed price offset per contract, scaled by the multiplier.
    FixedPerTrade(f64),
    /// Percentage of traded notional.
    PercentOfNotional(f64),
}

impl SlippageKind {
    pub fn calculate(&self, price: f64, quantity: i64, multiplier: f64) -> f64 {
        match *self {
            SlippageKind::None => 0.0,
            SlippageKind::FixedPerTrade(amount) => amount * multiplier * quantity as f64,
            SlippageKind::PercentOfNotional(percentage) => {
                percentage * multiplier * price * quantity as f64
            }
        }
    }
}

/// Static per-instrument metadata governing notional, margin, fees and
/// trading hours.
#[derive(Debug, Clone, PartialEq, PartialOrd, Deserialize, Serialize)]
pub struct Contract {
    pub instrument: SmolStr,
    pub product_id: SmolStr,
    /// Points-to-currency scale factor (eg/ 300 for index futures).
    pub multiplier: f64,
    pub tick_size: f64,
    /// Fraction of notional reserved when opening a position. 1.0 reserves
    /// the full notional (cash-market behaviour).
    pub margin_ratio: f64,
    pub commission: CommissionKind,
    pub slippage: SlippageKind,
    /// Contract open time-of-day, HHMMSS.
    pub open_time: u32,
    /// Contract close time-of-day, HHMMSS.
    pub close_time: u32,
}

impl Contract {
    pub fn new(instrument: impl Into<SmolStr>) -> Self {
        Self {
            instrument: instrument.into(),
            ..Default::default()
        }
    }

    /// Round `price` down to the nearest tick boundary.
    pub fn round_down_to_tick(&self, price: f64) -> f64 {
        round_to_tick_unit(price, self.tick_size, false)
    }

    /// Round `price` up to the nearest tick boundary.
    pub fn round_up_to_tick(&self, price: f64) -> f64 {
        round_to_tick_unit(price, self.tick_size, true)
    }
}

impl Default for Contract {
    fn default() -> Self {
        Self {
            instrument: SmolStr::default(),
            product_id: SmolStr::default(),
            multiplier: 1.0,
            tick_size: 1.0,
            margin_ratio: 1.0,
            commission: CommissionKind::None,
            slippage: SlippageKind::None,
            open_time: 91500,
            close_time: 150000,
        }
    }
}

// Prices are quantised at 1e-6 before snapping so that accumulated float
// error one ulp below a tick boundary does not round a full tick away.
fn round_to_tick_unit(price: f64, tick_size: f64, round_up: bool) -> f64 {
    const MAGNIFICATION: f64 = 1_000_000.0;

    let unit = (tick_size * MAGNIFICATION).round() as i64;
    if unit == 0 {
        return price;
    }

    let scaled = (price * MAGNIFICATION).round() as i64;
    let floored = (scaled / unit) * unit;
    let snapped = if round_up && floored != scaled {
        floored + unit
    } else {
        floored
    };

    snapped as f64 / MAGNIFICATION
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_commission_calculate() {
        struct TestCase {
            kind: CommissionKind,
            price: f64,
            quantity: i64,
            multiplier: f64,
            first_fill: bool,
            expected: f64,
        }

        let cases = vec![
            // TC0: no commission
            TestCase {
                kind: CommissionKind::None,
                price: 100.0,
                quantity: 10,
                multiplier: 1.0,
                first_fill: true,
                expected: 0.0,
            },
            // TC1: fixed, first fill pays
            TestCase {
                kind: CommissionKind::FixedPerTrade(5.0),
                price: 100.0,
                quantity: 10,
                multiplier: 1.0,
                first_fill: true,
                expected: 5.0,
            },
            // TC2: fixed, later fill free
            TestCase {
                kind: CommissionKind::FixedPerTrade(5.0),
                price: 100.0,
                quantity: 10,
                multiplier: 1.0,
                first_fill: false,
                expected: 0.0,
            },
            // TC3: percent of notional with multiplier
            TestCase {
                kind: CommissionKind::PercentOfNotional(0.0003),
                price: 4000.0,
                quantity: 2,
                multiplier: 10.0,
                first_fill: true,
                expected: 24.0,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let actual =
                test.kind
                    .calculate(test.price, test.quantity, test.multiplier, test.first_fill);
            assert_relative_eq!(actual, test.expected, epsilon = 1e-9);
            let _ = index;
        }
    }

    #[test]
    fn test_slippage_calculate() {
        let fixed = SlippageKind::FixedPerTrade(0.2);
        assert_relative_eq!(fixed.calculate(4000.0, 2, 10.0), 4.0, epsilon = 1e-9);

        let pct = SlippageKind::PercentOfNotional(0.0001);
        assert_relative_eq!(pct.calculate(4000.0, 2, 10.0), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_round_to_tick() {
        struct TestCase {
            tick_size: f64,
            price: f64,
            expected_down: f64,
            expected_up: f64,
        }

        let cases = vec![
            // TC0: unit tick
            TestCase {
                tick_size: 1.0,
                price: 99.4,
                expected_down: 99.0,
                expected_up: 100.0,
            },
            // TC1: fractional tick
            TestCase {
                tick_size: 0.2,
                price: 197.53,
                expected_down: 197.4,
                expected_up: 197.6,
            },
            // TC2: price already on the boundary
            TestCase {
                tick_size: 0.5,
                price: 200.0,
                expected_down: 200.0,
                expected_up: 200.0,
            },
            // TC3: zero tick size is a pass-through
            TestCase {
                tick_size: 0.0,
                price: 123.456,
                expected_down: 123.456,
                expected_up: 123.456,
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let contract = Contract {
                tick_size: test.tick_size,
                ..Contract::new("rb2405")
            };
            assert_relative_eq!(
                contract.round_down_to_tick(test.price),
                test.expected_down,
                epsilon = 1e-9
            );
            assert_relative_eq!(
                contract.round_up_to_tick(test.price),
                test.expected_up,
                epsilon = 1e-9
            );
            let _ = index;
        }
    }
}
