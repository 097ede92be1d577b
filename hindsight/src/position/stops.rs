use hindsight_data::{
    bar::{Bar, Resolution},
    contract::Contract,
};
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing trigger levels against bar prices.
pub(crate) const PRICE_EPSILON: f64 = 1e-7;

/// How a stop threshold is expressed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum CalcMethod {
    /// Fraction of the entry price (stops) or of available profit
    /// (drawdowns).
    Percentage,
    /// Absolute currency amount (scaled by the contract multiplier) or
    /// absolute price distance.
    Fixed,
}

/// One rung of a trailing-stop ladder: once `returns` is reached the rung
/// arms, and a giveback beyond `drawdown` exits.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProfitLevel {
    pub returns: f64,
    pub drawdown: f64,
    pub triggered: bool,
}

/// The stop variants a condition can carry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum StopKind {
    /// Exit when price moves against the entry by `amount` (interpreted per
    /// `calc`).
    StopLoss { amount: f64, calc: CalcMethod },
    /// Exit when returns relative to entry reach `returns`.
    ProfitTarget { returns: f64 },
    /// Arm on reaching a profit level, exit when the giveback from the
    /// running extreme exceeds the level's drawdown allowance.
    TrailingStop {
        levels: Vec<ProfitLevel>,
        profit_calc: CalcMethod,
        drawdown_calc: CalcMethod,
    },
}

/// A standing instruction attached to a position that synthesizes an exit
/// order when prices move by a configured amount.
///
/// `sub_pos_id == 0` targets the whole position at its average fill price;
/// a non-zero id targets one lot at that lot's entry price.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StopCondition {
    pub kind: StopKind,
    pub active: bool,
    pub shares: i64,
    pub sub_pos_id: u64,
    pub avg_fill_price: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    /// Exit on the triggering bar (intra-bar order) instead of the next.
    pub immediately: bool,
}

impl StopCondition {
    pub fn new(kind: StopKind, shares: i64, sub_pos_id: u64, avg_fill_price: f64) -> Self {
        Self {
            kind,
            active: true,
            shares,
            sub_pos_id,
            avg_fill_price,
            highest_price: avg_fill_price,
            lowest_price: avg_fill_price,
            immediately: true,
        }
    }
}

/// What a triggered stop wants the runtime to do: synthesize an exit order
/// for `shares` of the targeted lot (or the whole position).
#[derive(Debug, Clone, PartialEq)]
pub struct ExitRequest {
    pub sub_pos_id: u64,
    pub shares: i64,
    pub stop_price: Option<f64>,
    pub limit_price: Option<f64>,
    pub immediately: bool,
    pub take_profit: bool,
}

fn bar_low(bar: &Bar) -> f64 {
    if bar.resolution == Resolution::Tick {
        bar.close
    } else {
        bar.low
    }
}

fn bar_high(bar: &Bar) -> f64 {
    if bar.resolution == Resolution::Tick {
        bar.close
    } else {
        bar.high
    }
}

/// Evaluate one condition against the current bar. `last_bar` is the bar
/// before `bar` in the same position lifetime, used by trailing stops.
pub(crate) fn check_stop_condition(
    condition: &mut StopCondition,
    bar: &Bar,
    last_bar: Option<&Bar>,
    contract: &Contract,
) -> Option<ExitRequest> {
    if !condition.active || condition.shares == 0 {
        return None;
    }

    match condition.kind.clone() {
        StopKind::StopLoss { amount, calc } => check_stop_loss(condition, bar, contract, amount, calc),
        StopKind::ProfitTarget { returns } => check_profit_target(condition, bar, contract, returns),
        StopKind::TrailingStop {
            mut levels,
            profit_calc,
            drawdown_calc,
        } => {
            let request = check_trailing_stop(
                condition,
                bar,
                last_bar?,
                contract,
                &mut levels,
                profit_calc,
                drawdown_calc,
            );
            condition.kind = StopKind::TrailingStop {
                levels,
                profit_calc,
                drawdown_calc,
            };
            request
        }
    }
}

fn check_stop_loss(
    condition: &StopCondition,
    bar: &Bar,
    contract: &Contract,
    amount: f64,
    calc: CalcMethod,
) -> Option<ExitRequest> {
    let entry = condition.avg_fill_price;
    let long = condition.shares > 0;

    let stop_level = match (calc, long) {
        (CalcMethod::Percentage, true) => entry * (1.0 - amount),
        (CalcMethod::Percentage, false) => entry * (1.0 + amount),
        (CalcMethod::Fixed, true) => entry - amount / contract.multiplier,
        (CalcMethod::Fixed, false) => entry + amount / contract.multiplier,
    };

    let low = bar_low(bar);
    let high = bar_high(bar);

    if long {
        if low < stop_level || (low - stop_level).abs() < PRICE_EPSILON {
            // Round toward the trigger so the emitted stop stays reachable
            // inside the bar's range.
            let mut stop_price = contract.round_down_to_tick(stop_level + PRICE_EPSILON);
            if stop_price < low {
                stop_price = low;
            }
            return Some(ExitRequest {
                sub_pos_id: condition.sub_pos_id,
                shares: condition.shares,
                stop_price: Some(stop_price),
                limit_price: None,
                immediately: condition.immediately,
                take_profit: false,
            });
        }
    } else if high > stop_level || (high - stop_level).abs() < PRICE_EPSILON {
        let mut stop_price = contract.round_up_to_tick(stop_level - PRICE_EPSILON);
        if stop_price > high {
            stop_price = high;
        }
        return Some(ExitRequest {
            sub_pos_id: condition.sub_pos_id,
            shares: condition.shares,
            stop_price: Some(stop_price),
            limit_price: None,
            immediately: condition.immediately,
            take_profit: false,
        });
    }

    None
}

fn check_profit_target(
    condition: &StopCondition,
    bar: &Bar,
    contract: &Contract,
    target: f64,
) -> Option<ExitRequest> {
    let entry = condition.avg_fill_price;
    let long = condition.shares > 0;

    let returns = if long {
        (bar_high(bar) - entry) / entry
    } else {
        (entry - bar_low(bar)) / entry
    };

    if returns > target || (returns - target).abs() < PRICE_EPSILON {
        let limit_price = if long {
            contract.round_down_to_tick(entry * (1.0 + target) + PRICE_EPSILON)
        } else {
            contract.round_up_to_tick(entry * (1.0 - target) - PRICE_EPSILON)
        };
        return Some(ExitRequest {
            sub_pos_id: condition.sub_pos_id,
            shares: condition.shares,
            stop_price: None,
            limit_price: Some(limit_price),
            immediately: condition.immediately,
            take_profit: true,
        });
    }

    None
}

/// Trailing stop with dynamic drawdown.
///
/// Returns are measured off the *previous* bar's extreme (the trail arms
/// one bar after the profit was reached), while the giveback is measured
/// against the *current* bar.
fn check_trailing_stop(
    condition: &mut StopCondition,
    bar: &Bar,
    last_bar: &Bar,
    contract: &Contract,
    levels: &mut [ProfitLevel],
    profit_calc: CalcMethod,
    drawdown_calc: CalcMethod,
) -> Option<ExitRequest> {
    let entry = condition.avg_fill_price;
    let long = condition.shares > 0;
    let multiplier = contract.multiplier;

    let last_low = bar_low(last_bar);
    let last_high = bar_high(last_bar);
    let curr_low = bar_low(bar);
    let curr_high = bar_high(bar);

    condition.lowest_price = condition.lowest_price.min(last_low);
    condition.highest_price = condition.highest_price.max(last_high);

    let returns = if long {
        match profit_calc {
            CalcMethod::Percentage => (last_high - entry) / entry,
            CalcMethod::Fixed => (last_high - entry) * multiplier,
        }
    } else {
        match profit_calc {
            CalcMethod::Percentage => (entry - last_low) / entry,
            CalcMethod::Fixed => (entry - last_low) * multiplier,
        }
    };

    let drawdown = if long {
        match drawdown_calc {
            CalcMethod::Percentage => {
                if curr_low < condition.highest_price && condition.highest_price != entry {
                    (condition.highest_price - curr_low) / (condition.highest_price - entry)
                } else {
                    0.0
                }
            }
            CalcMethod::Fixed => condition.highest_price - curr_low,
        }
    } else {
        match drawdown_calc {
            CalcMethod::Percentage => {
                if curr_high > condition.lowest_price && condition.lowest_price != entry {
                    (curr_high - condition.lowest_price) / (entry - condition.lowest_price)
                } else {
                    0.0
                }
            }
            CalcMethod::Fixed => curr_high - condition.lowest_price,
        }
    };

    // Levels are ordered highest-returns first; walk the smallest rung
    // first so a modest profit can still be protected.
    for index in (0..levels.len()).rev() {
        let level = &mut levels[index];
        if returns > level.returns || (returns - level.returns).abs() < PRICE_EPSILON {
            level.triggered = true;
        }
        if !level.triggered {
            continue;
        }

        let giveback_exceeded = match drawdown_calc {
            CalcMethod::Percentage => {
                drawdown > (1.0 - level.drawdown)
                    || (drawdown + level.drawdown - 1.0).abs() < PRICE_EPSILON
            }
            CalcMethod::Fixed => drawdown > level.drawdown,
        };
        if !giveback_exceeded {
            continue;
        }

        let stop_price = if long {
            let raw = match drawdown_calc {
                CalcMethod::Percentage => {
                    condition.highest_price
                        - (condition.highest_price - entry) * (1.0 - level.drawdown)
                }
                CalcMethod::Fixed => condition.highest_price - level.drawdown,
            };
            let mut price = contract.round_down_to_tick(raw + PRICE_EPSILON);
            if price < curr_low {
                price = curr_low;
            }
            price
        } else {
            let raw = match drawdown_calc {
                CalcMethod::Percentage => {
                    condition.lowest_price + (entry - condition.lowest_price) * (1.0 - level.drawdown)
                }
                CalcMethod::Fixed => condition.lowest_price + level.drawdown,
            };
            let mut price = contract.round_up_to_tick(raw - PRICE_EPSILON);
            if price > curr_high {
                price = curr_high;
            }
            price
        };

        return Some(ExitRequest {
            sub_pos_id: condition.sub_pos_id,
            shares: condition.shares,
            stop_price: Some(stop_price),
            limit_price: None,
            immediately: condition.immediately,
            take_profit: true,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use hindsight_data::test_utils::bar;

    fn contract() -> Contract {
        Contract::new("rb")
    }

    fn test_bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        bar("rb", DateTime::<Utc>::MIN_UTC, open, high, low, close, 1)
    }

    #[test]
    fn test_stop_loss_pct_long_triggers_at_reachable_price() {
        let mut condition = StopCondition::new(
            StopKind::StopLoss {
                amount: 0.01,
                calc: CalcMethod::Percentage,
            },
            10,
            0,
            100.0,
        );

        // Stop level 99; bar low 98 touches it.
        let request =
            check_stop_condition(&mut condition, &test_bar(100.0, 101.0, 98.0, 99.0), None, &contract())
                .unwrap();
        assert_eq!(request.stop_price, Some(99.0));
        assert_eq!(request.shares, 10);
        assert!(request.immediately);
        assert!(!request.take_profit);

        // Bar above the stop level leaves the condition quiet.
        let mut condition = StopCondition::new(
            StopKind::StopLoss {
                amount: 0.01,
                calc: CalcMethod::Percentage,
            },
            10,
            0,
            100.0,
        );
        assert!(check_stop_condition(
            &mut condition,
            &test_bar(100.0, 101.0, 99.5, 100.0),
            None,
            &contract()
        )
        .is_none());
    }

    #[test]
    fn test_stop_loss_clamps_to_bar_low() {
        // Entry 100, 5% stop -> level 95; the bar gapped to a low of 96.5,
        // wait: low must touch the level to trigger at all.
        let mut condition = StopCondition::new(
            StopKind::StopLoss {
                amount: 0.05,
                calc: CalcMethod::Percentage,
            },
            1,
            0,
            100.0,
        );
        let mut contract = contract();
        contract.tick_size = 2.0;

        // Level 95 rounds down to tick 94, below the bar low 94.5, so the
        // request clamps to the low.
        let request = check_stop_condition(
            &mut condition,
            &test_bar(96.0, 97.0, 94.5, 95.0),
            None,
            &contract,
        )
        .unwrap();
        assert_eq!(request.stop_price, Some(94.5));
    }

    #[test]
    fn test_short_stop_loss_uses_high() {
        let mut condition = StopCondition::new(
            StopKind::StopLoss {
                amount: 0.01,
                calc: CalcMethod::Percentage,
            },
            -10,
            0,
            100.0,
        );

        // Stop level 101; high 101.5 breaches it.
        let request = check_stop_condition(
            &mut condition,
            &test_bar(100.0, 101.5, 99.0, 101.0),
            None,
            &contract(),
        )
        .unwrap();
        assert_eq!(request.stop_price, Some(101.0));
    }

    #[test]
    fn test_profit_target_long() {
        let mut condition =
            StopCondition::new(StopKind::ProfitTarget { returns: 0.02 }, 5, 0, 100.0);

        assert!(check_stop_condition(
            &mut condition,
            &test_bar(100.0, 101.0, 99.0, 100.0),
            None,
            &contract()
        )
        .is_none());

        let request = check_stop_condition(
            &mut condition,
            &test_bar(101.0, 102.5, 100.0, 102.0),
            None,
            &contract(),
        )
        .unwrap();
        assert_eq!(request.limit_price, Some(102.0));
        assert!(request.take_profit);
    }

    #[test]
    fn test_trailing_stop_short_scenario() {
        // Short 1 @ 200; trailing stop arms at 2% profit with 0.5 drawdown
        // allowance. Lows reach 195 (2.5%), then a bounce to 197.5 exits.
        let mut condition = StopCondition::new(
            StopKind::TrailingStop {
                levels: vec![ProfitLevel {
                    returns: 0.02,
                    drawdown: 0.5,
                    triggered: false,
                }],
                profit_calc: CalcMethod::Percentage,
                drawdown_calc: CalcMethod::Percentage,
            },
            -1,
            0,
            200.0,
        );

        let first = test_bar(199.0, 199.0, 196.0, 196.5);
        let second = test_bar(196.0, 196.5, 195.0, 195.5);
        let third = test_bar(196.0, 197.5, 195.5, 197.0);

        assert!(
            check_stop_condition(&mut condition, &second, Some(&first), &contract()).is_none()
        );
        let request =
            check_stop_condition(&mut condition, &third, Some(&second), &contract()).unwrap();

        // Stop = lowest(195) + (200 - 195) * (1 - 0.5) = 197.5.
        assert_eq!(request.stop_price, Some(197.5));
        assert!(request.take_profit);
    }

    #[test]
    fn test_inactive_condition_is_silent() {
        let mut condition = StopCondition::new(
            StopKind::StopLoss {
                amount: 0.5,
                calc: CalcMethod::Percentage,
            },
            10,
            0,
            100.0,
        );
        condition.active = false;

        assert!(check_stop_condition(
            &mut condition,
            &test_bar(10.0, 10.0, 10.0, 10.0),
            None,
            &contract()
        )
        .is_none());
    }
}
