use serde::{Deserialize, Serialize};

/// Outcome of feeding one `(value, reference)` pair to a [`Cross`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub enum CrossEvent {
    None,
    /// Value moved from at-or-below the reference to strictly above it.
    Above,
    /// Value moved from at-or-above the reference to strictly below it.
    Below,
}

const EQ_EPSILON: f64 = 1e-8;

fn sign(value: f64, reference: f64) -> i8 {
    if (value - reference).abs() < EQ_EPSILON {
        0
    } else if value > reference {
        1
    } else {
        -1
    }
}

/// Detects a value series crossing a reference series.
///
/// Feed the newest pair each bar; a cross is reported on the bar where the
/// sign of `value - reference` flips. NaN in either input resets the
/// detector and reports [`CrossEvent::None`].
#[derive(Debug, Clone, Default)]
pub struct Cross {
    prev_sign: Option<i8>,
}

impl Cross {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64, reference: f64) -> CrossEvent {
        if value.is_nan() || reference.is_nan() {
            self.prev_sign = None;
            return CrossEvent::None;
        }

        let current = sign(value, reference);
        let event = match (self.prev_sign, current) {
            (Some(prev), 1) if prev <= 0 => CrossEvent::Above,
            (Some(prev), -1) if prev >= 0 => CrossEvent::Below,
            _ => CrossEvent::None,
        };

        self.prev_sign = Some(current);
        event
    }
}
