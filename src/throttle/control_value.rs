//! Bounded control value moved by the explore phases.

use crate::config::BoundedValue;

/// Direction of the last adjustment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepDirection {
    Up,
    Down,
}

/// A live tunable clamped to its configured bounds. Increases are
/// additive, decreases multiplicative, so the controller backs off fast
/// and recovers gradually.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ControlValue {
    value: f64,
    min: f64,
    max: f64,
}

impl ControlValue {
    pub(crate) fn new(bounds: BoundedValue) -> Self {
        ControlValue {
            value: bounds.base,
            min: bounds.min,
            max: bounds.max,
        }
    }

    pub(crate) fn get(&self) -> f64 {
        self.value
    }

    /// Sets the value directly, clamped to the bounds.
    pub(crate) fn set(&mut self, value: f64) {
        self.value = value.clamp(self.min, self.max);
    }

    /// Additive increase, capped at the upper bound.
    pub(crate) fn increase(&mut self, step: f64) {
        self.value = (self.value + step).min(self.max);
    }

    /// Multiplicative decrease, floored at the lower bound.
    pub(crate) fn decrease(&mut self, factor: f64) {
        self.value = (self.value * factor).max(self.min);
    }

    pub(crate) fn at_max(&self) -> bool {
        self.value >= self.max
    }
}
