//! Exponentially weighted latency estimator.
//!
//! Complements the raw sliding window: the smoothed mean and variance damp
//! noise from bursty latency, so the throttle controller reads this
//! estimator while the breaker reads raw window counts.

/// Exponentially weighted running mean and variance.
///
/// `weight` is the smoothing weight toward recent samples (the configured
/// `temperature`): 1.0 tracks only the latest sample, values near 0 are
/// heavily smoothed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ema {
    weight: f64,
    mean: f64,
    var: f64,
    count: u64,
}

/// A point-in-time view of the smoothed estimator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EmaSnapshot {
    /// Smoothed mean latency in seconds.
    pub(crate) mean: f64,
    /// Smoothed coefficient of variation.
    pub(crate) cv: f64,
    /// Number of samples observed since the last reset.
    pub(crate) count: u64,
}

impl EmaSnapshot {
    /// Too few samples for the mean/cv to be meaningful.
    pub(crate) fn is_insufficient(&self) -> bool {
        self.count < 2
    }
}

impl Ema {
    pub(crate) fn new(weight: f64) -> Self {
        Ema {
            weight,
            mean: 0.0,
            var: 0.0,
            count: 0,
        }
    }

    /// Folds one latency observation (seconds) into the estimator.
    pub(crate) fn observe(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.var = 0.0;
            return;
        }
        // Exponentially weighted mean/variance (West's incremental form).
        let diff = value - self.mean;
        let incr = self.weight * diff;
        self.mean += incr;
        self.var = (1.0 - self.weight) * (self.var + diff * incr);
    }

    pub(crate) fn snapshot(&self) -> EmaSnapshot {
        let cv = if self.mean > 0.0 {
            self.var.max(0.0).sqrt() / self.mean
        } else {
            0.0
        };
        EmaSnapshot {
            mean: self.mean,
            cv,
            count: self.count,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.mean = 0.0;
        self.var = 0.0;
        self.count = 0;
    }
}
