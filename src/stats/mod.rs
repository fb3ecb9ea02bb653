//! Rolling window statistics over request outcomes.
//!
//! The dispatch layer reports one [`OutcomeSample`] per completed or failed
//! request attempt; this module maintains time-bounded aggregates over them.
//! Two estimators run side by side: a raw sliding window (strict recent
//! counts, used by the circuit breaker) and an EMA (smoothed latency
//! mean/cv, used by the throttle controller). Recording is O(1) amortized
//! and never blocks beyond a short mutex hold.

mod ema;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::constants::SAMPLE_CAP;
pub(crate) use ema::EmaSnapshot;
use ema::Ema;

/// Classification of one observed request result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx response.
    Success,
    /// 404 response. Tracked separately from general failures: in paginated
    /// catalog listings a run of 404s usually means the end of the data,
    /// not a server fault.
    NotFound,
    /// Other 4xx response (including 429).
    ClientError,
    /// 5xx response.
    ServerError,
    /// The request timed out before a response arrived.
    Timeout,
}

impl Outcome {
    /// Whether this outcome counts toward the general failure rate.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::ClientError | Outcome::ServerError | Outcome::Timeout
        )
    }
}

/// One observed request result. Immutable; created by the dispatch layer
/// and consumed once by the statistics tracker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutcomeSample {
    pub(crate) recorded_at: Instant,
    pub(crate) latency: Duration,
    pub(crate) outcome: Outcome,
}

/// Derived aggregates over a trailing window. Computed on demand, never
/// stored.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    /// Mean latency in seconds over the window.
    pub mean_latency: f64,
    /// Coefficient of variation of latency (stddev / mean).
    pub latency_cv: f64,
    /// Fraction of samples that are failures (client/server errors and
    /// timeouts).
    pub failure_rate: f64,
    /// Fraction of samples that are 404s.
    pub not_found_rate: f64,
    /// Number of samples the aggregates were computed from.
    pub sample_count: usize,
}

impl StatsSnapshot {
    /// Too few samples for rates and cv to be meaningful (fewer than two);
    /// also guards the cv computation against division by zero.
    pub fn is_insufficient(&self) -> bool {
        self.sample_count < 2
    }

    fn empty() -> Self {
        StatsSnapshot {
            mean_latency: 0.0,
            latency_cv: 0.0,
            failure_rate: 0.0,
            not_found_rate: 0.0,
            sample_count: 0,
        }
    }
}

struct TrackerInner {
    samples: VecDeque<OutcomeSample>,
    ema: Ema,
}

/// Thread-safe tracker holding the raw sample window and the EMA estimator.
///
/// Samples older than the `history` horizon are evicted on every record;
/// snapshots are computed over any requested trailing duration, which lets
/// the breaker use windows shorter than the controller's.
pub(crate) struct StatsTracker {
    history: Duration,
    inner: Mutex<TrackerInner>,
}

impl StatsTracker {
    pub(crate) fn new(history: Duration, temperature: f64) -> Self {
        StatsTracker {
            history,
            inner: Mutex::new(TrackerInner {
                samples: VecDeque::new(),
                ema: Ema::new(temperature),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Appends a sample and evicts entries past the history horizon.
    pub(crate) fn record(&self, sample: OutcomeSample) {
        let mut inner = self.lock();
        let now = sample.recorded_at;
        while let Some(front) = inner.samples.front() {
            if now.duration_since(front.recorded_at) > self.history {
                inner.samples.pop_front();
            } else {
                break;
            }
        }
        inner.samples.push_back(sample);
        while inner.samples.len() > SAMPLE_CAP {
            inner.samples.pop_front();
        }
        let latency_secs = sample.latency.as_secs_f64();
        inner.ema.observe(latency_secs);
    }

    /// Computes aggregates over only the samples within the trailing
    /// `window` ending at `now`.
    pub(crate) fn snapshot(&self, window: Duration, now: Instant) -> StatsSnapshot {
        let inner = self.lock();
        let mut count = 0usize;
        let mut failures = 0usize;
        let mut not_found = 0usize;
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;

        // Newest samples are at the back; stop at the first one outside
        // the window.
        for sample in inner.samples.iter().rev() {
            if now.duration_since(sample.recorded_at) > window {
                break;
            }
            count += 1;
            if sample.outcome.is_failure() {
                failures += 1;
            }
            if sample.outcome == Outcome::NotFound {
                not_found += 1;
            }
            let secs = sample.latency.as_secs_f64();
            sum += secs;
            sum_sq += secs * secs;
        }

        if count == 0 {
            return StatsSnapshot::empty();
        }

        let n = count as f64;
        let mean = sum / n;
        let var = (sum_sq / n - mean * mean).max(0.0);
        let cv = if count >= 2 && mean > 0.0 {
            var.sqrt() / mean
        } else {
            0.0
        };

        StatsSnapshot {
            mean_latency: mean,
            latency_cv: cv,
            failure_rate: failures as f64 / n,
            not_found_rate: not_found as f64 / n,
            sample_count: count,
        }
    }

    /// Smoothed latency estimate used by the throttle controller.
    pub(crate) fn ema_snapshot(&self) -> EmaSnapshot {
        self.lock().ema.snapshot()
    }

    /// Clears the raw window and the EMA. Used when the breaker re-closes
    /// and statistics start over.
    pub(crate) fn reset(&self) {
        let mut inner = self.lock();
        inner.samples.clear();
        inner.ema.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(at: Instant, latency_ms: u64, outcome: Outcome) -> OutcomeSample {
        OutcomeSample {
            recorded_at: at,
            latency: Duration::from_millis(latency_ms),
            outcome,
        }
    }

    #[test]
    fn test_empty_snapshot_is_insufficient() {
        let tracker = StatsTracker::new(Duration::from_secs(3600), 0.3);
        let snap = tracker.snapshot(Duration::from_secs(60), Instant::now());
        assert!(snap.is_insufficient());
        assert_eq!(snap.sample_count, 0);
    }

    #[test]
    fn test_single_sample_is_insufficient() {
        let tracker = StatsTracker::new(Duration::from_secs(3600), 0.3);
        let now = Instant::now();
        tracker.record(sample(now, 100, Outcome::Success));
        let snap = tracker.snapshot(Duration::from_secs(60), now);
        assert_eq!(snap.sample_count, 1);
        assert!(snap.is_insufficient());
    }

    #[test]
    fn test_failure_and_not_found_rates() {
        let tracker = StatsTracker::new(Duration::from_secs(3600), 0.3);
        let now = Instant::now();
        for _ in 0..6 {
            tracker.record(sample(now, 100, Outcome::Success));
        }
        for _ in 0..2 {
            tracker.record(sample(now, 100, Outcome::ServerError));
        }
        tracker.record(sample(now, 100, Outcome::Timeout));
        tracker.record(sample(now, 100, Outcome::NotFound));

        let snap = tracker.snapshot(Duration::from_secs(60), now);
        assert_eq!(snap.sample_count, 10);
        assert!((snap.failure_rate - 0.3).abs() < 1e-9);
        assert!((snap.not_found_rate - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_latency_mean_and_cv() {
        let tracker = StatsTracker::new(Duration::from_secs(3600), 0.3);
        let now = Instant::now();
        for _ in 0..50 {
            tracker.record(sample(now, 100, Outcome::Success));
        }
        let snap = tracker.snapshot(Duration::from_secs(60), now);
        assert!((snap.mean_latency - 0.1).abs() < 1e-9);
        assert!(snap.latency_cv < 1e-6);
    }

    #[test]
    fn test_snapshot_respects_requested_window() {
        let tracker = StatsTracker::new(Duration::from_secs(3600), 0.3);
        let start = Instant::now();
        // Old failures, recent successes.
        for _ in 0..5 {
            tracker.record(sample(start, 100, Outcome::ServerError));
        }
        let later = start + Duration::from_secs(120);
        for _ in 0..5 {
            tracker.record(sample(later, 100, Outcome::Success));
        }

        // Short window sees only the successes.
        let recent = tracker.snapshot(Duration::from_secs(60), later);
        assert_eq!(recent.sample_count, 5);
        assert_eq!(recent.failure_rate, 0.0);

        // Wide window sees both.
        let wide = tracker.snapshot(Duration::from_secs(600), later);
        assert_eq!(wide.sample_count, 10);
        assert!((wide.failure_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_history_horizon_evicts_old_samples() {
        let tracker = StatsTracker::new(Duration::from_secs(100), 0.3);
        let start = Instant::now();
        tracker.record(sample(start, 100, Outcome::Success));
        tracker.record(sample(start + Duration::from_secs(200), 100, Outcome::Success));

        // The first sample is past the horizon and should be gone even
        // for a wide snapshot window.
        let snap = tracker.snapshot(
            Duration::from_secs(10_000),
            start + Duration::from_secs(200),
        );
        assert_eq!(snap.sample_count, 1);
    }

    #[test]
    fn test_reset_clears_window_and_ema() {
        let tracker = StatsTracker::new(Duration::from_secs(3600), 0.3);
        let now = Instant::now();
        for _ in 0..10 {
            tracker.record(sample(now, 100, Outcome::ServerError));
        }
        tracker.reset();
        assert_eq!(tracker.snapshot(Duration::from_secs(60), now).sample_count, 0);
        assert!(tracker.ema_snapshot().is_insufficient());
    }

    #[test]
    fn test_outcome_failure_classification() {
        assert!(!Outcome::Success.is_failure());
        assert!(!Outcome::NotFound.is_failure());
        assert!(Outcome::ClientError.is_failure());
        assert!(Outcome::ServerError.is_failure());
        assert!(Outcome::Timeout.is_failure());
    }
}
