//! Admission gate: the single entry point callers interact with.
//!
//! Every request asks the gate for admission before going out and reports
//! its outcome afterwards. Internally the gate paces admissions with a
//! token bucket refilled at the controller's target rate, bounds in-flight
//! requests at the controller's target concurrency, and defers to the
//! circuit breaker whenever it is not CLOSED.
//!
//! There is no background task. Both the breaker and the controller are
//! driven lazily from the admission and outcome paths, at most once per
//! evaluation interval, serialized behind a single mutex so no two
//! evaluations ever overlap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::breaker::{BreakerStatus, CircuitBreaker, TrialDecision};
use crate::config::constants::{BURST_SECONDS, EVALUATION_INTERVAL};
use crate::config::AdmissionConfig;
use crate::error_handling::ConfigError;
use crate::stats::{Outcome, OutcomeSample, StatsSnapshot, StatsTracker};
use crate::throttle::{Phase, ThrottleController};

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Proceed now. The request counts against the in-flight bound and
    /// must be paired with a [`AdmissionGate::record_outcome`] call.
    Admit,
    /// The breaker is OPEN, or HALF_OPEN with its trial slot occupied.
    /// No retry hint; callers back off on their own.
    Deny,
    /// Capacity is momentarily exhausted. Nothing was claimed; sleep for
    /// the given duration and ask again.
    DelayThenAdmit(Duration),
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe admission control engine.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct AdmissionGate {
    stats: StatsTracker,
    breaker: CircuitBreaker,
    throttle: ThrottleController,
    pacer: Mutex<TokenBucket>,
    in_flight: AtomicUsize,
    /// Outcome reports still expected before the half-open trial slot may
    /// be released; zero means no trial is outstanding. Set when a trial
    /// is admitted to the number of requests in flight at that moment
    /// (stale pre-trial requests included) plus the trial itself, so an
    /// anonymous stale outcome can never free the slot early.
    pending_trial_outcomes: AtomicUsize,
    /// Timestamp of the last evaluation; the mutex serializes evaluators.
    evaluator: Mutex<Instant>,
}

impl AdmissionGate {
    /// Builds a gate from a validated configuration.
    pub fn new(config: AdmissionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = Instant::now();
        Ok(AdmissionGate {
            stats: StatsTracker::new(config.history, config.temperature),
            breaker: CircuitBreaker::new(config.breaker, now),
            throttle: ThrottleController::new(config.throttle, now),
            pacer: Mutex::new(TokenBucket {
                tokens: 1.0,
                last_refill: now,
            }),
            in_flight: AtomicUsize::new(0),
            pending_trial_outcomes: AtomicUsize::new(0),
            evaluator: Mutex::new(now),
        })
    }

    /// Asks for admission without waiting.
    ///
    /// * [`Decision::Admit`] claims one in-flight slot and one pacing
    ///   token; the caller must report back via [`record_outcome`].
    /// * [`Decision::Deny`] and [`Decision::DelayThenAdmit`] claim
    ///   nothing.
    ///
    /// [`record_outcome`]: AdmissionGate::record_outcome
    pub fn try_admit(&self) -> Decision {
        let now = Instant::now();
        self.evaluate_if_due(now);
        match self.breaker.status() {
            BreakerStatus::Open => Decision::Deny,
            BreakerStatus::HalfOpen => match self.breaker.try_trial(now) {
                TrialDecision::Admit => {
                    let prior = self.in_flight.fetch_add(1, Ordering::SeqCst);
                    // Outcomes are anonymous, so the trial slot can only
                    // be released once every request outstanding at this
                    // point has reported back.
                    self.pending_trial_outcomes
                        .store(prior + 1, Ordering::SeqCst);
                    Decision::Admit
                }
                TrialDecision::Wait(delay) => Decision::DelayThenAdmit(delay),
                // Trial slot occupied: deny rather than queue behind it.
                TrialDecision::Busy => Decision::Deny,
            },
            BreakerStatus::Closed => self.pace(now),
        }
    }

    /// Waits until admitted or denied. `Deny` is returned immediately so
    /// callers can observe the OPEN breaker instead of blocking on it.
    pub async fn admit(&self) -> Decision {
        loop {
            match self.try_admit() {
                Decision::DelayThenAdmit(delay) => tokio::time::sleep(delay).await,
                decision => return decision,
            }
        }
    }

    /// Reports the outcome of an admitted request, releasing its in-flight
    /// slot and feeding the statistics every control decision reads.
    pub fn record_outcome(&self, latency: Duration, outcome: Outcome) {
        let now = Instant::now();
        self.stats.record(OutcomeSample {
            recorded_at: now,
            latency,
            outcome,
        });
        self.release_slot();
        // The trial slot frees only when the last outcome it was waiting
        // on arrives; earlier (stale) reports just count down.
        if self
            .pending_trial_outcomes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            == Ok(1)
        {
            self.breaker.release_trial();
        }
        self.evaluate_if_due(now);
    }

    /// Forces a control evaluation now, regardless of the interval. Useful
    /// when no traffic is flowing and state would otherwise sit still.
    pub fn poll(&self) {
        let now = Instant::now();
        let mut last = self.lock_evaluator();
        *last = now;
        self.breaker.evaluate(&self.stats, now);
        self.throttle.evaluate(&self.stats, self.breaker.status(), now);
    }

    /// Current breaker status.
    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.status()
    }

    /// Current throttle phase.
    pub fn phase(&self) -> Phase {
        self.throttle.phase()
    }

    /// Current target rate in requests per second.
    pub fn target_rate(&self) -> f64 {
        self.throttle.target_rate()
    }

    /// Current target concurrency bound.
    pub fn target_concurrency(&self) -> usize {
        self.throttle.target_concurrency()
    }

    /// Requests admitted but not yet reported.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Statistics over the trailing window.
    pub fn stats_snapshot(&self, window: Duration) -> StatsSnapshot {
        self.stats.snapshot(window, Instant::now())
    }

    fn lock_evaluator(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.evaluator
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Runs the breaker and controller at most once per interval. The
    /// evaluator mutex is held across both so their decisions for a tick
    /// are consistent with each other.
    fn evaluate_if_due(&self, now: Instant) {
        let mut last = self.lock_evaluator();
        if now.duration_since(*last) < EVALUATION_INTERVAL {
            return;
        }
        *last = now;
        self.breaker.evaluate(&self.stats, now);
        self.throttle.evaluate(&self.stats, self.breaker.status(), now);
    }

    /// Token-bucket pacing plus the in-flight bound, CLOSED path only.
    fn pace(&self, now: Instant) -> Decision {
        // Reserve the slot with a CAS before touching the bucket; a bare
        // check followed by an increment would let racing callers all
        // pass the bound together.
        let bound = self.throttle.target_concurrency();
        if self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < bound).then_some(n + 1)
            })
            .is_err()
        {
            // A slot frees up when some outcome lands; the admission
            // interval is a reasonable time to wait for one.
            return Decision::DelayThenAdmit(self.interval_at_current_rate());
        }

        let rate = self.throttle.target_rate();
        let mut bucket = self
            .pacer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        let burst = (rate * BURST_SECONDS).max(1.0);
        bucket.tokens = (bucket.tokens + elapsed * rate).min(burst);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Admit
        } else {
            let deficit = 1.0 - bucket.tokens;
            drop(bucket);
            // No token yet: give the reserved slot back.
            self.release_slot();
            Decision::DelayThenAdmit(Duration::from_secs_f64(deficit / rate))
        }
    }

    /// Saturating release: a stray report must not wrap the counter.
    fn release_slot(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn interval_at_current_rate(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.throttle.target_rate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoundedValue;

    fn config() -> AdmissionConfig {
        let mut config = AdmissionConfig::default();
        config.throttle.rate = BoundedValue {
            base: 10.0,
            min: 1.0,
            max: 100.0,
        };
        config.throttle.concurrency = BoundedValue {
            base: 2.0,
            min: 1.0,
            max: 10.0,
        };
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_admission_succeeds() {
        let gate = AdmissionGate::new(config()).unwrap();
        assert_eq!(gate.try_admit(), Decision::Admit);
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_delays_burst() {
        let gate = AdmissionGate::new(config()).unwrap();
        // Bucket starts with one token; the second immediate ask must wait.
        assert_eq!(gate.try_admit(), Decision::Admit);
        gate.record_outcome(Duration::from_millis(50), Outcome::Success);
        match gate.try_admit() {
            Decision::DelayThenAdmit(delay) => {
                assert!(delay <= Duration::from_millis(100));
                assert!(delay > Duration::ZERO);
            }
            other => panic!("expected a pacing delay, got {other:?}"),
        }
        // Nothing was claimed by the delayed ask.
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_refill_at_target_rate() {
        let gate = AdmissionGate::new(config()).unwrap();
        assert_eq!(gate.try_admit(), Decision::Admit);
        gate.record_outcome(Duration::from_millis(50), Outcome::Success);

        // 10 rps: one token accrues every 100ms.
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(gate.try_admit(), Decision::Admit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_blocks_admission() {
        let gate = AdmissionGate::new(config()).unwrap();
        assert_eq!(gate.try_admit(), Decision::Admit);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(gate.try_admit(), Decision::Admit);
        assert_eq!(gate.in_flight(), 2);

        // Bound is 2: tokens available, still delayed.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(gate.try_admit(), Decision::DelayThenAdmit(_)));

        // Reporting an outcome frees a slot.
        gate.record_outcome(Duration::from_millis(50), Outcome::Success);
        assert_eq!(gate.in_flight(), 1);
        assert_eq!(gate.try_admit(), Decision::Admit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_denies() {
        let gate = AdmissionGate::new(config()).unwrap();
        // Sustained timeouts trip the short-circuit error check.
        for _ in 0..20 {
            gate.record_outcome(Duration::from_millis(50), Outcome::Timeout);
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        gate.poll();
        assert_eq!(gate.breaker_status(), BreakerStatus::Open);
        assert_eq!(gate.try_admit(), Decision::Deny);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_outcome_does_not_free_trial_slot() {
        let gate = AdmissionGate::new(config()).unwrap();

        // One request admitted while CLOSED whose outcome will arrive
        // late, after the breaker has gone OPEN and half-opened again.
        assert_eq!(gate.try_admit(), Decision::Admit);

        // Admitted failures trip the short-circuit error check.
        for _ in 0..2 {
            tokio::time::advance(Duration::from_millis(100)).await;
            assert_eq!(gate.try_admit(), Decision::Admit);
            gate.record_outcome(Duration::from_millis(50), Outcome::Timeout);
        }
        tokio::time::advance(Duration::from_millis(100)).await;
        gate.poll();
        assert_eq!(gate.breaker_status(), BreakerStatus::Open);

        tokio::time::advance(Duration::from_secs(300)).await;
        gate.poll();
        assert_eq!(gate.breaker_status(), BreakerStatus::HalfOpen);

        // Trial admitted with the stale request still outstanding.
        assert_eq!(gate.try_admit(), Decision::Admit);

        // The stale outcome lands: the trial slot must stay claimed.
        gate.record_outcome(Duration::from_millis(50), Outcome::Success);
        assert_eq!(gate.try_admit(), Decision::Deny);

        // The trial's own outcome frees it; the next trial is paced
        // normally.
        gate.record_outcome(Duration::from_millis(50), Outcome::Success);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(gate.try_admit(), Decision::Admit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcome_report_is_saturating() {
        let gate = AdmissionGate::new(config()).unwrap();
        gate.record_outcome(Duration::from_millis(50), Outcome::Success);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_waits_out_pacing() {
        let gate = AdmissionGate::new(config()).unwrap();
        assert_eq!(gate.try_admit(), Decision::Admit);
        gate.record_outcome(Duration::from_millis(50), Outcome::Success);

        let started = Instant::now();
        let decision = gate.admit().await;
        assert_eq!(decision, Decision::Admit);
        // 10 rps pacing: roughly one interval elapsed under paused time.
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
