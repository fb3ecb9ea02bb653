//! Circuit breaker gating admission to the upstream API.
//!
//! A three-state machine (CLOSED, OPEN, HALF_OPEN) driven by failure rates
//! from the raw statistics window. Two short-circuit checks run at all
//! times, burn-in or not, because they indicate acute failure rather than
//! statistical noise: a sustained run of 404s (exhausted catalog
//! pagination) and a sustained run of general errors (upstream outage).
//! The regular CLOSED check only activates after a burn-in period so
//! sparse early samples cannot trip it.

use std::sync::Mutex;
use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::stats::StatsTracker;

/// Circuit breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerStatus {
    /// Admitting all traffic.
    Closed,
    /// Rejecting all traffic until the cooldown expires.
    Open,
    /// Probing recovery with paced trial requests.
    HalfOpen,
}

impl std::fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerStatus::Closed => write!(f, "CLOSED"),
            BreakerStatus::Open => write!(f, "OPEN"),
            BreakerStatus::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Outcome of asking for a HALF_OPEN trial slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum TrialDecision {
    /// The slot was claimed; issue the trial request now.
    Admit,
    /// Pacing not yet satisfied; retry after this delay.
    Wait(Duration),
    /// A trial is already in flight.
    Busy,
}

struct BreakerState {
    status: BreakerStatus,
    status_since: Instant,
    /// When CLOSED was last entered; anchors the burn-in clock.
    closed_since: Instant,
    /// One trial at a time while HALF_OPEN.
    trial_in_flight: bool,
    last_trial_at: Option<Instant>,
}

/// Three-state circuit breaker. All transitions happen inside
/// [`CircuitBreaker::evaluate`], called from the gate's single serialized
/// evaluator; concurrent readers only ever see a complete state.
pub(crate) struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub(crate) fn new(config: BreakerConfig, now: Instant) -> Self {
        CircuitBreaker {
            config,
            state: Mutex::new(BreakerState {
                status: BreakerStatus::Closed,
                status_since: now,
                closed_since: now,
                trial_in_flight: false,
                last_trial_at: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> BreakerStatus {
        self.lock().status
    }

    /// Runs one breaker evaluation at `now` against the raw statistics
    /// window. Insufficient snapshots defer the corresponding check.
    pub(crate) fn evaluate(&self, stats: &StatsTracker, now: Instant) {
        let mut state = self.lock();
        match state.status {
            BreakerStatus::Closed => self.evaluate_closed(&mut state, stats, now),
            BreakerStatus::Open => {
                if now.duration_since(state.status_since) >= self.config.open_cooldown_period {
                    state.status = BreakerStatus::HalfOpen;
                    state.status_since = now;
                    state.trial_in_flight = false;
                    state.last_trial_at = None;
                    info!(
                        "Circuit breaker half-opened after {}s cooldown; pacing trial requests {}s apart",
                        self.config.open_cooldown_period.as_secs(),
                        self.config.half_open_delay.as_secs_f64()
                    );
                }
            }
            BreakerStatus::HalfOpen => self.evaluate_half_open(&mut state, stats, now),
        }
    }

    fn evaluate_closed(&self, state: &mut BreakerState, stats: &StatsTracker, now: Instant) {
        // Short-circuit checks first: acute failure signals bypass burn-in.
        let errors = stats.snapshot(self.config.short_circuit_errors_window_size, now);
        if !errors.is_insufficient()
            && errors.failure_rate > self.config.short_circuit_errors_failure_rate_threshold
        {
            self.trip_open(state, now, "error rate", errors.failure_rate);
            return;
        }

        let not_found = stats.snapshot(self.config.short_circuit_404s_window_size, now);
        if !not_found.is_insufficient()
            && not_found.not_found_rate > self.config.short_circuit_404s_failure_rate_threshold
        {
            self.trip_open(state, now, "not-found rate", not_found.not_found_rate);
            return;
        }

        // The regular failure-rate check is suppressed until burn-in ends.
        if now.duration_since(state.closed_since) < self.config.closed_burnin_period {
            return;
        }
        let snap = stats.snapshot(self.config.closed_window_size, now);
        if !snap.is_insufficient()
            && snap.failure_rate > self.config.closed_failure_rate_threshold
        {
            self.trip_open(state, now, "failure rate", snap.failure_rate);
        }
    }

    fn evaluate_half_open(&self, state: &mut BreakerState, stats: &StatsTracker, now: Instant) {
        let elapsed = now.duration_since(state.status_since);
        // Bounding the snapshot window to the time since half-opening makes
        // the evaluation window fresh: no pre-transition samples leak in.
        let window = elapsed.min(self.config.half_open_window_size);
        let snap = stats.snapshot(window, now);
        if snap.is_insufficient() {
            return;
        }

        if snap.failure_rate > self.config.half_open_failure_rate_threshold {
            self.trip_open(state, now, "trial failure rate", snap.failure_rate);
        } else if elapsed >= self.config.half_open_window_size {
            state.status = BreakerStatus::Closed;
            state.status_since = now;
            state.closed_since = now;
            state.trial_in_flight = false;
            state.last_trial_at = None;
            stats.reset();
            info!(
                "Circuit breaker closed: trial failure rate {:.1}% <= {:.1}% over {}s window; statistics reset, burn-in restarted",
                snap.failure_rate * 100.0,
                self.config.half_open_failure_rate_threshold * 100.0,
                self.config.half_open_window_size.as_secs()
            );
        }
    }

    fn trip_open(&self, state: &mut BreakerState, now: Instant, signal: &str, rate: f64) {
        state.status = BreakerStatus::Open;
        state.status_since = now;
        state.trial_in_flight = false;
        warn!(
            "Circuit breaker opened: {} {:.1}% exceeded threshold (cooldown {}s)",
            signal,
            rate * 100.0,
            self.config.open_cooldown_period.as_secs()
        );
    }

    /// Asks for a HALF_OPEN trial slot. Claims the slot only when pacing
    /// is satisfied and no trial is in flight; `Wait` claims nothing, the
    /// caller sleeps and retries admission.
    pub(crate) fn try_trial(&self, now: Instant) -> TrialDecision {
        let mut state = self.lock();
        if state.status != BreakerStatus::HalfOpen {
            return TrialDecision::Busy;
        }
        if state.trial_in_flight {
            return TrialDecision::Busy;
        }
        let since_last = match state.last_trial_at {
            Some(last) => now.duration_since(last),
            // First trial after half-opening is admitted immediately.
            None => self.config.half_open_delay,
        };
        if since_last >= self.config.half_open_delay {
            state.trial_in_flight = true;
            state.last_trial_at = Some(now);
            TrialDecision::Admit
        } else {
            TrialDecision::Wait(self.config.half_open_delay - since_last)
        }
    }

    /// Releases the trial slot once the trial's outcome has been recorded.
    /// A no-op outside HALF_OPEN.
    pub(crate) fn release_trial(&self) {
        let mut state = self.lock();
        state.trial_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Outcome, OutcomeSample};

    fn config() -> BreakerConfig {
        BreakerConfig {
            closed_window_size: Duration::from_secs(60),
            closed_burnin_period: Duration::from_secs(30),
            closed_failure_rate_threshold: 0.5,
            half_open_window_size: Duration::from_secs(20),
            half_open_failure_rate_threshold: 0.3,
            half_open_delay: Duration::from_secs(2),
            short_circuit_errors_window_size: Duration::from_secs(30),
            short_circuit_errors_failure_rate_threshold: 0.9,
            short_circuit_404s_window_size: Duration::from_secs(30),
            short_circuit_404s_failure_rate_threshold: 0.7,
            open_cooldown_period: Duration::from_secs(60),
        }
    }

    fn feed(stats: &StatsTracker, at: Instant, n: usize, outcome: Outcome) {
        for _ in 0..n {
            stats.record(OutcomeSample {
                recorded_at: at,
                latency: Duration::from_millis(100),
                outcome,
            });
        }
    }

    #[test]
    fn test_starts_closed() {
        let breaker = CircuitBreaker::new(config(), Instant::now());
        assert_eq!(breaker.status(), BreakerStatus::Closed);
    }

    #[test]
    fn test_failure_check_suppressed_during_burnin() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);

        // 60% failures: above the CLOSED threshold, below both
        // short-circuit thresholds.
        feed(&stats, now, 6, Outcome::ServerError);
        feed(&stats, now, 4, Outcome::Success);
        breaker.evaluate(&stats, now + Duration::from_secs(5));
        assert_eq!(breaker.status(), BreakerStatus::Closed);

        // Same window after burn-in trips the breaker.
        let later = now + Duration::from_secs(31);
        breaker.evaluate(&stats, later);
        assert_eq!(breaker.status(), BreakerStatus::Open);
    }

    #[test]
    fn test_not_found_burst_trips_during_burnin() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);

        feed(&stats, now, 8, Outcome::NotFound);
        feed(&stats, now, 2, Outcome::Success);
        breaker.evaluate(&stats, now + Duration::from_secs(1));
        assert_eq!(breaker.status(), BreakerStatus::Open);
    }

    #[test]
    fn test_error_burst_trips_during_burnin() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);

        feed(&stats, now, 10, Outcome::Timeout);
        breaker.evaluate(&stats, now + Duration::from_secs(1));
        assert_eq!(breaker.status(), BreakerStatus::Open);
    }

    #[test]
    fn test_open_holds_until_cooldown_expires() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);

        feed(&stats, now, 10, Outcome::Timeout);
        breaker.evaluate(&stats, now);
        assert_eq!(breaker.status(), BreakerStatus::Open);
        let opened_at = now;

        breaker.evaluate(&stats, opened_at + Duration::from_secs(59));
        assert_eq!(breaker.status(), BreakerStatus::Open);

        breaker.evaluate(&stats, opened_at + Duration::from_secs(60));
        assert_eq!(breaker.status(), BreakerStatus::HalfOpen);
    }

    #[test]
    fn test_half_open_trial_pacing() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);
        feed(&stats, now, 10, Outcome::Timeout);
        breaker.evaluate(&stats, now);
        let half_open_at = now + Duration::from_secs(60);
        breaker.evaluate(&stats, half_open_at);
        assert_eq!(breaker.status(), BreakerStatus::HalfOpen);

        // First trial admits immediately and claims the slot.
        assert_eq!(breaker.try_trial(half_open_at), TrialDecision::Admit);
        // Slot busy until the outcome lands.
        assert_eq!(breaker.try_trial(half_open_at), TrialDecision::Busy);
        breaker.release_trial();

        // Pacing: next trial must wait out the remaining delay.
        let t = half_open_at + Duration::from_secs(1);
        assert_eq!(
            breaker.try_trial(t),
            TrialDecision::Wait(Duration::from_secs(1))
        );
        let t = half_open_at + Duration::from_secs(2);
        assert_eq!(breaker.try_trial(t), TrialDecision::Admit);
    }

    #[test]
    fn test_half_open_clean_window_closes_and_resets() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);
        feed(&stats, now, 10, Outcome::Timeout);
        breaker.evaluate(&stats, now);
        let half_open_at = now + Duration::from_secs(60);
        breaker.evaluate(&stats, half_open_at);

        // Clean trial outcomes across the half-open window.
        for i in 1..=10u64 {
            feed(&stats, half_open_at + Duration::from_secs(2 * i), 1, Outcome::Success);
        }
        // Window not yet elapsed: still probing.
        breaker.evaluate(&stats, half_open_at + Duration::from_secs(19));
        assert_eq!(breaker.status(), BreakerStatus::HalfOpen);

        breaker.evaluate(&stats, half_open_at + Duration::from_secs(20));
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        // Statistics were reset on close.
        let snap = stats.snapshot(
            Duration::from_secs(3600),
            half_open_at + Duration::from_secs(20),
        );
        assert_eq!(snap.sample_count, 0);
    }

    #[test]
    fn test_half_open_dirty_window_reopens() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);
        feed(&stats, now, 10, Outcome::Timeout);
        breaker.evaluate(&stats, now);
        let half_open_at = now + Duration::from_secs(60);
        breaker.evaluate(&stats, half_open_at);

        // Trials fail: over the fresh window the rate is 100%.
        feed(&stats, half_open_at + Duration::from_secs(2), 1, Outcome::ServerError);
        feed(&stats, half_open_at + Duration::from_secs(4), 1, Outcome::ServerError);
        breaker.evaluate(&stats, half_open_at + Duration::from_secs(5));
        assert_eq!(breaker.status(), BreakerStatus::Open);
    }

    #[test]
    fn test_pre_transition_samples_do_not_leak_into_half_open_window() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(config(), now);
        let stats = StatsTracker::new(Duration::from_secs(3600), 0.3);
        // The failures that opened the breaker sit just before cooldown ends.
        feed(&stats, now + Duration::from_secs(59), 10, Outcome::Timeout);
        feed(&stats, now, 10, Outcome::Timeout);
        breaker.evaluate(&stats, now);
        let half_open_at = now + Duration::from_secs(60);
        breaker.evaluate(&stats, half_open_at);
        assert_eq!(breaker.status(), BreakerStatus::HalfOpen);

        // Two clean trials: the bounded window must only see these.
        feed(&stats, half_open_at + Duration::from_secs(2), 1, Outcome::Success);
        feed(&stats, half_open_at + Duration::from_secs(4), 1, Outcome::Success);
        breaker.evaluate(&stats, half_open_at + Duration::from_secs(5));
        assert_eq!(breaker.status(), BreakerStatus::HalfOpen);
    }
}
