//! Adaptive throttle controller.
//!
//! Cycles through four phases to find and hold the highest request rate
//! and concurrency the upstream sustains without degrading:
//!
//! 1. BASELINE observes at the current settings and captures reference
//!    latency statistics.
//! 2. EXPLORE_RATE probes the rate upward while latency stays stable,
//!    backing off multiplicatively when it degrades.
//! 3. EXPLORE_CONCURRENCY does the same for the concurrency bound.
//! 4. EXPLOIT holds the tuned settings, nudging the rate against drift
//!    from the baseline statistics.
//!
//! When the exploit budget expires the cycle restarts at BASELINE with
//! the tuned values carried forward, so each cycle refines the previous
//! one instead of starting over. The controller is quiescent whenever the
//! circuit breaker is not CLOSED.

mod control_value;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, info};
use tokio::time::Instant;

use crate::breaker::BreakerStatus;
use crate::config::constants::MIN_DELAY_FACTOR;
use crate::config::{ExploreConfig, ThrottleConfig};
use crate::stats::{EmaSnapshot, StatsTracker};

use control_value::{ControlValue, StepDirection};

/// Current phase of the throttle cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Capturing reference statistics at the current settings.
    Baseline,
    /// Probing the request rate upward.
    ExploreRate,
    /// Probing the concurrency bound upward.
    ExploreConcurrency,
    /// Holding tuned settings, correcting for drift.
    Exploit,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Baseline => write!(f, "BASELINE"),
            Phase::ExploreRate => write!(f, "EXPLORE_RATE"),
            Phase::ExploreConcurrency => write!(f, "EXPLORE_CONCURRENCY"),
            Phase::Exploit => write!(f, "EXPLOIT"),
        }
    }
}

struct ThrottleState {
    phase: Phase,
    phase_started_at: Instant,
    last_step_at: Instant,
    prev_direction: Option<StepDirection>,
    alternations: u8,
    rate: ControlValue,
    concurrency: ControlValue,
    /// Reference statistics captured at the end of BASELINE.
    baseline_mean: f64,
    baseline_cv: f64,
    /// Rate the last explore cycle settled on; EXPLOIT scales this.
    exploit_anchor_rate: f64,
}

/// Four-phase controller over the live rate and concurrency targets.
///
/// All phase logic runs under one mutex inside [`evaluate`]; the targets
/// the admission path reads are published through atomics so readers
/// never contend with the evaluator.
///
/// [`evaluate`]: ThrottleController::evaluate
pub(crate) struct ThrottleController {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
    /// f64 bits of the current target rate in requests per second.
    target_rate_bits: AtomicU64,
    target_concurrency: AtomicUsize,
}

impl ThrottleController {
    pub(crate) fn new(config: ThrottleConfig, now: Instant) -> Self {
        let rate = ControlValue::new(config.rate);
        let concurrency = ControlValue::new(config.concurrency);
        ThrottleController {
            config,
            target_rate_bits: AtomicU64::new(rate.get().to_bits()),
            target_concurrency: AtomicUsize::new(to_concurrency(concurrency.get())),
            state: Mutex::new(ThrottleState {
                phase: Phase::Baseline,
                phase_started_at: now,
                last_step_at: now,
                prev_direction: None,
                alternations: 0,
                rate,
                concurrency,
                baseline_mean: 0.0,
                baseline_cv: 0.0,
                exploit_anchor_rate: rate.get(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Target rate in requests per second.
    pub(crate) fn target_rate(&self) -> f64 {
        f64::from_bits(self.target_rate_bits.load(Ordering::Relaxed))
    }

    /// Target in-flight concurrency bound.
    pub(crate) fn target_concurrency(&self) -> usize {
        self.target_concurrency.load(Ordering::Relaxed)
    }

    /// Runs one controller tick. Quiescent unless the breaker is CLOSED;
    /// an OPEN or HALF_OPEN breaker freezes the phase clock rather than
    /// letting a phase expire while no traffic flows.
    pub(crate) fn evaluate(&self, stats: &StatsTracker, status: BreakerStatus, now: Instant) {
        if status != BreakerStatus::Closed {
            let mut state = self.lock();
            state.phase_started_at = now;
            state.last_step_at = now;
            return;
        }

        let mut state = self.lock();
        match state.phase {
            Phase::Baseline => {
                if now.duration_since(state.phase_started_at) < self.config.baseline_response_time {
                    return;
                }
                let ema = stats.ema_snapshot();
                if ema.is_insufficient() {
                    // No traffic yet; keep observing.
                    return;
                }
                state.baseline_mean = ema.mean;
                state.baseline_cv = ema.cv;
                info!(
                    "Baseline captured: mean latency {:.1}ms, cv {:.3}; exploring rate from {:.1} rps",
                    state.baseline_mean * 1000.0,
                    state.baseline_cv,
                    state.rate.get()
                );
                self.enter_phase(&mut state, Phase::ExploreRate, now);
            }
            Phase::ExploreRate => {
                if self.explore_step(&mut state, Phase::ExploreRate, stats, now) {
                    self.enter_phase(&mut state, Phase::ExploreConcurrency, now);
                }
            }
            Phase::ExploreConcurrency => {
                if self.explore_step(&mut state, Phase::ExploreConcurrency, stats, now) {
                    state.exploit_anchor_rate = state.rate.get();
                    self.enter_phase(&mut state, Phase::Exploit, now);
                }
            }
            Phase::Exploit => {
                if now.duration_since(state.phase_started_at)
                    >= self.config.exploit.response_time
                {
                    // Tuned values carry into the next cycle.
                    self.enter_phase(&mut state, Phase::Baseline, now);
                    return;
                }
                self.exploit_tick(&mut state, stats);
            }
        }
    }

    /// One explore adjustment, shared by both explore phases. Returns true
    /// when the phase has converged.
    fn explore_step(
        &self,
        state: &mut ThrottleState,
        phase: Phase,
        stats: &StatsTracker,
        now: Instant,
    ) -> bool {
        let explore = self.explore_config(phase);
        if now.duration_since(state.phase_started_at) >= explore.response_time {
            debug!("{} budget expired; advancing", phase);
            return true;
        }
        if now.duration_since(state.last_step_at) < explore.step_response_time {
            return false;
        }
        let ema = stats.ema_snapshot();
        if ema.is_insufficient() {
            state.last_step_at = now;
            return false;
        }

        let stable = is_stable(&ema, state.baseline_mean, state.baseline_cv, explore.threshold);
        let value = match phase {
            Phase::ExploreRate => &mut state.rate,
            _ => &mut state.concurrency,
        };
        let direction = if stable {
            let saturated = value.at_max();
            value.increase(explore.step_increase);
            if saturated {
                // Ceiling reached while stable; nothing left to probe.
                debug!("{} saturated at {:.1}; advancing", phase, value.get());
                self.publish(state);
                return true;
            }
            StepDirection::Up
        } else {
            value.decrease(explore.step_decrease);
            StepDirection::Down
        };

        match state.prev_direction {
            Some(prev) if prev != direction => state.alternations += 1,
            Some(_) => state.alternations = 0,
            None => {}
        }
        state.prev_direction = Some(direction);
        state.last_step_at = now;
        self.publish(state);
        debug!(
            "{} step {:?}: rate {:.1} rps, concurrency {}, ema mean {:.1}ms cv {:.3}",
            phase,
            direction,
            state.rate.get(),
            to_concurrency(state.concurrency.get()),
            ema.mean * 1000.0,
            ema.cv
        );

        // Oscillating around the optimum: settled.
        state.alternations >= 2
    }

    /// Drift correction while holding tuned settings: the anchor rate is
    /// scaled down as latency statistics deviate from the baseline.
    fn exploit_tick(&self, state: &mut ThrottleState, stats: &StatsTracker) {
        let ema = stats.ema_snapshot();
        if ema.is_insufficient() {
            return;
        }
        let d_latency = relative_deviation(ema.mean, state.baseline_mean);
        let d_cv = relative_deviation(ema.cv, state.baseline_cv);
        let factor = (1.0 + self.config.exploit.k * d_latency + self.config.exploit.m * d_cv)
            .max(MIN_DELAY_FACTOR);
        state.rate.set(state.exploit_anchor_rate / factor);
        self.publish(state);
    }

    fn explore_config(&self, phase: Phase) -> &ExploreConfig {
        match phase {
            Phase::ExploreRate => &self.config.explore_rate,
            _ => &self.config.explore_concurrency,
        }
    }

    fn enter_phase(&self, state: &mut ThrottleState, phase: Phase, now: Instant) {
        info!(
            "Throttle phase {} -> {}: rate {:.1} rps, concurrency {}",
            state.phase,
            phase,
            state.rate.get(),
            to_concurrency(state.concurrency.get())
        );
        state.phase = phase;
        state.phase_started_at = now;
        state.last_step_at = now;
        state.prev_direction = None;
        state.alternations = 0;
        self.publish(state);
    }

    fn publish(&self, state: &ThrottleState) {
        self.target_rate_bits
            .store(state.rate.get().to_bits(), Ordering::Relaxed);
        self.target_concurrency
            .store(to_concurrency(state.concurrency.get()), Ordering::Relaxed);
    }
}

/// Stability predicate: both the smoothed mean and cv must sit within the
/// threshold factor of the baseline.
fn is_stable(ema: &EmaSnapshot, baseline_mean: f64, baseline_cv: f64, threshold: f64) -> bool {
    ema.mean <= threshold * baseline_mean && ema.cv <= threshold * baseline_cv + f64::EPSILON
}

fn relative_deviation(current: f64, baseline: f64) -> f64 {
    if baseline > 0.0 {
        (current - baseline) / baseline
    } else {
        0.0
    }
}

fn to_concurrency(value: f64) -> usize {
    (value.round() as usize).max(1)
}
