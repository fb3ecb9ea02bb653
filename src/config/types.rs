//! Configuration types.
//!
//! All values are supplied at startup and never mutated at runtime. The
//! structs here carry no behavior beyond validation; every threshold
//! comparison in the engine reads from this one immutable surface.

use std::time::Duration;

use clap::ValueEnum;

use crate::config::constants::*;
use crate::error_handling::ConfigError;

/// Logging level for the application.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// A tunable value with configured starting point and hard bounds.
///
/// The controller may move the live value anywhere inside `[min, max]`
/// but never outside it.
#[derive(Debug, Clone, Copy)]
pub struct BoundedValue {
    /// Starting value.
    pub base: f64,
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl BoundedValue {
    pub(crate) fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.min <= 0.0 {
            return Err(ConfigError::NotPositive {
                name,
                value: self.min,
            });
        }
        if self.min > self.max {
            return Err(ConfigError::InvalidBounds {
                name,
                min: self.min,
                max: self.max,
            });
        }
        if self.base < self.min || self.base > self.max {
            return Err(ConfigError::BaseOutOfBounds {
                name,
                base: self.base,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Parameters for one explore phase (rate or concurrency).
#[derive(Debug, Clone, Copy)]
pub struct ExploreConfig {
    /// Total time budget for the phase.
    pub response_time: Duration,
    /// Spacing between adjustment steps.
    pub step_response_time: Duration,
    /// Additive increase applied on a stable step.
    pub step_increase: f64,
    /// Multiplicative factor applied on an unstable step (in `(0, 1]`).
    pub step_decrease: f64,
    /// Stability threshold as a factor of the baseline statistics.
    pub threshold: f64,
}

/// Parameters for the exploit phase.
#[derive(Debug, Clone, Copy)]
pub struct ExploitConfig {
    /// Total time budget for the phase before the cycle restarts.
    pub response_time: Duration,
    /// Gain on the relative mean-latency deviation.
    pub k: f64,
    /// Gain on the relative cv deviation.
    pub m: f64,
}

/// Throttle controller configuration.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Request rate bounds (requests per second).
    pub rate: BoundedValue,
    /// Concurrency bounds (simultaneous in-flight requests).
    pub concurrency: BoundedValue,
    /// Baseline phase budget.
    pub baseline_response_time: Duration,
    /// Rate exploration parameters.
    pub explore_rate: ExploreConfig,
    /// Concurrency exploration parameters.
    pub explore_concurrency: ExploreConfig,
    /// Exploit phase parameters.
    pub exploit: ExploitConfig,
}

/// Circuit breaker configuration.
///
/// Parameter names follow the upstream acquisition profile: one window and
/// threshold per state check, a burn-in that suppresses the CLOSED check
/// on sparse early samples, and two short-circuit checks that stay active
/// at all times.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Failure-rate window while CLOSED.
    pub closed_window_size: Duration,
    /// Initial period during which the CLOSED check is suppressed.
    pub closed_burnin_period: Duration,
    /// CLOSED failure-rate threshold.
    pub closed_failure_rate_threshold: f64,
    /// Fresh evaluation window while HALF_OPEN.
    pub half_open_window_size: Duration,
    /// HALF_OPEN failure-rate threshold.
    pub half_open_failure_rate_threshold: f64,
    /// Minimum spacing between HALF_OPEN trial requests.
    pub half_open_delay: Duration,
    /// Short-circuit window over general errors.
    pub short_circuit_errors_window_size: Duration,
    /// Short-circuit general-error threshold.
    pub short_circuit_errors_failure_rate_threshold: f64,
    /// Short-circuit window over not-found responses.
    pub short_circuit_404s_window_size: Duration,
    /// Short-circuit not-found threshold.
    pub short_circuit_404s_failure_rate_threshold: f64,
    /// Cooldown in OPEN before transitioning to HALF_OPEN.
    pub open_cooldown_period: Duration,
}

/// Complete admission control configuration.
///
/// Immutable after construction; validated once by
/// [`AdmissionConfig::validate`] (also invoked by
/// [`crate::AdmissionGate::new`]).
#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    /// Throttle controller parameters.
    pub throttle: ThrottleConfig,
    /// Circuit breaker parameters.
    pub breaker: BreakerConfig,
    /// EMA smoothing weight toward recent samples, in `(0, 1]`.
    pub temperature: f64,
    /// Retention horizon for raw outcome samples.
    pub history: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig {
            rate: BoundedValue {
                base: DEFAULT_RATE_BASE,
                min: DEFAULT_RATE_MIN,
                max: DEFAULT_RATE_MAX,
            },
            concurrency: BoundedValue {
                base: DEFAULT_CONCURRENCY_BASE,
                min: DEFAULT_CONCURRENCY_MIN,
                max: DEFAULT_CONCURRENCY_MAX,
            },
            baseline_response_time: DEFAULT_BASELINE_RESPONSE_TIME,
            explore_rate: ExploreConfig {
                response_time: DEFAULT_EXPLORE_RESPONSE_TIME,
                step_response_time: DEFAULT_STEP_RESPONSE_TIME,
                step_increase: DEFAULT_RATE_STEP_INCREASE,
                step_decrease: DEFAULT_STEP_DECREASE,
                threshold: DEFAULT_STABILITY_THRESHOLD,
            },
            explore_concurrency: ExploreConfig {
                response_time: DEFAULT_EXPLORE_RESPONSE_TIME,
                step_response_time: DEFAULT_STEP_RESPONSE_TIME,
                step_increase: DEFAULT_CONCURRENCY_STEP_INCREASE,
                step_decrease: DEFAULT_STEP_DECREASE,
                threshold: DEFAULT_STABILITY_THRESHOLD,
            },
            exploit: ExploitConfig {
                response_time: DEFAULT_EXPLOIT_RESPONSE_TIME,
                k: DEFAULT_EXPLOIT_K,
                m: DEFAULT_EXPLOIT_M,
            },
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            closed_window_size: DEFAULT_CLOSED_WINDOW_SIZE,
            closed_burnin_period: DEFAULT_CLOSED_BURNIN_PERIOD,
            closed_failure_rate_threshold: DEFAULT_CLOSED_FAILURE_RATE_THRESHOLD,
            half_open_window_size: DEFAULT_HALF_OPEN_WINDOW_SIZE,
            half_open_failure_rate_threshold: DEFAULT_HALF_OPEN_FAILURE_RATE_THRESHOLD,
            half_open_delay: DEFAULT_HALF_OPEN_DELAY,
            short_circuit_errors_window_size: DEFAULT_SHORT_CIRCUIT_ERRORS_WINDOW_SIZE,
            short_circuit_errors_failure_rate_threshold:
                DEFAULT_SHORT_CIRCUIT_ERRORS_FAILURE_RATE_THRESHOLD,
            short_circuit_404s_window_size: DEFAULT_SHORT_CIRCUIT_404S_WINDOW_SIZE,
            short_circuit_404s_failure_rate_threshold:
                DEFAULT_SHORT_CIRCUIT_404S_FAILURE_RATE_THRESHOLD,
            open_cooldown_period: DEFAULT_OPEN_COOLDOWN_PERIOD,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        AdmissionConfig {
            throttle: ThrottleConfig::default(),
            breaker: BreakerConfig::default(),
            temperature: DEFAULT_TEMPERATURE,
            history: DEFAULT_HISTORY,
        }
    }
}

fn check_rate_threshold(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value <= 0.0 || value > 1.0 {
        return Err(ConfigError::OutOfInterval {
            name,
            low: 0.0,
            high: 1.0,
            value,
        });
    }
    Ok(())
}

fn check_duration(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroDuration { name });
    }
    Ok(())
}

impl ExploreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_duration("explore.response_time", self.response_time)?;
        check_duration("explore.step_response_time", self.step_response_time)?;
        if self.step_increase <= 0.0 {
            return Err(ConfigError::NotPositive {
                name: "explore.step_increase",
                value: self.step_increase,
            });
        }
        if self.step_decrease <= 0.0 || self.step_decrease > 1.0 {
            return Err(ConfigError::OutOfInterval {
                name: "explore.step_decrease",
                low: 0.0,
                high: 1.0,
                value: self.step_decrease,
            });
        }
        if self.threshold <= 0.0 {
            return Err(ConfigError::NotPositive {
                name: "explore.threshold",
                value: self.threshold,
            });
        }
        Ok(())
    }
}

impl AdmissionConfig {
    /// Validates every bound, threshold, and duration.
    ///
    /// Called by [`crate::AdmissionGate::new`]; a failing configuration
    /// refuses to construct the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.throttle;
        t.rate.validate("rate")?;
        t.concurrency.validate("concurrency")?;
        check_duration("baseline_response_time", t.baseline_response_time)?;
        t.explore_rate.validate()?;
        t.explore_concurrency.validate()?;
        check_duration("exploit.response_time", t.exploit.response_time)?;
        for (name, gain) in [("exploit.k", t.exploit.k), ("exploit.m", t.exploit.m)] {
            if gain < 0.0 {
                return Err(ConfigError::NotPositive { name, value: gain });
            }
        }

        let b = &self.breaker;
        check_duration("breaker.closed_window_size", b.closed_window_size)?;
        check_duration("breaker.half_open_window_size", b.half_open_window_size)?;
        check_duration("breaker.half_open_delay", b.half_open_delay)?;
        check_duration(
            "breaker.short_circuit_errors_window_size",
            b.short_circuit_errors_window_size,
        )?;
        check_duration(
            "breaker.short_circuit_404s_window_size",
            b.short_circuit_404s_window_size,
        )?;
        check_duration("breaker.open_cooldown_period", b.open_cooldown_period)?;
        check_rate_threshold(
            "breaker.closed_failure_rate_threshold",
            b.closed_failure_rate_threshold,
        )?;
        check_rate_threshold(
            "breaker.half_open_failure_rate_threshold",
            b.half_open_failure_rate_threshold,
        )?;
        check_rate_threshold(
            "breaker.short_circuit_errors_failure_rate_threshold",
            b.short_circuit_errors_failure_rate_threshold,
        )?;
        check_rate_threshold(
            "breaker.short_circuit_404s_failure_rate_threshold",
            b.short_circuit_404s_failure_rate_threshold,
        )?;

        check_rate_threshold("temperature", self.temperature)?;
        check_duration("history", self.history)?;
        Ok(())
    }
}
