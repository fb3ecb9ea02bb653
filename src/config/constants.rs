//! Default values and internal tuning constants.

use std::time::Duration;

// --- Rate and concurrency bounds (requests/second, in-flight requests) ---

/// Default starting request rate.
pub const DEFAULT_RATE_BASE: f64 = 50.0;
/// Default minimum request rate.
pub const DEFAULT_RATE_MIN: f64 = 10.0;
/// Default maximum request rate.
pub const DEFAULT_RATE_MAX: f64 = 500.0;

/// Default starting concurrency.
pub const DEFAULT_CONCURRENCY_BASE: f64 = 10.0;
/// Default minimum concurrency.
pub const DEFAULT_CONCURRENCY_MIN: f64 = 1.0;
/// Default maximum concurrency.
pub const DEFAULT_CONCURRENCY_MAX: f64 = 100.0;

// --- Throttle controller phases ---

/// Default baseline phase budget.
pub const DEFAULT_BASELINE_RESPONSE_TIME: Duration = Duration::from_secs(300);
/// Default explore phase budget (rate and concurrency alike).
pub const DEFAULT_EXPLORE_RESPONSE_TIME: Duration = Duration::from_secs(300);
/// Default spacing between explore adjustment steps.
pub const DEFAULT_STEP_RESPONSE_TIME: Duration = Duration::from_secs(15);
/// Default additive rate increase per stable explore step.
pub const DEFAULT_RATE_STEP_INCREASE: f64 = 50.0;
/// Default additive concurrency increase per stable explore step.
pub const DEFAULT_CONCURRENCY_STEP_INCREASE: f64 = 2.0;
/// Default multiplicative decrease factor on an unstable explore step.
pub const DEFAULT_STEP_DECREASE: f64 = 0.5;
/// Default stability threshold: current latency/cv must stay within this
/// factor of the baseline for the system to be considered stable.
pub const DEFAULT_STABILITY_THRESHOLD: f64 = 1.2;
/// Default exploit phase budget.
pub const DEFAULT_EXPLOIT_RESPONSE_TIME: Duration = Duration::from_secs(1800);
/// Default proportional gain on relative latency deviation in exploit.
pub const DEFAULT_EXPLOIT_K: f64 = 0.1;
/// Default proportional gain on relative cv deviation in exploit.
pub const DEFAULT_EXPLOIT_M: f64 = 0.05;

// --- Statistics ---

/// Default EMA smoothing weight toward recent samples.
pub const DEFAULT_TEMPERATURE: f64 = 0.3;
/// Default retention horizon for raw outcome samples.
pub const DEFAULT_HISTORY: Duration = Duration::from_secs(3600);

// --- Circuit breaker ---

/// Default CLOSED-state failure-rate window.
pub const DEFAULT_CLOSED_WINDOW_SIZE: Duration = Duration::from_secs(300);
/// Default burn-in period before the CLOSED failure-rate check activates.
pub const DEFAULT_CLOSED_BURNIN_PERIOD: Duration = Duration::from_secs(300);
/// Default CLOSED failure-rate threshold.
pub const DEFAULT_CLOSED_FAILURE_RATE_THRESHOLD: f64 = 0.5;
/// Default HALF_OPEN evaluation window.
pub const DEFAULT_HALF_OPEN_WINDOW_SIZE: Duration = Duration::from_secs(600);
/// Default HALF_OPEN failure-rate threshold.
pub const DEFAULT_HALF_OPEN_FAILURE_RATE_THRESHOLD: f64 = 0.3;
/// Default minimum spacing between HALF_OPEN trial requests.
pub const DEFAULT_HALF_OPEN_DELAY: Duration = Duration::from_secs(2);
/// Default short-circuit general-error window.
pub const DEFAULT_SHORT_CIRCUIT_ERRORS_WINDOW_SIZE: Duration = Duration::from_secs(180);
/// Default short-circuit general-error threshold.
pub const DEFAULT_SHORT_CIRCUIT_ERRORS_FAILURE_RATE_THRESHOLD: f64 = 0.9;
/// Default short-circuit not-found window.
pub const DEFAULT_SHORT_CIRCUIT_404S_WINDOW_SIZE: Duration = Duration::from_secs(180);
/// Default short-circuit not-found threshold.
pub const DEFAULT_SHORT_CIRCUIT_404S_FAILURE_RATE_THRESHOLD: f64 = 0.7;
/// Default OPEN cooldown before probing recovery.
pub const DEFAULT_OPEN_COOLDOWN_PERIOD: Duration = Duration::from_secs(300);

// --- Internal tuning (not exposed through configuration) ---

/// Minimum interval between lazy evaluator runs.
pub(crate) const EVALUATION_INTERVAL: Duration = Duration::from_millis(100);
/// Hard cap on retained raw samples regardless of the history horizon.
pub(crate) const SAMPLE_CAP: usize = 300_000;
/// Floor on the exploit delay factor so a wildly negative deviation can
/// never invert or zero the rate scaling.
pub(crate) const MIN_DELAY_FACTOR: f64 = 0.1;
/// Token-bucket burst capacity, expressed in seconds of target rate.
pub(crate) const BURST_SECONDS: f64 = 1.0;
