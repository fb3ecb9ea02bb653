//! admission_control library: adaptive admission control for rate-limited APIs
//!
//! This library gates outbound requests against an upstream API whose true
//! capacity is unknown. A four-phase throttle controller discovers and
//! holds the highest sustainable request rate and concurrency, while a
//! three-state circuit breaker halts traffic outright when the upstream
//! degrades. Callers interact with a single [`AdmissionGate`]: ask before
//! each request, report the outcome after.
//!
//! # Example
//!
//! ```no_run
//! use admission_control::{AdmissionConfig, AdmissionGate, Decision, Outcome};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gate = AdmissionGate::new(AdmissionConfig::default())?;
//!
//! match gate.admit().await {
//!     Decision::Admit => {
//!         let started = std::time::Instant::now();
//!         // ... issue the request ...
//!         gate.record_outcome(started.elapsed(), Outcome::Success);
//!     }
//!     Decision::Deny => { /* breaker is open; back off */ }
//!     Decision::DelayThenAdmit(_) => unreachable!("admit() waits out delays"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or ensure you're calling library functions within an async
//! context.

#![warn(missing_docs)]

mod breaker;
pub mod config;
mod error_handling;
mod gate;
pub mod harness;
pub mod initialization;
mod stats;
mod throttle;

// Re-export public API
pub use breaker::BreakerStatus;
pub use config::{AdmissionConfig, BoundedValue, BreakerConfig, LogFormat, LogLevel};
pub use error_handling::{ConfigError, InitializationError};
pub use gate::{AdmissionGate, Decision};
pub use harness::{run_harness, HarnessConfig, HarnessReport, UpstreamProfile};
pub use stats::{Outcome, StatsSnapshot};
pub use throttle::Phase;
