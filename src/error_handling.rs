//! Error type definitions.
//!
//! The fatal conditions in this crate are malformed configuration at
//! construction time and startup failures. Everything else (insufficient
//! statistics, denied admission) is an ordinary outcome, not an error.

use log::SetLoggerError;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),
}

/// Error types for configuration validation failures.
///
/// Returned by [`crate::AdmissionConfig::validate`] and
/// [`crate::AdmissionGate::new`]. A gate is never constructed from an
/// invalid configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A `{base, min, max}` setting where `min` exceeds `max`.
    #[error("{name}: min {min} must not exceed max {max}")]
    InvalidBounds {
        /// Name of the offending setting (e.g. `"rate"`).
        name: &'static str,
        /// Configured lower bound.
        min: f64,
        /// Configured upper bound.
        max: f64,
    },

    /// A `{base, min, max}` setting where `base` falls outside `[min, max]`.
    #[error("{name}: base {base} outside [{min}, {max}]")]
    BaseOutOfBounds {
        /// Name of the offending setting.
        name: &'static str,
        /// Configured starting value.
        base: f64,
        /// Configured lower bound.
        min: f64,
        /// Configured upper bound.
        max: f64,
    },

    /// A numeric option that must be strictly positive.
    #[error("{name} must be positive, got {value}")]
    NotPositive {
        /// Name of the offending option.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A numeric option outside its valid half-open interval `(low, high]`.
    #[error("{name} must be within ({low}, {high}], got {value}")]
    OutOfInterval {
        /// Name of the offending option.
        name: &'static str,
        /// Exclusive lower edge.
        low: f64,
        /// Inclusive upper edge.
        high: f64,
        /// The rejected value.
        value: f64,
    },

    /// A duration option that must be non-zero.
    #[error("{name} must be a non-zero duration")]
    ZeroDuration {
        /// Name of the offending option.
        name: &'static str,
    },
}
