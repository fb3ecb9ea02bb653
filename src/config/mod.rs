//! Configuration module.
//!
//! The admission control engine consumes a flat set of named numeric
//! options at startup, immutable after load. Defaults live in
//! [`constants`]; the structs carry the validation.

pub mod constants;
mod types;

pub use types::{
    AdmissionConfig, BoundedValue, BreakerConfig, ExploitConfig, ExploreConfig, LogFormat,
    LogLevel, ThrottleConfig,
};
