//! Application initialization.
//!
//! Startup concerns that live outside the engine itself; currently just
//! logger setup. Initialization functions return proper error types.

mod logger;

pub use logger::init_logger_with;
