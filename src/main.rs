//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `admission_control` library that
//! handles:
//! - Command-line argument parsing
//! - Logger initialization
//! - User-facing output formatting
//!
//! The binary runs the load-simulation harness against a synthetic
//! upstream; all control logic is implemented in the library crate.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use admission_control::config::constants::{
    DEFAULT_CONCURRENCY_BASE, DEFAULT_RATE_BASE, DEFAULT_RATE_MAX,
};
use admission_control::initialization::init_logger_with;
use admission_control::{
    run_harness, AdmissionConfig, AdmissionGate, HarnessConfig, LogFormat, LogLevel,
    UpstreamProfile,
};

/// Adaptive admission control demo: pushes simulated load through the
/// engine and reports what the controller settled on.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Total simulated requests to push through the gate
    #[arg(long, default_value_t = 5000)]
    requests: usize,

    /// Number of concurrent worker tasks
    #[arg(long, default_value_t = 16)]
    workers: usize,

    /// Starting request rate in requests per second
    #[arg(long, default_value_t = DEFAULT_RATE_BASE)]
    rate: f64,

    /// Maximum request rate the controller may explore up to
    #[arg(long, default_value_t = DEFAULT_RATE_MAX)]
    max_rate: f64,

    /// Starting concurrency bound
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY_BASE as usize)]
    concurrency: usize,

    /// Baseline phase budget in seconds
    #[arg(long, default_value_t = 10)]
    baseline_secs: u64,

    /// Explore phase budget in seconds (rate and concurrency alike)
    #[arg(long, default_value_t = 20)]
    explore_secs: u64,

    /// Spacing between explore adjustment steps in seconds
    #[arg(long, default_value_t = 2)]
    step_secs: u64,

    /// Exploit phase budget in seconds
    #[arg(long, default_value_t = 30)]
    exploit_secs: u64,

    /// Simulated upstream capacity in requests per second
    #[arg(long, default_value_t = 200.0)]
    upstream_capacity: f64,

    /// Simulated upstream base latency in milliseconds
    #[arg(long, default_value_t = 80)]
    upstream_latency_ms: u64,

    /// Simulated upstream failure probability
    #[arg(long, default_value_t = 0.02)]
    upstream_failure_rate: f64,

    /// Log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,
}

impl Cli {
    fn admission_config(&self) -> AdmissionConfig {
        let mut config = AdmissionConfig::default();
        config.throttle.rate.base = self.rate;
        config.throttle.rate.max = self.max_rate;
        config.throttle.concurrency.base = self.concurrency as f64;
        config.throttle.baseline_response_time = Duration::from_secs(self.baseline_secs);
        for explore in [
            &mut config.throttle.explore_rate,
            &mut config.throttle.explore_concurrency,
        ] {
            explore.response_time = Duration::from_secs(self.explore_secs);
            explore.step_response_time = Duration::from_secs(self.step_secs);
        }
        config.throttle.exploit.response_time = Duration::from_secs(self.exploit_secs);
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logger_with(cli.log_level.clone().into(), cli.log_format.clone())
        .context("Failed to initialize logger")?;

    let gate = match AdmissionGate::new(cli.admission_config()) {
        Ok(gate) => Arc::new(gate),
        Err(e) => {
            eprintln!("admission_control error: invalid configuration: {e}");
            process::exit(1);
        }
    };

    let harness_config = HarnessConfig {
        requests: cli.requests,
        workers: cli.workers,
        upstream: UpstreamProfile {
            base_latency: Duration::from_millis(cli.upstream_latency_ms),
            capacity_rps: cli.upstream_capacity,
            failure_rate: cli.upstream_failure_rate,
            ..UpstreamProfile::default()
        },
    };

    let report = run_harness(Arc::clone(&gate), harness_config).await;

    println!(
        "✅ Pushed {} request{} ({} succeeded, {} failed, {} not found, {} denied) in {:.1}s",
        report.total,
        if report.total == 1 { "" } else { "s" },
        report.succeeded,
        report.failed,
        report.not_found,
        report.denied,
        report.elapsed_seconds
    );
    println!(
        "Controller settled at {:.1} rps in phase {} with breaker {}",
        report.final_rate,
        report.final_phase,
        gate.breaker_status()
    );
    Ok(())
}
