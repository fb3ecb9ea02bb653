//! Load-simulation harness.
//!
//! Drives a configured number of simulated requests through an
//! [`AdmissionGate`] against a synthetic upstream, so the full control
//! loop (pacing, phase transitions, breaker trips) can be observed from
//! the CLI without a real endpoint. The upstream model is deliberately
//! simple: a base latency with jitter, a capacity above which latency
//! inflates, and fixed failure and not-found probabilities.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::gate::{AdmissionGate, Decision};
use crate::stats::Outcome;

/// How often the progress task reports while the harness runs.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Synthetic upstream behavior.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamProfile {
    /// Latency floor per request.
    pub base_latency: Duration,
    /// Uniform jitter added on top of the floor.
    pub latency_jitter: Duration,
    /// Offered rate beyond which latency inflates proportionally.
    pub capacity_rps: f64,
    /// Probability of a server error or timeout.
    pub failure_rate: f64,
    /// Probability of a not-found response.
    pub not_found_rate: f64,
}

impl Default for UpstreamProfile {
    fn default() -> Self {
        UpstreamProfile {
            base_latency: Duration::from_millis(80),
            latency_jitter: Duration::from_millis(40),
            capacity_rps: 200.0,
            failure_rate: 0.02,
            not_found_rate: 0.01,
        }
    }
}

impl UpstreamProfile {
    /// Simulates one request at the given offered rate, returning its
    /// latency and outcome.
    fn simulate(&self, offered_rps: f64) -> (Duration, Outcome) {
        let overload = if self.capacity_rps > 0.0 && offered_rps > self.capacity_rps {
            offered_rps / self.capacity_rps
        } else {
            1.0
        };
        let jitter_ms = self.latency_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let latency = (self.base_latency + jitter).mul_f64(overload);

        // Overload also degrades reliability.
        let failure_p = (self.failure_rate * overload).min(1.0);
        let outcome = if rand::random_bool(failure_p) {
            Outcome::ServerError
        } else if rand::random_bool(self.not_found_rate.min(1.0)) {
            Outcome::NotFound
        } else {
            Outcome::Success
        };
        (latency, outcome)
    }
}

/// Harness parameters.
#[derive(Debug, Clone, Copy)]
pub struct HarnessConfig {
    /// Total requests to push through the gate.
    pub requests: usize,
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Synthetic upstream behavior.
    pub upstream: UpstreamProfile,
}

/// Results of a completed harness run.
#[derive(Debug, Clone)]
pub struct HarnessReport {
    /// Requests attempted.
    pub total: usize,
    /// Requests that completed successfully.
    pub succeeded: usize,
    /// Requests that failed (server errors and timeouts).
    pub failed: usize,
    /// Requests answered not-found.
    pub not_found: usize,
    /// Admission attempts denied by an OPEN breaker.
    pub denied: usize,
    /// Wall-clock duration of the run in seconds.
    pub elapsed_seconds: f64,
    /// Target rate when the run finished.
    pub final_rate: f64,
    /// Throttle phase when the run finished.
    pub final_phase: String,
}

struct Counters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    not_found: AtomicUsize,
    denied: AtomicUsize,
    remaining: AtomicUsize,
}

/// Runs the harness to completion and returns a summary.
pub async fn run_harness(gate: Arc<AdmissionGate>, config: HarnessConfig) -> HarnessReport {
    let start = std::time::Instant::now();
    let counters = Arc::new(Counters {
        succeeded: AtomicUsize::new(0),
        failed: AtomicUsize::new(0),
        not_found: AtomicUsize::new(0),
        denied: AtomicUsize::new(0),
        remaining: AtomicUsize::new(config.requests),
    });

    let cancel = CancellationToken::new();
    let progress_task = tokio::spawn(progress_loop(
        Arc::clone(&gate),
        Arc::clone(&counters),
        cancel.clone(),
    ));

    let mut workers = FuturesUnordered::new();
    for _ in 0..config.workers.max(1) {
        let gate = Arc::clone(&gate);
        let counters = Arc::clone(&counters);
        let upstream = config.upstream;
        workers.push(tokio::spawn(async move {
            worker_loop(gate, counters, upstream).await;
        }));
    }
    while let Some(result) = workers.next().await {
        if let Err(e) = result {
            warn!("Harness worker panicked: {e}");
        }
    }

    cancel.cancel();
    let _ = progress_task.await;

    let report = HarnessReport {
        total: config.requests,
        succeeded: counters.succeeded.load(Ordering::SeqCst),
        failed: counters.failed.load(Ordering::SeqCst),
        not_found: counters.not_found.load(Ordering::SeqCst),
        denied: counters.denied.load(Ordering::SeqCst),
        elapsed_seconds: start.elapsed().as_secs_f64(),
        final_rate: gate.target_rate(),
        final_phase: gate.phase().to_string(),
    };
    info!(
        "Harness finished: {} requests in {:.1}s ({} ok, {} failed, {} not found, {} denied)",
        report.total,
        report.elapsed_seconds,
        report.succeeded,
        report.failed,
        report.not_found,
        report.denied
    );
    report
}

async fn worker_loop(gate: Arc<AdmissionGate>, counters: Arc<Counters>, upstream: UpstreamProfile) {
    loop {
        // Claim one unit of work before asking for admission.
        if counters
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return;
        }

        loop {
            match gate.admit().await {
                Decision::Admit => break,
                Decision::Deny => {
                    counters.denied.fetch_add(1, Ordering::SeqCst);
                    // The breaker is OPEN; poll() keeps the cooldown clock
                    // moving even though nothing is being admitted.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    gate.poll();
                }
                // admit() only returns after a terminal decision.
                Decision::DelayThenAdmit(_) => unreachable!(),
            }
        }

        let (latency, outcome) = upstream.simulate(gate.target_rate());
        tokio::time::sleep(latency).await;
        gate.record_outcome(latency, outcome);

        let counter = match outcome {
            Outcome::Success => &counters.succeeded,
            Outcome::NotFound => &counters.not_found,
            _ => &counters.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

async fn progress_loop(gate: Arc<AdmissionGate>, counters: Arc<Counters>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {
                let done = counters.succeeded.load(Ordering::SeqCst)
                    + counters.failed.load(Ordering::SeqCst)
                    + counters.not_found.load(Ordering::SeqCst);
                let snap = gate.stats_snapshot(PROGRESS_INTERVAL);
                info!(
                    "Progress: {} done, phase {}, breaker {}, target {:.1} rps / {} in flight, trailing failure rate {:.1}%",
                    done,
                    gate.phase(),
                    gate.breaker_status(),
                    gate.target_rate(),
                    gate.in_flight(),
                    snap.failure_rate * 100.0
                );
            }
        }
    }
}
