//! Execution strategies and the state they share.
//!
//! One driver task runs per assigned user per scenario. A scenario is driven
//! either at constant concurrency ([`concurrency`]) or at a jittered target
//! arrival rate ([`rate`]), both emitting each completed run's request results
//! through a per-driver sender. The shared state here is the explicit home of
//! every cross-task counter; nothing engine-wide lives in a global.

pub mod concurrency;
pub mod rate;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio::time::{Duration, Instant};

use crate::distribution::LoadDistribution;
use crate::error::ErrorSink;
use crate::result::Context;
use crate::runner::Runner;
use crate::scenario::Scenario;
use crate::timer::Clock;

/// How long an ineligible or idle driver waits before re-polling.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Signals an orderly shutdown: drivers stop launching new scenario runs,
/// in-flight ones finish naturally, and the result stream then closes.
///
/// Write-once and edge-triggered; stopping twice is harmless.
#[derive(Clone)]
pub struct ForceStop {
    tx: Arc<watch::Sender<bool>>,
}

impl ForceStop {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl std::fmt::Debug for ForceStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForceStop")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Counters and policy shared by every task of one simulation.
pub struct SimulationState {
    pub runner: Runner,
    pub clock: Clock,
    pub timeout_ms: u64,
    /// Incremented when a step actually starts executing.
    pub sent_requests: AtomicUsize,
    /// Incremented when a rate driver commits to a future slot.
    pub prepared_requests: AtomicUsize,
    pub concurrency_distribution: Option<LoadDistribution>,
    pub rate_distribution: Option<LoadDistribution>,
    pub errors: ErrorSink,
    force_stop: watch::Receiver<bool>,
}

impl SimulationState {
    pub(crate) fn new(
        runner: Runner,
        timeout_ms: u64,
        concurrency_distribution: Option<LoadDistribution>,
        rate_distribution: Option<LoadDistribution>,
        errors: ErrorSink,
        force_stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            runner,
            clock: Clock::start(),
            timeout_ms,
            sent_requests: AtomicUsize::new(0),
            prepared_requests: AtomicUsize::new(0),
            concurrency_distribution,
            rate_distribution,
            errors,
            force_stop,
        }
    }

    pub fn sent(&self) -> usize {
        self.sent_requests.load(Ordering::Relaxed)
    }

    pub fn force_stopped(&self) -> bool {
        *self.force_stop.borrow()
    }

    /// Resolves once force-stop is signalled. Race pending sleeps against
    /// this so no scheduled wake outlives the simulation.
    pub async fn force_stop_signal(&self) {
        let mut signal = self.force_stop.clone();
        if signal.wait_for(|stopped| *stopped).await.is_err() {
            // signal writer gone without stopping; nothing to wake for
            std::future::pending::<()>().await;
        }
    }

    /// Whether a run scheduled for `next_run_at` may still launch.
    pub fn should_continue(&self, sent: usize, next_run_at: Instant) -> bool {
        self.runner.continue_run(sent, self.clock.origin(), next_run_at)
    }

    /// Current progress fraction and elapsed time.
    pub fn progress(&self, sent: usize) -> (f64, Duration) {
        self.runner.progress(sent, self.clock.origin(), Instant::now())
    }
}

/// Per-scenario mutable state, touched only by that scenario's drivers.
pub struct ScenarioState {
    /// Scenario runs currently in flight.
    pub in_flight: AtomicUsize,
    /// The rate drivers' run tracker: next trigger time in nanoseconds since
    /// simulation start.
    pub next_run_at: AtomicU64,
}

impl ScenarioState {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            next_run_at: AtomicU64::new(0),
        }
    }
}

/// Everything one driver task needs, rate or concurrency alike.
pub(crate) struct DriverConfig {
    pub scenario: Arc<Scenario>,
    pub user_id: u64,
    /// Simulation-level base context (options context merged with the
    /// top-level pre-hook's result).
    pub context: Context,
    pub state: Arc<SimulationState>,
    pub scenario_state: Arc<ScenarioState>,
    /// Users assigned to this scenario; the concurrency drivers' baseline.
    pub base_concurrency: usize,
}
