//! Progress-tracker collaborator.
//!
//! The engine hands a tracker read access to its counters and a force-stop
//! handle, then leaves its behaviour alone. A tracker must not mutate engine
//! state beyond invoking force-stop. [`LogTracker`] is the default; it logs a
//! progress line once per second through `tracing`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Duration;

use crate::executor::{ForceStop, ScenarioState, SimulationState};

/// Read view of a running simulation plus the per-scenario in-flight gauges.
pub struct ProgressView {
    pub state: Arc<SimulationState>,
    pub scenarios: Vec<(String, Arc<ScenarioState>)>,
    pub force_stop: ForceStop,
    /// Flips to `true` when the simulation has finished.
    pub done: watch::Receiver<bool>,
}

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Observe the run until `view.done` flips. Spawned as its own task.
    async fn track(&self, view: ProgressView);
}

/// Default tracker: one `tracing` progress line per tick.
pub struct LogTracker {
    pub interval: Duration,
}

impl Default for LogTracker {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl ProgressTracker for LogTracker {
    async fn track(&self, mut view: ProgressView) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = view.done.wait_for(|done| *done) => break,
                _ = tick.tick() => {
                    let sent = view.state.sent();
                    let (progress, elapsed) = view.state.progress(sent);
                    let in_flight: usize = view
                        .scenarios
                        .iter()
                        .map(|(_, s)| s.in_flight.load(Ordering::Relaxed))
                        .sum();
                    tracing::info!(
                        progress = format_args!("{:.0}%", progress * 100.0),
                        elapsed_ms = elapsed.as_millis() as u64,
                        sent,
                        in_flight,
                        "{}",
                        view.state.runner.info(),
                    );
                }
            }
        }
    }
}

/// Tracker that does nothing but wait for the run to end.
pub struct NoopTracker;

#[async_trait]
impl ProgressTracker for NoopTracker {
    async fn track(&self, mut view: ProgressView) {
        let _ = view.done.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorSink;
    use crate::runner::Runner;

    fn view() -> (ProgressView, watch::Sender<bool>) {
        let (force_stop, rx) = ForceStop::new();
        let state = Arc::new(SimulationState::new(
            Runner::RequestCount { limit: 10 },
            1_000,
            None,
            None,
            ErrorSink::default(),
            rx,
        ));
        let (done_tx, done_rx) = watch::channel(false);
        (
            ProgressView {
                state,
                scenarios: vec![("s".into(), Arc::new(ScenarioState::new()))],
                force_stop,
                done: done_rx,
            },
            done_tx,
        )
    }

    #[tokio::test]
    async fn trackers_stop_when_done_flips() {
        for tracker in [
            Box::new(LogTracker {
                interval: Duration::from_millis(10),
            }) as Box<dyn ProgressTracker>,
            Box::new(NoopTracker),
        ] {
            let (view, done_tx) = view();
            let handle = tokio::spawn(async move { tracker.track(view).await });
            tokio::time::sleep(Duration::from_millis(50)).await;
            done_tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("tracker should stop promptly")
                .unwrap();
        }
    }
}
