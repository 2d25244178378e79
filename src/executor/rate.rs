//! Constant-arrival-rate driver.
//!
//! All drivers of a scenario share one run tracker, so the scenario's
//! combined arrival rate matches its target regardless of how many users
//! serve it. Each iteration claims the next slot by advancing the tracker by
//! one jittered interval, commits the slot to the prepared-requests counter,
//! and only then sleeps towards it.
//!
//! The jitter is uniform in `[-interval/4, +interval/4]`. It exists to break
//! synchrony when several engine instances run side by side; over a long
//! window measured inter-run intervals stay within ±25% of the target.
//!
//! Committing the slot before sleeping is what distinguishes this driver from
//! the concurrency one: the stop condition gets to consider slots that have
//! not executed yet, which is why `prepared_requests` exists alongside
//! `sent_requests`.

use std::sync::atomic::Ordering;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use super::{DriverConfig, POLL_INTERVAL};
use crate::result::RequestResult;
use crate::scenario::run_scenario_once;

/// Hard ceiling on one interval so a near-zero effective rate cannot
/// overflow the tracker arithmetic. One hour, in nanoseconds.
const MAX_INTERVAL_NANOS: u64 = 3_600 * 1_000_000_000;

pub(crate) async fn rate_driver(
    config: DriverConfig,
    base_rate: u64,
    sink: mpsc::Sender<Vec<RequestResult>>,
) {
    let DriverConfig {
        scenario,
        user_id,
        context,
        state,
        scenario_state,
        base_concurrency: _,
    } = config;

    tracing::debug!(scenario = %scenario.name, user_id, base_rate, "rate driver started");
    loop {
        if state.force_stopped() {
            break;
        }

        let effective_rate = match &state.rate_distribution {
            Some(distribution) => {
                let (progress, _) = state.progress(state.sent());
                base_rate as f64 * distribution.multiplier(progress, &context)
            }
            None => base_rate as f64,
        };
        if effective_rate <= 0.0 {
            // starved; keep watching the stop condition so the run can end
            let prepared = state.prepared_requests.load(Ordering::Relaxed);
            if !state.should_continue(prepared, Instant::now()) {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let interval = ((1e9 / effective_rate) as u64).min(MAX_INTERVAL_NANOS);
        let quarter = (interval / 4) as i64;
        let jitter = if quarter > 0 {
            rand::thread_rng().gen_range(-quarter..=quarter)
        } else {
            0
        };
        let advance = (interval as i64).saturating_add(jitter);
        let slot = scenario_state
            .next_run_at
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |previous| {
                Some(previous.saturating_add_signed(advance))
            })
            .expect("tracker update always succeeds")
            .saturating_add_signed(advance);

        let prepared = state.prepared_requests.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = state.clock.at_nanos(slot);
        if !state.should_continue(prepared, deadline) {
            break;
        }

        // a committed slot must not outlive a force-stop
        tokio::select! {
            _ = sleep_until(deadline) => {}
            _ = state.force_stop_signal() => break,
        }
        if state.force_stopped() {
            break;
        }

        scenario_state.in_flight.fetch_add(1, Ordering::Relaxed);
        let results = run_scenario_once(&scenario, user_id, &context, &state).await;
        scenario_state.in_flight.fetch_sub(1, Ordering::Relaxed);

        if !results.is_empty() && sink.send(results).await.is_err() {
            break;
        }
    }
    tracing::debug!(scenario = %scenario.name, user_id, "rate driver finished");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::ErrorSink;
    use crate::executor::{ForceStop, ScenarioState, SimulationState};
    use crate::result::Context;
    use crate::runner::Runner;
    use crate::scenario::Scenario;
    use crate::step::Step;

    fn config(runner: Runner) -> (DriverConfig, ForceStop) {
        let (force_stop, rx) = ForceStop::new();
        let state = Arc::new(SimulationState::new(
            runner,
            1_000,
            None,
            None,
            ErrorSink::default(),
            rx,
        ));
        let scenario = Arc::new(
            Scenario::builder()
                .name("ticks")
                .steps(vec![Step::new("noop", |_ctx| async move { Ok(true) })])
                .build(),
        );
        (
            DriverConfig {
                scenario,
                user_id: 0,
                context: Context::new(),
                state,
                scenario_state: Arc::new(ScenarioState::new()),
                base_concurrency: 1,
            },
            force_stop,
        )
    }

    #[tokio::test]
    async fn prepared_slots_bound_the_request_budget() {
        let (config, _stop) = config(Runner::RequestCount { limit: 10 });
        let (tx, mut rx) = mpsc::channel(64);

        // 1000/s keeps the test fast; the budget cuts it off
        rate_driver(config, 1_000, tx).await;

        let mut batches = 0;
        while rx.recv().await.is_some() {
            batches += 1;
        }
        // the slot that trips the budget is counted but never executed
        assert_eq!(batches, 9);
    }

    #[tokio::test]
    async fn force_stop_interrupts_a_pending_slot() {
        let (config, stop) = config(Runner::Duration {
            limit: std::time::Duration::from_secs(60),
        });
        let (tx, _rx) = mpsc::channel(16);

        // at 1/s the first slot is ~1s out; the driver commits it and sleeps
        let driver = tokio::spawn(rate_driver(config, 1, tx));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let stopped_at = std::time::Instant::now();
        stop.stop();
        driver.await.unwrap();
        assert!(
            stopped_at.elapsed() < std::time::Duration::from_millis(200),
            "force-stop should interrupt the slot sleep, not wait it out"
        );
    }

    #[tokio::test]
    async fn tracker_advances_one_jittered_interval_per_slot() {
        let (config, stop) = config(Runner::Duration {
            limit: std::time::Duration::from_secs(60),
        });
        let scenario_state = config.scenario_state.clone();
        let state = config.state.clone();
        let (tx, mut rx) = mpsc::channel(64);

        let driver = tokio::spawn(rate_driver(config, 100, tx));
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        stop.stop();
        let _ = driver.await;
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }

        // ~100/s over 500ms with ±25% jitter per interval
        assert!((30..=75).contains(&received), "received {received}");

        let slots = state.prepared_requests.load(Ordering::Relaxed) as u64;
        let tracker = scenario_state.next_run_at.load(Ordering::Relaxed);
        let nominal = slots * 10_000_000;
        assert!(
            tracker >= nominal * 3 / 4 && tracker <= nominal * 5 / 4,
            "tracker {tracker} vs nominal {nominal}"
        );
    }
}
