//! Constant-concurrency driver.
//!
//! One instance runs per assigned user, so a scenario's natural concurrency
//! equals its user count. With a concurrency distribution configured, each
//! iteration first checks eligibility against the shaped target and re-polls
//! after [`POLL_INTERVAL`](super::POLL_INTERVAL) when over it.

use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{DriverConfig, POLL_INTERVAL};
use crate::result::RequestResult;
use crate::scenario::run_scenario_once;

pub(crate) async fn concurrency_driver(
    config: DriverConfig,
    sink: mpsc::Sender<Vec<RequestResult>>,
) {
    let DriverConfig {
        scenario,
        user_id,
        context,
        state,
        scenario_state,
        base_concurrency,
    } = config;

    tracing::debug!(scenario = %scenario.name, user_id, "concurrency driver started");
    loop {
        if state.force_stopped() {
            break;
        }
        let sent = state.sent();
        if !state.should_continue(sent, Instant::now()) {
            break;
        }

        if let Some(distribution) = &state.concurrency_distribution {
            let (progress, _) = state.progress(sent);
            let target = base_concurrency as f64 * distribution.multiplier(progress, &context);
            let in_flight = scenario_state.in_flight.load(Ordering::Relaxed) as f64;
            if target <= in_flight {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        }

        scenario_state.in_flight.fetch_add(1, Ordering::Relaxed);
        let results = run_scenario_once(&scenario, user_id, &context, &state).await;
        scenario_state.in_flight.fetch_sub(1, Ordering::Relaxed);

        if !results.is_empty() && sink.send(results).await.is_err() {
            break;
        }
    }
    tracing::debug!(scenario = %scenario.name, user_id, "concurrency driver finished");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::distribution::LoadDistribution;
    use crate::error::ErrorSink;
    use crate::executor::{ForceStop, ScenarioState, SimulationState};
    use crate::result::Context;
    use crate::runner::Runner;
    use crate::scenario::Scenario;
    use crate::step::Step;

    fn config(
        runner: Runner,
        distribution: Option<LoadDistribution>,
    ) -> (DriverConfig, ForceStop) {
        let (force_stop, rx) = ForceStop::new();
        let state = Arc::new(SimulationState::new(
            runner,
            1_000,
            distribution,
            None,
            ErrorSink::default(),
            rx,
        ));
        let scenario = Arc::new(
            Scenario::builder()
                .name("loop")
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
    async fn runs_until_the_request_budget_is_spent() {
        let (config, _stop) = config(Runner::RequestCount { limit: 5 }, None);
        let (tx, mut rx) = mpsc::channel(16);

        concurrency_driver(config, tx).await;

        let mut batches = 0;
        while rx.recv().await.is_some() {
            batches += 1;
        }
        assert_eq!(batches, 5);
    }

    #[tokio::test]
    async fn zero_multiplier_starves_the_driver() {
        let (config, stop) = config(
            Runner::RequestCount { limit: 5 },
            Some(LoadDistribution::of(|_| 0.0)),
        );
        let (tx, mut rx) = mpsc::channel(16);

        let driver = tokio::spawn(concurrency_driver(config, tx));
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        stop.stop();
        driver.await.unwrap();

        assert!(rx.recv().await.is_none(), "no run should have launched");
    }
}
