//! Simulation orchestration.
//!
//! [`Simulation::run`] validates its input, partitions the user population
//! across scenarios by weight, fans out one driver task per assigned user,
//! fans the per-driver results back in through per-scenario merge tasks, and
//! hands the caller a result stream plus a force-stop handle. Shutdown is a
//! fan-in: when every merge task has drained, a supervisor stops the progress
//! tracker, runs the top-level post-hook, and closes the stream.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use typed_builder::TypedBuilder;

use crate::distribution::LoadDistribution;
use crate::error::{Error, ErrorSink};
use crate::executor::concurrency::concurrency_driver;
use crate::executor::rate::rate_driver;
use crate::executor::{DriverConfig, ForceStop, ScenarioState, SimulationState};
use crate::progress::{LogTracker, NoopTracker, ProgressTracker, ProgressView};
use crate::result::{Context, RequestResult, ScenarioResult};
use crate::runner::Runner;
use crate::scenario::{HookFn, PostHookFn, Scenario};
use crate::split::{split_rate, split_users};

/// A named set of scenarios to drive.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Simulation {
    #[builder(setter(into))]
    pub name: String,
    pub scenarios: Vec<Scenario>,
}

/// Options for one run. Exactly one stop condition applies; when several are
/// set the precedence is `duration`, then `request_count`, then `fixed_runs`.
#[derive(Clone, TypedBuilder)]
pub struct SimulationOptions {
    /// Explicit virtual-user ids. Wins over `concurrency` when both are set.
    #[builder(default, setter(strip_option))]
    pub users: Option<Vec<u64>>,
    /// Shorthand for `users = 0..concurrency`.
    #[builder(default, setter(strip_option))]
    pub concurrency: Option<usize>,
    /// Simulation-wide target arrivals per second, split across scenarios by
    /// weight. Scenarios with their own `rate` keep it.
    #[builder(default, setter(strip_option))]
    pub rate: Option<u64>,
    #[builder(default)]
    pub context: Context,
    #[builder(default = 5_000)]
    pub timeout_ms: u64,
    /// Append one line per step exception to this file.
    #[builder(default, setter(strip_option))]
    pub error_file: Option<PathBuf>,
    #[builder(default, setter(strip_option))]
    pub concurrency_distribution: Option<LoadDistribution>,
    #[builder(default, setter(strip_option))]
    pub rate_distribution: Option<LoadDistribution>,
    #[builder(default, setter(strip_option))]
    pub pre_hook: Option<HookFn>,
    #[builder(default, setter(strip_option))]
    pub post_hook: Option<PostHookFn>,
    #[builder(default, setter(strip_option))]
    pub progress_tracker: Option<Arc<dyn ProgressTracker>>,
    /// Use [`LogTracker`] when no explicit tracker is given.
    #[builder(default = true)]
    pub default_progress_tracker: bool,
    #[builder(default, setter(strip_option))]
    pub duration: Option<Duration>,
    #[builder(default, setter(strip_option))]
    pub request_count: Option<usize>,
    #[builder(default, setter(strip_option))]
    pub fixed_runs: Option<usize>,
}

/// A running simulation: the result stream and the force-stop handle.
pub struct SimulationRun {
    results: mpsc::Receiver<ScenarioResult>,
    force_stop: ForceStop,
}

impl SimulationRun {
    /// Next scenario result, or `None` once the simulation has ended.
    ///
    /// The stream is consumer-paced: leaving it undrained eventually applies
    /// backpressure to the drivers.
    pub async fn next(&mut self) -> Option<ScenarioResult> {
        self.results.recv().await
    }

    /// Drain the stream to completion.
    pub async fn collect(mut self) -> Vec<ScenarioResult> {
        let mut all = Vec::new();
        while let Some(result) = self.next().await {
            all.push(result);
        }
        all
    }

    /// Handle that stops the run: no new scenario launches, in-flight runs
    /// finish, the stream then closes.
    pub fn force_stop(&self) -> ForceStop {
        self.force_stop.clone()
    }
}

impl std::fmt::Debug for SimulationRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRun")
            .field("force_stop", &self.force_stop)
            .finish()
    }
}

impl Simulation {
    /// Start the simulation. Returns once every driver is launched; results
    /// arrive on the returned stream while the run is in progress.
    ///
    /// Must be called within a tokio runtime.
    pub fn run(&self, options: SimulationOptions) -> Result<SimulationRun, Error> {
        validate(self, &options)?;

        let errors = ErrorSink::open(options.error_file.as_deref())?;
        let user_ids: Vec<u64> = match &options.users {
            Some(users) => users.clone(),
            None => (0..options.concurrency.unwrap_or(0) as u64).collect(),
        };

        let mut context = options.context.clone();
        if let Some(pre) = &options.pre_hook {
            context = pre(context);
        }

        let runner = select_runner(&options, user_ids.len());
        tracing::info!(
            simulation = %self.name,
            users = user_ids.len(),
            scenarios = self.scenarios.len(),
            "starting: {}",
            runner.info(),
        );

        let weights: Vec<u64> = self.scenarios.iter().map(|s| s.weight).collect();
        let user_split = split_users(&user_ids, &weights);
        let rate_split = options.rate.map(|rate| split_rate(rate, &weights));

        let (force_stop, force_stop_rx) = ForceStop::new();
        let state = Arc::new(SimulationState::new(
            runner,
            options.timeout_ms,
            options.concurrency_distribution.clone(),
            options.rate_distribution.clone(),
            errors,
            force_stop_rx,
        ));

        let (global_tx, global_rx) = mpsc::channel(256);
        let (done_tx, done_rx) = watch::channel(false);
        let mut scenario_states: Vec<(String, Arc<ScenarioState>)> = Vec::new();
        let mut merge_handles = Vec::new();

        for (index, scenario) in self.scenarios.iter().enumerate() {
            let scenario = Arc::new(scenario.clone());
            let users = &user_split[index];
            let scenario_state = Arc::new(ScenarioState::new());
            scenario_states.push((scenario.name.clone(), scenario_state.clone()));

            let capacity = (users.len() * 4).max(16);
            let (scenario_tx, scenario_rx) = mpsc::channel::<Vec<RequestResult>>(capacity);
            // a zero share parks the drivers until the stop condition ends them
            let scenario_rate = scenario
                .rate
                .or_else(|| rate_split.as_ref().map(|rates| rates[index]));

            for &user_id in users {
                let config = DriverConfig {
                    scenario: scenario.clone(),
                    user_id,
                    context: context.clone(),
                    state: state.clone(),
                    scenario_state: scenario_state.clone(),
                    base_concurrency: users.len(),
                };
                let sink = scenario_tx.clone();
                match scenario_rate {
                    Some(rate) => {
                        tokio::spawn(rate_driver(config, rate, sink));
                    }
                    None => {
                        tokio::spawn(concurrency_driver(config, sink));
                    }
                }
            }
            drop(scenario_tx);

            merge_handles.push(tokio::spawn(scenario_merge(
                scenario.name.clone(),
                scenario_rx,
                global_tx.clone(),
            )));
        }

        let tracker: Arc<dyn ProgressTracker> = match &options.progress_tracker {
            Some(tracker) => tracker.clone(),
            None if options.default_progress_tracker => Arc::new(LogTracker::default()),
            None => Arc::new(NoopTracker),
        };
        let view = ProgressView {
            state: state.clone(),
            scenarios: scenario_states,
            force_stop: force_stop.clone(),
            done: done_rx,
        };
        tokio::spawn(async move { tracker.track(view).await });

        let simulation_name = self.name.clone();
        let post_hook = options.post_hook.clone();
        tokio::spawn(async move {
            for handle in merge_handles {
                let _ = handle.await;
            }
            let _ = done_tx.send(true);
            if let Some(post) = post_hook {
                post(context);
            }
            tracing::info!(simulation = %simulation_name, "finished");
            drop(global_tx);
        });

        Ok(SimulationRun {
            results: global_rx,
            force_stop,
        })
    }
}

/// Convert each driver batch into a [`ScenarioResult`] and forward it.
async fn scenario_merge(
    name: String,
    mut batches: mpsc::Receiver<Vec<RequestResult>>,
    sink: mpsc::Sender<ScenarioResult>,
) {
    while let Some(batch) = batches.recv().await {
        if let Some(result) = ScenarioResult::from_requests(name.clone(), batch) {
            if sink.send(result).await.is_err() {
                break;
            }
        }
    }
}

fn select_runner(options: &SimulationOptions, users: usize) -> Runner {
    if let Some(limit) = options.duration {
        Runner::Duration { limit }
    } else if let Some(limit) = options.request_count {
        Runner::RequestCount { limit }
    } else {
        Runner::FixedRuns {
            runs: options.fixed_runs.unwrap_or(1),
            users,
        }
    }
}

fn validate(simulation: &Simulation, options: &SimulationOptions) -> Result<(), Error> {
    let invalid = |reason: String| Err(Error::InvalidSimulation(reason));

    if simulation.scenarios.is_empty() {
        return invalid("a simulation needs at least one scenario".into());
    }
    for scenario in &simulation.scenarios {
        if scenario.name.is_empty() {
            return invalid("every scenario needs a name".into());
        }
        if scenario.steps.is_empty() && scenario.step_fn.is_none() {
            return invalid(format!(
                "scenario '{}' has neither steps nor a step generator",
                scenario.name
            ));
        }
        if scenario.weight == 0 {
            return invalid(format!("scenario '{}' has zero weight", scenario.name));
        }
        if scenario.rate == Some(0) {
            return invalid(format!("scenario '{}' has a zero rate", scenario.name));
        }
    }
    match (&options.users, options.concurrency) {
        (Some(users), _) if users.is_empty() => {
            return invalid("'users' must not be empty".into());
        }
        (None, Some(0)) => return invalid("'concurrency' must be positive".into()),
        (None, None) => {
            return invalid("either 'users' or 'concurrency' is required".into());
        }
        _ => {}
    }
    if options.duration.is_none()
        && options.request_count.is_none()
        && options.fixed_runs.is_none()
    {
        return invalid(
            "a stop condition is required: 'duration', 'request_count' or 'fixed_runs'".into(),
        );
    }
    if options.duration == Some(Duration::ZERO) {
        return invalid("'duration' must be positive".into());
    }
    if options.request_count == Some(0) {
        return invalid("'request_count' must be positive".into());
    }
    if options.fixed_runs == Some(0) {
        return invalid("'fixed_runs' must be positive".into());
    }
    if options.rate == Some(0) {
        return invalid("'rate' must be positive".into());
    }
    if options.timeout_ms == 0 {
        return invalid("'timeout_ms' must be positive".into());
    }
    Ok(())
}
