//! Scenarios and the per-run step walk.
//!
//! A scenario names an ordered step sequence and/or a step generator that is
//! re-consulted until it returns `None`. [`run_scenario_once`] walks that
//! source for one virtual user, threading the context through each step,
//! honouring the failure-skip policy and early-termination checks, and
//! emitting the collected request results.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::executor::SimulationState;
use crate::result::{Context, RequestResult};
use crate::step::{Step, execute_step};

/// Hook run before a scenario (or simulation) starts; returns the context
/// subsequent steps see.
pub type HookFn = Arc<dyn Fn(Context) -> Context + Send + Sync>;
/// Hook run after a scenario (or simulation) finishes; receives the final
/// context.
pub type PostHookFn = Arc<dyn Fn(Context) + Send + Sync>;

/// What a step generator yields: the next step, optionally with a replacement
/// context.
pub enum StepGenReply {
    Step(Step),
    WithContext(Step, Context),
}

/// Generator consulted for the next step when the fixed sequence is empty.
/// Returning `None` ends the scenario run.
pub type StepGenFn = Arc<dyn Fn(&Context) -> Option<StepGenReply> + Send + Sync>;

/// A named composition of steps executed repeatedly per virtual user.
#[derive(Clone, TypedBuilder)]
pub struct Scenario {
    #[builder(setter(into))]
    pub name: String,
    /// Relative share of users (and rate) this scenario receives.
    #[builder(default = 1)]
    pub weight: u64,
    #[builder(default)]
    pub steps: Vec<Step>,
    #[builder(default, setter(strip_option))]
    pub step_fn: Option<StepGenFn>,
    /// Merged over the simulation context for every run.
    #[builder(default)]
    pub context: Context,
    #[builder(default, setter(strip_option))]
    pub pre_hook: Option<HookFn>,
    #[builder(default, setter(strip_option))]
    pub post_hook: Option<PostHookFn>,
    /// Let the stop condition cut a run short between steps.
    #[builder(default = false)]
    pub allow_early_termination: bool,
    /// Stop the run after a failed step. On by default.
    #[builder(default = true)]
    pub skip_next_after_failure: bool,
    /// Target arrivals per second for this scenario alone. Overrides the
    /// scenario's share of the simulation-wide rate.
    #[builder(default, setter(strip_option))]
    pub rate: Option<u64>,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("steps", &self.steps.len())
            .field("step_fn", &self.step_fn.is_some())
            .field("allow_early_termination", &self.allow_early_termination)
            .field("skip_next_after_failure", &self.skip_next_after_failure)
            .field("rate", &self.rate)
            .finish()
    }
}

/// The pair `(remaining steps, generator)` a run consumes steps from.
struct StepSource {
    remaining: VecDeque<Step>,
    step_fn: Option<StepGenFn>,
}

impl StepSource {
    fn new(scenario: &Scenario) -> Self {
        Self {
            remaining: scenario.steps.iter().cloned().collect(),
            step_fn: scenario.step_fn.clone(),
        }
    }

    /// Yield the next step and the context it runs with. Serving from the
    /// fixed sequence drops the generator; the generator is only consulted
    /// once the sequence is exhausted.
    fn next_step(&mut self, context: Context) -> (Option<Step>, Context) {
        if let Some(step) = self.remaining.pop_front() {
            self.step_fn = None;
            return (Some(step), context);
        }
        match &self.step_fn {
            Some(generate) => match generate(&context) {
                Some(StepGenReply::Step(step)) => (Some(step), context),
                Some(StepGenReply::WithContext(step, next)) => (Some(step), next),
                None => (None, context),
            },
            None => (None, context),
        }
    }
}

/// Run a scenario once for one user, returning its request results with
/// exceptions already logged and stripped.
pub(crate) async fn run_scenario_once(
    scenario: &Scenario,
    user_id: u64,
    base_context: &Context,
    state: &SimulationState,
) -> Vec<RequestResult> {
    let mut context = base_context.clone();
    for (key, value) in &scenario.context {
        context.insert(key.clone(), value.clone());
    }
    if let Some(pre) = &scenario.pre_hook {
        context = pre(context);
    }

    let mut source = StepSource::new(scenario);
    let mut results: Vec<RequestResult> = Vec::new();

    loop {
        if state.force_stopped() {
            break;
        }
        if scenario.allow_early_termination
            && !state.should_continue(state.sent(), Instant::now())
        {
            break;
        }

        let (step, next_context) = source.next_step(context);
        context = next_context;
        let Some(step) = step else { break };

        let record = execute_step(
            &step,
            state.timeout_ms,
            context.clone(),
            user_id,
            &state.sent_requests,
        )
        .await;
        context = record.context_after.clone();

        if let Some(error) = &record.exception {
            state.errors.record(&scenario.name, &record.name, user_id, error);
        }
        let failed = !record.result;
        results.push(record);

        if failed && scenario.skip_next_after_failure {
            break;
        }
    }

    if let Some(post) = &scenario.post_hook {
        post(context);
    }

    // the exception was logged above; it is not part of the reported record
    for record in &mut results {
        record.exception = None;
    }
    results
}
