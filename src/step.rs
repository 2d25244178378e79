//! A single unit of work and its timeout-guarded execution.
//!
//! The request callback is type-erased into a boxed future so synchronous and
//! deferred work share one shape; a synchronous value is just a pre-completed
//! future. Execution races the callback against the configured timeout and
//! always yields exactly one [`RequestResult`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use serde_json::json;
use tokio::time::{Duration, timeout};

use crate::result::{Context, RequestResult};
use crate::timer::now_millis;

/// Error type user callbacks fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a request callback resolves to.
#[derive(Debug, Clone)]
pub enum StepReply {
    /// Bare success flag; the input context is carried forward.
    Flag(bool),
    /// Success flag plus a replacement context for subsequent steps.
    WithContext(bool, Context),
}

impl StepReply {
    fn into_parts(self, fallback: Context) -> (bool, Context) {
        match self {
            StepReply::Flag(flag) => (flag, fallback),
            StepReply::WithContext(flag, context) => (flag, context),
        }
    }
}

impl From<bool> for StepReply {
    fn from(flag: bool) -> Self {
        StepReply::Flag(flag)
    }
}

impl From<(bool, Context)> for StepReply {
    fn from((flag, context): (bool, Context)) -> Self {
        StepReply::WithContext(flag, context)
    }
}

type RequestFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<StepReply, BoxError>> + Send + Sync>;
type SleepBeforeFn = Arc<dyn Fn(&Context) -> u64 + Send + Sync>;

/// A named unit of work with an optional pre-sleep.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub(crate) request: RequestFn,
    pub(crate) sleep_before: Option<SleepBeforeFn>,
}

impl Step {
    /// Build a step from an async request callback.
    ///
    /// The callback receives the current context and resolves to a
    /// [`StepReply`]-convertible value, or fails with any boxed error.
    pub fn new<F, Fut, R>(name: impl Into<String>, request: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
        R: Into<StepReply>,
    {
        Self {
            name: name.into(),
            request: Arc::new(move |ctx| {
                let fut = request(ctx);
                Box::pin(async move { fut.await.map(Into::into) })
            }),
            sleep_before: None,
        }
    }

    /// Pause for the returned number of milliseconds before each invocation.
    pub fn sleep_before(mut self, f: impl Fn(&Context) -> u64 + Send + Sync + 'static) -> Self {
        self.sleep_before = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("sleep_before", &self.sleep_before.is_some())
            .finish()
    }
}

/// Run one step with a timeout and produce its result record.
///
/// The request future is spawned as its own task and the race happens on the
/// join handle: when the timeout wins, the in-flight callback keeps running in
/// the background and its eventual output is dropped with the handle. It can
/// never reach the result channel, whose only writer is the calling driver.
/// A panicking callback surfaces as a failed result, never as a panic here.
pub async fn execute_step(
    step: &Step,
    timeout_ms: u64,
    mut context: Context,
    user_id: u64,
    sent_requests: &AtomicUsize,
) -> RequestResult {
    sent_requests.fetch_add(1, Ordering::Relaxed);

    if let Some(sleep_fn) = &step.sleep_before {
        let ms = sleep_fn(&context);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    context.insert("user_id".into(), json!(user_id));
    let context_before = context.clone();
    let start = now_millis();

    // build the future inside the task so a panic while constructing it is
    // caught through the join handle too
    let request = step.request.clone();
    let in_flight = tokio::spawn(async move { request(context).await });
    let (result, context_after, exception) =
        match timeout(Duration::from_millis(timeout_ms), in_flight).await {
            Ok(Ok(Ok(reply))) => {
                let (flag, after) = reply.into_parts(context_before.clone());
                (flag, after, None)
            }
            Ok(Ok(Err(error))) => (false, context_before.clone(), Some(error.to_string())),
            Ok(Err(join_error)) => (
                false,
                context_before.clone(),
                Some(format!("step panicked: {join_error}")),
            ),
            Err(_) => (
                false,
                context_before.clone(),
                Some(format!("request timed out after {timeout_ms} ms")),
            ),
        };
    let end = now_millis().max(start);

    RequestResult {
        name: step.name.clone(),
        id: user_id,
        start,
        end,
        result,
        context_before,
        context_after,
        exception,
    }
}
