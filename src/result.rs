//! The records a simulation emits.
//!
//! A [`RequestResult`] is produced once per step execution and never mutated
//! afterwards; a [`ScenarioResult`] wraps the ordered request results of one
//! scenario run for one user. Both are serde records so callers can persist
//! or ship them as they see fit.

use serde::{Deserialize, Serialize};

/// Context handed to step callbacks and hooks.
///
/// Contexts are immutable snapshots passed by value; a step that wants to
/// change the context returns a replacement via
/// [`StepReply::WithContext`](crate::step::StepReply::WithContext).
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Outcome of a single step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestResult {
    /// Step name.
    pub name: String,
    /// Virtual user that executed the step.
    pub id: u64,
    /// Wall-clock start, milliseconds since the UNIX epoch.
    pub start: u64,
    /// Wall-clock end, `end >= start`.
    pub end: u64,
    /// Whether the step succeeded. Always `false` when `exception` is set.
    pub result: bool,
    #[serde(default, skip_serializing_if = "Context::is_empty")]
    pub context_before: Context,
    #[serde(default, skip_serializing_if = "Context::is_empty")]
    pub context_after: Context,
    /// Failure description. Stripped before emission; present only while the
    /// record travels inside the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

/// One completed scenario run for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario name.
    pub name: String,
    /// Virtual user id.
    pub id: u64,
    /// Start of the first request.
    pub start: u64,
    /// End of the last request.
    pub end: u64,
    /// Step results in execution order.
    pub requests: Vec<RequestResult>,
}

impl ScenarioResult {
    /// Wrap a non-empty batch of request results. Returns `None` for an empty
    /// batch, which the merge layer silently drops.
    pub fn from_requests(name: impl Into<String>, requests: Vec<RequestResult>) -> Option<Self> {
        let first = requests.first()?;
        let start = first.start;
        let id = first.id;
        let end = requests.last().map(|r| r.end).unwrap_or(start);
        Some(Self {
            name: name.into(),
            id,
            start,
            end,
            requests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: u64, end: u64) -> RequestResult {
        RequestResult {
            name: "step".into(),
            id: 7,
            start,
            end,
            result: true,
            context_before: Context::new(),
            context_after: Context::new(),
            exception: None,
        }
    }

    #[test]
    fn scenario_result_spans_first_start_to_last_end() {
        let result =
            ScenarioResult::from_requests("s", vec![request(10, 20), request(25, 40)]).unwrap();
        assert_eq!(result.start, 10);
        assert_eq!(result.end, 40);
        assert_eq!(result.id, 7);
        assert_eq!(result.requests.len(), 2);
    }

    #[test]
    fn empty_batch_is_dropped() {
        assert!(ScenarioResult::from_requests("s", vec![]).is_none());
    }

    #[test]
    fn absent_exception_is_omitted_from_serialization() {
        let json = serde_json::to_string(&request(1, 2)).unwrap();
        assert!(!json.contains("exception"));
        assert!(!json.contains("context_before"));
    }
}
