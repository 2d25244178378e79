//! Load-shaping callbacks.
//!
//! A distribution turns the simulation's progress into a multiplier applied
//! to a scenario's base concurrency or base rate. Two callback shapes exist
//! as explicit variants rather than runtime arity inspection: progress alone,
//! or progress plus the scenario context.

use std::sync::Arc;

use crate::result::Context;

type ProgressFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;
type ProgressContextFn = Arc<dyn Fn(f64, &Context) -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum LoadDistribution {
    /// `progress -> multiplier`
    Progress(ProgressFn),
    /// `(progress, context) -> multiplier`
    WithContext(ProgressContextFn),
}

impl LoadDistribution {
    pub fn of(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::Progress(Arc::new(f))
    }

    pub fn with_context(f: impl Fn(f64, &Context) -> f64 + Send + Sync + 'static) -> Self {
        Self::WithContext(Arc::new(f))
    }

    /// Multiplier for the current progress, clamped to `[0, +inf]`.
    ///
    /// `+inf` is a valid upper bound meaning "unthrottled"; only negatives
    /// and `NaN` clamp to zero.
    pub fn multiplier(&self, progress: f64, context: &Context) -> f64 {
        let value = match self {
            Self::Progress(f) => f(progress),
            Self::WithContext(f) => f(progress, context),
        };
        if value.is_nan() { 0.0 } else { value.max(0.0) }
    }
}

impl std::fmt::Debug for LoadDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Progress(_) => f.write_str("LoadDistribution::Progress"),
            Self::WithContext(_) => f.write_str("LoadDistribution::WithContext"),
        }
    }
}
