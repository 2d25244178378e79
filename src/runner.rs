//! Stop-condition authority for a simulation.
//!
//! A [`Runner`] decides whether drivers keep launching scenario runs and how
//! far along the simulation is. Three policies share one contract: a fixed
//! wall-clock duration, a total request budget, or a fixed number of runs per
//! virtual user.

use tokio::time::{Duration, Instant};

/// Termination policy. Selection precedence when options name several:
/// duration, then request count, then fixed runs.
#[derive(Debug, Clone)]
pub enum Runner {
    /// Run until wall time `limit` has elapsed since simulation start.
    Duration { limit: Duration },
    /// Run until `limit` requests have been counted.
    RequestCount { limit: usize },
    /// Each of `users` virtual users runs the scenario `runs` times.
    FixedRuns { runs: usize, users: usize },
}

impl Runner {
    /// Whether a run scheduled for `next_run_at` may still launch.
    ///
    /// `sent` is whichever counter the calling driver accounts with: executed
    /// requests for concurrency drivers, prepared slots for rate drivers.
    pub fn continue_run(&self, sent: usize, start: Instant, next_run_at: Instant) -> bool {
        match self {
            Runner::Duration { limit } => next_run_at < start + *limit,
            Runner::RequestCount { limit } => sent < *limit,
            Runner::FixedRuns { runs, users } => sent < runs * users,
        }
    }

    /// Progress as a fraction in `[0, 1]` plus elapsed wall time.
    pub fn progress(&self, sent: usize, start: Instant, now: Instant) -> (f64, Duration) {
        let elapsed = now.saturating_duration_since(start);
        let fraction = match self {
            Runner::Duration { limit } => {
                elapsed.as_secs_f64() / limit.as_secs_f64().max(f64::MIN_POSITIVE)
            }
            Runner::RequestCount { limit } => sent as f64 / (*limit).max(1) as f64,
            Runner::FixedRuns { runs, users } => sent as f64 / (runs * users).max(1) as f64,
        };
        (fraction.clamp(0.0, 1.0), elapsed)
    }

    pub fn info(&self) -> String {
        match self {
            Runner::Duration { limit } => format!("duration {:?}", limit),
            Runner::RequestCount { limit } => format!("{limit} requests"),
            Runner::FixedRuns { runs, users } => {
                format!("{runs} runs for each of {users} users")
            }
        }
    }
}
