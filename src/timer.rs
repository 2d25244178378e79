//! Wall-clock and monotonic time for the simulation.
//!
//! Emitted records carry wall-clock milliseconds, while scheduling decisions
//! (rate trackers, stop conditions) run on a monotonic [`Clock`] anchored at
//! simulation start. Sleeps are plain tokio timers; racing one against another
//! event drops the loser, so no scheduled wake survives past the run.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::{Duration, Instant};

/// Milliseconds since the UNIX epoch, as stamped on emitted records.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Monotonic clock anchored at simulation start.
///
/// Rate trackers store their next trigger as nanoseconds since this origin;
/// [`Clock::at_nanos`] converts such an offset back into a sleepable deadline.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant the simulation started.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Time elapsed since simulation start.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Deadline for an offset of `nanos` nanoseconds past the origin.
    pub fn at_nanos(&self, nanos: u64) -> Instant {
        self.origin + Duration::from_nanos(nanos)
    }
}
