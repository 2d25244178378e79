//! Stampede — a simulation scheduler for load generation.
//!
//! Stampede drives a population of virtual users through user-defined
//! scenarios at either a fixed concurrency or a target arrival rate, enforces
//! per-request timeouts, applies user-supplied distribution functions that
//! shape load over time, and emits scenario results on a stream while the run
//! is in progress. Everything around that core — HTTP clients, report
//! rendering, CLI — is the caller's business: steps are opaque async
//! callbacks and results are plain serde records.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use stampede::{Scenario, Simulation, SimulationOptions, Step};
//!
//! #[tokio::main]
//! async fn main() {
//!     let scenario = Scenario::builder()
//!         .name("checkout")
//!         .steps(vec![Step::new("load-cart", |_ctx| async move {
//!             // call your system under test here
//!             Ok(true)
//!         })])
//!         .build();
//!
//!     let simulation = Simulation::builder()
//!         .name("smoke")
//!         .scenarios(vec![scenario])
//!         .build();
//!
//!     let options = SimulationOptions::builder()
//!         .concurrency(8)
//!         .duration(Duration::from_secs(10))
//!         .build();
//!
//!     let mut run = simulation.run(options).unwrap();
//!     while let Some(result) = run.next().await {
//!         println!("{} user {} took {} ms", result.name, result.id, result.end - result.start);
//!     }
//! }
//! ```

pub mod distribution;
pub mod error;
pub mod executor;
pub mod progress;
pub mod result;
pub mod runner;
pub mod scenario;
pub mod simulation;
pub mod split;
pub mod step;
pub mod timer;

pub use distribution::LoadDistribution;
pub use error::{Error, ErrorSink};
pub use executor::{ForceStop, ScenarioState, SimulationState};
pub use progress::{LogTracker, NoopTracker, ProgressTracker, ProgressView};
pub use result::{Context, RequestResult, ScenarioResult};
pub use runner::Runner;
pub use scenario::{HookFn, PostHookFn, Scenario, StepGenFn, StepGenReply};
pub use simulation::{Simulation, SimulationOptions, SimulationRun};
pub use step::{BoxError, Step, StepReply};
