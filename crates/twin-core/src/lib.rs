//! ---
//! twin_section: "02-lifecycle"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Lifecycle controller and fixed-step scheduling for co-simulation runs."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! Drives one model instance from load to release: instantiate, initialize,
//! apply inputs, step on a fixed grid with telemetry per step, terminate.

pub mod context;
pub mod error;
pub mod lifecycle;
pub mod scheduler;

pub use context::{InputBinding, OutputBinding, RunContext, SimulationClock, CLOCK_TOLERANCE};
pub use error::{LifecycleError, Result};
pub use lifecycle::{LifecycleController, LifecycleState, RunSummary, VariableInfo};
pub use scheduler::{StepEnv, StepOutcome, StepScheduler};
