//! ---
//! twin_section: "02-lifecycle"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Run-level error taxonomy."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use twin_common::ConfigError;
use twin_fmi::{FmiError, Status};
use twin_persistence::PersistenceError;
use twin_telemetry::TelemetryError;

use crate::lifecycle::LifecycleState;

/// Result alias used throughout the lifecycle crate.
pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load model: {0}")]
    Bind(#[source] FmiError),
    #[error("model instantiation failed: {0}")]
    InstantiationFailed(#[source] FmiError),
    #[error("model initialization failed with status {status}")]
    InitializationFailed { status: Status },
    #[error("model call failed: {0}")]
    ModelCallFailed(#[source] FmiError),
    #[error("step at t={time} failed with status {status}")]
    StepFailed {
        time: f64,
        status: Status,
        last_successful_time: Option<f64>,
    },
    #[error("model reset failed with status {status}")]
    ResetFailed { status: Status },
    #[error("telemetry transport failed: {0}")]
    Transport(#[source] TelemetryError),
    #[error("telemetry rejected with status {status}")]
    TelemetryRejected { status: String },
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    #[error("run state persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("metrics error: {0}")]
    Metrics(#[source] anyhow::Error),
}

impl LifecycleError {
    /// Fatal errors end the run through the release path; the others leave
    /// the controller usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            LifecycleError::ResetFailed { .. } | LifecycleError::InvalidState { .. }
        )
    }
}

impl From<TelemetryError> for LifecycleError {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::Rejected { status } => LifecycleError::TelemetryRejected { status },
            other => LifecycleError::Transport(other),
        }
    }
}
