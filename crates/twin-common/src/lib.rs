//! ---
//! twin_section: "01-core-functionality"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Shared primitives and utilities for the twin driver."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! Shared primitives for the twin driver workspace.
//! This crate exposes run configuration loading, logging, and
//! version metadata utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    ConfigError, ConfigValue, InputAssignment, LoadedRunConfig, LoggingConfig, MetricsConfig,
    ModelConfig, RunConfig, RunSettings, SinkConfig, VariableSelector, VariableSpec,
};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
