//! ---
//! twin_section: "07-testing"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Test doubles for the model binding, loader and telemetry exchange."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
//! In-process doubles that let the lifecycle run without a shared library
//! or a telemetry endpoint.

pub mod exchange;
pub mod loader;
pub mod slave;

pub use exchange::{ExchangeProbe, ScriptedConnector, ScriptedExchange, ACCEPTED, REJECTED};
pub use loader::StubLoader;
pub use slave::{linear_model_description, FakeSlave, SlaveProbe, LINEAR_MODEL_XML};
