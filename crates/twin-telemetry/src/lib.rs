//! ---
//! twin_section: "04-telemetry"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Line-protocol telemetry emission over a request/response exchange."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Telemetry sink for simulation batches.
//!
//! Each [`TelemetryBatch`] becomes one line-protocol write request followed
//! by a single blocking acknowledgement read.

pub mod emitter;
pub mod line;
pub mod sink;
pub mod transport;
pub mod types;

/// Shared result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Failures while emitting a batch.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Connect, send or receive failed.
    #[error("telemetry transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// The endpoint answered with something other than `204`.
    #[error("telemetry rejected with status {status}")]
    Rejected {
        /// Status token from the response line.
        status: String,
    },
    /// The response did not contain a status token.
    #[error("malformed telemetry response: {0:?}")]
    MalformedResponse(String),
    /// Emission attempted after the sink was closed.
    #[error("telemetry sink is closed")]
    Closed,
}

pub use emitter::{parse_status, LineProtocolEmitter, WriteEndpoint, ACCEPTED_STATUS};
pub use line::{format_g, sanitize_field_name, LineSerializer};
pub use sink::{SinkConnector, TcpConnector, TelemetrySink};
pub use transport::{Exchange, TcpExchange};
pub use types::{Ack, FieldValue, TelemetryBatch, TelemetryField};
