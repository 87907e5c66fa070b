//! ---
//! twin_section: "04-telemetry"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Telemetry sink seam and TCP connector."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::time::Duration;

use twin_common::SinkConfig;

use crate::emitter::{LineProtocolEmitter, WriteEndpoint};
use crate::line::LineSerializer;
use crate::transport::TcpExchange;
use crate::types::{Ack, TelemetryBatch};
use crate::Result;

/// Destination for per-step batches. One round trip per `emit`.
pub trait TelemetrySink {
    /// Send `batch` and wait for its acknowledgement.
    fn emit(&mut self, batch: &TelemetryBatch) -> Result<Ack>;
    /// Release the connection. Idempotent.
    fn close(&mut self) -> Result<()>;
    /// Human-readable destination for logs.
    fn describe(&self) -> String;
}

/// Opens a sink for a named measurement.
pub trait SinkConnector {
    /// Connect and return a ready sink.
    fn connect(&self, measurement: &str) -> Result<Box<dyn TelemetrySink>>;
}

/// Connects a [`LineProtocolEmitter`] over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: WriteEndpoint,
    io_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Connector for the configured endpoint.
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            endpoint: WriteEndpoint::from(config),
            io_timeout: config.io_timeout,
        }
    }
}

impl SinkConnector for TcpConnector {
    fn connect(&self, measurement: &str) -> Result<Box<dyn TelemetrySink>> {
        let address = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        let exchange = TcpExchange::connect(&address, self.io_timeout)?;
        Ok(Box::new(LineProtocolEmitter::new(
            exchange,
            LineSerializer::new(measurement),
            self.endpoint.clone(),
        )))
    }
}
