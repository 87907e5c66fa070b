//! ---
//! twin_section: "04-telemetry"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Telemetry batch and acknowledgement types."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::time::Duration;

use serde::Serialize;

/// Typed value of one telemetry field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Written with 16 significant digits.
    Real(f64),
    /// Written in decimal.
    Integer(i64),
    /// Written as `true`/`false`.
    Boolean(bool),
    /// Written double-quoted.
    Text(String),
}

/// Field name as it appears in the catalog, prior to sanitization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryField {
    /// Variable name.
    pub name: String,
    /// Current value.
    pub value: FieldValue,
}

impl TelemetryField {
    /// Build a field from a name and value.
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// All values emitted for one simulation instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryBatch {
    /// Run identifier from the persistent counter.
    pub run_id: u64,
    /// Simulation time in seconds.
    pub timestamp: f64,
    /// Inputs first, then outputs, in configuration order.
    pub fields: Vec<TelemetryField>,
}

impl TelemetryBatch {
    /// Empty batch for `run_id` at `timestamp`.
    pub fn new(run_id: u64, timestamp: f64) -> Self {
        Self {
            run_id,
            timestamp,
            fields: Vec::new(),
        }
    }

    /// Append a field, keeping insertion order.
    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push(TelemetryField::new(name, value));
    }
}

/// Successful acknowledgement of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Status token reported by the endpoint.
    pub status: String,
    /// Bytes of body written.
    pub body_bytes: usize,
    /// Wall-clock time from send to acknowledgement.
    pub round_trip: Duration,
}
