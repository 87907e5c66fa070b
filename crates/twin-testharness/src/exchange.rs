//! ---
//! twin_section: "07-testing"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Scripted telemetry exchange and connector."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use twin_telemetry::{
    Exchange, LineProtocolEmitter, LineSerializer, SinkConnector, TelemetryError, TelemetrySink,
    WriteEndpoint,
};

pub const ACCEPTED: &str = "HTTP/1.1 204 No Content\r\n\r\n";
pub const REJECTED: &str = "HTTP/1.1 400 Bad Request\r\n\r\n";

#[derive(Debug, Default)]
struct ExchangeLog {
    headers: Vec<String>,
    bodies: Vec<String>,
    responses: VecDeque<String>,
    connects: usize,
    closes: usize,
}

/// Shared view of everything sent through a [`ScriptedExchange`].
#[derive(Debug, Clone, Default)]
pub struct ExchangeProbe(Arc<Mutex<ExchangeLog>>);

impl ExchangeProbe {
    pub fn headers(&self) -> Vec<String> {
        self.0.lock().headers.clone()
    }

    /// One entry per emitted batch.
    pub fn bodies(&self) -> Vec<String> {
        self.0.lock().bodies.clone()
    }

    pub fn batches(&self) -> usize {
        self.0.lock().bodies.len()
    }

    pub fn connects(&self) -> usize {
        self.0.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.0.lock().closes
    }

    /// Queue the raw response for the next unanswered request.
    pub fn push_response(&self, response: &str) {
        self.0.lock().responses.push_back(response.to_owned());
    }
}

/// In-memory [`Exchange`]. Answers with queued responses, then with `204`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExchange {
    probe: ExchangeProbe,
}

impl ScriptedExchange {
    pub fn new(probe: ExchangeProbe) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> ExchangeProbe {
        self.probe.clone()
    }
}

impl Exchange for ScriptedExchange {
    fn send(&mut self, header: &[u8], body: &[u8]) -> io::Result<()> {
        let mut log = self.probe.0.lock();
        log.headers.push(String::from_utf8_lossy(header).into_owned());
        log.bodies.push(String::from_utf8_lossy(body).into_owned());
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let response = self
            .probe
            .0
            .lock()
            .responses
            .pop_front()
            .unwrap_or_else(|| ACCEPTED.to_owned());
        let bytes = response.as_bytes();
        let length = bytes.len().min(buffer.len());
        buffer[..length].copy_from_slice(&bytes[..length]);
        Ok(length)
    }

    fn close(&mut self) -> io::Result<()> {
        self.probe.0.lock().closes += 1;
        Ok(())
    }

    fn peer(&self) -> String {
        "scripted".to_owned()
    }
}

/// [`SinkConnector`] that wires a real [`LineProtocolEmitter`] onto a
/// [`ScriptedExchange`].
#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    probe: ExchangeProbe,
    endpoint: WriteEndpoint,
    refuse: bool,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            probe: ExchangeProbe::default(),
            endpoint: WriteEndpoint {
                host: "127.0.0.1".to_owned(),
                port: 8086,
                database: "twin".to_owned(),
                username: String::new(),
                password: String::new(),
            },
            refuse: false,
        }
    }

    /// Every connect attempt fails with `ConnectionRefused`.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new()
        }
    }

    pub fn probe(&self) -> ExchangeProbe {
        self.probe.clone()
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkConnector for ScriptedConnector {
    fn connect(&self, measurement: &str) -> Result<Box<dyn TelemetrySink>, TelemetryError> {
        if self.refuse {
            return Err(TelemetryError::Transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            )));
        }
        self.probe.0.lock().connects += 1;
        Ok(Box::new(LineProtocolEmitter::new(
            ScriptedExchange::new(self.probe.clone()),
            LineSerializer::new(measurement),
            self.endpoint.clone(),
        )))
    }
}
