//! ---
//! twin_section: "04-telemetry"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Write-request framing and acknowledgement validation."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::time::Instant;

use tracing::{debug, warn};
use twin_common::SinkConfig;

use crate::line::LineSerializer;
use crate::sink::TelemetrySink;
use crate::transport::Exchange;
use crate::types::{Ack, TelemetryBatch};
use crate::{Result, TelemetryError};

/// Status token of an accepted write.
pub const ACCEPTED_STATUS: &str = "204";
/// Size of the acknowledgement read buffer.
pub const RESPONSE_BUFFER_BYTES: usize = 8196;

/// Database and credentials addressed by every write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEndpoint {
    /// Host used in the `Host` header.
    pub host: String,
    /// Port used in the `Host` header.
    pub port: u16,
    /// Target database.
    pub database: String,
    /// User name passed as `u`.
    pub username: String,
    /// Password passed as `p`.
    pub password: String,
}

impl WriteEndpoint {
    /// Request header for a body of `content_length` bytes.
    pub fn header(&self, content_length: usize) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("db", &self.database)
            .append_pair("u", &self.username)
            .append_pair("p", &self.password)
            .finish();
        format!(
            "POST /write?{query} HTTP/1.1\r\nHost: {}:{}\r\nContent-Length: {content_length}\r\n\r\n",
            self.host, self.port
        )
    }
}

impl From<&SinkConfig> for WriteEndpoint {
    fn from(config: &SinkConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

/// Second whitespace-separated token of the response, i.e. the status code.
pub fn parse_status(response: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(response);
    text.split_whitespace()
        .nth(1)
        .map(str::to_owned)
        .ok_or_else(|| TelemetryError::MalformedResponse(text.into_owned()))
}

/// [`TelemetrySink`] writing one line-protocol request per batch.
pub struct LineProtocolEmitter<E: Exchange> {
    exchange: E,
    serializer: LineSerializer,
    endpoint: WriteEndpoint,
    response: Vec<u8>,
    closed: bool,
}

impl<E: Exchange> LineProtocolEmitter<E> {
    /// Wrap an established exchange.
    pub fn new(exchange: E, serializer: LineSerializer, endpoint: WriteEndpoint) -> Self {
        Self {
            exchange,
            serializer,
            endpoint,
            response: vec![0; RESPONSE_BUFFER_BYTES],
            closed: false,
        }
    }

    /// Borrow the underlying exchange.
    pub fn exchange(&self) -> &E {
        &self.exchange
    }
}

impl<E: Exchange> TelemetrySink for LineProtocolEmitter<E> {
    fn emit(&mut self, batch: &TelemetryBatch) -> Result<Ack> {
        if self.closed {
            return Err(TelemetryError::Closed);
        }
        let body = self.serializer.serialize(batch);
        let header = self.endpoint.header(body.len());
        let started = Instant::now();
        self.exchange.send(header.as_bytes(), body.as_bytes())?;
        let received = self.exchange.receive(&mut self.response)?;
        let round_trip = started.elapsed();
        let status = parse_status(&self.response[..received])?;
        if status != ACCEPTED_STATUS {
            warn!(
                run_id = batch.run_id,
                time = batch.timestamp,
                %status,
                "telemetry batch rejected"
            );
            return Err(TelemetryError::Rejected { status });
        }
        debug!(
            run_id = batch.run_id,
            time = batch.timestamp,
            fields = batch.fields.len(),
            bytes = body.len(),
            round_trip_us = round_trip.as_micros() as u64,
            "telemetry batch acknowledged"
        );
        Ok(Ack {
            status,
            body_bytes: body.len(),
            round_trip,
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.exchange.close()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.exchange.peer(), self.serializer.measurement())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;
    use crate::types::FieldValue;

    #[derive(Default)]
    struct RecordingExchange {
        sent: Vec<(String, String)>,
        responses: VecDeque<Vec<u8>>,
        closes: usize,
    }

    impl Exchange for RecordingExchange {
        fn send(&mut self, header: &[u8], body: &[u8]) -> io::Result<()> {
            self.sent.push((
                String::from_utf8_lossy(header).into_owned(),
                String::from_utf8_lossy(body).into_owned(),
            ));
            Ok(())
        }

        fn receive(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            let response = self.responses.pop_front().unwrap_or_default();
            buffer[..response.len()].copy_from_slice(&response);
            Ok(response.len())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closes += 1;
            Ok(())
        }

        fn peer(&self) -> String {
            "recording".into()
        }
    }

    fn endpoint() -> WriteEndpoint {
        WriteEndpoint {
            host: "influx".into(),
            port: 8086,
            database: "rt_test".into(),
            username: "rw db".into(),
            password: "p&ss".into(),
        }
    }

    fn emitter(responses: &[&str]) -> LineProtocolEmitter<RecordingExchange> {
        let exchange = RecordingExchange {
            responses: responses.iter().map(|r| r.as_bytes().to_vec()).collect(),
            ..RecordingExchange::default()
        };
        LineProtocolEmitter::new(exchange, LineSerializer::new("model.fmu"), endpoint())
    }

    #[test]
    fn header_carries_query_host_and_length() {
        assert_eq!(
            endpoint().header(42),
            "POST /write?db=rt_test&u=rw+db&p=p%26ss HTTP/1.1\r\nHost: influx:8086\r\nContent-Length: 42\r\n\r\n"
        );
    }

    #[test]
    fn accepted_batch_is_acknowledged() {
        let mut sink = emitter(&["HTTP/1.1 204 No Content\r\n\r\n"]);
        let mut batch = TelemetryBatch::new(3, 0.5);
        batch.push("y", FieldValue::Real(1.25));
        let ack = sink.emit(&batch).unwrap();
        assert_eq!(ack.status, ACCEPTED_STATUS);
        let (header, body) = &sink.exchange().sent[0];
        assert_eq!(body, "model.fmu,global_id=3 timestamp=0.5,y=1.25\n");
        assert!(header.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert_eq!(ack.body_bytes, body.len());
    }

    #[test]
    fn other_status_is_rejection() {
        let mut sink = emitter(&["HTTP/1.1 400 Bad Request\r\n\r\n"]);
        let err = sink.emit(&TelemetryBatch::new(1, 0.0)).unwrap_err();
        assert!(matches!(err, TelemetryError::Rejected { status } if status == "400"));
    }

    #[test]
    fn empty_response_is_malformed() {
        let mut sink = emitter(&[]);
        let err = sink.emit(&TelemetryBatch::new(1, 0.0)).unwrap_err();
        assert!(matches!(err, TelemetryError::MalformedResponse(_)));
    }

    #[test]
    fn close_is_idempotent_and_blocks_emission() {
        let mut sink = emitter(&["HTTP/1.1 204 No Content\r\n\r\n"]);
        sink.close().unwrap();
        sink.close().unwrap();
        assert_eq!(sink.exchange().closes, 1);
        assert!(matches!(
            sink.emit(&TelemetryBatch::new(1, 0.0)),
            Err(TelemetryError::Closed)
        ));
    }
}
