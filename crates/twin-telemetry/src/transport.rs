//! ---
//! twin_section: "04-telemetry"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Synchronous request/response exchange over TCP."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

/// One blocking request/response channel.
pub trait Exchange {
    /// Write the header then the body.
    fn send(&mut self, header: &[u8], body: &[u8]) -> io::Result<()>;
    /// Single blocking read into `buffer`; returns the bytes read.
    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
    /// Release the connection. Idempotent.
    fn close(&mut self) -> io::Result<()>;
    /// Peer description for logs.
    fn peer(&self) -> String;
}

/// [`Exchange`] over a single persistent TCP connection.
pub struct TcpExchange {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpExchange {
    /// Connect to `address` (`host:port`), trying every resolved address in turn.
    pub fn connect(address: &str, timeout: Option<Duration>) -> io::Result<Self> {
        let mut last_error = None;
        for candidate in address.to_socket_addrs()? {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&candidate, timeout),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(timeout)?;
                    stream.set_write_timeout(timeout)?;
                    stream.set_nodelay(true)?;
                    info!(peer = %candidate, "telemetry connection established");
                    return Ok(Self {
                        stream: Some(stream),
                        peer: address.to_owned(),
                    });
                }
                Err(err) => {
                    debug!(peer = %candidate, error = %err, "telemetry connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{address} did not resolve to any address"),
            )
        }))
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
    }
}

impl Exchange for TcpExchange {
    fn send(&mut self, header: &[u8], body: &[u8]) -> io::Result<()> {
        let stream = self.stream()?;
        stream.write_all(header)?;
        stream.write_all(body)?;
        stream.flush()
    }

    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buffer)
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
                Err(err) => return Err(err),
            }
            info!(peer = %self.peer, "telemetry connection closed");
        }
        Ok(())
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}
