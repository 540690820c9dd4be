//! One accepted socket, served until the far side hangs up.

use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PackError, Result};
use crate::protocol::{read_command, write_response, Response};

use super::router::Router;

/// How a connection stopped reading frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hangup {
    /// Peer closed or reset the socket
    Closed,
    /// No frame arrived within the read timeout
    Idle,
}

fn hangup(err: &PackError) -> Option<Hangup> {
    let PackError::Io(io) = err else {
        return None;
    };
    match io.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => Some(Hangup::Closed),
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Some(Hangup::Idle),
        _ => None,
    }
}

fn timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Serves framed requests from a single client through a [`Router`]
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    router: Arc<Router>,
    peer_addr: String,
}

impl Connection {
    /// Wrap `stream`; a timeout of zero leaves that direction blocking
    pub fn new(
        stream: TcpStream,
        router: Arc<Router>,
        read_timeout_ms: u64,
        write_timeout_ms: u64,
    ) -> io::Result<Self> {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => "unknown".to_string(),
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(timeout(read_timeout_ms))?;
        stream.set_write_timeout(timeout(write_timeout_ms))?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            router,
            peer_addr,
        })
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Serve requests until the client leaves or a frame cannot be handled.
    ///
    /// A clean hangup or idle timeout ends with `Ok`. An undecodable frame is
    /// answered with an error response before the connection is dropped.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(peer = %self.peer_addr, "connection established");

        loop {
            let command = match read_command(&mut self.reader) {
                Ok(command) => command,
                Err(e) => {
                    if let Some(reason) = hangup(&e) {
                        tracing::debug!(peer = %self.peer_addr, ?reason, "connection closed");
                        return Ok(());
                    }
                    tracing::warn!(peer = %self.peer_addr, error = %e, "bad request");
                    let _ = write_response(&mut self.writer, &Response::error(&e.to_string()));
                    return Err(e);
                }
            };

            let kind = command.command_type();
            tracing::trace!(peer = %self.peer_addr, command = ?kind, "request");

            match self.router.handle(command, &mut self.reader, &mut self.writer) {
                Ok(()) => {}
                Err(e) if hangup(&e) == Some(Hangup::Closed) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "client left mid-request");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, command = ?kind, error = %e, "closing connection");
                    return Err(e);
                }
            }
        }
    }
}
