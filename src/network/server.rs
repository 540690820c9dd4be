//! TCP Server
//!
//! Accepts connections and hands each one to its own handler thread, up to
//! `max_connections` at a time.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::Result;
use crate::protocol::{write_response, Response};

use super::connection::Connection;
use super::router::Router;

/// How often the accept loop checks for shutdown
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// Signals a running server to stop accepting
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// TCP server for one surface
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    max_connections: usize,
    read_timeout_ms: u64,
    write_timeout_ms: u64,
    shutdown: ShutdownHandle,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind `addr` (port 0 picks a free port)
    pub fn bind(addr: &str, router: Router, config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        tracing::info!(addr = %listener.local_addr()?, surface = ?router.surface(), "listening");

        Ok(Self {
            listener,
            router: Arc::new(router),
            max_connections: config.max_connections.max(1),
            read_timeout_ms: config.read_timeout_ms,
            write_timeout_ms: config.write_timeout_ms,
            shutdown: ShutdownHandle::default(),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Accept connections until shut down (blocking)
    ///
    /// On shutdown, waits up to one read timeout for open connections.
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, _)) => self.dispatch(stream),
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }

        let grace = Duration::from_millis(self.read_timeout_ms.max(1000));
        let started = Instant::now();
        while self.active.load(Ordering::SeqCst) > 0 && started.elapsed() < grace {
            std::thread::sleep(ACCEPT_POLL);
        }
        tracing::info!(surface = ?self.router.surface(), "server stopped");
        Ok(())
    }

    /// Run on a background thread
    pub fn spawn(self) -> Result<(SocketAddr, ShutdownHandle, JoinHandle<Result<()>>)> {
        let addr = self.local_addr()?;
        let handle = self.shutdown_handle();
        let thread = std::thread::Builder::new()
            .name(format!("server-{}", addr))
            .spawn(move || self.run())?;
        Ok((addr, handle, thread))
    }

    fn dispatch(&self, stream: TcpStream) {
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!(error = %e, "cannot configure connection");
            return;
        }

        if self.active.load(Ordering::SeqCst) >= self.max_connections {
            tracing::warn!(max = self.max_connections, "connection limit reached, rejecting");
            let mut stream = stream;
            let _ = write_response(&mut stream, &Response::error("too many connections"));
            return;
        }

        let mut connection = match Connection::new(
            stream,
            Arc::clone(&self.router),
            self.read_timeout_ms,
            self.write_timeout_ms,
        ) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(error = %e, "cannot set up connection");
                return;
            }
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        let spawned = std::thread::Builder::new()
            .name("connection".to_string())
            .spawn(move || {
                if let Err(e) = connection.handle() {
                    tracing::debug!(peer = %connection.peer_addr(), error = %e, "connection ended with error");
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
        if let Err(e) = spawned {
            self.active.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(error = %e, "cannot spawn connection thread");
        }
    }
}
