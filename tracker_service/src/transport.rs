//! Transport boundary: the tracking pipeline talks to the outside world
//! through `publish` (outbound cycle reports) and the ingest handle
//! (inbound measurements). The handle-based design keeps the core free of
//! global state; tests substitute [`InMemoryTransport`].

use crate::ingest::IngestHandle;
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O: {0}")]
    Io(#[from] io::Error),
}

/// Outbound half of the pub/sub boundary.
pub trait Transport: Send + Sync {
    /// Publish one payload to all peers. Failures are reported, not fatal:
    /// the next cycle publishes independently.
    fn publish(&self, payload: &[u8]) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// In-memory transport (tests, replay tooling)
// ---------------------------------------------------------------------------

/// Captures published payloads for inspection.
#[derive(Default)]
pub struct InMemoryTransport {
    published: Mutex<Vec<Vec<u8>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything published so far.
    pub fn take_published(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.published.lock())
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }
}

impl Transport for InMemoryTransport {
    fn publish(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.published.lock().push(payload.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UDP transport
// ---------------------------------------------------------------------------

/// Datagram transport: publishes reports to a fixed peer and feeds received
/// datagrams into the ingest queue from a background thread.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    pub fn bind(listen: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(listen)?;
        info!(listen = %listen, peer = %peer, "transport bound");
        Ok(Self { socket, peer })
    }

    /// Start the receive loop. It exits when `running` clears, checking at
    /// the read-timeout cadence.
    pub fn spawn_listener(
        &self,
        ingest: IngestHandle,
        running: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let socket = self.socket.try_clone()?;
        socket.set_read_timeout(Some(Duration::from_millis(250)))?;

        thread::Builder::new()
            .name("transport-ingest".into())
            .spawn(move || {
                let mut buf = [0u8; 64 * 1024];
                while running.load(Ordering::Relaxed) {
                    match socket.recv(&mut buf) {
                        Ok(len) => ingest.on_receive(&buf[..len]),
                        Err(err)
                            if matches!(
                                err.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) => {}
                        Err(err) => warn!(%err, "transport receive failed"),
                    }
                }
                info!("transport receive loop stopped");
            })
    }
}

impl Transport for UdpTransport {
    fn publish(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(payload, self.peer)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
