//! Connection proxying.
//!
//! Each accepted driver connection gets a [`Proxy`]: it dials the real backend, then runs
//! two [`Pipe`](pipe::Pipe)s concurrently, one per direction. The pipes decode every frame
//! they carry and consult a [`Dispatcher`](dispatch::Dispatcher), which may answer a
//! request locally instead of forwarding it.
//!
//! # Teardown
//!
//! The two pipes share an [`ErrorSignal`](signal::ErrorSignal). Whichever stops first
//! trips it; the supervisor then shuts both legs down, which unblocks the other pipe, and
//! joins both threads. Closing either TCP leg is the only way a connection ends.
//!
//! # See Also
//!
//! - [`wire`](crate::wire): Frame decoding and encoding.
//! - [`translate`](crate::translate): Answers find statements from the backing store.
pub mod dispatch;
pub mod negotiate;
pub mod pipe;
mod server;
pub mod signal;
pub mod transport;

use std::{
    fmt, io,
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{info, warn};
use thiserror::Error;

use crate::{
    config::{ConfigError, ProxyConfig},
    storage::BackingStore,
};
use dispatch::Dispatcher;
use pipe::Pipe;
use signal::ErrorSignal;
use transport::{Conduit, Endpoint};

pub use server::ProxyServer;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("remote connection failed: {0}")]
    Connect(io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid tls server name '{0}'")]
    ServerName(String),

    #[error("no usable certificates in {0}")]
    Certificates(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Which way a pipe carries bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Driver to backend; the only direction that intercepts.
    Upstream,
    /// Backend to driver.
    Downstream,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Direction::Upstream => "sent",
            Direction::Downstream => "received",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str(">>>"),
            Direction::Downstream => f.write_str("<<<"),
        }
    }
}

/// Byte totals of a finished connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// Forwarded from the driver to the backend.
    pub sent: u64,
    /// Forwarded from the backend to the driver.
    pub received: u64,
}

/// Supervises one proxied connection.
pub struct Proxy {
    id: u64,
    local: TcpStream,
    config: Arc<ProxyConfig>,
    store: Arc<dyn BackingStore>,
}

impl Proxy {
    /// Takes over `local`; it is closed when the proxy finishes.
    pub fn new(
        id: u64,
        local: TcpStream,
        config: Arc<ProxyConfig>,
        store: Arc<dyn BackingStore>,
    ) -> Self {
        Self {
            id,
            local,
            config,
            store,
        }
    }

    /// Dials the remote and proxies until either leg closes.
    pub fn run(self) -> Result<ProxyStats, ProxyError> {
        let id = self.id;

        let remote = match transport::dial(&self.config) {
            Ok(remote) => remote,
            Err(e) => {
                warn!("[#{id:03}] Remote connection failed: {e}");
                let _ = Conduit::close(&self.local);
                return Err(e);
            }
        };

        let local: Box<dyn Conduit> = Box::new(self.local);
        let (local_reader, local_end) = Endpoint::split(local)?;
        let (remote_reader, remote_end) = Endpoint::split(remote)?;
        let client_addr = local_end.peer_addr()?;

        if self.config.nagle_disabled {
            local_end.set_nodelay(true)?;
            remote_end.set_nodelay(true)?;
        }

        info!(
            "[#{id:03}] Opened {} >>> {}",
            client_addr,
            self.config.remote_label()
        );

        let (signal, teardown) = ErrorSignal::new();
        let pipe = |direction: Direction,
                    reader: Box<dyn Conduit>,
                    origin: &Endpoint,
                    destination: &Endpoint| {
            let dispatcher = Dispatcher::new(
                direction,
                Arc::clone(&self.store),
                self.config.failure_policy,
            );
            Pipe::new(
                direction,
                reader,
                origin.clone(),
                destination.clone(),
                dispatcher,
                signal.clone(),
            )
            .with_connection_id(id)
            .with_output_hex(self.config.output_hex)
        };
        let upstream = pipe(Direction::Upstream, local_reader, &local_end, &remote_end);
        let downstream = pipe(Direction::Downstream, remote_reader, &remote_end, &local_end);
        let sent = upstream.forwarded();
        let received = downstream.forwarded();
        drop(signal);

        let handles = match spawn_pipes(id, upstream, downstream) {
            Ok(handles) => handles,
            Err(e) => {
                local_end.close();
                remote_end.close();
                return Err(e.into());
            }
        };

        // Every pipe trips the signal on its way out, so this only returns once one has
        // stopped.
        let _ = teardown.recv();
        local_end.close();
        remote_end.close();

        for handle in handles {
            if handle.join().is_err() {
                warn!("[#{id:03}] pipe thread panicked");
            }
        }

        let stats = ProxyStats {
            sent: sent.load(Ordering::Relaxed),
            received: received.load(Ordering::Relaxed),
        };
        info!(
            "[#{id:03}] Closed ({} bytes sent, {} bytes received)",
            stats.sent, stats.received
        );
        Ok(stats)
    }
}

fn spawn_pipes(id: u64, upstream: Pipe, downstream: Pipe) -> io::Result<[JoinHandle<()>; 2]> {
    let up = thread::Builder::new()
        .name(format!("pipe-{id}-up"))
        .spawn(move || upstream.run())?;
    let down = thread::Builder::new()
        .name(format!("pipe-{id}-down"))
        .spawn(move || downstream.run())?;
    Ok([up, down])
}
