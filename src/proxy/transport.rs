use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use log::debug;
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName, StreamOwned};

use super::ProxyError;
use crate::config::{ProxyConfig, TlsSettings};

/// How long a TLS reader holds the stream before giving writers a turn.
const TLS_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A duplex byte stream one leg of a proxied connection runs over.
pub trait Conduit: Read + Write + Send + Sync {
    /// Another handle onto the same underlying stream.
    fn duplicate(&self) -> io::Result<Box<dyn Conduit>>;

    /// Shuts the stream down in both directions, waking any blocked reader.
    fn close(&self) -> io::Result<()>;

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl Conduit for TcpStream {
    fn duplicate(&self) -> io::Result<Box<dyn Conduit>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        TcpStream::set_nodelay(self, nodelay)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Client side of a TLS session, shareable between a reading and a writing thread.
///
/// The socket carries a short read timeout so the reader releases the session lock
/// regularly instead of holding it across a blocking read.
pub struct TlsConduit {
    stream: Arc<Mutex<TlsStream>>,
    socket: TcpStream,
}

impl TlsConduit {
    pub fn connect(settings: &TlsSettings) -> Result<Self, ProxyError> {
        let name = settings.server_name()?;
        let server_name =
            ServerName::try_from(name).map_err(|_| ProxyError::ServerName(name.to_string()))?;
        let config = client_config(&settings.ca_file)?;
        let mut connection = ClientConnection::new(Arc::new(config), server_name)?;

        let mut socket = TcpStream::connect(&settings.address).map_err(ProxyError::Connect)?;
        while connection.is_handshaking() {
            connection
                .complete_io(&mut socket)
                .map_err(ProxyError::Connect)?;
        }
        debug!("tls session established with {}", settings.address);

        socket.set_read_timeout(Some(TLS_POLL_INTERVAL))?;
        let control = socket.try_clone()?;
        Ok(Self {
            stream: Arc::new(Mutex::new(StreamOwned::new(connection, socket))),
            socket: control,
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, TlsStream>> {
        self.stream
            .lock()
            .map_err(|_| io::Error::other("tls stream lock poisoned"))
    }
}

fn client_config(ca_file: &Path) -> Result<ClientConfig, ProxyError> {
    let mut reader = BufReader::new(File::open(ca_file)?);
    let certs = rustls_pemfile::certs(&mut reader)?;

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(&certs);
    if added == 0 {
        return Err(ProxyError::Certificates(ca_file.display().to_string()));
    }

    Ok(ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

impl Read for TlsConduit {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut stream = self.lock()?;
            match stream.read(buf) {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                other => return other,
            }
            drop(stream);
            thread::yield_now();
        }
    }
}

impl Write for TlsConduit {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

impl Conduit for TlsConduit {
    fn duplicate(&self) -> io::Result<Box<dyn Conduit>> {
        Ok(Box::new(Self {
            stream: Arc::clone(&self.stream),
            socket: self.socket.try_clone()?,
        }))
    }

    fn close(&self) -> io::Result<()> {
        self.socket.shutdown(Shutdown::Both)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.socket.set_nodelay(nodelay)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

/// Opens the remote leg: TLS when configured, plain TCP otherwise.
pub fn dial(config: &ProxyConfig) -> Result<Box<dyn Conduit>, ProxyError> {
    match &config.tls {
        Some(tls) => Ok(Box::new(TlsConduit::connect(tls)?)),
        None => {
            let stream = TcpStream::connect(config.remote).map_err(ProxyError::Connect)?;
            Ok(Box::new(stream))
        }
    }
}

/// Write side of one leg, shared by both pipes of a connection.
///
/// Whole frames are written under a lock so a synthesized reply and a forwarded frame
/// headed for the same socket never interleave. Closing goes through a separate handle
/// and never waits on that lock.
#[derive(Clone)]
pub struct Endpoint {
    writer: Arc<Mutex<Box<dyn Conduit>>>,
    control: Arc<dyn Conduit>,
}

impl Endpoint {
    /// Splits `conduit` into its reading half and a shareable endpoint.
    pub fn split(conduit: Box<dyn Conduit>) -> io::Result<(Box<dyn Conduit>, Endpoint)> {
        let writer = conduit.duplicate()?;
        let control = conduit.duplicate()?;
        let endpoint = Endpoint {
            writer: Arc::new(Mutex::new(writer)),
            control: Arc::from(control),
        };
        Ok((conduit, endpoint))
    }

    /// Writes every byte of `bytes` and flushes.
    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("endpoint lock poisoned"))?;
        writer.write_all(bytes)?;
        writer.flush()
    }

    /// Shuts the leg down. Closing an already closed leg is not an error.
    pub fn close(&self) {
        if let Err(e) = self.control.close() {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!("failed to shut down leg: {e}");
            }
        }
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.control.set_nodelay(nodelay)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.control.peer_addr()
    }
}
