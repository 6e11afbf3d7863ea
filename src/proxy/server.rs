use std::{
    io,
    net::{SocketAddr, TcpListener},
    sync::Arc,
    thread,
};

use log::{info, warn};

use super::{Proxy, ProxyError};
use crate::{config::ProxyConfig, storage::BackingStore};

/// Accepts driver connections and gives each its own [`Proxy`] thread.
pub struct ProxyServer {
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    store: Arc<dyn BackingStore>,
}

impl ProxyServer {
    pub fn bind(config: ProxyConfig, store: Arc<dyn BackingStore>) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(config.listen)?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            store,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever. There is no limit on how many run at once.
    pub fn serve(self) -> Result<(), ProxyError> {
        info!(
            "listening at {}, proxying to {}",
            self.local_addr()?,
            self.config.remote_label()
        );

        for (id, stream) in (1u64..).zip(self.listener.incoming()) {
            match stream {
                Ok(stream) => {
                    let proxy = Proxy::new(
                        id,
                        stream,
                        Arc::clone(&self.config),
                        Arc::clone(&self.store),
                    );
                    let spawned = thread::Builder::new()
                        .name(format!("proxy-{id}"))
                        .spawn(move || {
                            if let Err(e) = proxy.run() {
                                warn!("[#{id:03}] connection failed: {e}");
                            }
                        });
                    if let Err(e) = spawned {
                        warn!("[#{id:03}] failed to start connection thread: {e}");
                    }
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }
}
