use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--tls-unwrap requires --tls-remote-address")]
    MissingTlsAddress,

    #[error("--tls-unwrap requires --tls-ca")]
    MissingTlsCa,

    #[error("invalid tls remote address '{0}', expected HOST:PORT")]
    InvalidTlsAddress(String),
}

/// What to do when a find statement cannot be answered from the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Answer the client with a query-failure reply.
    #[default]
    Reply,
    /// Hand the original frame to the real backend.
    Forward,
}

/// Settings for dialing the remote over TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    /// `HOST:PORT` of the TLS endpoint.
    pub address: String,
    /// PEM bundle of trusted certificate authorities.
    pub ca_file: PathBuf,
}

impl TlsSettings {
    pub fn new<P: AsRef<Path>>(address: &str, ca_file: P) -> Result<Self, ConfigError> {
        let settings = Self {
            address: address.to_string(),
            ca_file: ca_file.as_ref().to_path_buf(),
        };
        settings.server_name()?;
        Ok(settings)
    }

    /// Host portion of the address, used for certificate verification.
    pub fn server_name(&self) -> Result<&str, ConfigError> {
        let invalid = || ConfigError::InvalidTlsAddress(self.address.clone());
        let (host, port) = self.address.rsplit_once(':').ok_or_else(invalid)?;
        port.parse::<u16>().map_err(|_| invalid())?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(host)
    }
}

/// Per-instance proxy settings, shared read-only by every connection.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub remote: SocketAddr,
    /// When set the remote is dialed over TLS and plaintext is presented locally.
    pub tls: Option<TlsSettings>,
    pub nagle_disabled: bool,
    pub output_hex: bool,
    pub failure_policy: FailurePolicy,
}

impl ProxyConfig {
    pub fn new(listen: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            listen,
            remote,
            tls: None,
            nagle_disabled: false,
            output_hex: false,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Human readable name of the remote end for log lines.
    pub fn remote_label(&self) -> String {
        match &self.tls {
            Some(tls) => format!("{} (tls)", tls.address),
            None => self.remote.to_string(),
        }
    }
}
