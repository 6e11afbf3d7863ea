//! Command-line surface for the proxy.
//!
//! [`Cli`] is what users type; [`ProxyConfig`] is what the proxy runs on. The conversion
//! between them is where option combinations are checked, so a bad invocation fails
//! before anything binds or dials.
use std::{net::SocketAddr, path::PathBuf};

use clap::{ArgAction, Parser};
use log::LevelFilter;

use crate::config::{ConfigError, FailurePolicy, ProxyConfig, TlsSettings};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Local address drivers connect to
    #[arg(short, long, default_value = "127.0.0.1:27018")]
    pub listen: SocketAddr,

    /// Address of the real document store
    #[arg(short, long, default_value = "127.0.0.1:27017")]
    pub remote: SocketAddr,

    /// Dial the remote over TLS and present plaintext locally
    #[arg(long)]
    pub tls_unwrap: bool,

    /// HOST:PORT of the TLS remote
    #[arg(long, value_name = "HOST:PORT")]
    pub tls_remote_address: Option<String>,

    /// PEM file with the certificate authorities trusted for the TLS remote
    #[arg(long, value_name = "PEM")]
    pub tls_ca: Option<PathBuf>,

    /// Disable Nagle's algorithm on both legs
    #[arg(short, long)]
    pub nagle_disabled: bool,

    /// Render traced frames as hex
    #[arg(short = 'x', long)]
    pub output_hex: bool,

    /// JSON fixture with the tables served to find statements
    #[arg(short, long, value_name = "JSON")]
    pub tables: Option<PathBuf>,

    /// Forward finds that cannot be translated instead of failing them
    #[arg(long)]
    pub forward_on_failure: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

impl TryFrom<&Cli> for ProxyConfig {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let tls = if cli.tls_unwrap {
            let address = cli
                .tls_remote_address
                .as_deref()
                .ok_or(ConfigError::MissingTlsAddress)?;
            let ca = cli.tls_ca.as_ref().ok_or(ConfigError::MissingTlsCa)?;
            Some(TlsSettings::new(address, ca)?)
        } else {
            None
        };

        let mut config = ProxyConfig::new(cli.listen, cli.remote);
        config.tls = tls;
        config.nagle_disabled = cli.nagle_disabled;
        config.output_hex = cli.output_hex;
        config.failure_policy = if cli.forward_on_failure {
            FailurePolicy::Forward
        } else {
            FailurePolicy::Reply
        };
        Ok(config)
    }
}

/// Installs the global logger. `RUST_LOG`, when set, wins over `level`.
pub fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
