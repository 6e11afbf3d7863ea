use std::{error::Error, process, sync::Arc};

use clap::Parser;
use log::info;
use mgproxy::{
    BackingStore, Cli, MemoryStore, ProxyConfig, ProxyServer, cli::init_logging,
};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    let config = ProxyConfig::try_from(&cli)?;
    let store: Arc<dyn BackingStore> = match &cli.tables {
        Some(path) => Arc::new(MemoryStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    ctrlc::set_handler(|| {
        info!("interrupted, shutting down");
        process::exit(0);
    })?;

    let server = ProxyServer::bind(config, store)?;
    server.serve()?;
    Ok(())
}
