pub mod cli;
pub mod config;
pub mod proxy;
pub mod storage;
pub mod translate;
pub mod wire;

pub use cli::Cli;
pub use config::{FailurePolicy, ProxyConfig, TlsSettings};
pub use proxy::{Proxy, ProxyError, ProxyServer, ProxyStats};
pub use storage::{BackingStore, MemoryStore, RowSet};
