//! Server configuration.

use clap::Parser;
use jsonsync_core::coordinator::DEFAULT_SHUTDOWN_GRACE_MS;
use jsonsync_core::hub::DEFAULT_QUEUE_CAPACITY;
use jsonsync_core::watcher::DEFAULT_DEBOUNCE_MS;
use jsonsync_core::SyncConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Default host to bind to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port to listen on.
pub const DEFAULT_PORT: u16 = 8000;

/// Default directory holding the JSON documents.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Command-line arguments for the server.
#[derive(Debug, Parser)]
#[command(name = "jsonsync-server")]
#[command(version, about = "Local JSON document sync server", long_about = None)]
pub struct Args {
    /// Address to bind to.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory containing the JSON files to watch and sync.
    #[arg(short, long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Window (ms) for coalescing bursts of filesystem events.
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE_MS)]
    pub debounce_ms: u64,

    /// Messages queued per push connection before it is dropped.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub subscriber_queue: usize,

    /// Time (ms) allowed for the watcher to stop on shutdown.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            data_dir: self.data_dir,
            debounce: Duration::from_millis(self.debounce_ms),
            subscriber_queue: self.subscriber_queue.max(1),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Directory holding the JSON documents.
    pub data_dir: PathBuf,
    /// Window for coalescing bursts of filesystem events.
    pub debounce: Duration,
    /// Outbound queue capacity per push connection.
    pub subscriber_queue: usize,
    /// Time allowed for the watcher to stop on shutdown.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Create a configuration serving documents from `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: data_dir.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            subscriber_queue: DEFAULT_QUEUE_CAPACITY,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the outbound queue capacity per push connection.
    pub fn with_subscriber_queue(mut self, capacity: usize) -> Self {
        self.subscriber_queue = capacity.max(1);
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Configuration for the sync core.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(&self.data_dir)
            .with_debounce(self.debounce)
            .with_subscriber_queue(self.subscriber_queue)
            .with_shutdown_grace(self.shutdown_grace)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}
