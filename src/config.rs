//! Configuration for the file watcher and the log server.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Port the log server listens to unless told otherwise.
pub const DEFAULT_PORT: u16 = 4747;

/// Extension of log files picked up when watching a directory.
pub const DEFAULT_EXTENSION: &str = "mpack";

/// Options controlling how a [`FileWatcher`](crate::FileWatcher) tails a file.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between two growth checks when the file did not grow.
    pub poll_interval: Duration,

    /// Number of bytes requested per read while catching up with the file.
    pub read_chunk_size: usize,

    /// Extension (without the dot) of candidate files in a directory.
    pub extension: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            read_chunk_size: 4096,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be positive".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(Error::Config("read chunk size must be positive".into()));
        }
        Ok(())
    }
}

/// Options for a [`LogServer`](crate::LogServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// A log file, or a directory whose most recent log file is served.
    pub log_path: PathBuf,

    pub host: String,

    /// Port to listen to. Zero lets the OS pick one.
    pub port: u16,

    pub watcher: WatcherConfig,
}

impl ServerConfig {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            watcher: WatcherConfig::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.watcher.poll_interval = poll_interval;
        self
    }

    /// Resolves `host:port` into the address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("invalid address {}:{}: {}", self.host, self.port, e)))?
            .next()
            .ok_or_else(|| Error::Config(format!("no address for {}:{}", self.host, self.port)))
    }

    pub fn validate(&self) -> Result<()> {
        self.watcher.validate()?;
        self.socket_addr().map(|_| ())
    }
}
