//! Client configuration and JSON persistence.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default WebSocket handshake timeout.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
/// Default maximum stdin chunk carried in one message.
const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;
/// Default bound on sending the close frame.
const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// Configuration for a [`Client`](crate::Client).
///
/// Only `url` is required when loading from JSON; every other field falls
/// back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ClientConfig {
    /// WebSocket URL of the node's command endpoint (e.g. `ws://10.0.0.5:8080/command`).
    pub url: String,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum number of stdin bytes per message.
    pub chunk_size: usize,
    /// Bound on sending the close frame, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration targeting `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&data).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Sets the maximum stdin chunk size.
    #[must_use]
    pub const fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Sets the close-frame timeout.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = duration_ms(timeout);
        self
    }

    /// Checks that the configuration can be used to run commands.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config("url must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than zero".into()));
        }
        Ok(())
    }

    /// Per-run settings derived from this configuration.
    pub const fn run_options(&self) -> RunOptions {
        RunOptions {
            chunk_size: self.chunk_size,
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }

    /// Handshake timeout as a [`Duration`].
    pub const fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Settings for a single run over an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunOptions {
    /// Maximum number of stdin bytes per message. Must be non-zero.
    pub chunk_size: usize,
    /// Bound on sending the close frame.
    pub close_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        ClientConfig::default().run_options()
    }
}

impl RunOptions {
    /// Sets the maximum stdin chunk size.
    #[must_use]
    pub const fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }
}

/// Converts a duration to whole milliseconds, saturating.
fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
