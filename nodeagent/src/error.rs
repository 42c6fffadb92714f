//! Error types for nodeagent operations.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Alias for `Result<T, nodeagent::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code reported for runs that never produced a real one.
pub const FAILED_EXIT_CODE: i32 = -1;

/// Errors returned by nodeagent operations.
///
/// Cloneable so that every [`RunWaiter`](crate::RunWaiter) observing the same
/// run receives the same failure.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The WebSocket handshake with the node failed.
    #[error("establishing WebSocket conn to {url}: {source}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying handshake error.
        #[source]
        source: Arc<tungstenite::Error>,
    },

    /// The WebSocket handshake did not finish in time.
    #[error("establishing WebSocket conn to {url}: timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target URL.
        url: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// Sending the start message or a stdin chunk failed.
    #[error("writing {what}: {source}")]
    Write {
        /// Which message was being written.
        what: &'static str,
        /// Underlying transport error.
        #[source]
        source: Arc<tungstenite::Error>,
    },

    /// The node closed the connection; only the client may close it.
    #[error("conn unexpectedly closed (code {code:?}): {reason}")]
    PeerClosed {
        /// Close status code, if the node sent a close frame.
        code: Option<u16>,
        /// Close reason sent by the node.
        reason: String,
    },

    /// The node sent a message that could not be decoded.
    #[error("malformed message from node: {0}")]
    Protocol(#[source] Arc<nodeagent_proto::Error>),

    /// Reading from the connection failed.
    #[error("reading message: {0}")]
    Transport(#[source] Arc<tungstenite::Error>),

    /// The caller's wait deadline elapsed. The run continues in the background.
    #[error("wait timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired. The run continues in the background.
    #[error("wait cancelled")]
    Cancelled,

    /// The runner shut down before producing a result.
    #[error("runner shut down before producing a result")]
    Shutdown,

    /// Invalid client configuration.
    #[error("invalid config: {0}")]
    Config(String),

    /// An I/O error while loading configuration.
    #[error(transparent)]
    Io(Arc<io::Error>),
}

impl Error {
    /// Exit code reported for the run this error ended.
    ///
    /// [`FAILED_EXIT_CODE`] for every failure, `None` when only the wait was
    /// abandoned ([`Error::Timeout`], [`Error::Cancelled`]) and the run may
    /// still produce a real code.
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Timeout(_) | Self::Cancelled => None,
            _ => Some(FAILED_EXIT_CODE),
        }
    }

    /// Wraps a transport error raised while writing `what`.
    pub(crate) fn write(what: &'static str, source: tungstenite::Error) -> Self {
        Self::Write {
            what,
            source: Arc::new(source),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<nodeagent_proto::Error> for Error {
    fn from(e: nodeagent_proto::Error) -> Self {
        Self::Protocol(Arc::new(e))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::Transport(Arc::new(e))
    }
}
