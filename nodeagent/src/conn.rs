//! Outbound half of a run's WebSocket connection.
//!
//! The sink is shared by the runner (start message), the stdin writer and
//! the demultiplexer (close). A compare-and-swap latch lets exactly one
//! close through.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::SinkExt;
use futures_util::stream::{SplitSink, SplitStream};
use nodeagent_proto::Request;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

/// Write half of a split WebSocket stream.
pub(crate) type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
/// Read half of a split WebSocket stream.
pub(crate) type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// Close frames carry at most 125 payload bytes, two of which are the code.
const MAX_CLOSE_REASON: usize = 123;

/// Shared, close-once handle on the write half of the connection.
pub(crate) struct Outbound<S> {
    /// The write half. Locked per message.
    sink: Mutex<WsSink<S>>,
    /// Set by the first close attempt.
    closed: AtomicBool,
    /// Bound on sending the close frame.
    close_timeout: Duration,
}

impl<S> Outbound<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps the write half of a connection.
    pub(crate) fn new(sink: WsSink<S>, close_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            close_timeout,
        }
    }

    /// Encodes and sends one request message.
    pub(crate) async fn send(&self, req: &Request) -> Result<(), tungstenite::Error> {
        let text = nodeagent_proto::encode(req)
            .map_err(|e| tungstenite::Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.sink.lock().await.send(Message::Text(text.into())).await
    }

    /// Sends a close frame unless the connection was already closed.
    ///
    /// Returns `true` if this call performed the close. Send failures are
    /// logged; the latch stays set either way.
    pub(crate) async fn close(&self, code: CloseCode, reason: &str) -> bool {
        if !self.latch() {
            return false;
        }
        let frame = CloseFrame {
            code,
            reason: truncate_reason(reason).to_owned().into(),
        };
        let send = async { self.sink.lock().await.send(Message::Close(Some(frame))).await };
        match tokio::time::timeout(self.close_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "error closing conn"),
            Err(_) => debug!(timeout = ?self.close_timeout, "timed out closing conn"),
        }
        true
    }

    /// Marks the connection closed without sending a close frame.
    ///
    /// Used when the peer already tore the connection down. Returns `true`
    /// if the latch was still open.
    pub(crate) fn abandon(&self) -> bool {
        self.latch()
    }

    /// Whether a close has been initiated.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flips the close latch; `true` for the first caller only.
    fn latch(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cuts `reason` to fit a close frame without splitting a character.
fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}
