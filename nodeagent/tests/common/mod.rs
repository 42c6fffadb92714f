//! Test utilities: a scripted node agent peer and capturing sinks.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nodeagent_proto::{CommandStart, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};

/// Generous bound so a hang fails the test instead of stalling the suite.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Client and node ends of an in-memory WebSocket connection.
pub async fn connected() -> (WebSocketStream<DuplexStream>, Peer<DuplexStream>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (client, Peer { ws: server })
}

/// Like [`connected`], but the client's writes fail once the returned flag
/// is set.
pub async fn breakable() -> (WebSocketStream<Breakable>, Peer<DuplexStream>, Arc<AtomicBool>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let broken = Arc::new(AtomicBool::new(false));
    let client = Breakable {
        inner: client,
        broken: Arc::clone(&broken),
    };
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (client, Peer { ws: server }, broken)
}

/// Client transport that starts failing writes on demand. Reads still work.
#[derive(Debug)]
pub struct Breakable {
    inner: DuplexStream,
    broken: Arc<AtomicBool>,
}

impl Breakable {
    fn check(&self) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport broken"));
        }
        Ok(())
    }
}

impl AsyncRead for Breakable {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Breakable {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// The node side of a run, driven step by step by a test.
pub struct Peer<S> {
    /// Server end of the connection.
    pub ws: WebSocketStream<S>,
}

impl<S> Peer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an accepted server-side stream.
    pub const fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }

    /// Next request from the client; `None` on close or end of stream.
    pub async fn recv(&mut self) -> Option<Request> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(nodeagent_proto::decode(text.as_str()).unwrap());
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Receives the start message, which must come first.
    pub async fn expect_start(&mut self) -> CommandStart {
        match self.recv().await {
            Some(Request::Start(start)) => start,
            other => panic!("expected start message, got {other:?}"),
        }
    }

    /// Collects stdin until `stdinDone`. Panics on anything else.
    pub async fn read_stdin(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            match self.recv().await {
                Some(Request::Stdin(chunk)) => data.extend(chunk),
                Some(Request::StdinDone) => return data,
                other => panic!("expected stdin, got {other:?}"),
            }
        }
    }

    /// Sends one response message.
    pub async fn send(&mut self, resp: Response) {
        let text = nodeagent_proto::encode(&resp).unwrap();
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    /// Sends a raw text message.
    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_owned().into())).await.unwrap();
    }

    /// Closes the connection from the node side.
    pub async fn close(&mut self, code: CloseCode, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        self.ws.send(Message::Close(Some(frame))).await.unwrap();
    }

    /// Skips remaining requests until the client's close frame arrives.
    pub async fn expect_close(&mut self) -> CloseFrame {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return frame,
                Some(Ok(_)) => {}
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    }
}

/// Sink capturing everything written to it, optionally failing past a limit.
#[derive(Clone, Debug)]
pub struct Capture {
    /// Bytes accepted so far.
    pub data: Arc<Mutex<Vec<u8>>>,
    /// Writes that would exceed this many bytes fail.
    pub limit: usize,
    /// Set when the sink is shut down.
    pub shut_down: Arc<AtomicBool>,
}

impl Capture {
    /// A sink accepting everything.
    pub fn new() -> Self {
        Self::failing_after(usize::MAX)
    }

    /// A sink whose writes fail once `limit` bytes would be exceeded.
    pub fn failing_after(limit: usize) -> Self {
        Self {
            data: Arc::default(),
            limit,
            shut_down: Arc::default(),
        }
    }

    /// Bytes captured so far.
    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }

    /// Whether the sink was shut down.
    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for Capture {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut data = self.data.lock().unwrap();
        if data.len().saturating_add(buf.len()) > self.limit {
            return Poll::Ready(Err(io::Error::other("capture limit reached")));
        }
        data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shut_down.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
