//! Stdout/stderr relays: drain a stream's chunk channel into its sink.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::request::Output;

/// Writes chunks from `chunks` to `output` in order until the channel closes.
///
/// Stops early on a sink write error or on cancellation, leaving queued
/// chunks unread. The sink is released on every exit path.
pub(crate) async fn relay(
    stream: &'static str,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    mut output: Output,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = chunks.recv() => next,
        };
        let Some(chunk) = next else { break };

        let written = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            written = output.write_chunk(&chunk) => written,
        };
        if let Err(e) = written {
            debug!(stream, error = %e, "relay got write error");
            break;
        }
    }

    if let Err(e) = output.release().await {
        debug!(stream, error = %e, "relay failed to release sink");
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use tokio::io::{AsyncReadExt, AsyncWrite};

    use super::*;

    /// Sink accepting `limit` bytes in total, then failing.
    #[derive(Clone, Default)]
    struct LimitedSink {
        written: Arc<Mutex<Vec<u8>>>,
        limit: usize,
        shut_down: Arc<AtomicBool>,
    }

    impl AsyncWrite for LimitedSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let mut written = self.written.lock().unwrap();
            if written.len() + buf.len() > self.limit {
                return Poll::Ready(Err(io::Error::other("sink full")));
            }
            written.extend_from_slice(buf);
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

    #[tokio::test]
    async fn writes_chunks_in_order_and_closes() {
        let (tx, rx) = mpsc::channel(1);
        let (sink, mut read) = tokio::io::duplex(1024);
        let output = Output::closing(sink);
        let task = tokio::spawn(relay("stdout", rx, output, CancellationToken::new()));

        for chunk in [&b"one "[..], b"two ", b"three"] {
            tx.send(chunk.to_vec()).await.unwrap();
        }
        drop(tx);

        let mut got = Vec::new();
        // Reaches EOF only because the relay shut the sink down.
        read.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"one two three");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stops_on_write_error_and_still_closes() {
        let sink = LimitedSink {
            limit: 6,
            ..LimitedSink::default()
        };
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(relay(
            "stderr",
            rx,
            Output::closing(sink.clone()),
            CancellationToken::new(),
        ));

        tx.send(b"abc".to_vec()).await.unwrap();
        tx.send(b"def".to_vec()).await.unwrap();
        tx.send(b"ghi".to_vec()).await.unwrap();
        task.await.unwrap();

        // The relay is gone; further sends fail instead of blocking.
        assert!(tx.send(b"jkl".to_vec()).await.is_err());
        assert_eq!(&*sink.written.lock().unwrap(), b"abcdef");
        assert!(sink.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn plain_output_is_not_shut_down() {
        let sink = LimitedSink {
            limit: usize::MAX,
            ..LimitedSink::default()
        };
        let (tx, rx) = mpsc::channel(1);
        let output = Output::new(sink.clone());
        let task = tokio::spawn(relay("stdout", rx, output, CancellationToken::new()));
        tx.send(b"x".to_vec()).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(!sink.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_releases_idle_relay() {
        let sink = LimitedSink {
            limit: usize::MAX,
            ..LimitedSink::default()
        };
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(relay("stdout", rx, Output::closing(sink.clone()), cancel.clone()));

        cancel.cancel();
        task.await.unwrap();
        assert!(sink.shut_down.load(Ordering::SeqCst));
    }
}
