//! Stdin forwarding: bytes in, `stdin` chunk messages out.

use std::io;
use std::pin::pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Sink;
use nodeagent_proto::Request;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite;
use tokio_util::io::{CopyToBytes, SinkWriter};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Error;
use crate::conn::Outbound;
use crate::request::Input;

/// Forwards stdin to the node as [`Request::Stdin`] messages.
///
/// [`StreamWriter::chunks`] is the byte sink; [`StreamWriter::finish`] sends
/// the single [`Request::StdinDone`].
pub(crate) struct StreamWriter<S> {
    /// Connection the chunks are sent on.
    out: Arc<Outbound<S>>,
    /// Maximum bytes per message.
    chunk_size: usize,
}

impl<S> StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a writer sending chunks of at most `chunk_size` bytes.
    pub(crate) fn new(out: Arc<Outbound<S>>, chunk_size: usize) -> Self {
        debug_assert!(chunk_size > 0);
        Self { out, chunk_size }
    }

    /// An [`AsyncWrite`] turning every write into ordered chunk messages.
    ///
    /// Transport failures surface as [`io::Error`]s wrapping the
    /// [`tungstenite::Error`]; see [`send_failure`].
    pub(crate) fn chunks(
        &self,
    ) -> SinkWriter<CopyToBytes<impl Sink<Bytes, Error = io::Error> + use<S>>> {
        let chunk_size = self.chunk_size;
        let sink = futures_util::sink::unfold(
            Arc::clone(&self.out),
            move |out, data: Bytes| async move {
                for chunk in data.chunks(chunk_size) {
                    out.send(&Request::Stdin(chunk.to_vec()))
                        .await
                        .map_err(io::Error::other)?;
                }
                Ok::<_, io::Error>(out)
            },
        );
        SinkWriter::new(CopyToBytes::new(sink))
    }

    /// Tells the node stdin is closed. Consumes the writer, so it happens once.
    pub(crate) async fn finish(self) -> Result<(), tungstenite::Error> {
        self.out.send(&Request::StdinDone).await
    }
}

/// Copies `input` to the node, then sends `stdinDone`.
///
/// Every read and send races `cancel`; once cancelled the task returns
/// without sending anything further. An absent input finishes immediately.
/// A failed send aborts the run: the error goes to `failed` and nothing
/// else is written. A failed read only ends the copy.
pub(crate) async fn copy_stdin<S>(
    writer: StreamWriter<S>,
    input: Option<Input>,
    cancel: CancellationToken,
    failed: oneshot::Sender<Error>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(mut input) = input {
        let mut chunks = pin!(writer.chunks());
        let copied = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("stdin writer cancelled");
                return;
            }
            copied = tokio::io::copy(&mut input, &mut chunks) => copied,
        };
        match copied.map_err(send_failure) {
            Ok(bytes) => debug!(bytes, "done copying stdin"),
            Err(Ok(e)) => {
                report(failed, Error::write("stdin chunk", e));
                return;
            }
            Err(Err(e)) => debug!(error = %e, "stdin read failed"),
        }
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => debug!("stdin writer cancelled before done"),
        sent = writer.finish() => {
            if let Err(e) = sent {
                report(failed, Error::write("stdin done", e));
            }
        }
    }
}

/// Splits a copy error into a transport failure (`Ok`) or a read failure.
fn send_failure(e: io::Error) -> Result<tungstenite::Error, io::Error> {
    if !e.get_ref().is_some_and(|inner| inner.is::<tungstenite::Error>()) {
        return Err(e);
    }
    match e.into_inner().map(|inner| inner.downcast::<tungstenite::Error>()) {
        Some(Ok(inner)) => Ok(*inner),
        Some(Err(inner)) => Err(io::Error::other(inner)),
        None => Err(io::Error::other("stdin sink failed")),
    }
}

/// Hands a send failure to the demultiplexer.
fn report(failed: oneshot::Sender<Error>, err: Error) {
    debug!(error = %err, "stdin writer failed");
    if failed.send(err).is_err() {
        debug!("run already finished, dropping stdin failure");
    }
}
