//! Inbound message reader: the run's protocol state machine.
//!
//! Routes stdout/stderr chunks to their relays, tracks the done signals,
//! and on exit or failure settles the completion, closes the connection
//! and tears down every worker.

use std::sync::Arc;

use futures_util::StreamExt;
use nodeagent_proto::Response;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Error;
use crate::completion::{Completion, CompletionSlot};
use crate::conn::{Outbound, WsSource};

/// Producer side of one output stream.
///
/// Holding `None` means the stream is closed; closing drops the sender,
/// which ends the matching relay once it has drained.
#[derive(Debug)]
pub(crate) struct StreamSlot {
    /// Stream name for logs.
    name: &'static str,
    /// Sender to the relay while the stream is open.
    tx: Option<mpsc::Sender<Vec<u8>>>,
}

impl StreamSlot {
    /// An open stream feeding `tx`.
    pub(crate) const fn new(name: &'static str, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { name, tx: Some(tx) }
    }

    /// Hands `chunk` to the relay; dropped if the stream is closed or the
    /// relay already stopped.
    async fn forward(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        let Some(tx) = &self.tx else {
            debug!(stream = self.name, "dropping chunk received after done");
            return;
        };
        if tx.send(chunk).await.is_err() {
            debug!(stream = self.name, "relay stopped, dropping chunk");
        }
    }

    /// Closes the stream. Returns `true` only the first time.
    fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }
}

/// Background tasks owned by a run.
#[derive(Debug)]
pub(crate) struct Workers {
    /// Stdin writer.
    pub(crate) stdin: Option<JoinHandle<()>>,
    /// Stdout relay.
    pub(crate) stdout: Option<JoinHandle<()>>,
    /// Stderr relay.
    pub(crate) stderr: Option<JoinHandle<()>>,
}

impl Workers {
    /// Waits for both relays to exit.
    async fn join_relays(&mut self) {
        join(self.stdout.take()).await;
        join(self.stderr.take()).await;
    }

    /// Waits for every remaining worker to exit.
    async fn join_all(&mut self) {
        join(self.stdin.take()).await;
        self.join_relays().await;
    }
}

/// Awaits a worker, logging panics.
pub(crate) async fn join(handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else { return };
    if let Err(e) = handle.await {
        warn!(error = %e, "run worker panicked");
    }
}

/// Resolves to the stdin writer's send failure, if it reports one.
///
/// Clears `rx` once the writer is done so it is never polled again.
async fn stdin_failure(rx: &mut Option<oneshot::Receiver<Error>>) -> Option<Error> {
    let Some(pending) = rx.as_mut() else {
        return std::future::pending().await;
    };
    let failure = pending.await.ok();
    *rx = None;
    failure
}

/// Why the read loop ended.
#[derive(Debug)]
enum Termination {
    /// The node reported the exit code.
    Exited(i32),
    /// The node closed the connection.
    PeerClosed(Error),
    /// Reading, decoding or sending stdin failed.
    Failed(Error),
}

/// Reads the node's responses for one run.
pub(crate) struct Demux<S> {
    /// Inbound half of the connection.
    pub(crate) source: WsSource<S>,
    /// Outbound half, used here only to close.
    pub(crate) out: Arc<Outbound<S>>,
    /// Stdout producer.
    pub(crate) stdout: StreamSlot,
    /// Stderr producer.
    pub(crate) stderr: StreamSlot,
    /// Where the outcome is published.
    pub(crate) completion: CompletionSlot,
    /// The runner's cancellation; fired on every termination.
    pub(crate) cancel: CancellationToken,
    /// Releases the stdin writer ahead of the relays.
    pub(crate) stdin_cancel: CancellationToken,
    /// Send failure reported by the stdin writer; `None` once it finished.
    pub(crate) stdin_failure: Option<oneshot::Receiver<Error>>,
    /// Tasks joined before the demultiplexer exits.
    pub(crate) workers: Workers,
}

impl<S> Demux<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the read loop to termination, then shuts the run down.
    pub(crate) async fn run(mut self) {
        let termination = self.read_loop().await;
        self.finish(termination).await;
    }

    /// Reads messages until exit, peer close or error.
    async fn read_loop(&mut self) -> Termination {
        loop {
            let next = tokio::select! {
                biased;
                failed = stdin_failure(&mut self.stdin_failure) => match failed {
                    Some(err) => return Termination::Failed(err),
                    None => continue,
                },
                next = self.source.next() => next,
            };
            let Some(frame) = next else {
                return Termination::PeerClosed(Error::PeerClosed {
                    code: None,
                    reason: "connection ended without a close frame".into(),
                });
            };
            let decoded = match frame {
                Ok(Message::Text(text)) => nodeagent_proto::decode::<Response>(text.as_str()),
                Ok(Message::Binary(data)) => nodeagent_proto::decode_slice::<Response>(&data),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                    });
                    return Termination::PeerClosed(Error::PeerClosed { code, reason });
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => {
                    debug!(error = %e, "message reader got error");
                    return Termination::Failed(e.into());
                }
            };
            match decoded {
                Ok(msg) => {
                    if let Some(code) = self.dispatch(msg).await {
                        return Termination::Exited(code);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "undecodable message");
                    return Termination::Failed(e.into());
                }
            }
        }
    }

    /// Applies one message in the order stderr, stderr done, stdout,
    /// stdout done, exit. Returns the exit code if the process exited.
    async fn dispatch(&mut self, msg: Response) -> Option<i32> {
        if let Some(chunk) = msg.stderr {
            self.stderr.forward(chunk).await;
        }
        if msg.stderr_done && self.stderr.close() {
            debug!("stderr done");
        }
        if let Some(chunk) = msg.stdout {
            self.stdout.forward(chunk).await;
        }
        if msg.stdout_done && self.stdout.close() {
            debug!("stdout done");
        }
        msg.exited.then_some(msg.exit_code)
    }

    /// Publishes the outcome, closes the connection and joins the workers.
    async fn finish(mut self, termination: Termination) {
        match termination {
            Termination::Exited(code) => {
                debug!(code, "process exited");
                self.stdin_cancel.cancel();
                self.out.close(CloseCode::Normal, "").await;
                // The node flushes both streams before reporting exit, so
                // these are no-ops unless it drifted from the protocol.
                if self.stderr.close() {
                    debug!("force-closed stderr on exit");
                }
                if self.stdout.close() {
                    debug!("force-closed stdout on exit");
                }
                self.workers.join_relays().await;
                self.completion.settle(Completion::exited(code));
            }
            Termination::PeerClosed(err) => {
                warn!(error = %err, "node closed the connection");
                self.completion.settle(Completion::failed(err));
                self.stderr.close();
                self.stdout.close();
                self.out.abandon();
            }
            Termination::Failed(err) => {
                warn!(error = %err, "run failed");
                let reason = err.to_string();
                self.completion.settle(Completion::failed(err));
                self.stderr.close();
                self.stdout.close();
                self.cancel.cancel();
                self.out.close(CloseCode::Error, &reason).await;
            }
        }
        self.shutdown().await;
    }

    /// Cancels every worker and waits for all of them to exit.
    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.workers.join_all().await;
        debug_assert!(self.out.is_closed());
    }
}
