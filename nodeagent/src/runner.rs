//! Per-run orchestration over one WebSocket connection.
//!
//! A run spawns four tasks: the stdout and stderr relays, the stdin
//! writer and the demultiplexer. The start message is written between the
//! relays and the rest so that a failed start leaves nothing running.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use nodeagent_proto::Request;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::completion::{Completion, CompletionRx, CompletionSlot};
use crate::config::RunOptions;
use crate::conn::Outbound;
use crate::demux::{self, Demux, StreamSlot, Workers};
use crate::request::RunRequest;
use crate::writer::{self, StreamWriter};
use crate::{Error, Result, RunResult, relay};

/// Runs `request` over an established WebSocket connection.
///
/// Returns once the start message has been sent; the exchange continues in
/// the background until the node reports exit or the connection fails.
pub async fn run_over<S>(
    ws: WebSocketStream<S>,
    request: RunRequest,
    options: RunOptions,
) -> Result<RunWaiter>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if options.chunk_size == 0 {
        return Err(Error::Config("chunk_size must be greater than zero".into()));
    }
    let span = info_span!("run", command = request.command());
    Runner::new(ws, request, options)
        .start()
        .instrument(span)
        .await
}

/// One command invocation over one connection.
struct Runner<S> {
    /// The connection, consumed by `start`.
    ws: WebSocketStream<S>,
    /// What to run and where its I/O goes.
    request: RunRequest,
    /// Chunking and close settings.
    options: RunOptions,
    /// Internal cancellation shared by every worker.
    cancel: CancellationToken,
}

impl<S> Runner<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Prepares a run; nothing is spawned yet.
    fn new(ws: WebSocketStream<S>, request: RunRequest, options: RunOptions) -> Self {
        Self {
            ws,
            request,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the workers and sends the start message.
    async fn start(self) -> Result<RunWaiter> {
        let Self {
            ws,
            request,
            options,
            cancel,
        } = self;
        let (sink, source) = ws.split();
        let out = Arc::new(Outbound::new(sink, options.close_timeout));

        let (stdout_tx, stdout_rx) = mpsc::channel(1);
        let (stderr_tx, stderr_rx) = mpsc::channel(1);
        let stdout = tokio::spawn(
            relay::relay("stdout", stdout_rx, request.stdout, cancel.clone()).in_current_span(),
        );
        let stderr = tokio::spawn(
            relay::relay("stderr", stderr_rx, request.stderr, cancel.clone()).in_current_span(),
        );

        if let Err(e) = out.send(&Request::Start(request.start)).await {
            debug!(error = %e, "writing first message failed");
            drop((stdout_tx, stderr_tx));
            cancel.cancel();
            out.abandon();
            demux::join(Some(stdout)).await;
            demux::join(Some(stderr)).await;
            return Err(Error::write("first message", e));
        }

        let stdin_cancel = cancel.child_token();
        let (stdin_failed, stdin_failure) = oneshot::channel();
        let stdin = tokio::spawn(
            writer::copy_stdin(
                StreamWriter::new(Arc::clone(&out), options.chunk_size),
                request.stdin,
                stdin_cancel.clone(),
                stdin_failed,
            )
            .in_current_span(),
        );

        let (completion, completion_rx) = CompletionSlot::new();
        let demux = Demux {
            source,
            out,
            stdout: StreamSlot::new("stdout", stdout_tx),
            stderr: StreamSlot::new("stderr", stderr_tx),
            completion,
            cancel: cancel.clone(),
            stdin_cancel,
            stdin_failure: Some(stdin_failure),
            workers: Workers {
                stdin: Some(stdin),
                stdout: Some(stdout),
                stderr: Some(stderr),
            },
        };
        tokio::spawn(demux.run().in_current_span());

        Ok(RunWaiter {
            completion: completion_rx,
            shutdown: cancel,
        })
    }
}

/// Handle for observing the outcome of a run.
///
/// Clones share the same run: every clone that waits receives the same
/// result. Giving up on a wait never stops the run itself.
#[derive(Debug, Clone)]
pub struct RunWaiter {
    /// Settled once by the demultiplexer.
    completion: CompletionRx,
    /// The runner's internal cancellation.
    shutdown: CancellationToken,
}

impl RunWaiter {
    /// Waits until the node reports exit or the run fails.
    pub async fn wait(&self) -> Result<RunResult> {
        self.wait_until(std::future::pending()).await
    }

    /// Like [`wait`](Self::wait), giving up with [`Error::Timeout`] after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<RunResult> {
        self.wait_until(async move {
            tokio::time::sleep(timeout).await;
            Error::Timeout(timeout)
        })
        .await
    }

    /// Like [`wait`](Self::wait), giving up with [`Error::Cancelled`] once
    /// `token` fires.
    pub async fn wait_cancellable(&self, token: &CancellationToken) -> Result<RunResult> {
        self.wait_until(async {
            token.cancelled().await;
            Error::Cancelled
        })
        .await
    }

    /// The outcome, if the run has already finished.
    pub fn try_result(&self) -> Option<Result<RunResult>> {
        let settled = (*self.completion.borrow()).clone();
        settled.map(Completion::into_result)
    }

    /// Waits for the completion, the runner's shutdown, or `give_up`.
    async fn wait_until(&self, give_up: impl Future<Output = Error>) -> Result<RunResult> {
        let mut completion = self.completion.clone();
        tokio::select! {
            biased;
            settled = completion.wait_for(Option::is_some) => {
                let settled = settled.ok().and_then(|slot| (*slot).clone());
                settled.map_or_else(
                    || self.try_result().unwrap_or(Err(Error::Shutdown)),
                    Completion::into_result,
                )
            }
            () = self.shutdown.cancelled() => {
                debug!("runner shut down while waiting");
                self.try_result().unwrap_or(Err(Error::Shutdown))
            }
            err = give_up => {
                debug!(error = %err, "wait abandoned");
                Err(err)
            }
        }
    }
}
