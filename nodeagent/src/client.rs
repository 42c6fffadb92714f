//! Client for running commands on a node agent.
//!
//! Each run dials its own WebSocket connection to the node's command
//! endpoint and hands it to a runner.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::config::ClientConfig;
use crate::request::{Output, RunOutput, RunRequest};
use crate::runner::{RunWaiter, run_over};
use crate::{Error, Result};

/// In-memory pipe capacity used by [`Client::run_output`].
const CAPTURE_BUFFER: usize = 64 * 1024;

/// A client for one node's command endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    /// Validated configuration.
    config: ClientConfig,
}

impl Client {
    /// Creates a client after validating `config`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The client's configuration.
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts `request` on the node.
    ///
    /// Returns once the command has been sent. Use the returned
    /// [`RunWaiter`] to obtain the exit code.
    pub async fn run(&self, request: RunRequest) -> Result<RunWaiter> {
        let ws = self.connect().await?;
        run_over(ws, request, self.config.run_options()).await
    }

    /// Runs `request` and collects stdout and stderr in memory.
    ///
    /// Any output destinations set on `request` are replaced. Blocks until
    /// the command exits.
    pub async fn run_output(&self, request: RunRequest) -> Result<RunOutput> {
        let (stdout_w, mut stdout_r) = tokio::io::duplex(CAPTURE_BUFFER);
        let (stderr_w, mut stderr_r) = tokio::io::duplex(CAPTURE_BUFFER);
        let waiter = self
            .run(
                request
                    .stdout(Output::closing(stdout_w))
                    .stderr(Output::closing(stderr_w)),
            )
            .await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let (out, err, result) = tokio::join!(
            stdout_r.read_to_end(&mut stdout),
            stderr_r.read_to_end(&mut stderr),
            waiter.wait(),
        );
        out?;
        err?;
        Ok(RunOutput {
            stdout,
            stderr,
            code: result?.code,
        })
    }

    /// Performs the WebSocket handshake, bounded by the connect timeout.
    async fn connect(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let url = self.config.url.as_str();
        let timeout = self.config.connect_timeout_duration();
        debug!(url, "dialing WebSocket for run");

        match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => {
                debug!(url, error = %e, "dial error");
                Err(Error::Connect {
                    url: url.to_owned(),
                    source: Arc::new(e),
                })
            }
            Err(_) => Err(Error::ConnectTimeout {
                url: url.to_owned(),
                timeout,
            }),
        }
    }
}
