//! Remote command execution for test-cluster nodes.
//!
//! `nodeagent` runs a command on a worker node's agent over one WebSocket
//! connection, streaming stdin to the node and stdout/stderr back into
//! caller-supplied sinks until the node reports the exit code.
//!
//! # Quick start
//!
//! ```no_run
//! use nodeagent::{Client, ClientConfig, Output, RunRequest};
//!
//! # async fn demo() -> nodeagent::Result<()> {
//! let client = Client::new(ClientConfig::new("ws://10.0.0.5:8080/command"))?;
//! let waiter = client
//!     .run(
//!         RunRequest::new("echo")
//!             .args(["hi"])
//!             .stdout(Output::new(tokio::io::stdout())),
//!     )
//!     .await?;
//! let result = waiter.wait().await?;
//! assert_eq!(result.code, 0);
//! # Ok(())
//! # }
//! ```

mod client;
mod completion;
mod config;
mod conn;
mod demux;
mod error;
mod relay;
mod request;
mod runner;
mod writer;

pub use client::Client;
pub use config::{ClientConfig, RunOptions};
pub use error::{Error, FAILED_EXIT_CODE, Result};
pub use request::{Input, Output, RunOutput, RunRequest, RunResult};
pub use runner::{RunWaiter, run_over};
pub use tokio_util::sync::CancellationToken;
