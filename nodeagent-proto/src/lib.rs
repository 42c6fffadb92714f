//! Wire protocol for nodeagent command execution.
//!
//! A run is one WebSocket connection. The client sends a [`Request::Start`]
//! first, then zero or more [`Request::Stdin`] chunks and exactly one
//! [`Request::StdinDone`]. The server answers with [`Response`] messages,
//! each carrying any subset of stdout/stderr chunks, their done signals and
//! the final exit status.
//!
//! Messages are JSON objects sent as text messages. Byte payloads are
//! base64-encoded strings.

mod codec;
mod error;
mod message;

pub use codec::{decode, decode_slice, encode};
pub use error::{Error, Result};
pub use message::{CommandStart, Request, Response};
