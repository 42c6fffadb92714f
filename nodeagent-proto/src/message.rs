//! Protocol message types for client↔node command execution.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Command to start on the node. Always the first message of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct CommandStart {
    /// Executable path or name.
    pub command: String,
    /// Command-line arguments (excluding argv\[0\]).
    pub args: Vec<String>,
    /// Environment variables in `KEY=VALUE` format.
    pub env: Vec<String>,
    /// Working directory on the node. Empty means the agent's default.
    pub working_dir: String,
}

impl CommandStart {
    /// Creates a start message for `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Sets the command-line arguments.
    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the environment (`KEY=VALUE` entries).
    #[must_use]
    pub fn env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

/// Message sent from the client to the node.
///
/// Exactly one of the variants' fields is present on the wire per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireRequest", try_from = "WireRequest")]
#[non_exhaustive]
pub enum Request {
    /// Start the command. Sent once, first.
    Start(CommandStart),
    /// A chunk of stdin data.
    Stdin(Vec<u8>),
    /// Stdin is closed. Sent once; no [`Request::Stdin`] follows it.
    StdinDone,
}

/// Message sent from the node to the client.
///
/// Any subset of the fields may be set in one message. The node sends
/// `exited` only after both output streams have been flushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// A chunk of stdout data.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub stdout: Option<Vec<u8>>,
    /// Stdout has been read to completion.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stdout_done: bool,
    /// A chunk of stderr data.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub stderr: Option<Vec<u8>>,
    /// Stderr has been read to completion.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stderr_done: bool,
    /// The process has exited; `exit_code` is valid.
    #[serde(default, skip_serializing_if = "is_false")]
    pub exited: bool,
    /// Process exit code (`-1` if killed by signal).
    #[serde(default)]
    pub exit_code: i32,
}

impl Response {
    /// A message carrying one stdout chunk.
    pub fn stdout_chunk(data: impl Into<Vec<u8>>) -> Self {
        Self::default().with_stdout(data)
    }

    /// A message carrying one stderr chunk.
    pub fn stderr_chunk(data: impl Into<Vec<u8>>) -> Self {
        Self::default().with_stderr(data)
    }

    /// A message carrying only the exit status.
    pub fn exit(code: i32) -> Self {
        Self::default().with_exit(code)
    }

    /// Adds a stdout chunk.
    #[must_use]
    pub fn with_stdout(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdout = Some(data.into());
        self
    }

    /// Adds a stderr chunk.
    #[must_use]
    pub fn with_stderr(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stderr = Some(data.into());
        self
    }

    /// Marks stdout as done.
    #[must_use]
    pub const fn with_stdout_done(mut self) -> Self {
        self.stdout_done = true;
        self
    }

    /// Marks stderr as done.
    #[must_use]
    pub const fn with_stderr_done(mut self) -> Self {
        self.stderr_done = true;
        self
    }

    /// Sets the exit status.
    #[must_use]
    pub const fn with_exit(mut self, code: i32) -> Self {
        self.exited = true;
        self.exit_code = code;
        self
    }
}

/// Flat JSON shape of [`Request`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    /// Present only on the start message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    /// Start message arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    /// Start message environment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    env: Vec<String>,
    /// Start message working directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    working_dir: String,
    /// Stdin chunk.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    stdin: Option<Vec<u8>>,
    /// Stdin closed.
    #[serde(default, skip_serializing_if = "is_false")]
    stdin_done: bool,
}

impl From<Request> for WireRequest {
    fn from(req: Request) -> Self {
        match req {
            Request::Start(start) => Self {
                command: Some(start.command),
                args: start.args,
                env: start.env,
                working_dir: start.working_dir,
                ..Self::default()
            },
            Request::Stdin(data) => Self {
                stdin: Some(data),
                ..Self::default()
            },
            Request::StdinDone => Self {
                stdin_done: true,
                ..Self::default()
            },
        }
    }
}

impl TryFrom<WireRequest> for Request {
    type Error = Error;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let start_fields =
            !wire.args.is_empty() || !wire.env.is_empty() || !wire.working_dir.is_empty();
        match (wire.command, wire.stdin, wire.stdin_done) {
            (Some(command), None, false) => Ok(Self::Start(CommandStart {
                command,
                args: wire.args,
                env: wire.env,
                working_dir: wire.working_dir,
            })),
            (None, Some(data), false) if !start_fields => Ok(Self::Stdin(data)),
            (None, None, true) if !start_fields => Ok(Self::StdinDone),
            (None, None, false) if !start_fields => {
                Err(Error::InvalidMessage("request carries no fields"))
            }
            _ => Err(Error::InvalidMessage(
                "request mixes start, stdin and stdinDone fields",
            )),
        }
    }
}

/// `skip_serializing_if` helper for boolean flags.
#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Serde adapter encoding optional byte payloads as base64 strings.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Encodes `Some(bytes)` as a base64 string.
    #[allow(clippy::ref_option)]
    pub(super) fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    /// Decodes a base64 string; `null` becomes `None`.
    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}
