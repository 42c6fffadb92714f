//! Public run inputs and outputs.

use std::fmt;
use std::io;

use nodeagent_proto::CommandStart;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Boxed input source feeding the remote process's stdin.
pub type Input = Box<dyn AsyncRead + Send + Unpin>;

/// A caller-supplied destination for one output stream.
///
/// The relay writing to it either flushes it or, for sinks built with
/// [`Output::closing`], shuts it down when the stream ends.
pub struct Output {
    /// The byte sink.
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Whether the sink is shut down (rather than flushed) on release.
    close_on_release: bool,
}

impl Output {
    /// Wraps a sink that is only flushed when the stream ends.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            close_on_release: false,
        }
    }

    /// Wraps a sink that is shut down when the stream ends, on every path.
    pub fn closing(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            close_on_release: true,
        }
    }

    /// A sink that discards everything.
    pub fn discard() -> Self {
        Self::new(tokio::io::sink())
    }

    /// Writes one chunk in full.
    pub(crate) async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    /// Releases the sink: shutdown for closing sinks, flush otherwise.
    pub(crate) async fn release(&mut self) -> io::Result<()> {
        if self.close_on_release {
            self.writer.shutdown().await
        } else {
            self.writer.flush().await
        }
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("close_on_release", &self.close_on_release)
            .finish_non_exhaustive()
    }
}

/// A command to run on a node, with its I/O endpoints.
///
/// Output streams default to [`Output::discard`]; without an input source
/// the node is told immediately that stdin is closed.
pub struct RunRequest {
    /// The start message sent to the node.
    pub(crate) start: CommandStart,
    /// Source for the remote stdin.
    pub(crate) stdin: Option<Input>,
    /// Destination for the remote stdout.
    pub(crate) stdout: Output,
    /// Destination for the remote stderr.
    pub(crate) stderr: Output,
}

impl RunRequest {
    /// Creates a request for `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            start: CommandStart::new(command),
            stdin: None,
            stdout: Output::discard(),
            stderr: Output::discard(),
        }
    }

    /// Sets the command-line arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the environment (`KEY=VALUE` entries).
    #[must_use]
    pub fn env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start.env = env.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory on the node.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.start.working_dir = dir.into();
        self
    }

    /// Sets the stdin source.
    #[must_use]
    pub fn stdin(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdin = Some(Box::new(reader));
        self
    }

    /// Sets the stdout destination.
    #[must_use]
    pub fn stdout(mut self, output: Output) -> Self {
        self.stdout = output;
        self
    }

    /// Sets the stderr destination.
    #[must_use]
    pub fn stderr(mut self, output: Output) -> Self {
        self.stderr = output;
        self
    }

    /// The command being run.
    pub fn command(&self) -> &str {
        &self.start.command
    }
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("start", &self.start)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish()
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunResult {
    /// Process exit code (`-1` if killed by signal).
    pub code: i32,
}

impl RunResult {
    /// Whether the remote process exited with code 0.
    pub const fn success(&self) -> bool {
        self.code == 0
    }
}

/// Output captured from a command run with [`Client::run_output`](crate::Client::run_output).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunOutput {
    /// Stdout bytes.
    pub stdout: Vec<u8>,
    /// Stderr bytes.
    pub stderr: Vec<u8>,
    /// Process exit code (`-1` if killed by signal).
    pub code: i32,
}
