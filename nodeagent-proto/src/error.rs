//! Errors produced while encoding or decoding wire messages.

/// Alias for `Result<T, nodeagent_proto::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire codec errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The payload was not valid JSON for the expected message shape.
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON was well-formed but violated the message shape rules.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
}
