use std::time::Duration;

use crate::CorrelationId;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the reporting client.
///
/// Every variant is cheap to clone: a failed resolution is handed to each
/// task waiting on that correlation id.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Occurs when `orangebeard.toml` fails to load.
    #[error("failed to load orangebeard.toml: {0}")]
    LoadError(String),
    /// Occurs when a required configuration value is missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A network-level failure or a retryable status. Absorbed by the retry loop.
    #[error("transient network error: {0}")]
    Transient(String),
    /// The retry budget was exhausted, or an earlier request already did so.
    #[error("connection with Orangebeard is invalid: {0}")]
    ConnectionInvalid(String),
    /// The server answered with a non-retryable status.
    #[error("request rejected by Orangebeard with status {status}: {body}")]
    ServerRejection { status: u16, body: String },
    /// An await on a correlation id exceeded its deadline.
    #[error("timed out after {waited:?} waiting for {id} to resolve")]
    Timeout { id: CorrelationId, waited: Duration },
    /// The correlation id was never allocated by this client, or the client was torn down.
    #[error("unknown correlation id {0}")]
    UnknownId(CorrelationId),
    /// A second resolution was attempted for the same correlation id.
    #[error("correlation id {0} has already been resolved")]
    AlreadyResolved(CorrelationId),
    /// The request for the correlation id completed but yielded no id.
    #[error("correlation id {0} resolved without a server id")]
    Unresolved(CorrelationId),
    /// The response body did not have the expected shape.
    #[error("unexpected response from Orangebeard: {0}")]
    Decode(String),
    /// A scheduled task panicked or was aborted.
    #[error("reporting task failed: {0}")]
    Task(String),
}

impl Error {
    /// Whether the retry loop should try again after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
