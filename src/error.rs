//! Error types for the poll-link client.
//!
//! Every variant carries cloneable payloads (strings and status codes) so a
//! settled connect attempt can fan its result out to all queued waiters.

use thiserror::Error;

/// Result type alias for poll-link operations.
pub type Result<T> = std::result::Result<T, PollLinkError>;

/// Errors produced by the poll-link client.
#[derive(Debug, Clone, Error)]
pub enum PollLinkError {
    /// A connect attempt exceeded its bound with neither a connect nor a
    /// connect-error event. Recoverable by calling `connect()` again.
    #[error("connection timed out: {0}")]
    ConnectionTimeout(String),

    /// The transport reported a connect error. The payload carries the
    /// underlying cause. Recoverable by retry; this layer never retries it.
    #[error("connection failed: {0}")]
    ConnectionError(String),

    /// A caller waiting on someone else's in-flight connect exceeded its own
    /// bound. Callers treat this like [`PollLinkError::ConnectionTimeout`].
    #[error("timed out waiting for in-flight connect: {0}")]
    WaitTimeout(String),

    /// A local precondition failed before any network call was made, e.g.
    /// a mutating request issued without a credential. Never retried.
    #[error("{0}")]
    PreconditionFailed(String),

    /// The HTTP collaborator returned a non-success status. The triple is
    /// propagated verbatim for user-facing translation elsewhere.
    #[error("server rejected request ({status_code} {error}): {message}")]
    RemoteRejection {
        status_code: u16,
        error: String,
        message: String,
    },

    /// The transport task is gone or refused an operation.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Invalid client configuration (bad base URL, missing required field).
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// An HTTP request failed below the status-code level (DNS, TCP, TLS).
    #[error("network error: {0}")]
    NetworkError(String),
}

impl PollLinkError {
    /// True for the two timeout kinds. [`PollLinkError::WaitTimeout`] is
    /// treated identically to [`PollLinkError::ConnectionTimeout`] by
    /// callers, but the variants stay distinguishable.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PollLinkError::ConnectionTimeout(_) | PollLinkError::WaitTimeout(_)
        )
    }

    /// True when retrying the failed operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            PollLinkError::PreconditionFailed(_) | PollLinkError::ConfigurationError(_)
        )
    }
}

impl From<reqwest::Error> for PollLinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PollLinkError::SerializationError(err.to_string())
        } else {
            PollLinkError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PollLinkError {
    fn from(err: serde_json::Error) -> Self {
        PollLinkError::SerializationError(err.to_string())
    }
}
