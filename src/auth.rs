//! Bearer-credential handling for the poll service.
//!
//! The client owns no credential storage: the token is caller-supplied and
//! attached to outgoing HTTP requests. Absence of a credential is a local
//! precondition failure for mutating calls, not a network error.

use crate::error::{PollLinkError, Result};

/// Authentication credential for the poll service.
///
/// # Examples
///
/// ```rust
/// use poll_link::AuthProvider;
///
/// // Bearer token obtained from login
/// let auth = AuthProvider::bearer("eyJhbGc...");
///
/// // Anonymous (read-only endpoints)
/// let auth = AuthProvider::none();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProvider {
    /// Bearer token authentication.
    Bearer(String),
    /// No credential. Mutating calls fail locally with
    /// [`PollLinkError::PreconditionFailed`].
    None,
}

impl AuthProvider {
    /// Create bearer token authentication.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    /// No authentication.
    pub fn none() -> Self {
        Self::None
    }

    /// Whether a credential is configured.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Bearer(_))
    }

    /// Attach the Authorization header to an HTTP request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Bearer(token) => request.bearer_auth(token),
            Self::None => request,
        }
    }

    /// Enforce the mutating-call precondition: a credential must exist
    /// before any network activity. `action` names the operation for the
    /// user-facing message, e.g. "vote".
    pub fn require_token(&self, action: &str) -> Result<&str> {
        match self {
            Self::Bearer(token) => Ok(token),
            Self::None => Err(PollLinkError::PreconditionFailed(format!(
                "Authentication required to {}",
                action
            ))),
        }
    }
}
