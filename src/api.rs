//! HTTP wrappers for the poll service.
//!
//! [`PollBackend`] is the seam the reconciler consumes; [`HttpPollApi`] is
//! the production implementation over reqwest. Mutating calls (vote, create,
//! close) enforce the credential precondition locally, before any network
//! I/O. Non-success statuses are decoded into
//! [`PollLinkError::RemoteRejection`] carrying the server's structured
//! `{statusCode, error, message}` body.

use crate::auth::AuthProvider;
use crate::error::{PollLinkError, Result};
use crate::models::{
    ApiErrorBody, CreatePollRequest, LoginRequest, LoginResponse, PaginatedResponse, Poll,
    RegisterRequest, User, VoteReceipt,
};
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::time::Instant;

/// Read retries for transient transport failures (timeout, connect).
/// Mutations are never retried; a vote must not be recorded twice.
const MAX_READ_RETRIES: u32 = 3;

/// The HTTP collaborator surface the reconciler depends on.
#[async_trait]
pub trait PollBackend: Send + Sync {
    /// List polls, paginated, with an optional search query.
    async fn list_polls(
        &self,
        page: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Result<PaginatedResponse<Poll>>;

    /// Fetch one poll by id.
    async fn fetch_poll(&self, poll_id: &str) -> Result<Poll>;

    /// Create a poll. Requires a credential.
    async fn create_poll(&self, request: &CreatePollRequest) -> Result<Poll>;

    /// Close a poll (owner action). Requires a credential.
    async fn close_poll(&self, poll_id: &str) -> Result<Poll>;

    /// Cast a vote for an option. Requires a credential.
    async fn create_vote(&self, poll_id: &str, option_id: &str) -> Result<VoteReceipt>;

    /// Withdraw the viewer's vote. Requires a credential.
    async fn delete_vote(&self, poll_id: &str) -> Result<()>;

    /// Whether a credential is configured (mutating-call precondition).
    fn has_credentials(&self) -> bool;
}

/// reqwest-backed implementation of [`PollBackend`] plus the auth endpoints.
#[derive(Clone)]
pub struct HttpPollApi {
    base_url: String,
    http: reqwest::Client,
    auth: AuthProvider,
}

impl HttpPollApi {
    pub fn new(base_url: String, http: reqwest::Client, auth: AuthProvider) -> Self {
        Self {
            base_url,
            http,
            auth,
        }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for a bearer token.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let url = format!("{}/auth/login", self.base_url);
        debug!("[POLL_HTTP] POST {} (login)", url);
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.http.post(&url).json(&request).send().await?;
        decode(response).await
    }

    /// Register a new user account.
    pub async fn register(&self, request: &RegisterRequest) -> Result<User> {
        let url = format!("{}/users", self.base_url);
        debug!("[POLL_HTTP] POST {} (register)", url);
        let response = self.http.post(&url).json(request).send().await?;
        decode(response).await
    }

    /// Issue a GET, retrying transient transport failures with a short
    /// linear backoff. Reads are idempotent so retrying is safe.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut retries = 0;
        let start = Instant::now();
        loop {
            let request = self
                .auth
                .apply_to_request(self.http.get(url).query(query));
            match request.send().await {
                Ok(response) => {
                    debug!(
                        "[POLL_HTTP] GET {} status={} duration_ms={}",
                        url,
                        response.status(),
                        start.elapsed().as_millis()
                    );
                    return decode(response).await;
                }
                Err(err) if retries < MAX_READ_RETRIES && is_retriable(&err) => {
                    retries += 1;
                    warn!(
                        "[POLL_HTTP] retriable error on GET {} (attempt {}/{}): {}",
                        url,
                        retries,
                        MAX_READ_RETRIES + 1,
                        err
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(100 * retries as u64))
                        .await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl PollBackend for HttpPollApi {
    async fn list_polls(
        &self,
        page: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Result<PaginatedResponse<Poll>> {
        let url = format!("{}/polls", self.base_url);
        let mut query = vec![("page", page.to_string()), ("limit", limit.to_string())];
        if let Some(term) = search {
            query.push(("search", term.to_string()));
        }
        self.get_with_retry(&url, &query).await
    }

    async fn fetch_poll(&self, poll_id: &str) -> Result<Poll> {
        let url = format!("{}/polls/{}", self.base_url, poll_id);
        self.get_with_retry(&url, &[]).await
    }

    async fn create_poll(&self, request: &CreatePollRequest) -> Result<Poll> {
        self.auth.require_token("create a poll")?;
        let url = format!("{}/polls", self.base_url);
        debug!("[POLL_HTTP] POST {}", url);
        let response = self
            .auth
            .apply_to_request(self.http.post(&url).json(request))
            .send()
            .await?;
        decode(response).await
    }

    async fn close_poll(&self, poll_id: &str) -> Result<Poll> {
        self.auth.require_token("close a poll")?;
        let url = format!("{}/polls/{}/close", self.base_url, poll_id);
        debug!("[POLL_HTTP] PATCH {}", url);
        let response = self
            .auth
            .apply_to_request(self.http.patch(&url))
            .send()
            .await?;
        decode(response).await
    }

    async fn create_vote(&self, poll_id: &str, option_id: &str) -> Result<VoteReceipt> {
        self.auth.require_token("vote")?;
        let url = format!("{}/polls/{}/vote", self.base_url, poll_id);
        debug!("[POLL_HTTP] PATCH {} option={}", url, option_id);
        let body = serde_json::json!({ "optionId": option_id });
        let response = self
            .auth
            .apply_to_request(self.http.patch(&url).json(&body))
            .send()
            .await?;
        decode(response).await
    }

    async fn delete_vote(&self, poll_id: &str) -> Result<()> {
        self.auth.require_token("delete a vote")?;
        let url = format!("{}/polls/{}/vote", self.base_url, poll_id);
        debug!("[POLL_HTTP] DELETE {}", url);
        let response = self
            .auth
            .apply_to_request(self.http.delete(&url))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(parse_rejection(status.as_u16(), &text))
        }
    }

    fn has_credentials(&self) -> bool {
        self.auth.is_authenticated()
    }
}

/// Decode a success body, or map a non-success status to
/// [`PollLinkError::RemoteRejection`].
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json::<T>().await?)
    } else {
        let text = response.text().await.unwrap_or_default();
        Err(parse_rejection(status.as_u16(), &text))
    }
}

/// Parse the server's structured error body; fall back to the raw text when
/// the body is not the expected shape.
fn parse_rejection(status_code: u16, body: &str) -> PollLinkError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => PollLinkError::RemoteRejection {
            status_code: parsed.status_code,
            error: parsed.error,
            message: parsed.message.joined(),
        },
        Err(_) => PollLinkError::RemoteRejection {
            status_code,
            error: reqwest::StatusCode::from_u16(status_code)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .to_string(),
            message: body.to_string(),
        },
    }
}

fn is_retriable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
