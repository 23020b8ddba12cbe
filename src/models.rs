//! Data models for the poll-link client library.
//!
//! Defines the poll/vote entities exchanged with the HTTP collaborator and
//! the wire messages exchanged over the live transport. Field names follow
//! the server's camelCase JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Poll visibility as exposed by the server's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollVisibility {
    #[default]
    Public,
    Private,
}

/// Poll lifecycle status. Servers that predate the close feature omit the
/// field, which deserializes as [`PollStatus::Open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollStatus {
    #[default]
    Open,
    Closed,
}

/// A single votable option within a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: String,
    pub text: String,
    /// Current tally for this option. Server-provided; the client never
    /// recomputes it.
    #[serde(default)]
    pub votes_count: u64,
    pub created_at: String,
}

/// The user who created a poll (or is logged in).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A poll as displayed: identity, options with tallies, and the viewer's
/// own vote when the server knows one.
///
/// Invariant: the sum of option tallies should equal `total_votes`. The sum
/// is server-provided and never recomputed client-side, but
/// [`Poll::tally_consistent`] lets callers notice divergence instead of
/// silently displaying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub visibility: PollVisibility,
    #[serde(default)]
    pub status: PollStatus,
    pub options: Vec<PollOption>,
    pub creator: User,
    #[serde(default)]
    pub total_votes: u64,
    /// The option id the viewer voted for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_vote: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Poll {
    /// Whether the per-option tallies sum to the reported total.
    pub fn tally_consistent(&self) -> bool {
        self.options.iter().map(|o| o.votes_count).sum::<u64>() == self.total_votes
    }

    /// Whether this poll still accepts votes.
    pub fn is_open(&self) -> bool {
        self.status == PollStatus::Open
    }
}

/// Pagination metadata returned by list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub item_count: u32,
    pub total_items: u32,
    pub items_per_page: u32,
    pub total_pages: u32,
    pub current_page: u32,
}

/// A page of results from a list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

/// Request body for creating a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub visibility: PollVisibility,
    /// Option texts; the server assigns ids.
    pub options: Vec<String>,
}

/// Server confirmation of a recorded vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub id: String,
    pub user_id: String,
    pub poll_id: String,
    pub option_id: String,
    pub created_at: String,
}

/// Login request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Registration request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Successful login reply: a bearer token plus the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub user: User,
}

/// The structured body the HTTP collaborator sends with non-success
/// statuses. `message` is a string for most errors and an array for
/// validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub status_code: u16,
    pub error: String,
    #[serde(default)]
    pub message: ApiErrorMessage,
}

/// One message or several (validation errors arrive as arrays).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl Default for ApiErrorMessage {
    fn default() -> Self {
        ApiErrorMessage::One(String::new())
    }
}

impl ApiErrorMessage {
    /// Collapse into a single user-presentable string.
    pub fn joined(&self) -> String {
        match self {
            ApiErrorMessage::One(s) => s.clone(),
            ApiErrorMessage::Many(v) => v.join(", "),
        }
    }
}

// ── Live transport wire messages ────────────────────────────────────────────

/// Client-to-server events sent over the live transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Ask the server to scope tally-update pushes to one poll room.
    #[serde(rename_all = "camelCase")]
    JoinPoll { poll_id: String },
}

/// Server-to-client events received over the live transport.
///
/// `pollUpdated` is strictly a refresh signal: its payload is captured but
/// never interpreted, so server-side payload schema drift cannot break the
/// client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    PollUpdated {
        #[serde(flatten)]
        payload: JsonValue,
    },
}

/// Which transport legs the client may use, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent bidirectional streaming (primary).
    WebSocket,
    /// Request-polling fallback: served by the HTTP collaborator's manual
    /// refresh path when the streaming leg is unavailable.
    Polling,
}

/// Connection behavior for the live transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Reconnect automatically after an established session drops.
    /// A session that never established is not retried by the transport.
    pub auto_reconnect: bool,
    /// Bounded number of reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt; doubles per attempt.
    pub reconnect_delay: Duration,
    /// Cap applied to the doubled reconnection delay.
    pub max_reconnect_delay: Duration,
    /// Transport preference order.
    pub transports: Vec<TransportKind>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(5000),
            transports: vec![TransportKind::WebSocket, TransportKind::Polling],
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Backoff delay before reconnection attempt `attempt` (zero-based):
    /// `reconnect_delay * 2^attempt`, capped at `max_reconnect_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.reconnect_delay.as_millis() as u64;
        let delay = base.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.max_reconnect_delay.as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_poll_json() -> &'static str {
        r#"{
            "id": "poll-1",
            "title": "Best language",
            "description": "Vote for your favorite",
            "type": "public",
            "options": [
                {"id": "1", "text": "Rust", "votesCount": 40, "createdAt": "2026-01-01T00:00:00Z"},
                {"id": "2", "text": "Go", "votesCount": 2, "createdAt": "2026-01-01T00:00:00Z"}
            ],
            "creator": {"id": "u1", "name": "Alice", "email": "alice@example.com"},
            "totalVotes": 42,
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-01-02T00:00:00Z"
        }"#
    }

    #[test]
    fn test_poll_deserializes_camel_case() {
        let poll: Poll = serde_json::from_str(sample_poll_json()).unwrap();
        assert_eq!(poll.id, "poll-1");
        assert_eq!(poll.visibility, PollVisibility::Public);
        assert_eq!(poll.status, PollStatus::Open, "missing status defaults to OPEN");
        assert_eq!(poll.options[0].votes_count, 40);
        assert_eq!(poll.total_votes, 42);
        assert!(poll.user_vote.is_none());
        assert!(poll.tally_consistent());
    }

    #[test]
    fn test_tally_divergence_is_detectable() {
        let mut poll: Poll = serde_json::from_str(sample_poll_json()).unwrap();
        poll.total_votes = 99;
        assert!(!poll.tally_consistent());
    }

    #[test]
    fn test_join_poll_wire_format() {
        let event = ClientEvent::JoinPoll {
            poll_id: "poll-7".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"joinPoll","pollId":"poll-7"}"#);
    }

    #[test]
    fn test_poll_updated_payload_is_opaque() {
        // Arbitrary extra fields must parse; their shape is never relied on.
        let raw = r#"{"type":"pollUpdated","pollId":"poll-7","totals":{"1":40}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        let ServerEvent::PollUpdated { payload } = event;
        assert_eq!(payload["pollId"], "poll-7");
    }

    #[test]
    fn test_api_error_message_forms() {
        let single: ApiErrorBody = serde_json::from_str(
            r#"{"statusCode": 404, "error": "Not Found", "message": "Poll not found"}"#,
        )
        .unwrap();
        assert_eq!(single.message.joined(), "Poll not found");

        let many: ApiErrorBody = serde_json::from_str(
            r#"{"statusCode": 400, "error": "Bad Request", "message": ["title should not be empty", "email must be an email"]}"#,
        )
        .unwrap();
        assert_eq!(
            many.message.joined(),
            "title should not be empty, email must be an email"
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let options = ConnectionOptions::default();
        assert_eq!(options.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(options.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(options.backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(options.backoff_delay(3), Duration::from_millis(5000));
        assert_eq!(options.backoff_delay(10), Duration::from_millis(5000));
    }
}
