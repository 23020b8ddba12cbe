//! Main poll-link client with builder pattern.
//!
//! [`PollLinkClient`] wires the HTTP wrappers, the connection manager, the
//! room subscription, and the reconciler into the flow a poll-detail view
//! consumes:
//!
//! 1. [`open_poll`](PollLinkClient::open_poll) fetches the poll and hands
//!    the view its state channel
//! 2. [`join_live`](PollLinkClient::join_live) ensures a connection and
//!    joins the poll room
//! 3. [`on_poll_updated`](PollLinkClient::on_poll_updated) registers the
//!    push listener; each push should trigger
//!    [`TallyReconciler::refresh`]
//! 4. on unmount, [`leave_live`](PollLinkClient::leave_live); the
//!    connection stays up for the next view, or
//!    [`disconnect_live`](PollLinkClient::disconnect_live) tears it down
//!
//! A view that unmounts with a refetch outstanding must guard its own
//! state handling; dropping the `watch` receiver makes any late proposal
//! harmless. When the live connection cannot be established the view keeps
//! its last snapshot and refreshes over HTTP: degraded, not broken.

use crate::api::HttpPollApi;
use crate::auth::AuthProvider;
use crate::connection::ConnectionManager;
use crate::error::{PollLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::{
    ConnectionOptions, CreatePollRequest, LoginResponse, PaginatedResponse, Poll, RegisterRequest,
    User,
};
use crate::reconciler::{PollViewState, TallyReconciler};
use crate::room::RoomSubscription;
use crate::timeouts::PollLinkTimeouts;
use crate::transport::{ListenerToken, TransportFactory, UpdateCallback};
use crate::websocket::WsTransportFactory;
use std::sync::Arc;
use tokio::sync::watch;

/// Environment variable naming the API base URL.
const BASE_URL_ENV: &str = "POLL_API_BASE_URL";

/// Fallback base URL for local development.
const DEFAULT_BASE_URL: &str = "http://localhost:5000/v1";

/// Client for the poll service.
///
/// Use [`PollLinkClient::builder`] to construct instances.
///
/// # Examples
///
/// ```rust,no_run
/// use poll_link::PollLinkClient;
///
/// # async fn example() -> poll_link::Result<()> {
/// let client = PollLinkClient::builder()
///     .base_url("http://localhost:5000/v1")
///     .bearer_token("eyJhbGc...")
///     .build()?;
///
/// let page = client.list_polls(1, 10, None).await?;
/// println!("{} polls", page.meta.total_items);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PollLinkClient {
    api: HttpPollApi,
    connection: Arc<ConnectionManager>,
    room: Arc<RoomSubscription>,
    reconciler: Arc<TallyReconciler<HttpPollApi>>,
}

impl std::fmt::Debug for PollLinkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLinkClient").finish_non_exhaustive()
    }
}

impl PollLinkClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> PollLinkClientBuilder {
        PollLinkClientBuilder::new()
    }

    /// Builder pre-seeded from the `POLL_API_BASE_URL` environment
    /// variable, defaulting to `http://localhost:5000/v1`.
    pub fn from_env() -> Result<PollLinkClientBuilder> {
        let base_url = resolve_base_url(std::env::var(BASE_URL_ENV).ok())?;
        Ok(Self::builder().base_url(base_url))
    }

    // ── HTTP surface ───────────────────────────────────────────────────────

    /// List polls, paginated, with an optional search query.
    pub async fn list_polls(
        &self,
        page: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Result<PaginatedResponse<Poll>> {
        use crate::api::PollBackend;
        self.api.list_polls(page, limit, search).await
    }

    /// Fetch one poll by id.
    pub async fn fetch_poll(&self, poll_id: &str) -> Result<Poll> {
        use crate::api::PollBackend;
        self.api.fetch_poll(poll_id).await
    }

    /// Create a poll. Requires a credential.
    pub async fn create_poll(&self, request: &CreatePollRequest) -> Result<Poll> {
        use crate::api::PollBackend;
        self.api.create_poll(request).await
    }

    /// Exchange credentials for a bearer token. The token is returned, not
    /// stored; build a new client with it for authenticated calls.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        self.api.login(email, password).await
    }

    /// Register a new user account.
    pub async fn register(&self, request: &RegisterRequest) -> Result<User> {
        self.api.register(request).await
    }

    /// Direct access to the HTTP wrappers.
    pub fn api(&self) -> &HttpPollApi {
        &self.api
    }

    // ── Live surface ───────────────────────────────────────────────────────

    /// Fetch the poll and hand the view its state channel. The view owns
    /// the sender; the reconciler proposes into it.
    pub async fn open_poll(
        &self,
        poll_id: &str,
    ) -> Result<(watch::Sender<PollViewState>, watch::Receiver<PollViewState>)> {
        let state = self.reconciler.load(poll_id).await?;
        Ok(watch::channel(state))
    }

    /// Join the live room for `poll_id`, connecting first if needed.
    pub async fn join_live(&self, poll_id: &str) -> Result<()> {
        self.room.join_poll(poll_id).await
    }

    /// Leave the live room. The connection stays up for reuse.
    pub async fn leave_live(&self) {
        self.room.leave_poll().await;
    }

    /// Register the `pollUpdated` listener for the active connection.
    pub async fn on_poll_updated(&self, callback: UpdateCallback) -> Result<ListenerToken> {
        self.room.on_poll_updated(callback).await
    }

    /// Unregister the `pollUpdated` listener.
    pub async fn off_poll_updated(&self) {
        self.room.off_poll_updated().await;
    }

    /// Leave the room and tear the shared connection down. Safe to call
    /// when nothing is connected.
    pub async fn disconnect_live(&self) {
        self.room.leave_poll().await;
        self.connection.disconnect();
    }

    /// The connection manager owning the shared transport.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// The room-subscription state.
    pub fn room(&self) -> &Arc<RoomSubscription> {
        &self.room
    }

    /// The vote/tally reconciler.
    pub fn reconciler(&self) -> &Arc<TallyReconciler<HttpPollApi>> {
        &self.reconciler
    }
}

fn resolve_base_url(configured: Option<String>) -> Result<String> {
    let raw = configured.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| {
        PollLinkError::ConfigurationError(format!("{} must be a valid URL: {}", BASE_URL_ENV, e))
    })?;
    if url.host_str().is_none() {
        return Err(PollLinkError::ConfigurationError(format!(
            "{} must include a host",
            BASE_URL_ENV
        )));
    }
    Ok(raw.trim().trim_end_matches('/').to_string())
}

/// Builder for configuring [`PollLinkClient`] instances.
pub struct PollLinkClientBuilder {
    base_url: Option<String>,
    auth: AuthProvider,
    timeouts: PollLinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
    transport_factory: Option<Arc<dyn TransportFactory>>,
}

impl PollLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            auth: AuthProvider::none(),
            timeouts: PollLinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            event_handlers: EventHandlers::new(),
            transport_factory: None,
        }
    }

    /// Set the base URL of the poll service, e.g.
    /// `http://localhost:5000/v1`. Required.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set bearer token authentication.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::bearer(token);
        self
    }

    /// Set the authentication provider directly.
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Set the timeout configuration for all operations.
    pub fn timeouts(mut self, timeouts: PollLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set live-connection behavior (reconnect bounds, transport order).
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Register connection lifecycle hooks.
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Override the transport factory. Tests inject
    /// [`crate::mock::MockTransportFactory`] here.
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<PollLinkClient> {
        let base_url = self
            .base_url
            .as_deref()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .ok_or_else(|| PollLinkError::ConfigurationError("base_url is required".into()))?;

        // Keep-alive pooling cuts handshake overhead for the refetch-heavy
        // reconciliation pattern.
        let http = reqwest::Client::builder()
            .timeout(self.timeouts.request_timeout)
            .connect_timeout(self.timeouts.connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| PollLinkError::ConfigurationError(e.to_string()))?;

        let factory: Arc<dyn TransportFactory> = match self.transport_factory {
            Some(factory) => factory,
            None => Arc::new(WsTransportFactory::new(&base_url)?),
        };

        let api = HttpPollApi::new(base_url, http, self.auth);
        let connection = Arc::new(ConnectionManager::new(
            factory,
            self.connection_options,
            self.timeouts,
            self.event_handlers,
        ));
        let room = Arc::new(RoomSubscription::new(connection.clone()));
        let reconciler = Arc::new(TallyReconciler::new(api.clone()));

        Ok(PollLinkClient {
            api,
            connection,
            room,
            reconciler,
        })
    }
}
