//! WebSocket implementation of the live transport.
//!
//! A background task owns the socket: it dials, publishes connection phase
//! through the [`LinkState`] watch, serializes outbound `joinPoll` events,
//! routes inbound `pollUpdated` events to the listener slot, sends
//! keepalive pings, and runs the bounded reconnection loop after an
//! established session drops.
//!
//! Reconnection semantics: an initial dial that fails settles the transport
//! as [`LinkState::Failed`] with no retry (the caller owns retrying a
//! never-established session). Losing an established session triggers
//! automatic reconnection with a doubling delay, bounded by
//! [`ConnectionOptions::max_reconnect_attempts`] and capped at
//! [`ConnectionOptions::max_reconnect_delay`].

use crate::error::{PollLinkError, Result};
use crate::event_handlers::{DisconnectReason, EventHandlers, TransportFault};
use crate::models::{ClientEvent, ConnectionOptions, ServerEvent, TransportKind};
use crate::timeouts::PollLinkTimeouts;
use crate::transport::{
    task_gone, LinkState, ListenerSlot, ListenerToken, Transport, TransportFactory, UpdateCallback,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sleep bound that is effectively "never" without overflowing
/// `Instant + Duration`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Commands from the transport handle to the background task.
enum TransportCmd {
    Join(String),
    Close,
}

/// Derive the live endpoint from the HTTP base URL: scheme mapped to
/// ws(s), path fixed to `/live`.
pub(crate) fn resolve_live_url(base_url: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(base_url.trim()).map_err(|e| {
        PollLinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;
    if url.host_str().is_none() {
        return Err(PollLinkError::ConfigurationError(
            "base_url must include a host".to_string(),
        ));
    }
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(PollLinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        PollLinkError::ConfigurationError("failed to set websocket URL scheme".to_string())
    })?;
    url.set_path("/live");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Opens [`WsTransport`]s against a resolved live endpoint.
pub struct WsTransportFactory {
    live_url: String,
}

impl WsTransportFactory {
    /// Validates and resolves the live endpoint up front so `open` cannot
    /// fail on a malformed URL.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            live_url: resolve_live_url(base_url)?,
        })
    }

    pub fn live_url(&self) -> &str {
        &self.live_url
    }
}

impl TransportFactory for WsTransportFactory {
    fn open(
        &self,
        options: &ConnectionOptions,
        timeouts: &PollLinkTimeouts,
        handlers: &EventHandlers,
    ) -> Arc<dyn Transport> {
        if !options.transports.contains(&TransportKind::WebSocket) {
            log::warn!(
                "[poll-link] websocket leg not in transport preference; \
                 the polling fallback is served by HTTP refresh"
            );
        }
        WsTransport::open(
            self.live_url.clone(),
            options.clone(),
            timeouts.clone(),
            handlers.clone(),
        )
    }
}

/// Handle to the background task owning the socket.
pub struct WsTransport {
    cmd_tx: mpsc::UnboundedSender<TransportCmd>,
    state_rx: watch::Receiver<LinkState>,
    listeners: Arc<ListenerSlot>,
    _task: JoinHandle<()>,
}

impl WsTransport {
    pub(crate) fn open(
        url: String,
        options: ConnectionOptions,
        timeouts: PollLinkTimeouts,
        handlers: EventHandlers,
    ) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let listeners = Arc::new(ListenerSlot::new());

        let task = tokio::spawn(transport_task(
            url,
            options,
            timeouts,
            handlers,
            state_tx,
            cmd_rx,
            listeners.clone(),
        ));

        Arc::new(Self {
            cmd_tx,
            state_rx,
            listeners,
            _task: task,
        })
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

impl Transport for WsTransport {
    fn state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    fn emit_join(&self, poll_id: &str) -> Result<()> {
        self.cmd_tx
            .send(TransportCmd::Join(poll_id.to_string()))
            .map_err(|_| task_gone())
    }

    fn on_poll_updated(&self, callback: UpdateCallback) -> ListenerToken {
        self.listeners.register(callback)
    }

    fn off_poll_updated(&self, token: ListenerToken) -> bool {
        self.listeners.unregister(token)
    }

    fn clear_listeners(&self) {
        self.listeners.clear();
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(TransportCmd::Close);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        // Best-effort shutdown signal for the background task.
        let _ = self.cmd_tx.send(TransportCmd::Close);
    }
}

// ── Background task ─────────────────────────────────────────────────────────

enum SessionEnd {
    ClientClosed,
    Lost(DisconnectReason),
}

enum Reconnect {
    Restored(WsStream),
    ClientClosed,
    GaveUp(String),
}

async fn dial(url: &str, bound: Duration) -> Result<WsStream> {
    log::debug!("[poll-link] dialing {}", url);
    let attempt = connect_async(url);
    let outcome = if bound.is_zero() {
        attempt.await
    } else {
        match tokio::time::timeout(bound, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(PollLinkError::ConnectionTimeout(format!(
                    "websocket handshake exceeded {:?}",
                    bound
                )));
            }
        }
    };
    match outcome {
        Ok((stream, _response)) => Ok(stream),
        Err(e) => Err(PollLinkError::ConnectionError(format!(
            "Connection failed: {}",
            e
        ))),
    }
}

async fn transport_task(
    url: String,
    options: ConnectionOptions,
    timeouts: PollLinkTimeouts,
    handlers: EventHandlers,
    state_tx: watch::Sender<LinkState>,
    mut cmd_rx: mpsc::UnboundedReceiver<TransportCmd>,
    listeners: Arc<ListenerSlot>,
) {
    // Initial dial. A session that never establishes is not retried here;
    // the caller decides whether to connect() again.
    let mut ws = match dial(&url, timeouts.connect_timeout).await {
        Ok(stream) => stream,
        Err(err) => {
            let cause = err.to_string();
            handlers.emit_error(TransportFault::new(&cause, false));
            let _ = state_tx.send(LinkState::Failed(cause));
            return;
        }
    };
    let _ = state_tx.send(LinkState::Connected);
    handlers.emit_connect();
    log::info!("[poll-link] live transport connected");

    loop {
        match run_session(&mut ws, &mut cmd_rx, &timeouts, &handlers, &listeners).await {
            SessionEnd::ClientClosed => {
                let _ = ws.close(None).await;
                let _ = state_tx.send(LinkState::Closed);
                handlers.emit_disconnect(DisconnectReason::with_code("client disconnected", 1000));
                return;
            }
            SessionEnd::Lost(reason) => {
                log::warn!("[poll-link] live transport lost: {}", reason);
                handlers.emit_disconnect(reason);
                let _ = state_tx.send(LinkState::Connecting);

                if !options.auto_reconnect {
                    let _ = state_tx.send(LinkState::Failed(
                        "connection lost and auto-reconnect is disabled".to_string(),
                    ));
                    return;
                }
                match run_reconnect(&url, &options, &timeouts, &handlers, &mut cmd_rx).await {
                    Reconnect::Restored(stream) => {
                        ws = stream;
                        let _ = state_tx.send(LinkState::Connected);
                        handlers.emit_connect();
                        log::info!("[poll-link] reconnection successful");
                    }
                    Reconnect::ClientClosed => {
                        let _ = state_tx.send(LinkState::Closed);
                        return;
                    }
                    Reconnect::GaveUp(cause) => {
                        handlers.emit_error(TransportFault::new(&cause, false));
                        let _ = state_tx.send(LinkState::Failed(cause));
                        return;
                    }
                }
            }
        }
    }
}

/// Drive one established session until the client closes it or it drops.
async fn run_session(
    ws: &mut WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<TransportCmd>,
    timeouts: &PollLinkTimeouts,
    handlers: &EventHandlers,
    listeners: &ListenerSlot,
) -> SessionEnd {
    let has_keepalive = !timeouts.keepalive_interval.is_zero();
    let keepalive = if has_keepalive {
        timeouts.keepalive_interval
    } else {
        FAR_FUTURE
    };
    let mut idle_deadline = Instant::now() + keepalive;

    loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => match cmd {
                Some(TransportCmd::Join(poll_id)) => {
                    let event = ClientEvent::JoinPoll { poll_id };
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::warn!("[poll-link] failed to serialize joinPoll: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = ws.send(Message::Text(payload.into())).await {
                        return SessionEnd::Lost(DisconnectReason::new(format!(
                            "failed to send joinPoll: {}",
                            e
                        )));
                    }
                }
                Some(TransportCmd::Close) | None => return SessionEnd::ClientClosed,
            },

            _ = &mut idle_sleep, if has_keepalive => {
                if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                    return SessionEnd::Lost(DisconnectReason::new(format!(
                        "keepalive ping failed: {}",
                        e
                    )));
                }
                idle_deadline = Instant::now() + keepalive;
            }

            frame = ws.next() => {
                // Any frame proves the connection is alive.
                idle_deadline = Instant::now() + keepalive;
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(&text, listeners),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_)))
                    | Some(Ok(Message::Binary(_)))
                    | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => DisconnectReason::with_code(
                                f.reason.to_string(),
                                u16::from(f.code),
                            ),
                            None => DisconnectReason::new("server closed connection"),
                        };
                        return SessionEnd::Lost(reason);
                    }
                    Some(Err(e)) => {
                        let cause = e.to_string();
                        handlers.emit_error(TransportFault::new(&cause, true));
                        return SessionEnd::Lost(DisconnectReason::new(format!(
                            "websocket error: {}",
                            cause
                        )));
                    }
                    None => {
                        return SessionEnd::Lost(DisconnectReason::new("websocket stream ended"));
                    }
                }
            }
        }
    }
}

/// Route an inbound text frame. `pollUpdated` payloads go to the listener
/// slot verbatim; anything unrecognized is dropped, never a hard error.
fn handle_text(text: &str, listeners: &ListenerSlot) {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::PollUpdated { payload }) => listeners.dispatch(&payload),
        Err(e) => log::debug!("[poll-link] ignoring unrecognized event: {}", e),
    }
}

/// Bounded reconnection loop with doubling, capped delays. Close commands
/// interrupt the backoff; join commands arriving mid-reconnect are dropped
/// with a warning (room membership is re-established by the caller).
async fn run_reconnect(
    url: &str,
    options: &ConnectionOptions,
    timeouts: &PollLinkTimeouts,
    handlers: &EventHandlers,
    cmd_rx: &mut mpsc::UnboundedReceiver<TransportCmd>,
) -> Reconnect {
    for attempt in 0..options.max_reconnect_attempts {
        let delay = options.backoff_delay(attempt);
        log::info!(
            "[poll-link] reconnecting in {:?} (attempt {}/{})",
            delay,
            attempt + 1,
            options.max_reconnect_attempts
        );

        let backoff = tokio::time::sleep(delay);
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(TransportCmd::Close) | None => return Reconnect::ClientClosed,
                    Some(TransportCmd::Join(poll_id)) => {
                        log::warn!(
                            "[poll-link] dropping joinPoll for {} while reconnecting",
                            poll_id
                        );
                    }
                },
                _ = &mut backoff => break,
            }
        }

        match dial(url, timeouts.connect_timeout).await {
            Ok(stream) => return Reconnect::Restored(stream),
            Err(e) => {
                handlers.emit_error(TransportFault::new(
                    format!("reconnection attempt {} failed: {}", attempt + 1, e),
                    true,
                ));
            }
        }
    }
    Reconnect::GaveUp(format!(
        "max reconnection attempts ({}) reached",
        options.max_reconnect_attempts
    ))
}
