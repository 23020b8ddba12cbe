//! Transport abstraction for the live connection.
//!
//! [`Transport`] is the seam between the connection/room layers and the
//! actual network: the production implementation is the WebSocket transport
//! in [`crate::websocket`]; tests drive [`crate::mock::MockTransport`].
//! A [`TransportFactory`] opens transports so the [`ConnectionManager`]
//! never constructs one directly.
//!
//! [`ConnectionManager`]: crate::connection::ConnectionManager

use crate::error::{PollLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::ConnectionOptions;
use crate::timeouts::PollLinkTimeouts;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Callback invoked with the opaque payload of every `pollUpdated` event.
pub type UpdateCallback = Arc<dyn Fn(&JsonValue) + Send + Sync>;

/// Opaque handle identifying one listener registration.
///
/// Unregistration requires the token handed out at registration, so a stale
/// holder cannot accidentally remove a newer listener that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

/// Connection phase of a transport, published through a watch channel so
/// an awaiting connect attempt wakes exactly when the phase changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Dialing, or between reconnection attempts.
    #[default]
    Connecting,
    /// Session established; joins and pushes flow.
    Connected,
    /// The transport gave up: initial dial failed, or the reconnect budget
    /// is exhausted. The payload carries the cause.
    Failed(String),
    /// Closed by the client.
    Closed,
}

/// A handle to one live transport session.
///
/// Methods are synchronous: outbound traffic is enqueued to the transport's
/// background task, and connection progress is observed through the
/// [`LinkState`] watch. Exactly one `pollUpdated` listener is active at a
/// time (single-view consumption model); registering a new one replaces the
/// slot.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Subscribe to the transport's connection phase. The receiver holds the
    /// current value, so subscribers never miss a transition that already
    /// happened.
    fn state(&self) -> watch::Receiver<LinkState>;

    /// Whether the session is currently established.
    fn is_connected(&self) -> bool {
        *self.state().borrow() == LinkState::Connected
    }

    /// Send a `joinPoll` event carrying the room id.
    fn emit_join(&self, poll_id: &str) -> Result<()>;

    /// Register the single `pollUpdated` listener, replacing any previous
    /// one. Returns the token required for unregistration.
    fn on_poll_updated(&self, callback: UpdateCallback) -> ListenerToken;

    /// Unregister the listener identified by `token`. Returns false (and
    /// leaves the slot alone) when the token does not match the active
    /// registration.
    fn off_poll_updated(&self, token: ListenerToken) -> bool;

    /// Drop whatever listener is registered, valid token or not. Used when
    /// tearing a handle down so no callback leaks onto a dead transport.
    fn clear_listeners(&self);

    /// Close the session. Idempotent.
    fn close(&self);
}

/// Opens transports on behalf of the [`ConnectionManager`].
///
/// `open` returns immediately with a dialing transport; readiness is
/// observed through [`Transport::state`].
///
/// [`ConnectionManager`]: crate::connection::ConnectionManager
pub trait TransportFactory: Send + Sync {
    fn open(
        &self,
        options: &ConnectionOptions,
        timeouts: &PollLinkTimeouts,
        handlers: &EventHandlers,
    ) -> Arc<dyn Transport>;
}

// ── Single-slot listener registry ───────────────────────────────────────────

/// The one-listener slot shared by transport implementations.
///
/// Registration replaces the occupant and mints a fresh token;
/// unregistration is token-checked. Dispatch clones the callback out of the
/// lock before invoking it, so a callback may re-enter the slot.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    slot: Mutex<Option<(ListenerToken, UpdateCallback)>>,
    next_token: AtomicU64,
}

impl ListenerSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, callback: UpdateCallback) -> ListenerToken {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut slot = self.slot.lock().expect("listener slot poisoned");
        if slot.is_some() {
            log::debug!("[poll-link] replacing active pollUpdated listener");
        }
        *slot = Some((token, callback));
        token
    }

    pub(crate) fn unregister(&self, token: ListenerToken) -> bool {
        let mut slot = self.slot.lock().expect("listener slot poisoned");
        match *slot {
            Some((active, _)) if active == token => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear(&self) {
        let mut slot = self.slot.lock().expect("listener slot poisoned");
        *slot = None;
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.slot.lock().expect("listener slot poisoned").is_some()
    }

    pub(crate) fn dispatch(&self, payload: &JsonValue) {
        let callback = {
            let slot = self.slot.lock().expect("listener slot poisoned");
            slot.as_ref().map(|(_, cb)| cb.clone())
        };
        if let Some(cb) = callback {
            cb(payload);
        }
    }
}

/// Map a failed `try_send` into the transport error surfaced to callers.
pub(crate) fn task_gone() -> PollLinkError {
    PollLinkError::TransportError("transport task is not running".to_string())
}
