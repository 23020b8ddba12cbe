//! In-process mock transport for tests.
//!
//! Shipped as a regular module (not `#[cfg(test)]`) so both unit tests and
//! `tests/` integration tests can drive the connection, room, and consumer
//! layers without a network. [`MockTransport`] starts in
//! [`LinkState::Connecting`] and moves only when told to, which lets tests
//! hold concurrent `connect()` callers in flight deterministically.

use crate::error::Result;
use crate::event_handlers::EventHandlers;
use crate::models::ConnectionOptions;
use crate::timeouts::PollLinkTimeouts;
use crate::transport::{
    task_gone, LinkState, ListenerSlot, ListenerToken, Transport, TransportFactory, UpdateCallback,
};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// A scriptable [`Transport`] that records everything done to it.
pub struct MockTransport {
    state_tx: watch::Sender<LinkState>,
    state_rx: watch::Receiver<LinkState>,
    listeners: ListenerSlot,
    joins: Mutex<Vec<String>>,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
    clear_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockTransport {
    /// A transport parked in [`LinkState::Connecting`] until scripted.
    pub fn new() -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        Arc::new(Self {
            state_tx,
            state_rx,
            listeners: ListenerSlot::new(),
            joins: Mutex::new(Vec::new()),
            registrations: AtomicUsize::new(0),
            unregistrations: AtomicUsize::new(0),
            clear_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        })
    }

    // ── scripting ──────────────────────────────────────────────────────────

    /// Simulate the transport reporting "connected".
    pub fn set_connected(&self) {
        let _ = self.state_tx.send(LinkState::Connected);
    }

    /// Simulate a `connect_error` with the given cause.
    pub fn fail(&self, cause: impl Into<String>) {
        let _ = self.state_tx.send(LinkState::Failed(cause.into()));
    }

    /// Simulate an established session dropping back to reconnecting.
    pub fn drop_connection(&self) {
        let _ = self.state_tx.send(LinkState::Connecting);
    }

    /// Deliver a `pollUpdated` push to whatever listener is registered.
    pub fn push_update(&self, payload: JsonValue) {
        self.listeners.dispatch(&payload);
    }

    // ── recordings ─────────────────────────────────────────────────────────

    /// Every `joinPoll` emission, in order.
    pub fn joins(&self) -> Vec<String> {
        self.joins.lock().expect("joins poisoned").clone()
    }

    /// How many listener registrations happened.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// How many token-matched unregistrations happened.
    pub fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }

    /// How many blanket `clear_listeners` calls happened.
    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Whether a `pollUpdated` listener is currently registered.
    pub fn listener_registered(&self) -> bool {
        self.listeners.is_registered()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

impl Transport for MockTransport {
    fn state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    fn emit_join(&self, poll_id: &str) -> Result<()> {
        if *self.state_rx.borrow() == LinkState::Closed {
            return Err(task_gone());
        }
        self.joins
            .lock()
            .expect("joins poisoned")
            .push(poll_id.to_string());
        Ok(())
    }

    fn on_poll_updated(&self, callback: UpdateCallback) -> ListenerToken {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.listeners.register(callback)
    }

    fn off_poll_updated(&self, token: ListenerToken) -> bool {
        let removed = self.listeners.unregister(token);
        if removed {
            self.unregistrations.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    fn clear_listeners(&self) {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        self.listeners.clear();
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let _ = self.state_tx.send(LinkState::Closed);
    }
}

/// Factory that hands out [`MockTransport`]s and counts opens.
///
/// Scripted transports queued with [`MockTransportFactory::queue`] are
/// handed out first, parked in `Connecting` for the test to settle; once
/// the queue is empty, freshly opened transports connect immediately.
#[derive(Default)]
pub struct MockTransportFactory {
    scripted: Mutex<VecDeque<Arc<MockTransport>>>,
    opened: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a pre-built transport for the next `open` call.
    pub fn queue(&self, transport: Arc<MockTransport>) {
        self.scripted
            .lock()
            .expect("scripted poisoned")
            .push_back(transport);
    }

    /// How many transports this factory has opened. Concurrent connect
    /// callers must leave this at exactly one.
    pub fn opens(&self) -> usize {
        self.opened.lock().expect("opened poisoned").len()
    }

    /// The transports handed out so far, in open order.
    pub fn opened(&self) -> Vec<Arc<MockTransport>> {
        self.opened.lock().expect("opened poisoned").clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn open(
        &self,
        _options: &ConnectionOptions,
        _timeouts: &PollLinkTimeouts,
        _handlers: &EventHandlers,
    ) -> Arc<dyn Transport> {
        let transport = self
            .scripted
            .lock()
            .expect("scripted poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                let t = MockTransport::new();
                t.set_connected();
                t
            });
        self.opened
            .lock()
            .expect("opened poisoned")
            .push(transport.clone());
        transport
    }
}
