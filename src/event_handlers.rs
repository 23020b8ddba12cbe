//! Connection lifecycle event hooks.
//!
//! Callback-based hooks for observing the live transport:
//!
//! - [`on_connect`](EventHandlers::on_connect): fired when the transport is established
//! - [`on_disconnect`](EventHandlers::on_disconnect): fired when the transport closes
//! - [`on_error`](EventHandlers::on_error): fired on connection errors
//!
//! These hooks are observability only. Connect failures still surface as
//! rejected operations to the caller of `connect()` / `join_poll()`; nothing
//! here swallows them.
//!
//! # Example
//!
//! ```rust
//! use poll_link::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_connect(|| println!("live connection up"))
//!     .on_disconnect(|reason| println!("live connection down: {}", reason))
//!     .on_error(|err| eprintln!("transport error: {}", err));
//! ```

use std::fmt;
use std::sync::Arc;

/// Reason for a disconnect event.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    /// Human-readable description of why the connection closed.
    pub message: String,
    /// WebSocket close code, if available (1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone)]
pub struct TransportFault {
    /// Human-readable error message.
    pub message: String,
    /// Whether auto-reconnect may still recover the session.
    pub recoverable: bool,
}

impl TransportFault {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Type alias for the on_connect callback.
pub type OnConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Type alias for the on_disconnect callback.
pub type OnDisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Type alias for the on_error callback.
pub type OnErrorCallback = Arc<dyn Fn(TransportFault) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional; register only what you need. Handlers are
/// `Send + Sync` so they can be invoked from the transport's background
/// task.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl EventHandlers {
    /// Create an empty `EventHandlers` (no callbacks registered).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when the transport is established,
    /// including after an automatic reconnect.
    pub fn on_connect(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when the transport closes, with the
    /// [`DisconnectReason`].
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked on connection errors. The
    /// [`TransportFault`] says whether auto-reconnect may still recover.
    pub fn on_error(mut self, f: impl Fn(TransportFault) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb();
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, fault: TransportFault) {
        if let Some(cb) = &self.on_error {
            cb(fault);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_dispatches_registered_handlers() {
        let connects = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let c = connects.clone();
        let e = errors.clone();
        let handlers = EventHandlers::new()
            .on_connect(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            });

        handlers.emit_connect();
        handlers.emit_connect();
        handlers.emit_error(TransportFault::new("boom", true));
        // No disconnect handler registered; emit must be a no-op.
        handlers.emit_disconnect(DisconnectReason::new("bye"));

        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_reason_display() {
        let plain = DisconnectReason::new("server closed connection");
        assert_eq!(plain.to_string(), "server closed connection");
        let coded = DisconnectReason::with_code("client closed", 1000);
        assert_eq!(coded.to_string(), "client closed (code: 1000)");
    }
}
