//! Shared connection manager for the live transport.
//!
//! Owns the single long-lived transport handle and hides retry mechanics
//! from callers:
//!
//! - One handle per manager; a connected handle is returned as-is with no
//!   network activity
//! - Concurrent `connect()` callers while an attempt is in flight share that
//!   attempt through queued waiters instead of opening duplicate sockets
//! - Exactly one of {connected, connect error, timeout} settles an attempt;
//!   whichever fires first wins and later transitions are observability only
//! - `disconnect()` tears everything down and is a no-op when already
//!   disconnected
//!
//! The manager is an explicitly constructed service object: configuration
//! arrives through the constructor and tests instantiate independent
//! managers with their own [`TransportFactory`].

use crate::error::{PollLinkError, Result};
use crate::event_handlers::EventHandlers;
use crate::models::ConnectionOptions;
use crate::timeouts::PollLinkTimeouts;
use crate::transport::{LinkState, Transport, TransportFactory};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

type ConnectResult = Result<Arc<dyn Transport>>;

/// Manages the single shared transport session.
pub struct ConnectionManager {
    factory: Arc<dyn TransportFactory>,
    options: ConnectionOptions,
    timeouts: PollLinkTimeouts,
    handlers: EventHandlers,
    state: Mutex<ManagerState>,
}

#[derive(Default)]
struct ManagerState {
    /// The one transport handle. At most one is non-null per manager.
    handle: Option<Arc<dyn Transport>>,
    /// True while a connect attempt is in flight.
    connecting: bool,
    /// Callers waiting on the in-flight attempt, in arrival order.
    waiters: Vec<oneshot::Sender<ConnectResult>>,
    /// Bumped by `disconnect()` so a late-settling attempt from before the
    /// reset cannot resurrect its handle into the cleared manager.
    epoch: u64,
}

/// What a `connect()` caller found under the lock.
enum Entry {
    /// A connected handle already exists.
    Ready(Arc<dyn Transport>),
    /// Someone else's attempt is in flight; await its settlement.
    Wait(oneshot::Receiver<ConnectResult>),
    /// This caller leads a fresh attempt, tearing down any stale handle.
    Lead {
        stale: Option<Arc<dyn Transport>>,
        epoch: u64,
    },
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        options: ConnectionOptions,
        timeouts: PollLinkTimeouts,
        handlers: EventHandlers,
    ) -> Self {
        Self {
            factory,
            options,
            timeouts,
            handlers,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Return the shared transport, connecting if necessary.
    ///
    /// Already connected: the existing handle is returned immediately.
    /// Attempt in flight: this caller is enqueued and settles together with
    /// it, bounded by `wait_timeout` (a [`PollLinkError::WaitTimeout`]
    /// when exceeded). Otherwise this caller leads a fresh attempt: any
    /// stale non-connected handle is torn down (listeners cleared first),
    /// a transport is opened with automatic reconnection enabled, and the
    /// attempt settles on the first of connected, connect error, or
    /// `connect_timeout`.
    ///
    /// Failures are returned to the caller and never retried here; call
    /// `connect()` again to retry.
    pub async fn connect(&self) -> ConnectResult {
        let entry = {
            let mut st = self.state.lock().expect("connection state poisoned");
            if st.connecting {
                let (tx, rx) = oneshot::channel();
                st.waiters.push(tx);
                Entry::Wait(rx)
            } else if let Some(handle) = st.handle.as_ref().filter(|h| h.is_connected()) {
                Entry::Ready(handle.clone())
            } else {
                st.connecting = true;
                st.epoch += 1;
                Entry::Lead {
                    stale: st.handle.take(),
                    epoch: st.epoch,
                }
            }
        };

        match entry {
            Entry::Ready(handle) => Ok(handle),
            Entry::Wait(rx) => self.await_shared_attempt(rx).await,
            Entry::Lead { stale, epoch } => self.lead_attempt(stale, epoch).await,
        }
    }

    /// Close the transport and reset all internal state. Queued waiters are
    /// failed rather than left pending. No-op when already disconnected.
    pub fn disconnect(&self) {
        let (handle, waiters) = {
            let mut st = self.state.lock().expect("connection state poisoned");
            st.epoch += 1;
            st.connecting = false;
            (st.handle.take(), std::mem::take(&mut st.waiters))
        };

        if let Some(handle) = handle {
            log::info!("[poll-link] disconnecting live transport");
            handle.clear_listeners();
            handle.close();
        }
        for waiter in waiters {
            let _ = waiter.send(Err(PollLinkError::ConnectionError(
                "disconnected while a connect attempt was in flight".to_string(),
            )));
        }
    }

    /// The current handle, if any. Never triggers a connection attempt.
    pub fn get_connection(&self) -> Option<Arc<dyn Transport>> {
        self.state
            .lock()
            .expect("connection state poisoned")
            .handle
            .clone()
    }

    /// Whether a connected handle currently exists.
    pub fn is_connected(&self) -> bool {
        self.get_connection()
            .map(|handle| handle.is_connected())
            .unwrap_or(false)
    }

    async fn await_shared_attempt(
        &self,
        rx: oneshot::Receiver<ConnectResult>,
    ) -> ConnectResult {
        match tokio::time::timeout(self.timeouts.wait_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PollLinkError::ConnectionError(
                "in-flight connect attempt was abandoned".to_string(),
            )),
            Err(_) => Err(PollLinkError::WaitTimeout(format!(
                "in-flight connect did not settle within {:?}",
                self.timeouts.wait_timeout
            ))),
        }
    }

    async fn lead_attempt(
        &self,
        stale: Option<Arc<dyn Transport>>,
        epoch: u64,
    ) -> ConnectResult {
        if let Some(stale) = stale {
            // Unregister listeners before closing so no callback leaks onto
            // a dead handle.
            log::debug!("[poll-link] tearing down stale transport handle");
            stale.clear_listeners();
            stale.close();
        }

        let transport = self
            .factory
            .open(&self.options, &self.timeouts, &self.handlers);
        let outcome = await_ready(&transport, self.timeouts.connect_timeout).await;

        let (result, waiters) = {
            let mut st = self.state.lock().expect("connection state poisoned");
            if st.epoch != epoch {
                // disconnect() reset the manager mid-attempt. Waiters were
                // already failed there; this handle must not come back.
                drop(st);
                transport.clear_listeners();
                transport.close();
                return Err(PollLinkError::ConnectionError(
                    "connection was reset during the connect attempt".to_string(),
                ));
            }
            st.connecting = false;
            let result = match outcome {
                Ok(()) => {
                    st.handle = Some(transport.clone());
                    Ok(transport)
                }
                Err(err) => {
                    st.handle = None;
                    Err(err)
                }
            };
            (result, std::mem::take(&mut st.waiters))
        };

        if let Err(err) = &result {
            log::warn!("[poll-link] connect attempt failed: {}", err);
        }
        for waiter in waiters {
            let _ = waiter.send(clone_result(&result));
        }
        result
    }
}

/// Await the transport's first settlement: connected, failed, or the bound
/// elapsing. Later state changes never affect the returned result.
async fn await_ready(transport: &Arc<dyn Transport>, bound: Duration) -> Result<()> {
    let mut state_rx = transport.state();
    let deadline = tokio::time::sleep(bound);
    tokio::pin!(deadline);

    loop {
        let snapshot = state_rx.borrow_and_update().clone();
        match snapshot {
            LinkState::Connected => return Ok(()),
            LinkState::Failed(cause) => return Err(PollLinkError::ConnectionError(cause)),
            LinkState::Closed => {
                return Err(PollLinkError::ConnectionError(
                    "transport closed before connecting".to_string(),
                ))
            }
            LinkState::Connecting => {}
        }

        tokio::select! {
            _ = &mut deadline => {
                return Err(PollLinkError::ConnectionTimeout(format!(
                    "no connect event within {:?}",
                    bound
                )));
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Err(PollLinkError::ConnectionError(
                        "transport task exited before connecting".to_string(),
                    ));
                }
            }
        }
    }
}

fn clone_result(result: &ConnectResult) -> ConnectResult {
    match result {
        Ok(handle) => Ok(handle.clone()),
        Err(err) => Err(err.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, MockTransportFactory};
    use std::time::Duration;
    use tokio::time::sleep;

    fn manager(factory: Arc<MockTransportFactory>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            factory,
            ConnectionOptions::default(),
            PollLinkTimeouts::default(),
            EventHandlers::new(),
        ))
    }

    fn manager_with_timeouts(
        factory: Arc<MockTransportFactory>,
        timeouts: PollLinkTimeouts,
    ) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            factory,
            ConnectionOptions::default(),
            timeouts,
            EventHandlers::new(),
        ))
    }

    /// Two concurrent connects before either resolves open exactly one
    /// transport, and both callers resolve to the same handle.
    #[tokio::test]
    async fn test_concurrent_connects_share_one_attempt() {
        let factory = MockTransportFactory::new();
        let scripted = MockTransport::new();
        factory.queue(scripted.clone());
        let manager = manager(factory.clone());

        let m1 = manager.clone();
        let first = tokio::spawn(async move { m1.connect().await });
        let m2 = manager.clone();
        let second = tokio::spawn(async move { m2.connect().await });

        // Both callers are now in flight against a transport that has not
        // settled yet.
        sleep(Duration::from_millis(20)).await;
        assert_eq!(factory.opens(), 1, "second caller must not open a socket");

        scripted.set_connected();
        let h1 = first.await.unwrap().unwrap();
        let h2 = second.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&h1, &h2), "both callers share the same handle");
        assert_eq!(factory.opens(), 1);
    }

    /// A connected handle is reused with no network activity.
    #[tokio::test]
    async fn test_connected_handle_is_reused() {
        let factory = MockTransportFactory::new();
        let manager = manager(factory.clone());

        let h1 = manager.connect().await.unwrap();
        let h2 = manager.connect().await.unwrap();
        assert!(Arc::ptr_eq(&h1, &h2));
        assert_eq!(factory.opens(), 1);
    }

    /// After disconnect, get_connection is None and the next connect is a
    /// full fresh handshake, not stale-state reuse.
    #[tokio::test]
    async fn test_disconnect_resets_fully() {
        let factory = MockTransportFactory::new();
        let manager = manager(factory.clone());

        manager.connect().await.unwrap();
        assert!(manager.get_connection().is_some());

        manager.disconnect();
        assert!(manager.get_connection().is_none());
        let first = &factory.opened()[0];
        assert_eq!(first.clear_calls(), 1, "listeners cleared before close");
        assert_eq!(first.close_calls(), 1);

        manager.connect().await.unwrap();
        assert_eq!(factory.opens(), 2, "fresh handshake after disconnect");
    }

    /// disconnect() when already disconnected is a no-op.
    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let factory = MockTransportFactory::new();
        let manager = manager(factory.clone());
        manager.disconnect();
        manager.disconnect();
        assert!(manager.get_connection().is_none());
        assert_eq!(factory.opens(), 0);
    }

    /// A connect error firing before the connect event rejects the attempt,
    /// and no waiter is left permanently pending.
    #[tokio::test]
    async fn test_connect_error_rejects_leader_and_waiters() {
        let factory = MockTransportFactory::new();
        let scripted = MockTransport::new();
        factory.queue(scripted.clone());
        let manager = manager(factory.clone());

        let m1 = manager.clone();
        let leader = tokio::spawn(async move { m1.connect().await });
        let m2 = manager.clone();
        let waiter = tokio::spawn(async move { m2.connect().await });
        sleep(Duration::from_millis(20)).await;

        scripted.fail("Connection failed");

        let leader_err = leader.await.unwrap().unwrap_err();
        assert!(matches!(leader_err, PollLinkError::ConnectionError(ref c) if c == "Connection failed"));
        let waiter_err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(waiter_err, PollLinkError::ConnectionError(_)));
        assert!(manager.get_connection().is_none());
    }

    /// A silent transport produces a timeout-kind error, distinguishable
    /// from the connect-error kind.
    #[tokio::test]
    async fn test_timeout_is_distinguishable_from_connect_error() {
        let factory = MockTransportFactory::new();
        factory.queue(MockTransport::new()); // never settles
        let manager = manager_with_timeouts(
            factory.clone(),
            PollLinkTimeouts::builder()
                .connect_timeout(Duration::from_millis(50))
                .build(),
        );

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, PollLinkError::ConnectionTimeout(_)));
        assert!(!matches!(err, PollLinkError::ConnectionError(_)));
        assert!(err.is_timeout());
    }

    /// The waiting path has its own bound, rejecting with WaitTimeout.
    #[tokio::test]
    async fn test_waiter_times_out_with_distinct_error() {
        let factory = MockTransportFactory::new();
        let scripted = MockTransport::new();
        factory.queue(scripted.clone());
        let manager = manager_with_timeouts(
            factory.clone(),
            PollLinkTimeouts::builder()
                .connect_timeout(Duration::from_secs(5))
                .wait_timeout(Duration::from_millis(50))
                .build(),
        );

        let m1 = manager.clone();
        let leader = tokio::spawn(async move { m1.connect().await });
        sleep(Duration::from_millis(10)).await;

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, PollLinkError::WaitTimeout(_)));

        scripted.set_connected();
        leader.await.unwrap().unwrap();
    }

    /// A disconnect racing an in-flight attempt must not let the late
    /// settlement resurrect a handle into the reset manager.
    #[tokio::test]
    async fn test_disconnect_invalidates_inflight_attempt() {
        let factory = MockTransportFactory::new();
        let scripted = MockTransport::new();
        factory.queue(scripted.clone());
        let manager = manager(factory.clone());

        let m1 = manager.clone();
        let leader = tokio::spawn(async move { m1.connect().await });
        sleep(Duration::from_millis(10)).await;

        manager.disconnect();
        scripted.set_connected();

        let err = leader.await.unwrap().unwrap_err();
        assert!(matches!(err, PollLinkError::ConnectionError(_)));
        assert!(manager.get_connection().is_none());
        assert!(scripted.close_calls() >= 1, "orphaned transport gets closed");
    }

    /// A stale non-connected handle is torn down (listeners first) before a
    /// fresh dial.
    #[tokio::test]
    async fn test_stale_handle_torn_down_before_redial() {
        let factory = MockTransportFactory::new();
        let manager = manager(factory.clone());

        let handle = manager.connect().await.unwrap();
        let first = factory.opened()[0].clone();
        first.drop_connection();
        assert!(!handle.is_connected());

        manager.connect().await.unwrap();
        assert_eq!(factory.opens(), 2);
        assert_eq!(first.clear_calls(), 1);
        assert_eq!(first.close_calls(), 1);
    }
}
