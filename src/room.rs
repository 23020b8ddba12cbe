//! Poll-room subscription state.
//!
//! Makes "which poll room receives live updates" a single source of truth
//! that tolerates rapid join/leave churn from route navigation and view
//! remounts. At most one room is joined at a time; joining the currently
//! joined room is a no-op, and switching rooms unregisters the old room's
//! listener before anything is registered for the new one.
//!
//! State machine:
//!
//! ```text
//! Idle --join_poll--> Joining --connect ok--> Joined(id)
//! Joining --connect failure--> Idle
//! Joined(id) --join_poll(id)--> Joined(id)        (self-loop, no side effect)
//! Joined(id) --join_poll(other)--> Joining(other)  (implicit leave, then join)
//! Joined(id) --leave_poll--> Idle
//! ```

use crate::connection::ConnectionManager;
use crate::error::{PollLinkError, Result};
use crate::transport::{ListenerToken, UpdateCallback};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tracks the active poll-room membership over a [`ConnectionManager`].
pub struct RoomSubscription {
    manager: Arc<ConnectionManager>,
    state: Mutex<RoomState>,
}

/// Invariant: `listener` is only present while the view that joined
/// `current_room` keeps its update callback registered; both are cleared
/// together on leave.
#[derive(Default)]
struct RoomState {
    current_room: Option<String>,
    listener: Option<ListenerToken>,
}

impl RoomSubscription {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            state: Mutex::new(RoomState::default()),
        }
    }

    /// Join the room for `room_id`.
    ///
    /// Calling with the currently joined id returns immediately: no listener
    /// churn, no re-emitted join event. Otherwise any previous room is left
    /// first, a connection is ensured through the manager (awaiting the
    /// shared connect attempt when one is in flight), and the join event is
    /// emitted. On connect failure the room is not joined and the error
    /// propagates; the caller must retry.
    ///
    /// The internal async lock makes leave-then-join atomic under
    /// concurrent calls: transitions are serialized, never interleaved.
    pub async fn join_poll(&self, room_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.current_room.as_deref() == Some(room_id) {
            return Ok(());
        }

        if st.current_room.is_some() {
            self.leave_locked(&mut st);
        }

        let conn = self.manager.connect().await?;
        if !conn.is_connected() {
            return Err(PollLinkError::ConnectionError(
                "transport is not connected".to_string(),
            ));
        }
        conn.emit_join(room_id)?;
        log::debug!("[poll-link] joined poll room {}", room_id);
        st.current_room = Some(room_id.to_string());
        Ok(())
    }

    /// Leave the active room, unregistering its update listener. No-op when
    /// no room is joined.
    pub async fn leave_poll(&self) {
        let mut st = self.state.lock().await;
        if st.current_room.is_some() || st.listener.is_some() {
            self.leave_locked(&mut st);
        }
    }

    /// Register the callback invoked on every `pollUpdated` event for the
    /// active connection. Registration is connection-scoped with a single
    /// slot: registering while a callback exists replaces it at the
    /// transport level, and the returned token is what a later
    /// unregistration must present.
    pub async fn on_poll_updated(&self, callback: UpdateCallback) -> Result<ListenerToken> {
        let mut st = self.state.lock().await;
        let conn = self.manager.get_connection().ok_or_else(|| {
            PollLinkError::ConnectionError(
                "no active connection; join a poll room first".to_string(),
            )
        })?;
        let token = conn.on_poll_updated(callback);
        st.listener = Some(token);
        Ok(token)
    }

    /// Unregister the update callback registered through this subscription.
    /// No-op when none is registered.
    pub async fn off_poll_updated(&self) {
        let mut st = self.state.lock().await;
        if let Some(token) = st.listener.take() {
            if let Some(conn) = self.manager.get_connection() {
                conn.off_poll_updated(token);
            }
        }
    }

    /// The currently joined room id, if any.
    pub async fn current_room(&self) -> Option<String> {
        self.state.lock().await.current_room.clone()
    }

    fn leave_locked(&self, st: &mut RoomState) {
        if let Some(token) = st.listener.take() {
            if let Some(conn) = self.manager.get_connection() {
                conn.off_poll_updated(token);
            }
        }
        if let Some(room) = st.current_room.take() {
            log::debug!("[poll-link] left poll room {}", room);
        }
    }
}
