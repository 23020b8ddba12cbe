//! Client library for the live polling service.
//!
//! Provides the HTTP wrappers for poll/vote CRUD and the real-time
//! synchronization layer: a shared live connection, single-room
//! subscriptions scoped to the poll being viewed, and a reconciler that
//! merges server pushes with optimistic local vote state.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use poll_link::PollLinkClient;
//! use std::sync::Arc;
//!
//! # async fn example() -> poll_link::Result<()> {
//! let client = PollLinkClient::builder()
//!     .base_url("http://localhost:5000/v1")
//!     .bearer_token("eyJhbGc...")
//!     .build()?;
//!
//! // Mount: fetch the poll, join its room, wire the push listener.
//! let (view, mut updates) = client.open_poll("poll-1").await?;
//! client.join_live("poll-1").await?;
//!
//! let reconciler = client.reconciler().clone();
//! let view = Arc::new(view);
//! let refresh_view = view.clone();
//! client
//!     .on_poll_updated(Arc::new(move |_payload| {
//!         // A push is only a refresh signal; refetch authoritatively.
//!         let reconciler = reconciler.clone();
//!         let view = refresh_view.clone();
//!         tokio::spawn(async move {
//!             let _ = reconciler.refresh(&view).await;
//!         });
//!     }))
//!     .await?;
//!
//! // Vote optimistically; the reconciler rolls back on failure.
//! client.reconciler().cast_vote(&view, "option-2").await?;
//!
//! // Re-render on every proposed state.
//! while updates.changed().await.is_ok() {
//!     let state = updates.borrow().clone();
//!     println!("{} votes", state.poll.total_votes);
//! }
//!
//! // Unmount.
//! client.leave_live().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod client;
pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod mock;
pub mod models;
pub mod reconciler;
pub mod room;
pub mod timeouts;
pub mod transport;
pub mod websocket;

pub use api::{HttpPollApi, PollBackend};
pub use auth::AuthProvider;
pub use client::{PollLinkClient, PollLinkClientBuilder};
pub use connection::ConnectionManager;
pub use error::{PollLinkError, Result};
pub use event_handlers::{DisconnectReason, EventHandlers, TransportFault};
pub use models::{
    ApiErrorBody, ApiErrorMessage, ClientEvent, ConnectionOptions, CreatePollRequest,
    LoginRequest, LoginResponse, PageMeta, PaginatedResponse, Poll, PollOption, PollStatus,
    PollVisibility, RegisterRequest, ServerEvent, TransportKind, User, VoteReceipt,
};
pub use reconciler::{PollViewState, TallyReconciler};
pub use room::RoomSubscription;
pub use timeouts::{PollLinkTimeouts, PollLinkTimeoutsBuilder};
pub use transport::{LinkState, ListenerToken, Transport, TransportFactory, UpdateCallback};
pub use websocket::{WsTransport, WsTransportFactory};
