//! Vote/tally reconciliation.
//!
//! Decides, for every local vote action and every inbound push signal, what
//! the displayed poll state should become, without race-induced flicker or
//! stale overwrite. The reconciler owns no snapshot: the view owns its
//! state through a `watch` channel and the reconciler proposes merged
//! states into it.
//!
//! Local mutations are optimistic: the proposal is applied before the
//! request resolves, then replaced wholesale by an authoritative refetch on
//! success or rolled back on failure. Push events are refresh signals only;
//! their payload is never trusted as the new truth.
//!
//! Sequencing policy: every mutating operation and every refresh serialize
//! on one internal lock. A push-triggered refetch therefore runs only after
//! an in-flight local mutation settles, and can never stomp the optimistic
//! fields mid-request. After a refetch the displayed `voted_option` is the
//! server's; a pending `selected_option` is purely local UI state and is
//! left untouched. Once all in-flight requests settle and one refresh has
//! run, the displayed `voted_option` equals the server's view.

use crate::api::PollBackend;
use crate::error::Result;
use crate::models::{Poll, PollStatus, VoteReceipt};
use tokio::sync::watch;

/// The state a poll-detail view displays.
#[derive(Debug, Clone, PartialEq)]
pub struct PollViewState {
    pub poll: Poll,
    /// The option the viewer has voted for, as currently displayed. May be
    /// optimistic while a vote request is in flight.
    pub voted_option: Option<String>,
    /// The option the viewer has highlighted but not yet confirmed. Local
    /// UI state; the server never sees it.
    pub selected_option: Option<String>,
}

impl PollViewState {
    /// Build the view state from an authoritative poll snapshot.
    pub fn new(poll: Poll) -> Self {
        let voted_option = poll.user_vote.clone();
        Self {
            poll,
            voted_option,
            selected_option: None,
        }
    }
}

/// Merges server-pushed refresh signals and local vote actions into the
/// view-owned state.
pub struct TallyReconciler<B> {
    backend: B,
    /// Serializes mutations and refreshes; see the module docs.
    mutation_lock: tokio::sync::Mutex<()>,
}

impl<B: PollBackend> TallyReconciler<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            mutation_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Initial authoritative fetch for a view about to mount.
    pub async fn load(&self, poll_id: &str) -> Result<PollViewState> {
        let poll = self.backend.fetch_poll(poll_id).await?;
        if !poll.tally_consistent() {
            log::warn!(
                "[poll-link] poll {} tallies do not sum to totalVotes ({})",
                poll.id,
                poll.total_votes
            );
        }
        Ok(PollViewState::new(poll))
    }

    /// Cast a vote for `option_id`.
    ///
    /// `voted_option` is set and the pending selection cleared before the
    /// request goes out. On success the snapshot is replaced wholesale by a
    /// refetch; on failure `voted_option` rolls back to its prior value and
    /// the error is returned exactly once.
    pub async fn cast_vote(
        &self,
        view: &watch::Sender<PollViewState>,
        option_id: &str,
    ) -> Result<VoteReceipt> {
        let _guard = self.mutation_lock.lock().await;
        let (poll_id, previous) = {
            let state = view.borrow();
            (state.poll.id.clone(), state.voted_option.clone())
        };

        view.send_modify(|state| {
            state.voted_option = Some(option_id.to_string());
            state.selected_option = None;
        });

        match self.backend.create_vote(&poll_id, option_id).await {
            Ok(receipt) => {
                self.replace_from_server(view, &poll_id).await?;
                Ok(receipt)
            }
            Err(err) => {
                view.send_modify(|state| state.voted_option = previous);
                Err(err)
            }
        }
    }

    /// Withdraw the viewer's vote. Symmetric with [`Self::cast_vote`]:
    /// optimistically clear, refetch on success, roll back on failure.
    pub async fn cancel_vote(&self, view: &watch::Sender<PollViewState>) -> Result<()> {
        let _guard = self.mutation_lock.lock().await;
        let (poll_id, previous) = {
            let state = view.borrow();
            (state.poll.id.clone(), state.voted_option.clone())
        };

        view.send_modify(|state| state.voted_option = None);

        match self.backend.delete_vote(&poll_id).await {
            Ok(()) => self.replace_from_server(view, &poll_id).await,
            Err(err) => {
                view.send_modify(|state| state.voted_option = previous);
                Err(err)
            }
        }
    }

    /// Close the poll (owner action), with the same
    /// optimistic-then-refetch pattern on the status field.
    pub async fn close_poll(&self, view: &watch::Sender<PollViewState>) -> Result<()> {
        let _guard = self.mutation_lock.lock().await;
        let (poll_id, previous) = {
            let state = view.borrow();
            (state.poll.id.clone(), state.poll.status)
        };

        view.send_modify(|state| state.poll.status = PollStatus::Closed);

        match self.backend.close_poll(&poll_id).await {
            Ok(_closed) => self.replace_from_server(view, &poll_id).await,
            Err(err) => {
                view.send_modify(|state| state.poll.status = previous);
                Err(err)
            }
        }
    }

    /// Handle a `pollUpdated` push: refetch the authoritative snapshot.
    ///
    /// Waits for any in-flight local mutation to settle first, so the
    /// optimistic fields are never stomped mid-request. When the stream is
    /// down this is also the manual-refresh path: live updates degrade to
    /// HTTP without further ceremony.
    pub async fn refresh(&self, view: &watch::Sender<PollViewState>) -> Result<()> {
        let _guard = self.mutation_lock.lock().await;
        let poll_id = view.borrow().poll.id.clone();
        self.replace_from_server(view, &poll_id).await
    }

    /// Refetch and replace the snapshot wholesale. `voted_option` follows
    /// the server payload; `selected_option` stays local.
    async fn replace_from_server(
        &self,
        view: &watch::Sender<PollViewState>,
        poll_id: &str,
    ) -> Result<()> {
        let poll = self.backend.fetch_poll(poll_id).await?;
        if !poll.tally_consistent() {
            log::warn!(
                "[poll-link] poll {} tallies do not sum to totalVotes ({})",
                poll.id,
                poll.total_votes
            );
        }
        view.send_modify(|state| {
            state.voted_option = poll.user_vote.clone();
            state.poll = poll;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PollLinkError;
    use crate::models::{
        CreatePollRequest, PaginatedResponse, PollOption, PollVisibility, User,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::sleep;

    fn poll_with(votes: &[(&str, u64)], user_vote: Option<&str>) -> Poll {
        let options = votes
            .iter()
            .map(|(id, count)| PollOption {
                id: id.to_string(),
                text: format!("option {}", id),
                votes_count: *count,
                created_at: "2026-01-01T00:00:00Z".to_string(),
            })
            .collect::<Vec<_>>();
        let total = votes.iter().map(|(_, c)| c).sum();
        Poll {
            id: "poll-1".to_string(),
            title: "Best language".to_string(),
            description: "Vote".to_string(),
            visibility: PollVisibility::Public,
            status: PollStatus::Open,
            options,
            creator: User {
                id: "u1".to_string(),
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
            },
            total_votes: total,
            user_vote: user_vote.map(str::to_string),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn receipt() -> VoteReceipt {
        VoteReceipt {
            id: "v1".to_string(),
            user_id: "u1".to_string(),
            poll_id: "poll-1".to_string(),
            option_id: "1".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn rejection() -> PollLinkError {
        PollLinkError::RemoteRejection {
            status_code: 409,
            error: "Conflict".to_string(),
            message: "User has already voted in this poll".to_string(),
        }
    }

    /// Scripted backend: queued responses per operation, plus a call log
    /// for asserting sequencing. An optional delay before each vote call
    /// lets tests observe optimistic state mid-flight.
    #[derive(Default)]
    struct ScriptedBackend {
        fetches: Mutex<VecDeque<Result<Poll>>>,
        votes: Mutex<VecDeque<Result<VoteReceipt>>>,
        deletes: Mutex<VecDeque<Result<()>>>,
        closes: Mutex<VecDeque<Result<Poll>>>,
        calls: Mutex<Vec<String>>,
        vote_delay: Option<Duration>,
    }

    impl ScriptedBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn with_vote_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                vote_delay: Some(delay),
                ..Self::default()
            })
        }

        fn queue_fetch(&self, result: Result<Poll>) {
            self.fetches.lock().unwrap().push_back(result);
        }

        fn queue_vote(&self, result: Result<VoteReceipt>) {
            self.votes.lock().unwrap().push_back(result);
        }

        fn queue_delete(&self, result: Result<()>) {
            self.deletes.lock().unwrap().push_back(result);
        }

        fn queue_close(&self, result: Result<Poll>) {
            self.closes.lock().unwrap().push_back(result);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn pop<T>(queue: &Mutex<VecDeque<Result<T>>>, op: &str) -> Result<T> {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response for {}", op))
        }
    }

    #[async_trait]
    impl PollBackend for Arc<ScriptedBackend> {
        async fn list_polls(
            &self,
            _page: u32,
            _limit: u32,
            _search: Option<&str>,
        ) -> Result<PaginatedResponse<Poll>> {
            unreachable!("list_polls is not exercised by reconciler tests")
        }

        async fn fetch_poll(&self, _poll_id: &str) -> Result<Poll> {
            self.calls.lock().unwrap().push("fetch".to_string());
            ScriptedBackend::pop(&self.fetches, "fetch_poll")
        }

        async fn create_poll(&self, _request: &CreatePollRequest) -> Result<Poll> {
            unreachable!("create_poll is not exercised by reconciler tests")
        }

        async fn close_poll(&self, _poll_id: &str) -> Result<Poll> {
            self.calls.lock().unwrap().push("close".to_string());
            ScriptedBackend::pop(&self.closes, "close_poll")
        }

        async fn create_vote(&self, _poll_id: &str, _option_id: &str) -> Result<VoteReceipt> {
            self.calls.lock().unwrap().push("vote".to_string());
            if let Some(delay) = self.vote_delay {
                sleep(delay).await;
            }
            ScriptedBackend::pop(&self.votes, "create_vote")
        }

        async fn delete_vote(&self, _poll_id: &str) -> Result<()> {
            self.calls.lock().unwrap().push("delete".to_string());
            ScriptedBackend::pop(&self.deletes, "delete_vote")
        }

        fn has_credentials(&self) -> bool {
            true
        }
    }

    /// A failed vote rolls the displayed voted_option back to its pre-call
    /// value and surfaces the error exactly once.
    #[tokio::test]
    async fn test_failed_vote_rolls_back() {
        let backend = ScriptedBackend::new();
        backend.queue_vote(Err(rejection()));
        let reconciler = TallyReconciler::new(backend.clone());

        let (view, _rx) = watch::channel(PollViewState::new(poll_with(&[("1", 5)], None)));
        let err = reconciler.cast_vote(&view, "1").await.unwrap_err();
        assert!(matches!(err, PollLinkError::RemoteRejection { .. }));
        assert_eq!(view.borrow().voted_option, None, "rolled back to pre-call value");
        assert_eq!(backend.calls(), vec!["vote"], "no refetch after a failed vote");
    }

    /// A successful vote is optimistic first, then replaced wholesale by
    /// the authoritative refetch.
    #[tokio::test]
    async fn test_successful_vote_refetches_authoritative_state() {
        let backend = ScriptedBackend::new();
        backend.queue_vote(Ok(receipt()));
        backend.queue_fetch(Ok(poll_with(&[("1", 6), ("2", 3)], Some("1"))));
        let reconciler = TallyReconciler::new(backend.clone());

        let (view, _rx) = watch::channel(PollViewState::new(poll_with(
            &[("1", 5), ("2", 3)],
            None,
        )));
        reconciler.cast_vote(&view, "1").await.unwrap();

        let state = view.borrow().clone();
        assert_eq!(state.voted_option.as_deref(), Some("1"));
        assert_eq!(state.poll.options[0].votes_count, 6);
        assert_eq!(state.poll.total_votes, 9);
        assert_eq!(backend.calls(), vec!["vote", "fetch"]);
    }

    /// The optimistic proposal is visible while the vote request is still
    /// in flight, with the pending selection cleared.
    #[tokio::test]
    async fn test_optimistic_state_visible_mid_flight() {
        let backend = ScriptedBackend::with_vote_delay(Duration::from_millis(50));
        backend.queue_vote(Ok(receipt()));
        backend.queue_fetch(Ok(poll_with(&[("1", 6)], Some("1"))));
        let reconciler = Arc::new(TallyReconciler::new(backend));

        let mut initial = PollViewState::new(poll_with(&[("1", 5)], None));
        initial.selected_option = Some("1".to_string());
        let (view, rx) = watch::channel(initial);
        let view = Arc::new(view);

        let r = reconciler.clone();
        let v = view.clone();
        let vote = tokio::spawn(async move { r.cast_vote(&v, "1").await });

        sleep(Duration::from_millis(10)).await;
        let mid_flight = rx.borrow().clone();
        assert_eq!(mid_flight.voted_option.as_deref(), Some("1"));
        assert_eq!(mid_flight.selected_option, None, "selection cleared on confirm");

        vote.await.unwrap().unwrap();
    }

    /// Vote recorded but the follow-up refetch failed: the error surfaces
    /// as transient and the optimistic value stays (no rollback, the vote
    /// did happen).
    #[tokio::test]
    async fn test_vote_success_with_failed_refetch_keeps_optimistic() {
        let backend = ScriptedBackend::new();
        backend.queue_vote(Ok(receipt()));
        backend.queue_fetch(Err(PollLinkError::NetworkError("connection reset".into())));
        let reconciler = TallyReconciler::new(backend);

        let (view, _rx) = watch::channel(PollViewState::new(poll_with(&[("1", 5)], None)));
        let err = reconciler.cast_vote(&view, "1").await.unwrap_err();
        assert!(matches!(err, PollLinkError::NetworkError(_)));
        assert_eq!(view.borrow().voted_option.as_deref(), Some("1"));
    }

    /// Vote cancellation is symmetric: optimistic clear, rollback on
    /// failure.
    #[tokio::test]
    async fn test_failed_cancellation_rolls_back() {
        let backend = ScriptedBackend::new();
        backend.queue_delete(Err(rejection()));
        let reconciler = TallyReconciler::new(backend);

        let (view, _rx) = watch::channel(PollViewState::new(poll_with(
            &[("1", 5)],
            Some("1"),
        )));
        let err = reconciler.cancel_vote(&view).await.unwrap_err();
        assert!(matches!(err, PollLinkError::RemoteRejection { .. }));
        assert_eq!(view.borrow().voted_option.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_successful_cancellation_refetches() {
        let backend = ScriptedBackend::new();
        backend.queue_delete(Ok(()));
        backend.queue_fetch(Ok(poll_with(&[("1", 4)], None)));
        let reconciler = TallyReconciler::new(backend);

        let (view, _rx) = watch::channel(PollViewState::new(poll_with(
            &[("1", 5)],
            Some("1"),
        )));
        reconciler.cancel_vote(&view).await.unwrap();
        let state = view.borrow().clone();
        assert_eq!(state.voted_option, None);
        assert_eq!(state.poll.options[0].votes_count, 4);
    }

    /// Closing follows the same optimistic-then-refetch pattern on the
    /// status field.
    #[tokio::test]
    async fn test_close_poll_rolls_back_on_failure() {
        let backend = ScriptedBackend::new();
        backend.queue_close(Err(rejection()));
        let reconciler = TallyReconciler::new(backend);

        let (view, _rx) = watch::channel(PollViewState::new(poll_with(&[("1", 5)], None)));
        reconciler.close_poll(&view).await.unwrap_err();
        assert_eq!(view.borrow().poll.status, PollStatus::Open);
    }

    /// A push-triggered refresh is sequenced after an in-flight local
    /// mutation settles; it never stomps the optimistic fields mid-request.
    #[tokio::test]
    async fn test_refresh_waits_for_inflight_mutation() {
        let backend = ScriptedBackend::with_vote_delay(Duration::from_millis(50));
        backend.queue_vote(Ok(receipt()));
        backend.queue_fetch(Ok(poll_with(&[("1", 6)], Some("1")))); // cast_vote refetch
        backend.queue_fetch(Ok(poll_with(&[("1", 6)], Some("1")))); // refresh refetch
        let reconciler = Arc::new(TallyReconciler::new(backend.clone()));

        let (view, _rx) = watch::channel(PollViewState::new(poll_with(&[("1", 5)], None)));
        let view = Arc::new(view);

        let r = reconciler.clone();
        let v = view.clone();
        let vote = tokio::spawn(async move { r.cast_vote(&v, "1").await });
        sleep(Duration::from_millis(10)).await;

        // Push arrives while the vote request is still in flight.
        reconciler.refresh(&view).await.unwrap();

        vote.await.unwrap().unwrap();
        assert_eq!(
            backend.calls(),
            vec!["vote", "fetch", "fetch"],
            "refresh ran only after the mutation settled"
        );
        assert_eq!(view.borrow().voted_option.as_deref(), Some("1"));
    }

    /// A refresh replaces the snapshot but leaves the pending local
    /// selection alone.
    #[tokio::test]
    async fn test_refresh_preserves_pending_selection() {
        let backend = ScriptedBackend::new();
        backend.queue_fetch(Ok(poll_with(&[("1", 9)], None)));
        let reconciler = TallyReconciler::new(backend);

        let mut initial = PollViewState::new(poll_with(&[("1", 5)], None));
        initial.selected_option = Some("1".to_string());
        let (view, _rx) = watch::channel(initial);

        reconciler.refresh(&view).await.unwrap();
        let state = view.borrow().clone();
        assert_eq!(state.poll.options[0].votes_count, 9);
        assert_eq!(state.selected_option.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_load_builds_view_state_from_server_vote() {
        let backend = ScriptedBackend::new();
        backend.queue_fetch(Ok(poll_with(&[("1", 5)], Some("1"))));
        let reconciler = TallyReconciler::new(backend);

        let state = reconciler.load("poll-1").await.unwrap();
        assert_eq!(state.voted_option.as_deref(), Some("1"));
        assert_eq!(state.selected_option, None);
    }
}
