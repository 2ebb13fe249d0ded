//! Conversation session layer.
//!
//! [`ConversationSession`] owns everything tied to the active conversation:
//! the [`MessageStore`](store::MessageStore), the
//! [`OptimisticAppender`](optimistic::OptimisticAppender), the
//! [`PollScheduler`] and the poll task driving it. Switching conversations
//! tears all of that down and rebuilds it; a fetch that completes for a
//! conversation that is no longer active is discarded, never merged.
//!
//! The session is cheap to clone. Clones share state, so one clone can
//! send while another switches. State changes are published as
//! [`SessionEvent`]s on the channel returned by [`ConversationSession::new`].

pub mod lifecycle;
pub mod optimistic;
pub mod send;
pub mod store;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use vidchat_proto::message::{Conversation, ConversationId, Message, Role, Timestamp};

use crate::poll::driver::{PollHandle, TickControl, Ticker};
use crate::poll::{PollConfig, PollPhase, PollScheduler, PollStatus, StopReason, TickResult, Transition};
use crate::sync::{SyncClient, SyncError};

use optimistic::OptimisticAppender;
use store::MessageStore;

/// User-facing failures of session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The backend refused or failed to create a conversation.
    #[error("could not create conversation: {0}")]
    Creation(#[source] SyncError),

    /// The message could not be delivered. An error notice has been
    /// appended to the timeline.
    #[error("could not send message: {0}")]
    Send(#[source] SyncError),

    /// Loading conversation history failed.
    #[error("could not load messages: {0}")]
    Fetch(#[source] SyncError),

    /// Renaming a conversation failed.
    #[error("could not rename conversation: {0}")]
    Rename(#[source] SyncError),

    /// Deleting a conversation failed.
    #[error("could not delete conversation: {0}")]
    Delete(#[source] SyncError),

    /// Listing conversations failed.
    #[error("could not list conversations: {0}")]
    Refresh(#[source] SyncError),

    /// Neither text nor attachments were given.
    #[error("message is empty")]
    EmptyMessage,

    /// A conversation title was blank.
    #[error("title is empty")]
    EmptyTitle,

    /// The operation needs an active conversation and there is none.
    #[error("no active conversation")]
    NoActiveConversation,
}

/// Notifications for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The visible timeline changed. Carries the full sorted snapshot.
    MessagesChanged {
        /// Conversation the snapshot belongs to.
        conversation_id: Option<ConversationId>,
        /// Messages ascending by `created_at`.
        messages: Vec<Message>,
    },
    /// Poll phase, cadence or failure count changed.
    PollStateChanged(PollStatus),
    /// Polling gave up after repeated hard failures.
    ConnectionLost {
        /// Conversation that was being polled.
        conversation_id: ConversationId,
        /// Consecutive hard failures counted.
        failures: u32,
        /// The last failure.
        error: SyncError,
    },
    /// A different conversation (or none) is now active.
    ActiveConversationChanged(Option<Conversation>),
    /// The cached conversation list changed.
    ConversationsChanged(Vec<Conversation>),
}

/// Tunables for [`ConversationSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Poll cadence, failure thresholds and fetch deadline.
    pub poll: PollConfig,
    /// Capacity of the event channel.
    pub event_buffer: usize,
    /// Length limit for titles derived from a first message.
    pub title_max_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            event_buffer: 64,
            title_max_chars: 30,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// Polling is inactive or another tick was in flight; nothing fetched.
    Skipped,
    /// The conversation changed during the fetch; the result was discarded.
    Stale,
    /// The fetch succeeded.
    Merged {
        /// Messages that were new to the store.
        added: usize,
        /// Optimistic entries confirmed by the server.
        promoted: usize,
    },
    /// Timeout or not-found; ignored.
    BenignFailure,
    /// A failure counted toward the connection-lost threshold.
    HardFailure(SyncError),
    /// The tick ended polling.
    Stopped(StopReason),
}

#[derive(Debug)]
struct SessionState {
    active: Option<Conversation>,
    /// Bumped on every switch; results tagged with an older value are stale.
    generation: u64,
    store: MessageStore,
    appender: OptimisticAppender,
    scheduler: PollScheduler,
    poller: Option<PollHandle>,
    conversations: Vec<Conversation>,
    token_balance: Option<i64>,
}

impl SessionState {
    fn active_id(&self) -> Option<&ConversationId> {
        self.active.as_ref().map(|c| &c.id)
    }

    fn snapshot(&self) -> SessionEvent {
        SessionEvent::MessagesChanged {
            conversation_id: self.active_id().cloned(),
            messages: self.store.sorted_view(),
        }
    }

    /// Stops the scheduler and drops the poll task.
    fn halt_polling(&mut self, reason: StopReason) {
        self.scheduler.stop(reason);
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
    }
}

struct Shared<C> {
    client: C,
    config: SessionConfig,
    state: Mutex<SessionState>,
    event_tx: mpsc::Sender<SessionEvent>,
}

/// The active-conversation context and its sync machinery.
pub struct ConversationSession<C: SyncClient + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: SyncClient + 'static> Clone for ConversationSession<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: SyncClient + 'static> ConversationSession<C> {
    /// Creates a session with no active conversation.
    ///
    /// Returns the session and a receiver for [`SessionEvent`]s that the
    /// rendering layer should consume.
    pub fn new(client: C, config: SessionConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let state = SessionState {
            active: None,
            generation: 0,
            store: MessageStore::new(),
            appender: OptimisticAppender::new(),
            scheduler: PollScheduler::new(config.poll.clone()),
            poller: None,
            conversations: Vec::new(),
            token_balance: None,
        };
        let shared = Arc::new(Shared {
            client,
            config,
            state: Mutex::new(state),
            event_tx,
        });
        (Self { shared }, event_rx)
    }

    /// The backend client.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.shared.client
    }

    /// The session's tunables.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// The active conversation, if any.
    #[must_use]
    pub fn active_conversation(&self) -> Option<Conversation> {
        self.shared.state.lock().active.clone()
    }

    /// Sorted snapshot of the active conversation's messages.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.shared.state.lock().store.sorted_view()
    }

    /// Current poll status.
    #[must_use]
    pub fn poll_status(&self) -> PollStatus {
        self.shared.state.lock().scheduler.status()
    }

    /// Last token balance reported by the backend.
    #[must_use]
    pub fn token_balance(&self) -> Option<i64> {
        self.shared.state.lock().token_balance
    }

    /// Cached conversation list from the last refresh.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.shared.state.lock().conversations.clone()
    }

    /// Runs one poll cycle for the active conversation right now.
    ///
    /// Skipped if polling is not active or a tick is already in flight.
    pub async fn poll_once(&self) -> TickReport {
        let target = {
            let state = self.shared.state.lock();
            state.active_id().cloned().map(|id| (state.generation, id))
        };
        match target {
            Some((generation, id)) => self.run_tick(generation, &id).await,
            None => TickReport::Skipped,
        }
    }

    /// Restarts polling after it stopped (for example, once the connection
    /// is back after a connection-lost stop).
    ///
    /// Returns `false` if there is no active conversation.
    pub fn resume_polling(&self) -> bool {
        let mut state = self.shared.state.lock();
        let Some(id) = state.active_id().cloned() else {
            return false;
        };
        let generation = state.generation;
        self.ensure_polling(&mut state, generation, &id);
        true
    }

    /// Stops polling. The active conversation and its messages stay.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.halt_polling(StopReason::Requested);
        self.emit(SessionEvent::PollStateChanged(state.scheduler.status()));
    }

    fn emit(&self, event: SessionEvent) {
        if self.shared.event_tx.try_send(event).is_err() {
            tracing::debug!("event channel full or closed, dropping event");
        }
    }

    /// Fetches messages with the configured deadline. Expiry is a
    /// [`SyncError::Timeout`].
    async fn fetch(
        &self,
        conversation: &ConversationId,
        since: Option<Timestamp>,
    ) -> Result<Vec<Message>, SyncError> {
        let deadline = self.shared.config.poll.fetch_timeout;
        tokio::time::timeout(deadline, self.shared.client.get_messages(conversation, since))
            .await
            .unwrap_or(Err(SyncError::Timeout))
    }

    /// Starts a fresh scheduler and poll task for `conversation`.
    fn start_polling(&self, state: &mut SessionState, generation: u64, conversation: &ConversationId) {
        state.scheduler.start();
        state.poller = Some(self.spawn_poller(generation, conversation));
        self.emit(SessionEvent::PollStateChanged(state.scheduler.status()));
    }

    /// Resets the cadence and makes the next tick happen immediately,
    /// restarting the poll task if it is not running.
    fn ensure_polling(&self, state: &mut SessionState, generation: u64, conversation: &ConversationId) {
        let was_active = state.scheduler.reset_activity();
        if was_active
            && let Some(poller) = state.poller.as_ref().filter(|p| !p.is_finished())
        {
            poller.kick();
        } else {
            let poller = self.spawn_poller(generation, conversation);
            poller.kick();
            state.poller = Some(poller);
        }
        self.emit(SessionEvent::PollStateChanged(state.scheduler.status()));
    }

    fn spawn_poller(&self, generation: u64, conversation: &ConversationId) -> PollHandle {
        tracing::info!(conversation_id = %conversation, "polling started");
        PollHandle::spawn(SessionTicker {
            shared: Arc::downgrade(&self.shared),
            generation,
            conversation: conversation.clone(),
        })
    }

    /// One fetch-merge cycle against the scheduler.
    async fn run_tick(&self, generation: u64, conversation: &ConversationId) -> TickReport {
        let (ticket, since) = {
            let mut state = self.shared.state.lock();
            if state.generation != generation {
                return TickReport::Stale;
            }
            let Some(ticket) = state.scheduler.begin_tick() else {
                return TickReport::Skipped;
            };
            let since = if self.shared.config.poll.server_since_filter {
                state.scheduler.state().last_seen
            } else {
                None
            };
            (ticket, since)
        };

        let fetched = self.fetch(conversation, since).await;

        let mut state = self.shared.state.lock();
        if state.generation != generation {
            tracing::debug!(conversation_id = %conversation, "discarding poll result for inactive conversation");
            return TickReport::Stale;
        }

        let before = state.scheduler.status();
        let (result, mut report, error) = match fetched {
            Ok(messages) => {
                let newest = messages.iter().map(|m| m.created_at).max();
                let merge = state.store.merge_report(messages);
                if merge.changed() {
                    self.emit(state.snapshot());
                }
                let bot_replied = merge
                    .added
                    .iter()
                    .chain(&merge.promoted)
                    .any(|m| m.role == Role::Bot);
                let result = TickResult::Fetched {
                    new_messages: merge.added.len() + merge.promoted.len(),
                    bot_replied,
                    newest,
                };
                let report = TickReport::Merged {
                    added: merge.added.len(),
                    promoted: merge.promoted.len(),
                };
                (result, report, None)
            }
            Err(e) if e.is_benign() => {
                tracing::debug!(conversation_id = %conversation, error = %e, "benign poll failure");
                (TickResult::BenignFailure, TickReport::BenignFailure, None)
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation, error = %e, "poll failed");
                (
                    TickResult::HardFailure,
                    TickReport::HardFailure(e.clone()),
                    Some(e),
                )
            }
        };

        match state.scheduler.complete_tick(ticket, result) {
            Transition::Continue => {}
            Transition::Stale => report = TickReport::Stale,
            Transition::Stopped(reason) => {
                state.poller = None;
                if let (StopReason::ConnectionLost { failures }, Some(error)) = (reason, error) {
                    tracing::warn!(conversation_id = %conversation, failures, "connection lost, polling stopped");
                    self.emit(SessionEvent::ConnectionLost {
                        conversation_id: conversation.clone(),
                        failures,
                        error,
                    });
                } else {
                    tracing::info!(conversation_id = %conversation, ?reason, "polling stopped");
                }
                report = TickReport::Stopped(reason);
            }
        }

        let after = state.scheduler.status();
        if after != before {
            self.emit(SessionEvent::PollStateChanged(after));
        }
        report
    }
}

/// Drives [`ConversationSession::run_tick`] from a [`PollHandle`].
///
/// Holds the session weakly, so dropping every session clone ends polling.
struct SessionTicker<C> {
    shared: Weak<Shared<C>>,
    generation: u64,
    conversation: ConversationId,
}

impl<C: SyncClient + 'static> Ticker for SessionTicker<C> {
    fn next_delay(&self) -> Option<Duration> {
        let shared = self.shared.upgrade()?;
        let state = shared.state.lock();
        if state.generation != self.generation || state.scheduler.phase() != PollPhase::Active {
            return None;
        }
        state.scheduler.next_delay()
    }

    async fn tick(&self) -> TickControl {
        let Some(shared) = self.shared.upgrade() else {
            return TickControl::Stop;
        };
        let session = ConversationSession { shared };
        match session.run_tick(self.generation, &self.conversation).await {
            TickReport::Stale | TickReport::Stopped(_) => TickControl::Stop,
            _ => TickControl::Continue,
        }
    }
}
