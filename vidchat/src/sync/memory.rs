//! In-process backend for testing and offline mode.
//!
//! [`InMemoryBackend`] is server-authoritative in the same way the real
//! backend is: it assigns ids and timestamps, files posted messages under
//! their conversation, and returns the full message list on every fetch.
//! Tests use its scripting hooks to inject failures, hold fetches open, and
//! observe how many requests the session issued.
//!
//! Handles are cheap to clone; all clones share one backend.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use vidchat_proto::message::{Conversation, ConversationId, Message, MessageId, Role, Timestamp};
use vidchat_proto::wire::SendReceipt;

use super::{Attachment, SyncClient, SyncError};

/// Analysis tokens a fresh backend account starts with.
const STARTING_TOKEN_BALANCE: i64 = 100;

#[derive(Debug, Default)]
struct BackendState {
    /// Newest last.
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    /// Fetches for these conversations block until the gate is closed.
    gates: HashMap<ConversationId, Arc<Semaphore>>,
    fetch_errors: VecDeque<SyncError>,
    create_errors: VecDeque<SyncError>,
    post_errors: VecDeque<SyncError>,
    fetch_counts: HashMap<ConversationId, usize>,
    since_hints: Vec<Option<Timestamp>>,
    posts: usize,
    in_flight: usize,
    max_in_flight: usize,
    token_balance: i64,
    last_timestamp: Option<Timestamp>,
    next_message_id: u64,
}

impl BackendState {
    /// Server clock, strictly increasing so stored messages never tie.
    fn stamp(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => Timestamp::from_millis(last.as_millis() + 1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn store(&mut self, conversation: &ConversationId, role: Role, text: String) -> Message {
        self.next_message_id += 1;
        let id = MessageId::new(self.next_message_id.to_string());
        let message = Message::confirmed(Some(id), role, text, self.stamp());
        self.messages
            .entry(conversation.clone())
            .or_default()
            .push(message.clone());
        message
    }

    fn exists(&self, conversation: &ConversationId) -> bool {
        self.conversations.iter().any(|c| &c.id == conversation)
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<BackendState>,
    /// Woken whenever a fetch starts.
    fetch_started: Notify,
    /// Delay before the echo bot answers; `None` disables it.
    echo_delay: Option<Duration>,
}

/// Decrements the in-flight counter even if the fetch is dropped.
struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let mut state = inner.state.lock();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        drop(state);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.state.lock().in_flight -= 1;
    }
}

/// In-memory, server-authoritative [`SyncClient`].
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Creates an empty backend with no bot.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a backend whose bot answers every posted message after
    /// `delay`. Used by the offline demo.
    #[must_use]
    pub fn with_echo_bot(delay: Duration) -> Self {
        Self::build(Some(delay))
    }

    fn build(echo_delay: Option<Duration>) -> Self {
        let state = BackendState {
            token_balance: STARTING_TOKEN_BALANCE,
            ..BackendState::default()
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                fetch_started: Notify::new(),
                echo_delay,
            }),
        }
    }

    /// Stores a message exactly as given, as if another client wrote it.
    ///
    /// Unknown conversations are created on the fly.
    pub fn push_message(&self, conversation: &ConversationId, message: Message) {
        let mut state = self.inner.state.lock();
        if !state.exists(conversation) {
            state.conversations.push(Conversation {
                id: conversation.clone(),
                title: conversation.to_string(),
                created_at: None,
            });
        }
        state
            .messages
            .entry(conversation.clone())
            .or_default()
            .push(message);
    }

    /// Stores a bot reply stamped with the server clock.
    pub fn push_bot_reply(&self, conversation: &ConversationId, text: impl Into<String>) {
        self.inner
            .state
            .lock()
            .store(conversation, Role::Bot, text.into());
    }

    /// Registers a conversation with a fixed id.
    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut state = self.inner.state.lock();
        state.conversations.retain(|c| c.id != conversation.id);
        state.conversations.push(conversation);
    }

    /// Makes fetches for `conversation` block until [`release`](Self::release).
    pub fn hold_fetches(&self, conversation: &ConversationId) {
        self.inner
            .state
            .lock()
            .gates
            .insert(conversation.clone(), Arc::new(Semaphore::new(0)));
    }

    /// Lets held and future fetches for `conversation` complete.
    pub fn release(&self, conversation: &ConversationId) {
        if let Some(gate) = self.inner.state.lock().gates.remove(conversation) {
            gate.close();
        }
    }

    /// Queues an error for the next fetch, of any conversation.
    pub fn fail_next_fetch(&self, error: SyncError) {
        self.inner.state.lock().fetch_errors.push_back(error);
    }

    /// Queues an error for the next conversation creation.
    pub fn fail_next_create(&self, error: SyncError) {
        self.inner.state.lock().create_errors.push_back(error);
    }

    /// Queues an error for the next message post.
    pub fn fail_next_post(&self, error: SyncError) {
        self.inner.state.lock().post_errors.push_back(error);
    }

    /// Number of fetches started for `conversation`.
    #[must_use]
    pub fn fetch_count(&self, conversation: &ConversationId) -> usize {
        self.inner
            .state
            .lock()
            .fetch_counts
            .get(conversation)
            .copied()
            .unwrap_or(0)
    }

    /// The `since` hint of every fetch so far, in call order.
    #[must_use]
    pub fn since_hints(&self) -> Vec<Option<Timestamp>> {
        self.inner.state.lock().since_hints.clone()
    }

    /// Highest number of fetches that were ever in progress at once.
    #[must_use]
    pub fn max_concurrent_fetches(&self) -> usize {
        self.inner.state.lock().max_in_flight
    }

    /// Number of successful message posts.
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.inner.state.lock().posts
    }

    /// All stored conversations, newest first.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner
            .state
            .lock()
            .conversations
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Stored messages of `conversation`.
    #[must_use]
    pub fn messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.inner
            .state
            .lock()
            .messages
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    /// Waits until at least `n` fetches for `conversation` have started.
    pub async fn wait_for_fetches(&self, conversation: &ConversationId, n: usize) {
        loop {
            let notified = self.inner.fetch_started.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.fetch_count(conversation) >= n {
                return;
            }
            notified.await;
        }
    }
}

impl SyncClient for InMemoryBackend {
    async fn create_conversation(&self, title: &str) -> Result<Conversation, SyncError> {
        let mut state = self.inner.state.lock();
        if let Some(err) = state.create_errors.pop_front() {
            return Err(err);
        }
        let conversation = Conversation {
            id: ConversationId::new(uuid::Uuid::now_v7().to_string()),
            title: title.to_string(),
            created_at: Some(state.stamp()),
        };
        state.conversations.push(conversation.clone());
        state.messages.insert(conversation.id.clone(), Vec::new());
        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        Ok(self.conversations())
    }

    async fn get_messages(
        &self,
        conversation: &ConversationId,
        since: Option<Timestamp>,
    ) -> Result<Vec<Message>, SyncError> {
        let _in_flight = InFlight::enter(&self.inner);
        let gate = {
            let mut state = self.inner.state.lock();
            *state.fetch_counts.entry(conversation.clone()).or_default() += 1;
            state.since_hints.push(since);
            state.gates.get(conversation).cloned()
        };
        self.inner.fetch_started.notify_waiters();

        if let Some(gate) = gate {
            // Closed on release; a closed semaphore fails the acquire.
            let _ = gate.acquire().await;
        }

        let mut state = self.inner.state.lock();
        if let Some(err) = state.fetch_errors.pop_front() {
            return Err(err);
        }
        if !state.exists(conversation) {
            return Err(SyncError::NotFound(format!("conversation {conversation}")));
        }
        // The full list, regardless of `since`, like the real backend.
        Ok(state
            .messages
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn post_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<SendReceipt, SyncError> {
        let receipt = {
            let mut state = self.inner.state.lock();
            if let Some(err) = state.post_errors.pop_front() {
                return Err(err);
            }
            if !state.exists(conversation) {
                return Err(SyncError::NotFound(format!("conversation {conversation}")));
            }
            state.store(conversation, Role::User, text.to_string());
            state.posts += 1;
            state.token_balance -= 1;
            SendReceipt {
                response: Some("Message received and queued for processing".to_string()),
                conversation_id: Some(conversation.to_string()),
                token_balance: Some(state.token_balance),
            }
        };

        if let Some(delay) = self.inner.echo_delay {
            let inner = Arc::clone(&self.inner);
            let conversation = conversation.clone();
            let reply = echo_reply(text, attachments);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.state.lock().store(&conversation, Role::Bot, reply);
            });
        }
        Ok(receipt)
    }

    async fn rename_conversation(
        &self,
        conversation: &ConversationId,
        title: &str,
    ) -> Result<(), SyncError> {
        let mut state = self.inner.state.lock();
        let entry = state
            .conversations
            .iter_mut()
            .find(|c| &c.id == conversation)
            .ok_or_else(|| SyncError::NotFound(format!("conversation {conversation}")))?;
        entry.title = title.to_string();
        Ok(())
    }

    async fn delete_conversation(&self, conversation: &ConversationId) -> Result<(), SyncError> {
        let mut state = self.inner.state.lock();
        if !state.exists(conversation) {
            return Err(SyncError::NotFound(format!("conversation {conversation}")));
        }
        state.conversations.retain(|c| &c.id != conversation);
        state.messages.remove(conversation);
        Ok(())
    }
}

fn echo_reply(text: &str, attachments: &[Attachment]) -> String {
    match (text.is_empty(), attachments.len()) {
        (_, 0) => format!("You said: {text}"),
        (true, n) => format!("Analyzed {n} video(s)."),
        (false, n) => format!("Analyzed {n} video(s) for: {text}"),
    }
}
