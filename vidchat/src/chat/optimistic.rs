//! Instant local feedback for outgoing messages.
//!
//! [`OptimisticAppender`] only produces entries. Deciding whether a later
//! server message is the same one is left entirely to
//! [`MessageStore`](super::store::MessageStore).

use vidchat_proto::message::{Message, Role, Timestamp};

use super::store::MessageStore;

/// Timeline text appended when a message could not be delivered.
pub const SEND_FAILURE_TEXT: &str = "Failed to send message. Please try again.";

/// Source of client clock readings.
pub type Clock = fn() -> Timestamp;

/// Appends locally authored messages before the server confirms them.
#[derive(Debug)]
pub struct OptimisticAppender {
    clock: Clock,
    /// Last timestamp handed out; keeps rapid submissions strictly ordered.
    last: Option<Timestamp>,
}

impl Default for OptimisticAppender {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticAppender {
    /// Appender reading the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Timestamp::now)
    }

    /// Appender reading a custom clock.
    #[must_use]
    pub const fn with_clock(clock: Clock) -> Self {
        Self { clock, last: None }
    }

    /// Appends an unconfirmed user message stamped with client time and
    /// returns it.
    pub fn submit_local(&mut self, store: &mut MessageStore, text: &str) -> Message {
        let message = Message::local(Role::User, text, self.stamp());
        store.append(message.clone());
        message
    }

    /// Appends the error-role notice for a failed submission.
    pub fn submit_failure(&mut self, store: &mut MessageStore) -> Message {
        let message = Message::local(Role::Error, SEND_FAILURE_TEXT, self.stamp());
        store.append(message.clone());
        message
    }

    fn stamp(&mut self) -> Timestamp {
        let now = (self.clock)();
        let ts = match self.last {
            Some(last) if now <= last => Timestamp::from_millis(last.as_millis() + 1),
            _ => now,
        };
        self.last = Some(ts);
        ts
    }
}
