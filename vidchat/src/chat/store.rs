//! Ordered, deduplicated message list for the active conversation.
//!
//! [`MessageStore`] is the single place where identity and ordering rules
//! live. Producers (the optimistic appender, poll ticks, history loads)
//! hand it messages; it decides whether each one is new, a duplicate, or
//! the server confirmation of an optimistic entry.
//!
//! # Identity
//!
//! Two messages are the same logical message when their server ids match,
//! or when role, text and `created_at` are all equal. In addition, a
//! server-confirmed message with the same role and text as a local
//! optimistic entry *confirms* that entry: the optimistic entry is replaced
//! in place instead of a second copy being added.
//!
//! # Ordering
//!
//! Entries are kept sorted by `(created_at, insertion sequence)`, so
//! [`sorted_view`](MessageStore::sorted_view) is ascending by timestamp
//! with ties in insertion order.

use vidchat_proto::message::{Message, Origin, Timestamp};

/// A stored message plus its insertion sequence number.
#[derive(Debug, Clone)]
struct Entry {
    /// Tie-breaker for equal timestamps; preserved across promotion.
    seq: u64,
    message: Message,
}

impl Entry {
    fn sort_key(&self) -> (Timestamp, u64) {
        (self.message.created_at, self.seq)
    }
}

/// What happened to one ingested message.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ingest {
    /// A new entry was inserted.
    Added(Message),
    /// An optimistic entry was replaced by its server confirmation.
    Promoted(Message),
    /// The message was already present.
    Duplicate,
}

/// Result of a [`MessageStore::merge_report`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Messages that were not present before, in ingestion order.
    pub added: Vec<Message>,
    /// Server confirmations that replaced optimistic entries.
    pub promoted: Vec<Message>,
}

impl MergeReport {
    /// Whether the visible content of the store changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.promoted.is_empty()
    }
}

/// Ordered collection of messages for one conversation.
#[derive(Debug, Default)]
pub struct MessageStore {
    /// Always sorted by [`Entry::sort_key`].
    entries: Vec<Entry>,
    next_seq: u64,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a batch of incoming messages and returns the ones actually
    /// added (duplicates and promotions excluded).
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Message>) -> Vec<Message> {
        self.merge_report(incoming).added
    }

    /// Merges a batch of incoming messages, reporting both additions and
    /// optimistic-entry promotions.
    pub fn merge_report(&mut self, incoming: impl IntoIterator<Item = Message>) -> MergeReport {
        let mut report = MergeReport::default();
        for message in incoming {
            match self.ingest(message) {
                Ingest::Added(m) => report.added.push(m),
                Ingest::Promoted(m) => report.promoted.push(m),
                Ingest::Duplicate => {}
            }
        }
        if report.changed() {
            tracing::debug!(
                added = report.added.len(),
                promoted = report.promoted.len(),
                total = self.entries.len(),
                "merged messages"
            );
        }
        report
    }

    /// Adds a single message under the same identity rules as
    /// [`merge`](Self::merge).
    ///
    /// Returns `true` if the store changed.
    pub fn append(&mut self, message: Message) -> bool {
        !matches!(self.ingest(message), Ingest::Duplicate)
    }

    /// Clears the store and installs a fresh snapshot.
    ///
    /// Duplicates within the snapshot are collapsed.
    pub fn replace_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.entries.clear();
        self.next_seq = 0;
        for message in messages {
            self.ingest(message);
        }
    }

    /// Messages ascending by `created_at`, ties in insertion order.
    #[must_use]
    pub fn sorted_view(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries still awaiting server confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.message.is_optimistic())
            .count()
    }

    fn ingest(&mut self, message: Message) -> Ingest {
        match message.origin {
            Origin::ServerConfirmed => {
                if self.entries.iter().any(|e| {
                    e.message.origin == Origin::ServerConfirmed && e.message.same_logical(&message)
                }) {
                    return Ingest::Duplicate;
                }
                if let Some(pos) = self.confirmation_target(&message) {
                    let mut entry = self.entries.remove(pos);
                    entry.message = message.clone();
                    self.insert_sorted(entry);
                    return Ingest::Promoted(message);
                }
            }
            Origin::LocalOptimistic => {
                if self.entries.iter().any(|e| e.message.same_logical(&message)) {
                    return Ingest::Duplicate;
                }
            }
        }

        let entry = Entry {
            seq: self.next_seq,
            message: message.clone(),
        };
        self.next_seq += 1;
        self.insert_sorted(entry);
        Ingest::Added(message)
    }

    /// Picks the optimistic entry a server message confirms: an exact
    /// identity match if there is one, otherwise the oldest unreconciled
    /// entry with the same role and text.
    fn confirmation_target(&self, confirmed: &Message) -> Option<usize> {
        let candidates = || {
            self.entries
                .iter()
                .enumerate()
                .filter(|(_, e)| confirmed.confirms(&e.message))
        };
        candidates()
            .find(|(_, e)| e.message.same_logical(confirmed))
            .or_else(|| candidates().min_by_key(|(_, e)| e.seq))
            .map(|(pos, _)| pos)
    }

    fn insert_sorted(&mut self, entry: Entry) {
        let key = entry.sort_key();
        let at = self.entries.partition_point(|e| e.sort_key() <= key);
        self.entries.insert(at, entry);
    }
}
