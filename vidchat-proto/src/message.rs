//! Canonical message and conversation types.
//!
//! Every payload received from the backend is normalized into these types
//! at the ingestion boundary (see [`crate::wire`]) before it reaches any
//! client-side state. Nothing downstream ever sees a raw JSON record.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Opaque server-assigned message identity.
///
/// Not every backend record carries one, so [`Message::id`] is optional.
/// Integer ids are stored in their decimal string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a conversation on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a conversation identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error returned when a timestamp string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp: {0:?}")]
pub struct TimestampError(pub String);

/// UTC instant used as the authoritative ordering key for messages.
///
/// Parses both RFC 3339 (`2024-01-01T00:00:01Z`) and naive ISO-8601
/// (`2024-01-01T00:00:01.123456`), the latter interpreted as UTC.
/// Equality is on the instant, so `...Z` and `...+00:00` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current client clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parses an ISO-8601 timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError`] if the string is neither RFC 3339 nor a
    /// naive `YYYY-MM-DDTHH:MM:SS[.fff]` / `YYYY-MM-DD HH:MM:SS[.fff]` value.
    pub fn parse(raw: &str) -> Result<Self, TimestampError> {
        let trimmed = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self(dt.with_timezone(&Utc)));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(Self(Utc.from_utc_datetime(&naive)));
            }
        }
        Err(TimestampError(raw.to_string()))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    ///
    /// Out-of-range values clamp to the epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }

    /// Milliseconds since the UNIX epoch.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The underlying `chrono` value.
    #[must_use]
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = TimestampError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_string()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The signed-in user.
    User,
    /// The analysis assistant.
    Bot,
    /// A client-synthesized failure notice; never produced by the server.
    Error,
}

impl Role {
    /// Maps a backend role string onto a [`Role`].
    ///
    /// `bot` and `assistant` are bot messages, `error` is an error notice,
    /// anything else (including `user` and `text`) is a user message.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bot" | "assistant" => Self::Bot,
            "error" => Self::Error,
            _ => Self::User,
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Appended locally before the server confirmed it.
    LocalOptimistic,
    /// Ingested from a server response.
    ServerConfirmed,
}

/// A single chat message in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server identity, when the backend supplied one.
    pub id: Option<MessageId>,
    /// Author of the message.
    pub role: Role,
    /// Message body.
    pub text: String,
    /// Ordering key.
    pub created_at: Timestamp,
    /// Local or server provenance.
    pub origin: Origin,
}

impl Message {
    /// Builds a locally authored, unconfirmed message.
    pub fn local(role: Role, text: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: None,
            role,
            text: text.into(),
            created_at,
            origin: Origin::LocalOptimistic,
        }
    }

    /// Builds a server-confirmed message.
    pub fn confirmed(
        id: Option<MessageId>,
        role: Role,
        text: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            role,
            text: text.into(),
            created_at,
            origin: Origin::ServerConfirmed,
        }
    }

    /// Whether this message is still awaiting server confirmation.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.origin == Origin::LocalOptimistic
    }

    /// Whether `self` and `other` are the same logical message.
    ///
    /// Matching server ids are always the same message. Otherwise identity
    /// is role + text + `created_at`.
    #[must_use]
    pub fn same_logical(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (&self.id, &other.id)
            && a == b
        {
            return true;
        }
        self.role == other.role && self.text == other.text && self.created_at == other.created_at
    }

    /// Whether this server-confirmed message confirms the given optimistic
    /// entry (same role and text, regardless of timestamp).
    #[must_use]
    pub fn confirms(&self, optimistic: &Self) -> bool {
        self.origin == Origin::ServerConfirmed
            && optimistic.is_optimistic()
            && self.role == optimistic.role
            && self.text == optimistic.text
    }
}

/// A conversation thread owned by the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Backend identity.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Creation time; some list endpoints omit it.
    pub created_at: Option<Timestamp>,
}
