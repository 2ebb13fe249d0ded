//! JSON wire normalization.
//!
//! The backend is inconsistent about field names (`TIMESTAMP` vs
//! `created_at`, `chat_type` vs `role`, `message` vs `content`) and about
//! id types. Everything is normalized here into the canonical types of
//! [`crate::message`]. Batch functions never fail as a whole: a record
//! that cannot be normalized is dropped and logged.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::message::{Conversation, ConversationId, Message, MessageId, Role, Timestamp};

/// Field names accepted for message text, in priority order.
const TEXT_KEYS: &[&str] = &["message", "content", "text"];

/// Field names accepted for the author role, in priority order.
const ROLE_KEYS: &[&str] = &["chat_type", "role", "type"];

/// Field names accepted for the creation timestamp, in priority order.
const TIMESTAMP_KEYS: &[&str] = &["TIMESTAMP", "timestamp", "created_at", "createdAt"];

/// Errors produced while normalizing a single wire record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The record is not a JSON object.
    #[error("record is not an object")]
    NotAnObject,

    /// A required field is absent or has the wrong JSON type.
    #[error("missing or invalid field `{0}`")]
    MissingField(&'static str),

    /// The timestamp field is present but unparseable.
    #[error("unparseable timestamp {0:?}")]
    BadTimestamp(String),

    /// The backend reported the operation as unsuccessful.
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

/// Acknowledgment body returned by the send endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SendReceipt {
    /// Interim text from the backend (e.g. "queued for processing").
    pub response: Option<String>,
    /// Conversation the message was filed under.
    pub conversation_id: Option<String>,
    /// Remaining analysis tokens after this message.
    pub token_balance: Option<i64>,
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Normalizes one message record into a server-confirmed [`Message`].
///
/// # Errors
///
/// Returns [`NormalizeError`] if the record is not an object, has no text,
/// or has a missing or unparseable timestamp.
pub fn normalize_message(value: &Value) -> Result<Message, NormalizeError> {
    let obj = value.as_object().ok_or(NormalizeError::NotAnObject)?;

    let text = first_present(obj, TEXT_KEYS)
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("message"))?;

    let raw_ts = first_present(obj, TIMESTAMP_KEYS)
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("timestamp"))?;
    let created_at =
        Timestamp::parse(raw_ts).map_err(|_| NormalizeError::BadTimestamp(raw_ts.to_string()))?;

    let role = first_present(obj, ROLE_KEYS)
        .and_then(Value::as_str)
        .map_or(Role::User, Role::from_wire);

    let id = obj.get("id").and_then(id_string).map(MessageId::new);

    Ok(Message::confirmed(id, role, text, created_at))
}

/// Extracts the record list from `{"messages": [...]}` or a bare array.
fn records<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => obj
            .get(key)
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    }
}

/// Normalizes a message list response, dropping malformed records.
#[must_use]
pub fn normalize_messages(value: &Value) -> Vec<Message> {
    records(value, "messages")
        .iter()
        .enumerate()
        .filter_map(|(index, record)| match normalize_message(record) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(index, error = %e, "dropping malformed message record");
                None
            }
        })
        .collect()
}

/// Normalizes one conversation record.
///
/// # Errors
///
/// Returns [`NormalizeError`] if the record has no usable `id` or `title`.
pub fn normalize_conversation(value: &Value) -> Result<Conversation, NormalizeError> {
    let obj = value.as_object().ok_or(NormalizeError::NotAnObject)?;
    let id = obj
        .get("id")
        .and_then(id_string)
        .ok_or(NormalizeError::MissingField("id"))?;
    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("title"))?;
    let created_at = first_present(obj, &["created_at", "createdAt", "TIMESTAMP", "timestamp"])
        .and_then(Value::as_str)
        .and_then(|raw| Timestamp::parse(raw).ok());

    Ok(Conversation {
        id: ConversationId::new(id),
        title: title.to_string(),
        created_at,
    })
}

/// Normalizes a conversation list response, dropping malformed records.
#[must_use]
pub fn normalize_conversations(value: &Value) -> Vec<Conversation> {
    records(value, "conversations")
        .iter()
        .filter_map(|record| match normalize_conversation(record) {
            Ok(conv) => Some(conv),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed conversation record");
                None
            }
        })
        .collect()
}

/// Normalizes a create/update response of the form
/// `{"success": true, "conversation": {...}}` (or a bare conversation).
///
/// # Errors
///
/// Returns [`NormalizeError::Rejected`] if `success` is `false`, or a field
/// error if the embedded conversation is malformed.
pub fn created_conversation(value: &Value) -> Result<Conversation, NormalizeError> {
    let obj = value.as_object().ok_or(NormalizeError::NotAnObject)?;
    if obj.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(NormalizeError::Rejected(
            error_detail(value).unwrap_or_else(|| "unsuccessful".to_string()),
        ));
    }
    obj.get("conversation")
        .map_or_else(|| normalize_conversation(value), normalize_conversation)
}

/// Pulls a human-readable error out of an error body (`detail`, `message`
/// or `error`).
#[must_use]
pub fn error_detail(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    first_present(obj, &["detail", "message", "error"]).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
