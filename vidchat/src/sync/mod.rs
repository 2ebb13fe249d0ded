//! Backend access layer.
//!
//! Defines the [`SyncClient`] trait through which the conversation session
//! reaches the backend, plus its error taxonomy. Implementations include:
//! - [`http::HttpSyncClient`]: `reqwest`-based client for the real backend
//! - [`memory::InMemoryBackend`]: in-process backend for tests and offline mode
//!
//! Every implementation hands back canonical [`Message`]/[`Conversation`]
//! values; raw payload shapes never cross this boundary.

pub mod http;
pub mod memory;

use std::path::Path;

use vidchat_proto::message::{Conversation, ConversationId, Message, Timestamp};
use vidchat_proto::wire::SendReceipt;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The request did not complete within its deadline.
    #[error("request timed out")]
    Timeout,

    /// The addressed resource does not exist (yet).
    #[error("not found: {0}")]
    NotFound(String),

    /// The session cookie is missing or expired.
    #[error("not authenticated")]
    Unauthorized,

    /// The backend answered with a non-success status.
    #[error("server returned {status}: {detail}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error detail from the response body, if any.
        detail: String,
    },

    /// The request could not be delivered (connection refused, reset, DNS).
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl SyncError {
    /// Whether this error is an expected, non-actionable polling hiccup.
    ///
    /// Benign errors are never surfaced and never count toward the
    /// hard-failure threshold.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::Timeout | Self::NotFound(_))
    }
}

/// A file sent along with a message (typically a video for analysis).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name reported to the backend.
    pub file_name: String,
    /// MIME type of the payload.
    pub content_type: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment from in-memory bytes.
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Reads an attachment from disk, guessing the MIME type from the
    /// file extension.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be read.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let content_type = content_type_for(path).to_string();
        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }
}

/// MIME type guess for common video containers.
fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Async access to the conversation backend.
///
/// All methods normalize their responses into canonical types before
/// returning. Implementations must be cheap to call concurrently; the
/// session never holds a lock across a call.
pub trait SyncClient: Send + Sync {
    /// Create a conversation with the given title.
    fn create_conversation(
        &self,
        title: &str,
    ) -> impl std::future::Future<Output = Result<Conversation, SyncError>> + Send;

    /// List the signed-in user's conversations.
    fn list_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, SyncError>> + Send;

    /// Fetch the message list of a conversation.
    ///
    /// `since` is an optional server-side filter hint. Callers must not
    /// rely on it: the full list may be returned regardless.
    fn get_messages(
        &self,
        conversation: &ConversationId,
        since: Option<Timestamp>,
    ) -> impl std::future::Future<Output = Result<Vec<Message>, SyncError>> + Send;

    /// Post a user message (and optional attachments) to a conversation.
    fn post_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        attachments: &[Attachment],
    ) -> impl std::future::Future<Output = Result<SendReceipt, SyncError>> + Send;

    /// Change a conversation's title.
    fn rename_conversation(
        &self,
        conversation: &ConversationId,
        title: &str,
    ) -> impl std::future::Future<Output = Result<(), SyncError>> + Send;

    /// Delete a conversation and its messages.
    fn delete_conversation(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<(), SyncError>> + Send;
}
