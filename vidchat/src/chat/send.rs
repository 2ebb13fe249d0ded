//! The send path.
//!
//! Sending appends an optimistic entry, posts the message, and on success
//! pulls polling back to its initial cadence with an immediate tick so the
//! bot's reply shows up promptly. On failure an error notice is appended
//! and polling is left alone. Nothing is retried automatically.

use vidchat_proto::wire::SendReceipt;

use crate::sync::{Attachment, SyncClient};

use super::{ConversationSession, SessionError};

/// Title used when a conversation is created for a message with neither
/// text nor a named attachment.
const FALLBACK_TITLE: &str = "New conversation";

impl<C: SyncClient + 'static> ConversationSession<C> {
    /// Sends a message to the active conversation, creating one first if
    /// none is active.
    ///
    /// # Errors
    ///
    /// - [`SessionError::EmptyMessage`] if `text` is blank and there are no
    ///   attachments; nothing is sent.
    /// - [`SessionError::Creation`] if a conversation had to be created and
    ///   creation failed; nothing is sent.
    /// - [`SessionError::NoActiveConversation`] if the new conversation was
    ///   deleted before the message could be queued.
    /// - [`SessionError::Send`] if posting failed; an error notice has been
    ///   appended to the timeline.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<SendReceipt, SessionError> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let has_active = self.shared.state.lock().active.is_some();
        if !has_active {
            let title = derive_title(text, attachments, self.shared.config.title_max_chars);
            self.create_and_switch(&title).await?;
        }

        let (conversation, generation) = {
            let mut state = self.shared.state.lock();
            let conversation = state
                .active_id()
                .cloned()
                .ok_or(SessionError::NoActiveConversation)?;
            let state = &mut *state;
            state.appender.submit_local(&mut state.store, text);
            self.emit(state.snapshot());
            (conversation, state.generation)
        };

        let posted = self
            .shared
            .client
            .post_message(&conversation, text, attachments)
            .await;

        let mut state = self.shared.state.lock();
        match posted {
            Ok(receipt) => {
                if let Some(balance) = receipt.token_balance {
                    state.token_balance = Some(balance);
                }
                if state.generation == generation {
                    self.ensure_polling(&mut state, generation, &conversation);
                }
                tracing::debug!(conversation_id = %conversation, "message sent");
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation, error = %e, "send failed");
                if state.generation == generation {
                    let state = &mut *state;
                    state.appender.submit_failure(&mut state.store);
                    self.emit(state.snapshot());
                }
                Err(SessionError::Send(e))
            }
        }
    }
}

/// Title for a conversation created by its first message: the text cut to
/// `max_chars` characters (with `...` when cut), or the first attachment's
/// file name when there is no text.
pub(crate) fn derive_title(text: &str, attachments: &[Attachment], max_chars: usize) -> String {
    if text.is_empty() {
        return attachments
            .first()
            .map_or_else(|| FALLBACK_TITLE.to_string(), |a| a.file_name.clone());
    }
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
