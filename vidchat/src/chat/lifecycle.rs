//! Conversation lifecycle: switch, create, rename, delete, list.
//!
//! # Switching
//!
//! 1. Polling for the previous conversation stops
//! 2. The message store is cleared
//! 3. The new conversation becomes active (the generation counter advances)
//! 4. Its history is fetched and installed, unless another switch happened
//!    in the meantime, in which case the result is dropped
//! 5. Polling starts fresh at the initial interval
//!
//! Rename, delete and create keep the cached conversation list in step with
//! the backend and publish [`SessionEvent::ConversationsChanged`].

use vidchat_proto::message::{Conversation, ConversationId, Message};

use crate::poll::{PollPhase, StopReason};
use crate::sync::SyncClient;

use super::{ConversationSession, SessionError, SessionEvent};

impl<C: SyncClient + 'static> ConversationSession<C> {
    /// Makes `id` the active conversation and loads its history.
    ///
    /// A benign history failure (timeout, not yet created) leaves the
    /// timeline empty; polling fills it in. If another switch starts while
    /// the history is loading, this call returns `Ok` without touching the
    /// store.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Fetch`] on a hard history failure. The switch
    /// itself still happens and polling still starts.
    pub async fn switch_to(&self, id: &ConversationId) -> Result<(), SessionError> {
        let conversation = self
            .shared
            .state
            .lock()
            .conversations
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .unwrap_or_else(|| Conversation {
                id: id.clone(),
                title: id.to_string(),
                created_at: None,
            });
        self.activate(conversation).await
    }

    /// Creates a conversation and switches to it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyTitle`] for a blank title and
    /// [`SessionError::Creation`] if the backend fails; the active
    /// conversation is unchanged in both cases.
    pub async fn create_and_switch(&self, title: &str) -> Result<Conversation, SessionError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::EmptyTitle);
        }
        let conversation = self
            .shared
            .client
            .create_conversation(title)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "conversation creation failed");
                SessionError::Creation(e)
            })?;
        tracing::info!(conversation_id = %conversation.id, title, "conversation created");

        {
            let mut state = self.shared.state.lock();
            state.conversations.retain(|c| c.id != conversation.id);
            state.conversations.insert(0, conversation.clone());
            self.emit(SessionEvent::ConversationsChanged(
                state.conversations.clone(),
            ));
        }

        // A new conversation has no history worth failing over.
        if let Err(e) = self.activate(conversation.clone()).await {
            tracing::warn!(conversation_id = %conversation.id, error = %e, "history load failed after create");
        }
        Ok(conversation)
    }

    /// Reloads the conversation list from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Refresh`] if listing fails; the cache keeps
    /// its previous contents.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>, SessionError> {
        let conversations = self
            .shared
            .client
            .list_conversations()
            .await
            .map_err(SessionError::Refresh)?;

        let mut state = self.shared.state.lock();
        state.conversations.clone_from(&conversations);
        let renamed = state.active.as_ref().and_then(|active| {
            conversations
                .iter()
                .find(|c| c.id == active.id && c.title != active.title)
                .cloned()
        });
        if let Some(updated) = renamed {
            state.active = Some(updated.clone());
            self.emit(SessionEvent::ActiveConversationChanged(Some(updated)));
        }
        self.emit(SessionEvent::ConversationsChanged(conversations.clone()));
        Ok(conversations)
    }

    /// Changes a conversation's title.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyTitle`] for a blank title, or
    /// [`SessionError::Rename`] if the backend fails.
    pub async fn rename_conversation(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<(), SessionError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionError::EmptyTitle);
        }
        self.shared
            .client
            .rename_conversation(id, title)
            .await
            .map_err(SessionError::Rename)?;

        let mut state = self.shared.state.lock();
        for conversation in state.conversations.iter_mut().filter(|c| &c.id == id) {
            title.clone_into(&mut conversation.title);
        }
        if let Some(active) = state.active.as_mut()
            && &active.id == id
        {
            title.clone_into(&mut active.title);
            self.emit(SessionEvent::ActiveConversationChanged(Some(active.clone())));
        }
        self.emit(SessionEvent::ConversationsChanged(
            state.conversations.clone(),
        ));
        Ok(())
    }

    /// Deletes a conversation. Deleting the active one stops polling and
    /// leaves no conversation active.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Delete`] if the backend fails; nothing
    /// changes locally in that case.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), SessionError> {
        self.shared
            .client
            .delete_conversation(id)
            .await
            .map_err(SessionError::Delete)?;

        let mut state = self.shared.state.lock();
        state.conversations.retain(|c| &c.id != id);
        if state.active_id() == Some(id) {
            state.halt_polling(StopReason::Requested);
            state.generation += 1;
            state.store.replace_all([]);
            state.active = None;
            tracing::info!(conversation_id = %id, "active conversation deleted");
            self.emit(SessionEvent::ActiveConversationChanged(None));
            self.emit(state.snapshot());
            self.emit(SessionEvent::PollStateChanged(state.scheduler.status()));
        }
        self.emit(SessionEvent::ConversationsChanged(
            state.conversations.clone(),
        ));
        Ok(())
    }

    async fn activate(&self, conversation: Conversation) -> Result<(), SessionError> {
        let id = conversation.id.clone();

        // Steps 1-3: tear down and take over, in one critical section.
        let generation = {
            let mut state = self.shared.state.lock();
            state.halt_polling(StopReason::Requested);
            state.generation += 1;
            state.store.replace_all([]);
            state.active = Some(conversation.clone());
            self.emit(SessionEvent::ActiveConversationChanged(Some(conversation)));
            self.emit(state.snapshot());
            state.generation
        };
        tracing::info!(conversation_id = %id, "switched conversation");

        // Step 4: history.
        let history = self.fetch(&id, None).await;

        let mut state = self.shared.state.lock();
        if state.generation != generation {
            tracing::debug!(conversation_id = %id, "discarding history for abandoned conversation");
            return Ok(());
        }
        let result = match history {
            Ok(messages) => {
                // Messages sent while the history was loading stay visible,
                // and history copies of them confirm rather than duplicate.
                let pending: Vec<Message> = state
                    .store
                    .sorted_view()
                    .into_iter()
                    .filter(Message::is_optimistic)
                    .collect();
                tracing::debug!(conversation_id = %id, count = messages.len(), "history loaded");
                state.store.replace_all(pending);
                state.store.merge(messages);
                Ok(())
            }
            Err(e) if e.is_benign() => {
                tracing::debug!(conversation_id = %id, error = %e, "history unavailable, polling will fill in");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(conversation_id = %id, error = %e, "history load failed");
                Err(SessionError::Fetch(e))
            }
        };
        self.emit(state.snapshot());

        // Step 5: poll.
        if state.scheduler.phase() != PollPhase::Active || state.poller.is_none() {
            self.start_polling(&mut state, generation, &id);
        }
        result
    }
}
