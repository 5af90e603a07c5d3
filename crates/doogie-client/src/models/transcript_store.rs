use super::chat::{Chat, ChatSummary, Feedback, Message, Role};
use super::stream::ChunkData;

/// Holds the chat list and the currently open chat with its transcript.
///
/// All mutation goes through named methods so the controller can publish a
/// snapshot after each one. The store itself has no opinion about phases or
/// streams; it only guards the transcript invariants.
#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    chats: Vec<ChatSummary>,
    current: Option<Chat>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    pub fn current(&self) -> Option<&Chat> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<String> {
        self.current.as_ref().map(|c| c.id.clone())
    }

    /// Replace the chat list, keeping it sorted most-recently-updated first.
    pub fn set_chats(&mut self, mut chats: Vec<ChatSummary>) {
        chats.sort_by_key(|c| std::cmp::Reverse(c.updated_at));
        self.chats = chats;
    }

    /// Insert a freshly created chat at the head of the list and open it.
    pub fn open_new_chat(&mut self, chat: Chat) {
        self.chats.insert(0, chat.summary());
        self.current = Some(chat);
    }

    pub fn set_current(&mut self, chat: Chat) {
        self.current = Some(chat);
    }

    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Remove a chat from the list; clears the current chat if it matches.
    /// Returns whether the id was present in the list.
    pub fn remove_chat(&mut self, id: &str) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != id);
        if self.current.as_ref().is_some_and(|c| c.id == id) {
            self.current = None;
        }
        before != self.chats.len()
    }

    /// Append the optimistic user/assistant pair atomically, before any
    /// stream activity. The assistant placeholder becomes the streaming
    /// target. Returns false when no chat is open.
    pub fn append_optimistic_pair(&mut self, user: Message, assistant: Message) -> bool {
        match self.current.as_mut() {
            Some(chat) => {
                debug_assert_eq!(user.chat_id, chat.id);
                chat.messages.push(user);
                chat.messages.push(assistant);
                true
            }
            None => false,
        }
    }

    /// Fold one stream payload into the streaming target, addressed by chat
    /// and message id. A chunk whose chat is no longer the current one, or
    /// whose target message is gone, is dropped without touching anything —
    /// switching chats mid-stream must never mutate the other chat.
    ///
    /// The payload's content replaces the target's content entirely; the
    /// server is the source of truth, even if the content shrinks. Metadata
    /// and citations overwrite the target's fields when present.
    pub fn apply_chunk(&mut self, chat_id: &str, message_id: &str, data: &ChunkData) -> bool {
        let Some(chat) = self.current.as_mut().filter(|c| c.id == chat_id) else {
            return false;
        };
        let Some(target) = chat
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.role == Role::Assistant)
        else {
            return false;
        };
        target.content = data.content.clone();
        if data.tokens.is_some() {
            target.tokens = data.tokens;
        }
        if data.tokens_per_second.is_some() {
            target.tokens_per_second = data.tokens_per_second;
        }
        if data.model.is_some() {
            target.model = data.model.clone();
        }
        if data.provider.is_some() {
            target.provider = data.provider.clone();
        }
        if data.context_documents.is_some() {
            target.context_documents = data.context_documents.clone();
        }
        true
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.current
            .as_ref()
            .and_then(|c| c.messages.iter().find(|m| m.id == message_id))
    }

    /// Optimistically record feedback on an assistant message. Returns the
    /// previous (feedback, feedback_text) for revert on server failure, or
    /// None when the message is absent or not an assistant message.
    pub fn set_feedback(
        &mut self,
        message_id: &str,
        feedback: Feedback,
        text: Option<String>,
    ) -> Option<(Option<Feedback>, Option<String>)> {
        let msg = self
            .current
            .as_mut()?
            .messages
            .iter_mut()
            .find(|m| m.id == message_id && m.role == Role::Assistant)?;
        let previous = (msg.feedback, msg.feedback_text.clone());
        msg.feedback = Some(feedback);
        msg.feedback_text = text;
        Some(previous)
    }

    /// Undo an optimistic feedback write.
    pub fn revert_feedback(
        &mut self,
        message_id: &str,
        previous: (Option<Feedback>, Option<String>),
    ) {
        if let Some(chat) = self.current.as_mut() {
            if let Some(msg) = chat.messages.iter_mut().find(|m| m.id == message_id) {
                msg.feedback = previous.0;
                msg.feedback_text = previous.1;
            }
        }
    }

    /// Replace a message with the server's authoritative copy.
    pub fn replace_message(&mut self, updated: Message) -> bool {
        if let Some(chat) = self.current.as_mut() {
            if let Some(msg) = chat.messages.iter_mut().find(|m| m.id == updated.id) {
                *msg = updated;
                return true;
            }
        }
        false
    }
}
