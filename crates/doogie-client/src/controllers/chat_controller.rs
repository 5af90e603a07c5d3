use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::models::{Chat, ChatSummary, Feedback, Message, StreamEvent, TranscriptStore};
use crate::repositories::ChatRepository;
use crate::services::chunk_resolver::{ChunkResolution, ChunkResolver};
use crate::services::error::{ApiError, ApiResult};

const TITLE_MAX_CHARS: usize = 30;

/// Phase of the live-conversation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// A chat is being created and/or the stream URL is being prepared.
    Opening,
    /// Chunks are being folded into the streaming target.
    Streaming,
    /// The stream completed; the transcript is being refetched so optimistic
    /// ids are replaced with canonical ones.
    Refreshing,
}

/// Immutable view of controller state, published after every transition.
/// Views subscribe via [`ChatController::subscribe`] and re-render on change.
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub phase: SessionPhase,
    pub chats: Vec<ChatSummary>,
    pub current: Option<Chat>,
    /// Single user-visible error, dismissed by the next action.
    pub error: Option<String>,
}

struct ControllerState {
    store: TranscriptStore,
    phase: SessionPhase,
    error: Option<String>,
    pending_feedback: HashSet<String>,
    /// Set by cancel(); observed by the send loop.
    cancel_requested: bool,
    cancel_notify: Arc<Notify>,
    /// Flag of the currently open stream, if any.
    stream_flag: Option<Arc<AtomicBool>>,
}

/// Address of the message a live stream writes into. Chunks are applied
/// through this, never through "whatever chat is current", so switching
/// chats mid-stream cannot mutate the other chat's transcript.
#[derive(Clone)]
struct StreamTarget {
    chat_id: String,
    message_id: String,
}

enum StreamOutcome {
    Done,
    Failed(String),
    Cancelled,
}

/// Drives a single conversation: optimistic sends, the one active stream,
/// completion refresh, feedback and deletion.
///
/// At most one stream is active per controller. All state mutation happens
/// under a short-lived lock that is never held across an await point.
pub struct ChatController {
    repo: Arc<ChatRepository>,
    resolver: Arc<ChunkResolver>,
    state: Mutex<ControllerState>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl ChatController {
    pub fn new(repo: Arc<ChatRepository>, resolver: Arc<ChunkResolver>) -> Self {
        let initial = ChatSnapshot {
            phase: SessionPhase::Idle,
            chats: Vec::new(),
            current: None,
            error: None,
        };
        let (snapshot_tx, _) = watch::channel(initial);
        Self {
            repo,
            resolver,
            state: Mutex::new(ControllerState {
                store: TranscriptStore::new(),
                phase: SessionPhase::Idle,
                error: None,
                pending_feedback: HashSet::new(),
                cancel_requested: false,
                cancel_notify: Arc::new(Notify::new()),
                stream_flag: None,
            }),
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Load the chat list from the server.
    pub async fn load_chats(&self) -> ApiResult<()> {
        match self.repo.list_chats().await {
            Ok(chats) => {
                let mut s = self.state.lock();
                s.store.set_chats(chats);
                self.publish(&s);
                Ok(())
            }
            Err(e) => {
                self.surface_error(&e);
                Err(e)
            }
        }
    }

    /// Open an existing chat with its full transcript.
    pub async fn select_chat(&self, id: &str) -> ApiResult<()> {
        match self.repo.get_chat(id).await {
            Ok(chat) => {
                let mut s = self.state.lock();
                s.store.set_current(chat);
                s.error = None;
                self.publish(&s);
                Ok(())
            }
            Err(e) => {
                self.surface_error(&e);
                Err(e)
            }
        }
    }

    /// Leave the current chat so the next send starts a new one.
    pub fn close_chat(&self) {
        let mut s = self.state.lock();
        s.store.clear_current();
        s.error = None;
        self.publish(&s);
    }

    /// Send one user utterance and drive the reply stream to completion.
    ///
    /// Returns false when the send is rejected (empty text, or a stream is
    /// already active); the transcript is untouched in that case. An accepted
    /// send returns true once the stream has terminated — completed, failed
    /// or cancelled — with the outcome reflected in the snapshot.
    pub async fn send(&self, text: &str) -> bool {
        let trimmed = text.trim().to_string();
        if trimmed.is_empty() {
            return false;
        }

        let (existing_chat, notify) = {
            let mut s = self.state.lock();
            if s.phase != SessionPhase::Idle {
                debug!("Send rejected: a stream is already active");
                return false;
            }
            s.phase = SessionPhase::Opening;
            s.error = None;
            s.cancel_requested = false;
            s.cancel_notify = Arc::new(Notify::new());
            s.stream_flag = None;
            self.publish(&s);
            (s.store.current_id(), s.cancel_notify.clone())
        };

        // Implicit chat creation on the first message of an empty session.
        let chat_id = match existing_chat {
            Some(id) => id,
            None => match self.repo.create_chat(&derive_title(&trimmed)).await {
                Ok(chat) => {
                    let id = chat.id.clone();
                    info!(chat_id = %id, "Chat created");
                    let mut s = self.state.lock();
                    s.store.open_new_chat(chat);
                    self.publish(&s);
                    id
                }
                Err(e) => {
                    self.finish_stream(Some(e.user_message()));
                    return true;
                }
            },
        };

        if self.cancelled() {
            self.finish_stream(None);
            return true;
        }

        // The optimistic pair is appended atomically before the stream opens;
        // it is never rolled back, so the user can retry after a failure.
        let target = {
            let mut s = self.state.lock();
            let user = Message::optimistic_user(&chat_id, &trimmed);
            let assistant = Message::optimistic_assistant(&chat_id, user.created_at);
            let target = StreamTarget {
                chat_id: chat_id.clone(),
                message_id: assistant.id.clone(),
            };
            s.store.append_optimistic_pair(user, assistant);
            self.publish(&s);
            target
        };

        let stream = match self.repo.open_stream(&chat_id, &trimmed).await {
            Ok(stream) => stream,
            Err(e) => {
                self.finish_stream(Some(e.user_message()));
                return true;
            }
        };

        {
            let mut s = self.state.lock();
            s.stream_flag = Some(stream.cancel.clone());
            s.phase = SessionPhase::Streaming;
            self.publish(&s);
        }

        let mut events = stream.events;
        let outcome = loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(StreamEvent::Chunk(data)) => {
                        let mut s = self.state.lock();
                        s.store.apply_chunk(&target.chat_id, &target.message_id, &data);
                        self.publish(&s);
                    }
                    Some(StreamEvent::Done(data)) => {
                        let mut s = self.state.lock();
                        s.store.apply_chunk(&target.chat_id, &target.message_id, &data);
                        self.publish(&s);
                        break StreamOutcome::Done;
                    }
                    Some(StreamEvent::Error(message)) => {
                        break StreamOutcome::Failed(message);
                    }
                    None => {
                        // The generator only ends silently after its cancel
                        // flag was set.
                        break StreamOutcome::Cancelled;
                    }
                },
                _ = notify.notified() => {
                    break StreamOutcome::Cancelled;
                }
            }
        };
        drop(events);

        match outcome {
            StreamOutcome::Done => {
                {
                    let mut s = self.state.lock();
                    s.phase = SessionPhase::Refreshing;
                    self.publish(&s);
                }
                self.refresh_after_stream(&chat_id).await;
                self.finish_stream(None);
            }
            StreamOutcome::Failed(message) => {
                warn!(chat_id = %chat_id, error = %message, "Stream failed");
                self.finish_stream(Some(message));
            }
            StreamOutcome::Cancelled => {
                debug!(chat_id = %chat_id, "Stream cancelled, partial content kept");
                self.finish_stream(None);
            }
        }
        true
    }

    /// Replace optimistic state with the server's view: canonical message
    /// ids plus the server-assigned title in the chat list. If the user has
    /// selected a different chat in the meantime, their selection wins and
    /// only the list is reloaded.
    async fn refresh_after_stream(&self, chat_id: &str) {
        match self.repo.get_chat(chat_id).await {
            Ok(chat) => {
                let mut s = self.state.lock();
                if s.store.current_id().as_deref() == Some(chat_id) {
                    s.store.set_current(chat);
                    self.publish(&s);
                }
            }
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Failed to refresh chat after stream");
            }
        }
        if let Err(e) = self.load_chats().await {
            warn!(error = %e, "Failed to reload chat list after stream");
        }
    }

    /// Stop the active stream, keeping whatever partial content accumulated.
    /// Valid while opening or streaming; a no-op otherwise.
    pub fn cancel(&self) {
        let mut s = self.state.lock();
        match s.phase {
            SessionPhase::Opening | SessionPhase::Streaming => {
                s.cancel_requested = true;
                if let Some(flag) = &s.stream_flag {
                    flag.store(true, Ordering::Relaxed);
                }
                s.cancel_notify.notify_one();
            }
            _ => {}
        }
    }

    /// Component shutdown: closes any open stream unconditionally.
    pub fn shutdown(&self) {
        let mut s = self.state.lock();
        if let Some(flag) = &s.stream_flag {
            flag.store(true, Ordering::Relaxed);
        }
        s.cancel_notify.notify_one();
        s.cancel_requested = true;
    }

    /// Attach feedback to an assistant message already in the transcript.
    /// The message is updated optimistically and reverted on server failure.
    /// Valid in any phase; rejected locally when feedback is already pending
    /// or recorded.
    pub async fn feedback(
        &self,
        message_id: &str,
        feedback: Feedback,
        text: Option<String>,
    ) -> ApiResult<()> {
        let (chat_id, previous) = {
            let mut s = self.state.lock();
            if s.pending_feedback.contains(message_id) {
                return Err(ApiError::Validation(
                    "Feedback for this message is already being submitted".to_string(),
                ));
            }
            let Some(msg) = s.store.message(message_id) else {
                return Err(ApiError::NotFound);
            };
            if msg.feedback.is_some() {
                return Err(ApiError::Validation(
                    "Feedback has already been recorded for this message".to_string(),
                ));
            }
            let chat_id = msg.chat_id.clone();
            let Some(previous) = s.store.set_feedback(message_id, feedback, text.clone()) else {
                return Err(ApiError::Validation(
                    "Feedback is only valid on assistant messages".to_string(),
                ));
            };
            s.pending_feedback.insert(message_id.to_string());
            self.publish(&s);
            (chat_id, previous)
        };

        match self
            .repo
            .post_feedback(&chat_id, message_id, feedback, text.as_deref())
            .await
        {
            Ok(updated) => {
                let mut s = self.state.lock();
                s.store.replace_message(updated);
                s.pending_feedback.remove(message_id);
                self.publish(&s);
                Ok(())
            }
            Err(e) => {
                let mut s = self.state.lock();
                s.store.revert_feedback(message_id, previous);
                s.pending_feedback.remove(message_id);
                s.error = Some(e.user_message());
                self.publish(&s);
                Err(e)
            }
        }
    }

    /// Delete a chat, optimistically removing it from the list. On server
    /// failure the full list is reloaded to restore consistency.
    pub async fn delete_chat(&self, id: &str) -> ApiResult<()> {
        {
            let mut s = self.state.lock();
            s.store.remove_chat(id);
            self.publish(&s);
        }

        match self.repo.delete_chat(id).await {
            Ok(()) => {
                info!(chat_id = %id, "Chat deleted");
                Ok(())
            }
            Err(e) => {
                warn!(chat_id = %id, error = %e, "Delete failed, restoring list");
                if let Ok(chats) = self.repo.list_chats().await {
                    let mut s = self.state.lock();
                    s.store.set_chats(chats);
                    self.publish(&s);
                }
                self.surface_error(&e);
                Err(e)
            }
        }
    }

    /// Resolve the chunk citations of a message, lazily and deduplicated,
    /// in stable id order.
    pub async fn resolve_citations(&self, message_id: &str) -> Vec<(String, ChunkResolution)> {
        let ids = {
            let s = self.state.lock();
            s.store
                .message(message_id)
                .and_then(|m| m.context_documents.clone())
        };
        match ids {
            Some(ids) if !ids.is_empty() => self.resolver.resolve(&ids).await,
            _ => Vec::new(),
        }
    }

    fn cancelled(&self) -> bool {
        self.state.lock().cancel_requested
    }

    /// Terminal transition of a send: back to idle, stream resources
    /// released, optional error surfaced.
    fn finish_stream(&self, error: Option<String>) {
        let mut s = self.state.lock();
        s.phase = SessionPhase::Idle;
        s.stream_flag = None;
        s.cancel_requested = false;
        if let Some(error) = error {
            s.error = Some(error);
        }
        self.publish(&s);
    }

    fn surface_error(&self, error: &ApiError) {
        let mut s = self.state.lock();
        s.error = Some(error.user_message());
        self.publish(&s);
    }

    fn publish(&self, s: &ControllerState) {
        self.snapshot_tx.send_replace(ChatSnapshot {
            phase: s.phase,
            chats: s.store.chats().to_vec(),
            current: s.store.current().cloned(),
            error: s.error.clone(),
        });
    }
}

/// Title for an implicitly created chat: the first 30 characters of the
/// utterance, with an ellipsis when truncated.
pub(crate) fn derive_title(utterance: &str) -> String {
    let mut title: String = utterance.chars().take(TITLE_MAX_CHARS).collect();
    if utterance.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}
