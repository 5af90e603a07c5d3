use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::json;
use tracing::{debug, warn};

use crate::models::{Chat, ChatSummary, Feedback, Message, StreamEvent, StreamPayload};
use crate::services::error::{ApiError, ApiResult};
use crate::services::http_client::{classify_error, ApiClient};

/// One-way channel of stream events. `Done` and `Error` are terminal; the
/// stream yields nothing after them.
pub type ResponseStream = BoxStream<'static, StreamEvent>;

/// An open reply stream plus its cancellation flag. Setting the flag stops
/// delivery at the next event; dropping the stream closes the connection.
pub struct ChatStream {
    pub events: ResponseStream,
    pub cancel: Arc<AtomicBool>,
}

/// Typed facade over the chat REST surface.
pub struct ChatRepository {
    client: Arc<ApiClient>,
}

impl ChatRepository {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub async fn list_chats(&self) -> ApiResult<Vec<ChatSummary>> {
        self.client.get("/chats").await
    }

    pub async fn get_chat(&self, id: &str) -> ApiResult<Chat> {
        self.client.get(&format!("/chats/{id}")).await
    }

    pub async fn create_chat(&self, title: &str) -> ApiResult<Chat> {
        self.client.post("/chats", &json!({ "title": title })).await
    }

    pub async fn delete_chat(&self, id: &str) -> ApiResult<()> {
        self.client.delete(&format!("/chats/{id}")).await
    }

    /// Attach feedback to an assistant message. Returns the server's updated
    /// copy of the message.
    pub async fn post_feedback(
        &self,
        chat_id: &str,
        message_id: &str,
        feedback: Feedback,
        text: Option<&str>,
    ) -> ApiResult<Message> {
        let mut body = json!({ "feedback": feedback });
        if let Some(text) = text {
            body["feedback_text"] = json!(text);
        }
        self.client
            .post(&format!("/chats/{chat_id}/messages/{message_id}/feedback"), &body)
            .await
    }

    /// Open the SSE reply stream for one user utterance.
    ///
    /// SSE cannot carry custom headers, so the access token travels as a
    /// URL-encoded query parameter; a timestamp parameter busts intermediary
    /// caches. Fails immediately with `Auth` when no token is stored.
    pub async fn open_stream(&self, chat_id: &str, content: &str) -> ApiResult<ChatStream> {
        let token = self.client.access_token().await?;

        let url = format!(
            "{}?content={}&token={}&_={}",
            self.client.url(&format!("/chats/{chat_id}/stream")),
            utf8_percent_encode(content, NON_ALPHANUMERIC),
            utf8_percent_encode(&token, NON_ALPHANUMERIC),
            Utc::now().timestamp_millis(),
        );

        let resp = self
            .client
            .http()
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }

        debug!(chat_id = %chat_id, "Reply stream opened");

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();

        let events: ResponseStream = Box::pin(async_stream::stream! {
            let mut bytes = resp.bytes_stream();
            let mut frames = SseFrameBuffer::new();

            while let Some(item) = bytes.next().await {
                if flag.load(Ordering::Relaxed) {
                    debug!("Reply stream cancelled");
                    return;
                }
                match item {
                    Ok(chunk) => {
                        for line in frames.push(&chunk) {
                            let Some(payload) = data_payload(&line) else {
                                continue;
                            };
                            match serde_json::from_str::<StreamPayload>(payload) {
                                Ok(parsed) => {
                                    let event = StreamEvent::from(parsed);
                                    let terminal = matches!(
                                        event,
                                        StreamEvent::Done(_) | StreamEvent::Error(_)
                                    );
                                    yield event;
                                    if terminal {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "Skipping malformed stream payload");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        yield StreamEvent::Error(format!("stream transport error: {e}"));
                        return;
                    }
                }
            }
            // Transport closed without a terminal payload.
            yield StreamEvent::Error("stream ended without completion".to_string());
        });

        Ok(ChatStream { events, cancel })
    }
}

/// Reassembles SSE lines from arbitrary byte-chunk boundaries.
struct SseFrameBuffer {
    buf: Vec<u8>,
}

impl SseFrameBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed raw bytes, get back every complete line. Partial trailing lines
    /// stay buffered until the next push.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            match String::from_utf8(line) {
                Ok(line) => lines.push(line),
                Err(e) => warn!(error = %e, "Dropping non-UTF-8 stream line"),
            }
        }
        lines
    }
}

/// The JSON payload of a `data:` line; None for comments, event names and
/// blank separators.
fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}
