use serde::Deserialize;

/// Raw wire payload of one SSE record on `/chats/{id}/stream`.
///
/// Each record carries the full assistant content seen so far (not a delta)
/// plus optional metadata that may arrive only on the final record.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub tokens: Option<u32>,
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub context_documents: Option<Vec<String>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Content and metadata of a non-error payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    pub content: String,
    pub tokens: Option<u32>,
    pub tokens_per_second: Option<f64>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub context_documents: Option<Vec<String>>,
}

/// Tagged stream event delivered to the controller. `Done` and `Error` are
/// terminal: the channel yields nothing after them.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(ChunkData),
    Done(ChunkData),
    Error(String),
}

impl From<StreamPayload> for StreamEvent {
    fn from(payload: StreamPayload) -> Self {
        if let Some(error) = payload.error {
            return StreamEvent::Error(error);
        }
        let data = ChunkData {
            content: payload.content,
            tokens: payload.tokens,
            tokens_per_second: payload.tokens_per_second,
            model: payload.model,
            provider: payload.provider,
            context_documents: payload.context_documents,
        };
        if payload.done {
            StreamEvent::Done(data)
        } else {
            StreamEvent::Chunk(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_payload_becomes_chunk() {
        let payload: StreamPayload = serde_json::from_str(r#"{"content":"Hi","done":false}"#).unwrap();
        match StreamEvent::from(payload) {
            StreamEvent::Chunk(data) => {
                assert_eq!(data.content, "Hi");
                assert!(data.tokens.is_none());
            }
            other => panic!("expected Chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_done_payload_carries_metadata() {
        let payload: StreamPayload = serde_json::from_str(
            r#"{"content":"Hi there.","done":true,"tokens":2,"tokens_per_second":10.0,"model":"m","provider":"p"}"#,
        )
        .unwrap();
        match StreamEvent::from(payload) {
            StreamEvent::Done(data) => {
                assert_eq!(data.content, "Hi there.");
                assert_eq!(data.tokens, Some(2));
                assert_eq!(data.tokens_per_second, Some(10.0));
                assert_eq!(data.model.as_deref(), Some("m"));
                assert_eq!(data.provider.as_deref(), Some("p"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn test_error_field_wins_over_done() {
        let payload: StreamPayload =
            serde_json::from_str(r#"{"content":"","done":true,"error":"model unavailable"}"#).unwrap();
        assert_eq!(
            StreamEvent::from(payload),
            StreamEvent::Error("model unavailable".to_string())
        );
    }
}
