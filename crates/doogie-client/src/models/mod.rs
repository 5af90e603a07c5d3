pub mod chat;
pub mod page;
pub mod stream;
pub mod transcript_store;

pub use chat::{Chat, ChatSummary, Feedback, Message, Role, UserProfile};
pub use page::Page;
pub use stream::{ChunkData, StreamEvent, StreamPayload};
pub use transcript_store::TranscriptStore;
