pub mod chat_repository;

pub use chat_repository::{ChatRepository, ChatStream, ResponseStream};
