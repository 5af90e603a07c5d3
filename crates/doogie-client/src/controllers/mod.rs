pub mod chat_controller;

pub use chat_controller::{ChatController, ChatSnapshot, SessionPhase};
