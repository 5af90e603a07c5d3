//! Client library for the Doogie retrieval-augmented chat server.
//!
//! The moving parts, leaves first: a token store with two lifetimes, an
//! authenticated HTTP client with single-flight refresh and a one-shot 401
//! replay, a typed chat repository that owns the SSE reply stream, a
//! process-wide chunk-citation resolver, a pure think-tag parser, and the
//! chat session controller that folds stream events into the transcript and
//! publishes immutable snapshots to whatever view is attached.

pub mod auth;
pub mod config;
pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;
pub mod views;

pub use auth::{AuthService, TokenStore};
pub use config::ClientConfig;
pub use controllers::{ChatController, ChatSnapshot, SessionPhase};
pub use models::{Chat, ChatSummary, Feedback, Message, Role};
pub use repositories::ChatRepository;
pub use services::{ApiClient, ApiError, ApiResult, ChunkResolution, ChunkResolver, SessionEvent};
pub use views::{parse_think_segments, Segment, SegmentKind};
