pub mod chunk_resolver;
pub mod error;
pub mod http_client;
pub mod single_flight;

pub use chunk_resolver::{ChunkInfo, ChunkResolution, ChunkResolver};
pub use error::{ApiError, ApiResult};
pub use http_client::{ApiClient, SessionEvent};
pub use single_flight::SingleFlight;
