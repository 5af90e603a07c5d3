use thiserror::Error;

/// Error taxonomy at the client's boundary.
///
/// HTTP verbs never panic for transport or status failures — they classify
/// them into one of these kinds and return it. Component code may translate
/// a kind into UI state but never re-throws across component boundaries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Transport failure, no response received.
    #[error("network error: {0}")]
    Network(String),

    /// 401 after a refresh attempt, or the refresh itself failed.
    #[error("authentication required")]
    Auth,

    /// 403: insufficient permission.
    #[error("forbidden")]
    Forbidden,

    /// 404: resource missing. Normal terminal state for chunk resolution.
    #[error("not found")]
    NotFound,

    /// 4xx with a structured detail message from the server.
    #[error("validation failed: {0}")]
    Validation(String),

    /// 5xx.
    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Message suitable for direct display to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => {
                "Unable to reach the server. Check your connection.".to_string()
            }
            ApiError::Auth => "Your session has expired. Please log in again.".to_string(),
            ApiError::Forbidden => "You don't have permission to do that.".to_string(),
            ApiError::NotFound => "That resource no longer exists.".to_string(),
            ApiError::Validation(detail) => detail.clone(),
            ApiError::Server(_) | ApiError::Unknown(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}
