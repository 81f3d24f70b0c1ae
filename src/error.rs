//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Waiting pool unavailable: {message}")]
    PoolUnavailable { message: String },

    #[error("Message bus unavailable: {message}")]
    BusUnavailable { message: String },

    #[error("Invalid match request: {reason}")]
    InvalidMatchRequest { reason: String },

    #[error("Malformed request body: {message}")]
    MalformedRequest { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether the failed operation may succeed if attempted again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MatchmakingError::PoolUnavailable { .. } | MatchmakingError::BusUnavailable { .. }
        )
    }

    /// Inspect an anyhow error chain for a retryable matchmaking error
    pub fn is_retryable_error(error: &anyhow::Error) -> bool {
        error
            .chain()
            .filter_map(|cause| cause.downcast_ref::<MatchmakingError>())
            .any(MatchmakingError::is_retryable)
    }
}
