//! Error types for the Slidegate limiter.

use thiserror::Error;

use crate::ratelimit::CancelReason;

/// Main error type for Slidegate operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The caller's cancellation token fired before admission
    #[error("acquire cancelled: {0}")]
    Cancelled(CancelReason),

    /// The limiter no longer accepts work
    #[error("limiter stopped")]
    Stopped,

    /// The limiter is configured so that it can never admit anything
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Returns the cancellation reason if this error came from the caller's token.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            LimiterError::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Whether this error means the limiter has been stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self, LimiterError::Stopped)
    }
}

impl From<::config::ConfigError> for LimiterError {
    fn from(err: ::config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for Slidegate operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
