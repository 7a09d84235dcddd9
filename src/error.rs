//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors. Fatal at construction time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The client address could not be determined from the request.
    #[error("Address resolution error: {0}")]
    Address(String),

    /// The counter store failed in a way not described by a Redis error.
    #[error("Counter store error: {0}")]
    Store(String),

    /// Redis command or connection errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Whether this error came from talking to the counter store.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, TurnstileError::Store(_) | TurnstileError::Redis(_))
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
