//! Error types for geotrack.

use thiserror::Error;

/// Result type alias using geotrack's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for geotrack operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input that rejects a whole request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A single point failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event publication failed
    #[error("Emit error: {0}")]
    Emit(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
