//! Common error types for the Sight platform

use thiserror::Error;

/// Common result type for Sight operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Sight services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Compare-and-set state transition lost against the stored state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
