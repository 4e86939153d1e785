//! Common error types for CRP

use thiserror::Error;

/// Common result type for CRP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the access boundary and its stores
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
    ///
    /// Never used for client records: a hidden client and a missing client
    /// must look the same to callers.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or stored value that fails to parse
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
