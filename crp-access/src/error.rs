//! Error types for crp-access
//!
//! No variant names a client. A client that is hidden from the caller and a
//! client that does not exist produce the same result (an empty set or
//! `None`), never an error.

use crp_common::ProgramId;
use thiserror::Error;

use crate::registry::Tier;

/// Main error type for the access boundary
#[derive(Error, Debug)]
pub enum AccessError {
    /// Tier rule violated; rejected before any state change
    #[error("Invalid tier transition for program {program}: {from} -> {to} requires a compliance override")]
    InvalidTransition {
        program: ProgramId,
        from: Tier,
        to: Tier,
    },

    /// Audit append failed; the confidential-record operation was aborted
    #[error("Audit write failed: {0}")]
    AuditWriteFailed(String),

    /// Malformed principal
    #[error("Invalid principal: {0}")]
    FilterInputInvalid(String),

    /// Duplicate check could not run; callers degrade to an empty report
    #[error("Matching unavailable: {0}")]
    MatchingUnavailable(String),

    /// Program lookups may report absence; programs are not client data
    #[error("Program not found: {0}")]
    ProgramNotFound(ProgramId),

    /// Invalid request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors from the shared layer (config, parsing, I/O)
    #[error(transparent)]
    Common(#[from] crp_common::Error),
}

/// Convenience Result type using AccessError
pub type Result<T> = std::result::Result<T, AccessError>;
