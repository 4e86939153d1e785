//! # CRP Common Library
//!
//! Shared code for the client-record platform access boundary:
//! - Identifier newtypes (programs, clients, users, enrolments)
//! - Error types
//! - Configuration loading and root folder resolution
//! - Primary store and audit store initialization
//! - Request signature helpers
//! - Timestamp utilities

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod time;

pub use error::{Error, Result};
pub use ids::{ClientId, EnrolmentId, ProgramId, UserId};
