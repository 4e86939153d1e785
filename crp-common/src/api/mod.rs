//! Shared HTTP API helpers
//!
//! Framework-free: the axum middleware lives in crp-access.

pub mod signature;
