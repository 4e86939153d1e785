//! HTTP adapter
//!
//! Thin axum layer over [`crate::AccessServices`]. The session layer sends
//! the principal in every request body; this adapter never derives one.

pub mod auth_middleware;
pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{create_router, AppContext};
