//! HTTP error mapping
//!
//! A hidden client and a missing client map to the same
//! `404 {"error":"client not found"}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::AccessError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error
#[derive(Debug)]
pub enum ApiError {
    Access(AccessError),
    /// Hidden or missing, deliberately not distinguished
    ClientNotFound,
}

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        ApiError::Access(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::ClientNotFound => (StatusCode::NOT_FOUND, "client not found".to_string()),
            ApiError::Access(e) => match &e {
                AccessError::FilterInputInvalid(_) | AccessError::InvalidInput(_) => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                AccessError::ProgramNotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                AccessError::InvalidTransition { .. } => (StatusCode::CONFLICT, e.to_string()),
                AccessError::AuditWriteFailed(_) => {
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "audit store unavailable".to_string(),
                    )
                }
                _ => {
                    error!("Request failed: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                    )
                }
            },
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
