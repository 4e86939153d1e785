//! Request signature middleware
//!
//! Tower layer that checks `X-CRP-Timestamp` and `X-CRP-Signature` on every
//! request except `/health`. The body is buffered to compute the signature
//! and then handed on unchanged. A shared secret of 0 disables the check.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use crp_common::api::signature::{
    validate_signature, validate_timestamp, SignatureError, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::error::ErrorResponse;

/// Largest request body accepted for signing
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Paths served without a signature
const PUBLIC_PATHS: &[&str] = &["/health"];

#[derive(Clone)]
pub struct AuthLayer {
    pub shared_secret: i64,
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            shared_secret: self.shared_secret,
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    shared_secret: i64,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let shared_secret = self.shared_secret;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if PUBLIC_PATHS.contains(&request.uri().path()) {
                return inner.call(request).await;
            }

            if shared_secret == 0 {
                debug!("Request signing disabled (shared_secret = 0)");
                return inner.call(request).await;
            }

            match verify_request(request, shared_secret).await {
                Ok(request) => inner.call(request).await,
                Err(response) => Ok(response),
            }
        })
    }
}

fn header_value<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingHeader(name))
}

async fn verify_request(request: Request, shared_secret: i64) -> Result<Request, Response> {
    let (parts, body) = request.into_parts();

    let bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|err| {
        warn!("Failed to read request body: {}", err);
        auth_error_response(StatusCode::BAD_REQUEST, "invalid body")
    })?;

    let checked = (|| {
        let timestamp = header_value(&parts.headers, TIMESTAMP_HEADER)?
            .parse::<i64>()
            .map_err(|e| SignatureError::InvalidTimestamp(e.to_string()))?;
        let signature = header_value(&parts.headers, SIGNATURE_HEADER)?;

        validate_timestamp(timestamp)?;
        validate_signature(
            signature,
            timestamp,
            parts.method.as_str(),
            parts.uri.path(),
            &bytes,
            shared_secret,
        )
    })();

    match checked {
        Ok(()) => Ok(Request::from_parts(parts, Body::from(bytes))),
        Err(e) => Err(map_signature_error(e)),
    }
}

fn map_signature_error(error: SignatureError) -> Response {
    match error {
        SignatureError::MissingHeader(name) => {
            auth_error_response(StatusCode::BAD_REQUEST, &format!("missing header {}", name))
        }
        SignatureError::InvalidTimestamp(reason) => {
            warn!("Rejected request timestamp: {}", reason);
            auth_error_response(StatusCode::UNAUTHORIZED, "timestamp outside window")
        }
        SignatureError::InvalidSignature => {
            warn!("Rejected request signature");
            auth_error_response(StatusCode::UNAUTHORIZED, "invalid signature")
        }
        SignatureError::Database(msg) => {
            tracing::error!("Database error during signature check: {}", msg);
            auth_error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn auth_error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}
