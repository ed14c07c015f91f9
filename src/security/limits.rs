//! Request body size limit.
//!
//! # Responsibilities
//! - Reject requests whose declared Content-Length exceeds the limit
//! - Cap streamed bodies without a declared length
//!
//! # Design Decisions
//! - Declared lengths are rejected before any body byte is read
//! - Undeclared bodies are wrapped in `http_body_util::Limited`; when the
//!   cap trips mid-stream the upstream call fails and is mapped to 413
//! - A limit of 0 disables the check

use std::error::Error as StdError;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::{LengthLimitError, Limited};

use crate::http::response;

/// Maximum accepted request body size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimit {
    max_bytes: u64,
}

impl BodyLimit {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn is_disabled(&self) -> bool {
        self.max_bytes == 0
    }
}

fn declared_length(request: &Request) -> Option<u64> {
    request
        .headers()
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Middleware function enforcing the body limit.
pub async fn body_limit_middleware(
    State(limit): State<BodyLimit>,
    request: Request,
    next: Next,
) -> Response {
    if limit.is_disabled() {
        return next.run(request).await;
    }

    if let Some(length) = declared_length(&request) {
        if length > limit.max_bytes {
            tracing::debug!(length, limit = limit.max_bytes, "Request body too large");
            return response::payload_too_large();
        }
    }

    let cap = usize::try_from(limit.max_bytes).unwrap_or(usize::MAX);
    let request = request.map(|body| Body::new(Limited::new(body, cap)));
    next.run(request).await
}

/// True if `err` or any of its sources is a body length limit violation.
pub fn is_body_too_large(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return true;
        }
        current = err.source();
    }
    false
}
