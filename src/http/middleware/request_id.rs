//! Request correlation IDs.
//!
//! Reuses an inbound ID when the client (or an upstream proxy) supplied
//! one, otherwise generates a UUID v4. The ID is forwarded to the backend
//! and echoed on the response under the same header.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::error::ProxyError;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Request ID settings.
pub struct RequestId {
    header: HeaderName,
}

impl RequestId {
    pub fn new(header_name: &str) -> Result<Self, ProxyError> {
        let header =
            HeaderName::from_bytes(header_name.as_bytes()).map_err(|_| ProxyError::Middleware {
                kind: "request_id",
                reason: format!("invalid header name `{header_name}`"),
            })?;
        Ok(Self { header })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(X_REQUEST_ID),
        }
    }
}

fn generate() -> HeaderValue {
    let id = Uuid::new_v4().to_string();
    // A hyphenated UUID is always a valid header value.
    HeaderValue::from_str(&id).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

pub async fn request_id_middleware(
    State(config): State<Arc<RequestId>>,
    mut request: Request,
    next: Next,
) -> Response {
    let id = request
        .headers()
        .get(&config.header)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(generate);

    request.headers_mut().insert(config.header.clone(), id.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(config.header.clone(), id);
    response
}
