//! Security response headers.
//!
//! Applied after the backend responds, overwriting whatever the backend
//! sent for the same names. Empty settings are skipped.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::schema::SecurityHeadersConfig;
use crate::error::ProxyError;

pub const X_XSS_PROTECTION: HeaderName = HeaderName::from_static("x-xss-protection");
pub const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn new(config: &SecurityHeadersConfig) -> Result<Self, ProxyError> {
        let candidates = [
            (header::X_CONTENT_TYPE_OPTIONS, &config.content_type_options),
            (header::X_FRAME_OPTIONS, &config.frame_options),
            (X_XSS_PROTECTION, &config.xss_protection),
            (header::REFERRER_POLICY, &config.referrer_policy),
            (PERMISSIONS_POLICY, &config.permissions_policy),
        ];

        let mut headers = Vec::new();
        for (name, value) in candidates {
            if value.is_empty() {
                continue;
            }
            let value = HeaderValue::from_str(value).map_err(|_| ProxyError::Middleware {
                kind: "security_headers",
                reason: format!("invalid value for {name}: `{value}`"),
            })?;
            headers.push((name, value));
        }

        Ok(Self { headers })
    }
}

pub async fn security_headers_middleware(
    State(security): State<Arc<SecurityHeaders>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in &security.headers {
        headers.insert(name.clone(), value.clone());
    }
    response
}
