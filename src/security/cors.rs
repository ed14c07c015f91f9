//! Cross-origin resource sharing.
//!
//! Requests without an `Origin` header are passed through untouched.
//! Disallowed origins are rejected with 403; allowed origins get the
//! CORS response headers, and `OPTIONS` preflights are answered directly
//! with 204 without reaching the backend.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::schema::CorsConfig;
use crate::error::ProxyError;

/// Compiled CORS policy.
pub struct Cors {
    allowed_origins: Vec<String>,
    allow_methods: HeaderValue,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl Cors {
    pub fn new(config: &CorsConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            allowed_origins: config.allowed_origins.clone(),
            allow_methods: joined(&config.allowed_methods)?
                .unwrap_or_else(|| HeaderValue::from_static("GET, POST")),
            allow_headers: joined(&config.allowed_headers)?,
            expose_headers: joined(&config.exposed_headers)?,
            allow_credentials: config.allow_credentials,
            max_age: HeaderValue::from(config.max_age_secs),
        })
    }

    /// Origins must match an allow-list entry exactly.
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }

    fn apply(&self, headers: &mut HeaderMap, origin: HeaderValue, preflight: bool) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if let Some(expose) = &self.expose_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, expose.clone());
        }

        if preflight {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
            if let Some(allow) = &self.allow_headers {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allow.clone());
            }
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        }
    }
}

fn joined(values: &[String]) -> Result<Option<HeaderValue>, ProxyError> {
    if values.is_empty() {
        return Ok(None);
    }
    HeaderValue::from_str(&values.join(", "))
        .map(Some)
        .map_err(|_| ProxyError::Middleware {
            kind: "cors",
            reason: format!("invalid header list `{}`", values.join(", ")),
        })
}

/// Middleware function applying the CORS policy.
pub async fn cors_middleware(
    State(cors): State<Arc<Cors>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(origin) = request.headers().get(header::ORIGIN).cloned() else {
        return next.run(request).await;
    };

    let allowed = origin.to_str().map(|o| cors.is_allowed(o)).unwrap_or(false);
    if !allowed {
        tracing::debug!(origin = ?origin, "CORS origin rejected");
        return (StatusCode::FORBIDDEN, "CORS policy: Origin not allowed").into_response();
    }

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        cors.apply(response.headers_mut(), origin, true);
        return response;
    }

    let mut response = next.run(request).await;
    cors.apply(response.headers_mut(), origin, false);
    response
}
