//! HTTP Basic authentication middleware.
//!
//! # Security Features
//!
//! - **bcrypt verification**: passwords are only ever compared against hashes
//! - **Uniform failure cost**: every rejected request, including ones with a
//!   missing or malformed header or an unknown user, pays for one bcrypt
//!   comparison at the highest configured cost
//! - **Uniform failure response**: all rejections share the same status,
//!   challenge header and body
//!
//! Verification runs on the blocking pool so slow hashes never stall the
//! async workers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::schema::BasicAuthConfig;
use crate::error::ProxyError;

const DUMMY_PASSWORD: &str = "vhost-proxy-dummy-password";

/// Validated Basic auth settings plus the precomputed dummy hash.
pub struct BasicAuth {
    users: HashMap<String, String>,
    dummy_hash: String,
    challenge: HeaderValue,
}

impl BasicAuth {
    pub fn new(config: &BasicAuthConfig) -> Result<Self, ProxyError> {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", config.realm))
            .map_err(|_| invalid(format!("realm `{}` is not a valid header value", config.realm)))?;

        let cost = config
            .users
            .values()
            .filter_map(|hash| hash_cost(hash))
            .max()
            .unwrap_or(bcrypt::DEFAULT_COST);

        let dummy_hash = bcrypt::hash(DUMMY_PASSWORD, cost)
            .map_err(|e| invalid(format!("failed to compute dummy hash: {e}")))?;

        Ok(Self {
            users: config.users.clone().into_iter().collect(),
            dummy_hash,
            challenge,
        })
    }

    /// Check an `Authorization` header value. Blocking: runs bcrypt.
    pub fn authenticate(&self, header: Option<&str>) -> bool {
        let candidate = self.candidate(header);
        let matched = bcrypt::verify(&candidate.password, candidate.hash).unwrap_or(false);
        candidate.known_user && matched
    }

    /// Pair the presented password with the hash to compare it against.
    /// Unusable headers and unknown users get the dummy hash.
    fn candidate<'a>(&'a self, header: Option<&str>) -> Candidate<'a> {
        let credentials = header.and_then(parse_credentials);
        let stored = credentials
            .as_ref()
            .and_then(|(user, _)| self.users.get(user));

        Candidate {
            known_user: stored.is_some(),
            hash: stored.map_or(self.dummy_hash.as_str(), String::as_str),
            password: credentials.map(|(_, password)| password).unwrap_or_default(),
        }
    }

    fn reject(&self) -> Response {
        let mut response = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, self.challenge.clone());
        response
    }
}

struct Candidate<'a> {
    known_user: bool,
    hash: &'a str,
    password: String,
}

fn invalid(reason: String) -> ProxyError {
    ProxyError::Middleware {
        kind: "basic_auth",
        reason,
    }
}

/// Cost field of a `$2b$<cost>$...` hash.
fn hash_cost(hash: &str) -> Option<u32> {
    hash.split('$').nth(2)?.parse().ok()
}

/// Decode `Basic <base64(user:password)>`.
pub fn parse_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Username claimed by a request's Basic credentials, verified or not.
pub fn claimed_username(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_credentials)
        .map(|(user, _)| user)
}

/// Middleware function for Basic authentication.
pub async fn basic_auth_middleware(
    State(auth): State<Arc<BasicAuth>>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let verifier = Arc::clone(&auth);
    let authenticated =
        tokio::task::spawn_blocking(move || verifier.authenticate(header.as_deref()))
            .await
            .unwrap_or(false);

    if authenticated {
        next.run(request).await
    } else {
        tracing::debug!("Basic authentication failed");
        auth.reject()
    }
}
