//! Middleware pipeline.
//!
//! # Data Flow
//! ```text
//! global middlewares ─┐
//!                     ├─ merge() ─→ [..merged.., max_request_body, recovery]
//! route middlewares ──┘                 │
//!                                       └─ chain() ─→ Handler → Route::forward
//! ```
//!
//! # Design Decisions
//! - Middleware is a closed set of kinds; each kind wraps a `Handler`
//!   with an axum `from_fn` layer
//! - A route entry replaces the global entry of the same kind, keeping
//!   the global position; route-only kinds run after the global ones
//! - List order is execution order: the first entry sees the request first
//! - Recovery is always innermost, directly around the backend call

pub mod access_log;
pub mod compress;
pub mod headers;
pub mod recovery;
pub mod request_id;

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Response;
use tower::util::BoxCloneSyncService;
use tower::Layer;

use crate::config::schema::MiddlewareConfig;
use crate::error::ProxyError;
use crate::security::basic_auth::{basic_auth_middleware, BasicAuth};
use crate::security::cors::{cors_middleware, Cors};
use crate::security::headers::{security_headers_middleware, SecurityHeaders};
use crate::security::limits::{body_limit_middleware, BodyLimit};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiter};

use self::compress::{compress_middleware, Compress};
use self::headers::{headers_middleware, HeaderRewrite};
use self::recovery::recovery_middleware;
use self::request_id::{request_id_middleware, RequestId};

/// A request handler: the backend call, possibly wrapped in middleware.
pub type Handler = BoxCloneSyncService<Request, Response, Infallible>;

/// Identifies a middleware type for merging and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewareKind {
    RateLimit,
    BasicAuth,
    Cors,
    Headers,
    Compress,
    RequestId,
    SecurityHeaders,
    MaxRequestBody,
    Recovery,
}

impl MiddlewareKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            MiddlewareKind::RateLimit => "rate_limit",
            MiddlewareKind::BasicAuth => "basic_auth",
            MiddlewareKind::Cors => "cors",
            MiddlewareKind::Headers => "headers",
            MiddlewareKind::Compress => "compress",
            MiddlewareKind::RequestId => "request_id",
            MiddlewareKind::SecurityHeaders => "security_headers",
            MiddlewareKind::MaxRequestBody => "max_request_body",
            MiddlewareKind::Recovery => "recovery",
        }
    }
}

impl fmt::Display for MiddlewareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A built middleware instance. Cloning shares the underlying state.
#[derive(Clone)]
pub enum Middleware {
    RateLimit(Arc<RateLimiter>),
    BasicAuth(Arc<BasicAuth>),
    Cors(Arc<Cors>),
    Headers(Arc<HeaderRewrite>),
    Compress(Arc<Compress>),
    RequestId(Arc<RequestId>),
    SecurityHeaders(Arc<SecurityHeaders>),
    MaxRequestBody(BodyLimit),
    Recovery,
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.kind()).finish()
    }
}

impl Middleware {
    /// Build a middleware from its configuration.
    pub fn from_config(config: &MiddlewareConfig) -> Result<Self, ProxyError> {
        Ok(match config {
            MiddlewareConfig::RateLimit(c) => Middleware::RateLimit(Arc::new(RateLimiter::new(
                c.requests,
                c.window(),
                c.burst,
            ))),
            MiddlewareConfig::BasicAuth(c) => Middleware::BasicAuth(Arc::new(BasicAuth::new(c)?)),
            MiddlewareConfig::Cors(c) => Middleware::Cors(Arc::new(Cors::new(c)?)),
            MiddlewareConfig::Headers(c) => Middleware::Headers(Arc::new(HeaderRewrite::new(c)?)),
            MiddlewareConfig::Compress(c) => Middleware::Compress(Arc::new(Compress::new(c))),
            MiddlewareConfig::RequestId(c) => {
                Middleware::RequestId(Arc::new(RequestId::new(&c.header_name)?))
            }
            MiddlewareConfig::SecurityHeaders(c) => {
                Middleware::SecurityHeaders(Arc::new(SecurityHeaders::new(c)?))
            }
        })
    }

    /// Build every entry of a middleware list, in order.
    pub fn from_configs(configs: &[MiddlewareConfig]) -> Result<Vec<Self>, ProxyError> {
        configs.iter().map(Self::from_config).collect()
    }

    pub fn kind(&self) -> MiddlewareKind {
        match self {
            Middleware::RateLimit(_) => MiddlewareKind::RateLimit,
            Middleware::BasicAuth(_) => MiddlewareKind::BasicAuth,
            Middleware::Cors(_) => MiddlewareKind::Cors,
            Middleware::Headers(_) => MiddlewareKind::Headers,
            Middleware::Compress(_) => MiddlewareKind::Compress,
            Middleware::RequestId(_) => MiddlewareKind::RequestId,
            Middleware::SecurityHeaders(_) => MiddlewareKind::SecurityHeaders,
            Middleware::MaxRequestBody(_) => MiddlewareKind::MaxRequestBody,
            Middleware::Recovery => MiddlewareKind::Recovery,
        }
    }

    /// Wrap `next` so this middleware runs before it.
    pub fn wrap(&self, next: Handler) -> Handler {
        match self {
            Middleware::RateLimit(state) => Handler::new(
                from_fn_with_state(Arc::clone(state), rate_limit_middleware).layer(next),
            ),
            Middleware::BasicAuth(state) => Handler::new(
                from_fn_with_state(Arc::clone(state), basic_auth_middleware).layer(next),
            ),
            Middleware::Cors(state) => {
                Handler::new(from_fn_with_state(Arc::clone(state), cors_middleware).layer(next))
            }
            Middleware::Headers(state) => {
                Handler::new(from_fn_with_state(Arc::clone(state), headers_middleware).layer(next))
            }
            Middleware::Compress(state) => {
                Handler::new(from_fn_with_state(Arc::clone(state), compress_middleware).layer(next))
            }
            Middleware::RequestId(state) => Handler::new(
                from_fn_with_state(Arc::clone(state), request_id_middleware).layer(next),
            ),
            Middleware::SecurityHeaders(state) => Handler::new(
                from_fn_with_state(Arc::clone(state), security_headers_middleware).layer(next),
            ),
            Middleware::MaxRequestBody(limit) => {
                Handler::new(from_fn_with_state(*limit, body_limit_middleware).layer(next))
            }
            Middleware::Recovery => Handler::new(from_fn(recovery_middleware).layer(next)),
        }
    }
}

/// Merge global and route middleware.
///
/// Each global entry is replaced in place by the first route entry of the
/// same kind; route kinds absent from the global list are appended in
/// route order.
pub fn merge(global: &[Middleware], route: &[Middleware]) -> Vec<Middleware> {
    let mut merged: Vec<Middleware> = global
        .iter()
        .map(|g| {
            route
                .iter()
                .find(|r| r.kind() == g.kind())
                .unwrap_or(g)
                .clone()
        })
        .collect();

    merged.extend(
        route
            .iter()
            .filter(|r| !global.iter().any(|g| g.kind() == r.kind()))
            .cloned(),
    );

    merged
}

/// Full per-request pipeline: merged list, then body limit, then recovery.
pub fn compose(global: &[Middleware], route: &[Middleware], body_limit: BodyLimit) -> Vec<Middleware> {
    let mut pipeline = merge(global, route);
    pipeline.push(Middleware::MaxRequestBody(body_limit));
    pipeline.push(Middleware::Recovery);
    pipeline
}

/// Wrap `handler` so that `middlewares[0]` runs first.
pub fn chain(middlewares: &[Middleware], handler: Handler) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, middleware| middleware.wrap(next))
}
