//! Host-based HTTP reverse proxy library.
//!
//! Routes requests by their Host header (exact or `*.` wildcard) to
//! per-host backends, running each request through a merged chain of
//! global and route-scoped middleware.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::{Middleware, MiddlewareKind, ProxyServer};
pub use lifecycle::Shutdown;
pub use routing::RouteOptions;
