//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1 connection, Axum app, access log)
//!     → [routing layer picks the route by Host]
//!     → middleware/ (merged global + route chain)
//!     → request.rs (build backend request, X-Forwarded-*)
//!     → routing::Route::forward (pooled backend client)
//!     → response.rs (strip hop-by-hop, stream back)
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use middleware::{Middleware, MiddlewareKind};
pub use server::ProxyServer;
