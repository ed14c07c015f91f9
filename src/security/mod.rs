//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (per configured middleware):
//!     → rate_limit.rs (per-IP token buckets)
//!     → basic_auth.rs (bcrypt credential check)
//!     → cors.rs (origin policy, preflight)
//!     → limits.rs (request body size)
//!     → headers.rs (security response headers)
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Rejections never reach the backend

pub mod basic_auth;
pub mod cors;
pub mod headers;
pub mod limits;
pub mod rate_limit;

pub use basic_auth::BasicAuth;
pub use cors::Cors;
pub use headers::SecurityHeaders;
pub use limits::BodyLimit;
pub use rate_limit::RateLimiter;
