//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header)
//!     → matcher.rs (normalize host)
//!     → router.rs (exact lookup, then longest wildcard suffix)
//!     → Return: matched Route or None (404)
//!
//! Matched Route:
//!     → global + route middleware merged (http::middleware)
//!     → route.rs forwards to the backend over the route's own pool
//! ```
//!
//! # Design Decisions
//! - Routes may be added or replaced at runtime; lookups take a read lock
//! - No regex in hot path (suffix matching only)
//! - Deterministic: same host always matches same route

pub mod matcher;
pub mod route;
pub mod router;

pub use route::{Route, RouteOptions};
pub use router::Router;
