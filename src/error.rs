//! Error types surfaced by the proxy library.
//!
//! Per-request failures never show up here: every request path ends in an
//! HTTP response. These errors cover registration, construction, and the
//! serving loop itself.

use thiserror::Error;

use crate::net::listener::ListenerError;

/// Errors returned by the proxy's registration and serving APIs.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The backend URL could not be parsed.
    #[error("invalid backend url `{url}`: {source}")]
    InvalidBackendUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The backend URL parsed but cannot be proxied to.
    #[error("unsupported backend url `{url}`: {reason}")]
    UnsupportedBackend { url: String, reason: &'static str },

    /// A middleware could not be built from its configuration.
    #[error("failed to build {kind} middleware: {reason}")]
    Middleware { kind: &'static str, reason: String },

    /// Binding or accepting on the listener failed.
    #[error(transparent)]
    Listener(#[from] ListenerError),
}
