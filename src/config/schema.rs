//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::middleware::MiddlewareKind;
use crate::observability::access_log::AccessLogFormat;
use crate::routing::route::{
    DEFAULT_DIAL_TIMEOUT, DEFAULT_IDLE_CONN_TIMEOUT, DEFAULT_MAX_IDLE_CONNS,
    DEFAULT_RESPONSE_HEADER_TIMEOUT,
};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener and connection settings.
    pub server: ServerConfig,

    /// Diagnostic logging.
    pub log: LogConfig,

    /// Access log; disabled when absent.
    pub access_log: Option<AccessLogConfig>,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Middleware applied to every route.
    pub middlewares: Vec<MiddlewareConfig>,

    /// Host pattern to backend route.
    pub routes: BTreeMap<String, RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub listen: String,

    /// Time allowed to receive request headers. On a kept-alive connection
    /// this also bounds the wait for the next request, so it is the
    /// effective idle limit. 0 disables it.
    pub read_timeout_secs: u64,

    /// Time allowed to produce the response head.
    pub write_timeout_secs: u64,

    /// Keep-alive switch: 0 closes every connection after one response,
    /// any other value keeps connections open. The HTTP/1 server has no
    /// separate idle timer; idle connections are closed by
    /// `read_timeout_secs`.
    pub idle_timeout_secs: u64,

    /// Drain deadline for in-flight requests on shutdown.
    pub shutdown_timeout_secs: u64,

    /// Maximum bytes buffered while reading request headers.
    pub max_header_bytes: usize,

    /// Maximum request body size in bytes; 0 disables the limit.
    pub max_request_body: u64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            read_timeout_secs: 15,
            write_timeout_secs: 15,
            idle_timeout_secs: 60,
            shutdown_timeout_secs: 30,
            max_header_bytes: 1024 * 1024,
            max_request_body: 10 * 1024 * 1024,
            max_connections: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Diagnostic log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Access log configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AccessLogConfig {
    pub format: AccessLogFormat,
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus endpoint.
    pub enabled: bool,

    /// Metrics endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A single host route.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Backend base URL (scheme, host, optional path prefix).
    pub backend: String,

    /// Forward the client's Host header instead of the backend's.
    pub preserve_host: bool,

    /// Backend connect timeout in seconds.
    pub dial_timeout_secs: u64,

    /// Time to wait for backend response headers; 0 waits forever.
    pub response_header_timeout_secs: u64,

    /// How long idle pooled connections are kept.
    pub idle_conn_timeout_secs: u64,

    /// Maximum idle pooled connections.
    pub max_idle_conns: usize,

    /// Route-scoped middleware; overrides global entries of the same type.
    pub middlewares: Vec<MiddlewareConfig>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            backend: String::new(),
            preserve_host: true,
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT.as_secs(),
            response_header_timeout_secs: DEFAULT_RESPONSE_HEADER_TIMEOUT.as_secs(),
            idle_conn_timeout_secs: DEFAULT_IDLE_CONN_TIMEOUT.as_secs(),
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            middlewares: Vec::new(),
        }
    }
}

/// Middleware specification, tagged by `type`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiddlewareConfig {
    RateLimit(RateLimitConfig),
    BasicAuth(BasicAuthConfig),
    Cors(CorsConfig),
    Headers(HeadersConfig),
    Compress(CompressConfig),
    RequestId(RequestIdConfig),
    SecurityHeaders(SecurityHeadersConfig),
}

impl MiddlewareConfig {
    pub fn kind(&self) -> MiddlewareKind {
        match self {
            MiddlewareConfig::RateLimit(_) => MiddlewareKind::RateLimit,
            MiddlewareConfig::BasicAuth(_) => MiddlewareKind::BasicAuth,
            MiddlewareConfig::Cors(_) => MiddlewareKind::Cors,
            MiddlewareConfig::Headers(_) => MiddlewareKind::Headers,
            MiddlewareConfig::Compress(_) => MiddlewareKind::Compress,
            MiddlewareConfig::RequestId(_) => MiddlewareKind::RequestId,
            MiddlewareConfig::SecurityHeaders(_) => MiddlewareKind::SecurityHeaders,
        }
    }
}

/// Per-client-IP token bucket settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Burst capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 1,
            burst: 50,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// HTTP Basic authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BasicAuthConfig {
    /// Username to bcrypt hash.
    pub users: BTreeMap<String, String>,

    /// Realm advertised in the challenge.
    pub realm: String,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            realm: "Restricted".to_string(),
        }
    }
}

/// Cross-origin policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: 24 * 60 * 60,
        }
    }
}

/// Header rewrite rules for requests and responses.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct HeadersConfig {
    pub request: HeaderRulesConfig,
    pub response: HeaderRulesConfig,
}

/// Add (append), set (overwrite) and remove operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct HeaderRulesConfig {
    pub add: BTreeMap<String, String>,
    pub set: BTreeMap<String, String>,
    pub remove: Vec<String>,
}

/// Gzip response compression.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CompressConfig {
    /// Bodies at or below this many bytes are sent uncompressed.
    pub min_size: usize,

    /// Gzip level, 1 (fastest) to 9 (best).
    pub level: u32,

    /// Compressible MIME types.
    pub types: Vec<String>,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            min_size: 1024,
            level: 5,
            types: [
                "text/html",
                "text/css",
                "text/javascript",
                "application/javascript",
                "application/json",
                "text/xml",
                "application/xml",
                "application/rss+xml",
                "image/svg+xml",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
        }
    }
}

/// Request correlation id.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RequestIdConfig {
    pub header_name: String,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self {
            header_name: "X-Request-ID".to_string(),
        }
    }
}

/// Fixed security response headers; empty values are skipped.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SecurityHeadersConfig {
    pub content_type_options: String,
    pub frame_options: String,
    pub xss_protection: String,
    pub referrer_policy: String,
    pub permissions_policy: String,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            content_type_options: "nosniff".to_string(),
            frame_options: "DENY".to_string(),
            xss_protection: "1; mode=block".to_string(),
            referrer_policy: "strict-origin-when-cross-origin".to_string(),
            permissions_policy: String::new(),
        }
    }
}
