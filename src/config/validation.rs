//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts, rate limits, compression level)
//! - Reject backends the proxy cannot reach (non-http schemes)
//! - Reject duplicate middleware types within one scope
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;
use url::Url;

use crate::config::schema::{
    BasicAuthConfig, CompressConfig, CorsConfig, HeaderRulesConfig, MiddlewareConfig, ProxyConfig,
    RateLimitConfig,
};
use crate::http::middleware::MiddlewareKind;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    Field { field: String, reason: String },

    #[error("no routes configured")]
    NoRoutes,

    #[error("route `{host}`: {reason}")]
    Route { host: String, reason: String },

    #[error("{scope} middleware `{kind}`: {reason}")]
    Middleware {
        scope: String,
        kind: MiddlewareKind,
        reason: String,
    },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    if server.listen.parse::<SocketAddr>().is_err() {
        errors.push(field("server.listen", "must be a socket address like 0.0.0.0:8080"));
    }
    if server.write_timeout_secs == 0 {
        errors.push(field("server.write_timeout_secs", "must be greater than 0"));
    }
    if server.max_connections == 0 {
        errors.push(field("server.max_connections", "must be greater than 0"));
    }

    if !LOG_LEVELS.contains(&config.log.level.to_ascii_lowercase().as_str()) {
        errors.push(field(
            "log.level",
            "must be one of trace, debug, info, warn, error",
        ));
    }

    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(field("metrics.address", "must be a socket address"));
    }

    validate_middlewares("global", &config.middlewares, &mut errors);

    if config.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }

    for (host, route) in &config.routes {
        if host.trim().is_empty() {
            errors.push(route_error(host, "host must not be empty"));
        }

        if let Err(reason) = check_backend(&route.backend) {
            errors.push(route_error(host, &reason));
        }

        if route.dial_timeout_secs == 0 {
            errors.push(route_error(host, "dial_timeout_secs must be greater than 0"));
        }

        validate_middlewares(&format!("route `{host}`"), &route.middlewares, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks a backend URL the same way route registration does.
fn check_backend(backend: &str) -> Result<(), String> {
    let url = Url::parse(backend).map_err(|e| format!("invalid backend url `{backend}`: {e}"))?;
    match url.scheme() {
        "http" => {}
        "https" => return Err("https backends are not supported".to_string()),
        other => return Err(format!("unsupported backend scheme `{other}`")),
    }
    if url.host_str().is_none() {
        return Err("backend url has no host".to_string());
    }
    Ok(())
}

fn validate_middlewares(scope: &str, entries: &[MiddlewareConfig], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();

    for entry in entries {
        let kind = entry.kind();
        let mut fail = |reason: String| {
            errors.push(ValidationError::Middleware {
                scope: scope.to_string(),
                kind,
                reason,
            })
        };

        if !seen.insert(kind) {
            fail("declared more than once".to_string());
            continue;
        }

        let result = match entry {
            MiddlewareConfig::RateLimit(c) => check_rate_limit(c),
            MiddlewareConfig::BasicAuth(c) => check_basic_auth(c),
            MiddlewareConfig::Cors(c) => check_cors(c),
            MiddlewareConfig::Headers(c) => {
                check_header_rules(&c.request).and_then(|_| check_header_rules(&c.response))
            }
            MiddlewareConfig::Compress(c) => check_compress(c),
            MiddlewareConfig::RequestId(c) => check_header_name(&c.header_name),
            MiddlewareConfig::SecurityHeaders(_) => Ok(()),
        };

        if let Err(reason) = result {
            fail(reason);
        }
    }
}

fn check_rate_limit(config: &RateLimitConfig) -> Result<(), String> {
    if config.requests == 0 {
        return Err("requests must be greater than 0".to_string());
    }
    if config.window_secs == 0 {
        return Err("window_secs must be greater than 0".to_string());
    }
    if config.burst == 0 {
        return Err("burst must be greater than 0".to_string());
    }
    Ok(())
}

fn check_basic_auth(config: &BasicAuthConfig) -> Result<(), String> {
    if config.users.is_empty() {
        return Err("at least one user is required".to_string());
    }
    if config.realm.contains('"') {
        return Err("realm must not contain quotes".to_string());
    }
    for (user, hash) in &config.users {
        if user.contains(':') {
            return Err(format!("username `{user}` must not contain ':'"));
        }
        if !hash.starts_with("$2") {
            return Err(format!("password for `{user}` is not a bcrypt hash"));
        }
    }
    Ok(())
}

fn check_cors(config: &CorsConfig) -> Result<(), String> {
    if config.allowed_origins.is_empty() {
        return Err("allowed_origins must not be empty".to_string());
    }
    if config.allowed_origins.iter().any(|o| o == "*") {
        return Err(
            "allowed_origins entries must be exact origins, `*` is not supported".to_string(),
        );
    }
    Ok(())
}

fn check_compress(config: &CompressConfig) -> Result<(), String> {
    if !(1..=9).contains(&config.level) {
        return Err(format!("level {} is outside 1-9", config.level));
    }
    if config.types.is_empty() {
        return Err("types must not be empty".to_string());
    }
    Ok(())
}

fn check_header_rules(rules: &HeaderRulesConfig) -> Result<(), String> {
    rules
        .add
        .keys()
        .chain(rules.set.keys())
        .chain(rules.remove.iter())
        .try_for_each(|name| check_header_name(name))
}

fn check_header_name(name: &str) -> Result<(), String> {
    HeaderName::from_bytes(name.as_bytes())
        .map(|_| ())
        .map_err(|_| format!("invalid header name `{name}`"))
}

fn field(name: &str, reason: &str) -> ValidationError {
    ValidationError::Field {
        field: name.to_string(),
        reason: reason.to_string(),
    }
}

fn route_error(host: &str, reason: &str) -> ValidationError {
    ValidationError::Route {
        host: host.to_string(),
        reason: reason.to_string(),
    }
}
