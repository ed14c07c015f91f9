//! Host matching logic.
//!
//! # Responsibilities
//! - Normalize host values (lowercase, port stripped)
//! - Classify registrations as exact or wildcard patterns
//! - Match a normalized host against a wildcard suffix
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110 §4.2.3)
//! - A pattern is a wildcard iff it starts with `*`; everything after the
//!   star is a plain suffix, so `*.example.com` matches any depth of
//!   subdomain but never the bare `example.com`
//! - No regex to guarantee O(n) matching

/// Normalize a host for storage or lookup.
///
/// Lowercases the value and strips a trailing `:port`. Bracketed IPv6
/// literals keep their brackets (`[::1]:8080` becomes `[::1]`).
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();

    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    }
}

/// A registration key after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// Matches exactly one host.
    Exact(String),
    /// Matches any host ending with the stored suffix (leading `*` removed).
    Wildcard(String),
}

impl HostPattern {
    /// Parse a registration key.
    pub fn parse(host: &str) -> Self {
        let normalized = normalize_host(host);
        match normalized.strip_prefix('*') {
            Some(suffix) => HostPattern::Wildcard(suffix.to_string()),
            None => HostPattern::Exact(normalized),
        }
    }

    /// Length of the matched text; longer patterns are more specific.
    pub fn specificity(&self) -> usize {
        match self {
            HostPattern::Exact(host) => host.len(),
            HostPattern::Wildcard(suffix) => suffix.len(),
        }
    }

    /// Returns true if the already-normalized `host` matches this pattern.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostPattern::Exact(expected) => expected == host,
            HostPattern::Wildcard(suffix) => host.ends_with(suffix.as_str()),
        }
    }
}
