//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store registered routes keyed by normalized host
//! - Look up the matching route for a request host
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - O(1) exact host lookup via HashMap
//! - O(n) wildcard scan, kept sorted longest-suffix-first so the most
//!   specific wildcard wins deterministically
//! - Exact matches always beat wildcards
//! - One RwLock guards both collections so lookups never observe a
//!   half-applied registration

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::routing::matcher::{normalize_host, HostPattern};
use crate::routing::route::Route;

#[derive(Default)]
struct RouteTable {
    exact: HashMap<String, Arc<Route>>,
    /// Wildcard patterns, sorted by descending suffix length.
    wildcards: Vec<(HostPattern, Arc<Route>)>,
}

/// Concurrent host-to-route table.
#[derive(Default)]
pub struct Router {
    table: RwLock<RouteTable>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route, replacing any route already stored under the same pattern.
    pub fn add(&self, host: &str, route: Arc<Route>) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);

        match HostPattern::parse(host) {
            HostPattern::Exact(host) => {
                table.exact.insert(host, route);
            }
            wildcard => {
                table.wildcards.retain(|(existing, _)| *existing != wildcard);
                let at = table.wildcards.partition_point(|(existing, _)| {
                    existing.specificity() >= wildcard.specificity()
                });
                table.wildcards.insert(at, (wildcard, route));
            }
        }
    }

    /// Remove the route stored under `host`. Returns true if one was removed.
    pub fn remove(&self, host: &str) -> bool {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);

        match HostPattern::parse(host) {
            HostPattern::Exact(host) => table.exact.remove(&host).is_some(),
            wildcard => {
                let before = table.wildcards.len();
                table.wildcards.retain(|(existing, _)| *existing != wildcard);
                table.wildcards.len() != before
            }
        }
    }

    /// Find the route for a request host (port and case are ignored).
    pub fn lookup(&self, host: &str) -> Option<Arc<Route>> {
        let host = normalize_host(host);
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(route) = table.exact.get(&host) {
            return Some(Arc::clone(route));
        }

        table
            .wildcards
            .iter()
            .find(|(pattern, _)| pattern.matches(&host))
            .map(|(_, route)| Arc::clone(route))
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.exact.len() + table.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
