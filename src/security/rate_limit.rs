//! Per-client-IP rate limiting.
//!
//! Each client gets a token bucket refilled at `requests / window` tokens
//! per second and capped at `burst`. Buckets live in a bounded LRU; the
//! least recently seen client is evicted when the cache is full, and
//! entries idle longer than the TTL are swept on access.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lru::LruCache;

use crate::http::request::client_ip;
use crate::http::response;
use crate::observability::metrics;

/// Maximum number of clients tracked at once.
pub const MAX_TRACKED_CLIENTS: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(n) => n,
    None => unreachable!(),
};

/// Idle time after which a client's bucket is forgotten.
pub const CLIENT_TTL: Duration = Duration::from_secs(15 * 60);

/// A simple token bucket rate limiter.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Shared limiter state for one middleware instance.
pub struct RateLimiter {
    clients: Mutex<LruCache<IpAddr, ClientEntry>>,
    capacity: f64,
    refill_rate: f64,
    ttl: Duration,
}

impl RateLimiter {
    /// `requests` per `window`, with bursts of up to `burst` requests.
    pub fn new(requests: u32, window: Duration, burst: u32) -> Self {
        Self::with_bounds(requests, window, burst, MAX_TRACKED_CLIENTS, CLIENT_TTL)
    }

    /// Like [`RateLimiter::new`] with explicit cache bounds.
    pub fn with_bounds(
        requests: u32,
        window: Duration,
        burst: u32,
        max_clients: NonZeroUsize,
        ttl: Duration,
    ) -> Self {
        let window_secs = window.as_secs_f64().max(f64::EPSILON);
        Self {
            clients: Mutex::new(LruCache::new(max_clients)),
            capacity: f64::from(burst),
            refill_rate: f64::from(requests) / window_secs,
            ttl,
        }
    }

    /// Consume a token for `client`. Returns false when the client is over its limit.
    pub fn check(&self, client: IpAddr) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> bool {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            let expired = matches!(
                clients.peek_lru(),
                Some((_, entry)) if now.saturating_duration_since(entry.last_seen) >= self.ttl
            );
            if !expired {
                break;
            }
            clients.pop_lru();
        }

        let capacity = self.capacity;
        let entry = clients.get_or_insert_mut(client, || ClientEntry {
            bucket: TokenBucket::new(capacity, now),
            last_seen: now,
        });
        entry.last_seen = now;
        entry.bucket.try_acquire(now, self.capacity, self.refill_rate)
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(client) = client_ip(&request) else {
        tracing::error!("Failed to determine client IP for rate limiting");
        return response::internal_error("Internal Server Error");
    };

    if limiter.check(client) {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        metrics::record_rate_limited();
        (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
    }
}
