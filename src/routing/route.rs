//! A single host route: backend target, transport, and middleware.
//!
//! Each route owns its own pooled HTTP client, so dial timeouts and idle
//! pool sizes never leak between routes. A route is immutable once built;
//! re-registering the host replaces it wholesale.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::service_fn;
use url::Url;

use crate::config::schema::RouteConfig;
use crate::error::ProxyError;
use crate::http::middleware::{Handler, Middleware};
use crate::http::{request, response};
use crate::observability::metrics;
use crate::security::limits::is_body_too_large;

pub const DEFAULT_MAX_IDLE_CONNS: usize = 100;
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-route settings.
#[derive(Clone)]
pub struct RouteOptions {
    pub preserve_host: bool,
    pub max_idle_conns: usize,
    pub idle_conn_timeout: Duration,
    /// Zero waits forever.
    pub response_header_timeout: Duration,
    pub dial_timeout: Duration,
    pub middlewares: Vec<Middleware>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            preserve_host: true,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            idle_conn_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
            response_header_timeout: DEFAULT_RESPONSE_HEADER_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            middlewares: Vec::new(),
        }
    }
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a configured route, with its middleware built.
    pub fn from_config(config: &RouteConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            preserve_host: config.preserve_host,
            max_idle_conns: config.max_idle_conns,
            idle_conn_timeout: Duration::from_secs(config.idle_conn_timeout_secs),
            response_header_timeout: Duration::from_secs(config.response_header_timeout_secs),
            dial_timeout: Duration::from_secs(config.dial_timeout_secs),
            middlewares: Middleware::from_configs(&config.middlewares)?,
        })
    }

    pub fn preserve_host(mut self, preserve: bool) -> Self {
        self.preserve_host = preserve;
        self
    }

    pub fn max_idle_conns(mut self, max: usize) -> Self {
        self.max_idle_conns = max;
        self
    }

    pub fn idle_conn_timeout(mut self, timeout: Duration) -> Self {
        self.idle_conn_timeout = timeout;
        self
    }

    pub fn response_header_timeout(mut self, timeout: Duration) -> Self {
        self.response_header_timeout = timeout;
        self
    }

    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = Middleware>) -> Self {
        self.middlewares = middlewares.into_iter().collect();
        self
    }
}

/// Backend target plus the transport used to reach it.
pub struct Route {
    backend: Url,
    client: Client<HttpConnector, Body>,
    preserve_host: bool,
    response_header_timeout: Duration,
    middlewares: Vec<Middleware>,
}

impl Route {
    pub fn new(backend: Url, options: RouteOptions) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(options.dial_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(options.idle_conn_timeout)
            .pool_max_idle_per_host(options.max_idle_conns)
            .build(connector);

        Self {
            backend,
            client,
            preserve_host: options.preserve_host,
            response_header_timeout: options.response_header_timeout,
            middlewares: options.middlewares,
        }
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    pub fn preserve_host(&self) -> bool {
        self.preserve_host
    }

    /// Route-scoped middleware, in declaration order.
    pub fn middlewares(&self) -> &[Middleware] {
        &self.middlewares
    }

    /// The innermost handler of the route's chain.
    pub fn handler(self: &Arc<Self>) -> Handler {
        let route = Arc::clone(self);
        Handler::new(service_fn(move |request: Request| {
            let route = Arc::clone(&route);
            async move { Ok::<_, Infallible>(route.forward(request).await) }
        }))
    }

    /// Send the request to the backend and stream the answer back.
    pub async fn forward(&self, request: Request) -> Response {
        let backend_request =
            match request::build_backend_request(&self.backend, self.preserve_host, request) {
                Ok(r) => r,
                Err(err) => {
                    tracing::error!(backend = %self.backend, error = %err, "Failed to create backend request");
                    return response::internal_error("Failed to create backend request");
                }
            };

        let start = Instant::now();
        let call = self.client.request(backend_request);
        let result = if self.response_header_timeout.is_zero() {
            call.await.map_err(UpstreamFailure::Request)
        } else {
            match tokio::time::timeout(self.response_header_timeout, call).await {
                Ok(result) => result.map_err(UpstreamFailure::Request),
                Err(_) => Err(UpstreamFailure::Timeout(self.response_header_timeout)),
            }
        };

        match result {
            Ok(backend_response) => {
                tracing::debug!(
                    backend = %self.backend,
                    status = %backend_response.status(),
                    elapsed = ?start.elapsed(),
                    "Backend responded"
                );
                response::from_backend(backend_response)
            }
            Err(UpstreamFailure::Request(err)) if is_body_too_large(&err) => {
                tracing::warn!(backend = %self.backend, "Request body exceeded limit");
                response::payload_too_large()
            }
            Err(failure) => {
                tracing::error!(backend = %self.backend, error = %failure, "Upstream request failed");
                metrics::record_upstream_error(backend_host(&self.backend));
                response::bad_gateway()
            }
        }
    }
}

fn backend_host(backend: &Url) -> String {
    request::backend_authority(backend).to_string()
}

#[derive(Debug, thiserror::Error)]
enum UpstreamFailure {
    #[error(transparent)]
    Request(hyper_util::client::legacy::Error),

    #[error("no response headers within {0:?}")]
    Timeout(Duration),
}
