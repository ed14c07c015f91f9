//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Register routes and global middleware
//! - Build the Axum application (tracing, timeout, access log)
//! - Run the bounded accept loop with per-connection HTTP/1.1 service
//! - Dispatch requests by Host to the matching route's pipeline
//! - Drain in-flight requests on shutdown

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::from_fn_with_state;
use axum::response::Response;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use tokio::task::JoinSet;
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::config::schema::{ProxyConfig, ServerConfig};
use crate::error::ProxyError;
use crate::http::middleware::access_log::{access_log_middleware, AccessLogState};
use crate::http::middleware::{chain, compose, Middleware};
use crate::http::request::{backend_authority, request_host, OriginalHost};
use crate::http::response;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::access_log::{AccessLogSink, AccessLogger};
use crate::observability::metrics::{self, NO_BACKEND};
use crate::routing::{Route, RouteOptions, Router as ProxyRouter};
use crate::security::limits::BodyLimit;

/// hyper refuses read buffers smaller than this.
const MIN_HEADER_BUFFER: usize = 8192;

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Application state injected into handlers.
#[derive(Clone)]
struct AppState {
    router: Arc<ProxyRouter>,
    middlewares: Arc<[Middleware]>,
    body_limit: BodyLimit,
}

/// Host-based reverse proxy server.
pub struct ProxyServer {
    config: ServerConfig,
    router: Arc<ProxyRouter>,
    middlewares: Vec<Middleware>,
    access_log: AccessLogState,
}

impl ProxyServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Arc::new(ProxyRouter::new()),
            middlewares: Vec::new(),
            access_log: None,
        }
    }

    /// Build a server, its global middleware, and every route from a validated config.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let mut server = Self::new(config.server.clone());

        if let Some(access_log) = &config.access_log {
            server = server.with_access_log(Arc::new(AccessLogger::stdout(access_log.format)));
        }

        for middleware in Middleware::from_configs(&config.middlewares)? {
            server.use_middleware(middleware);
        }

        for (host, route) in &config.routes {
            server.route(host, &route.backend, RouteOptions::from_config(route)?)?;
        }

        Ok(server)
    }

    /// Log every completed request to `sink`.
    pub fn with_access_log(mut self, sink: Arc<dyn AccessLogSink>) -> Self {
        self.access_log = Some(sink);
        self
    }

    /// Append a middleware that applies to every route.
    pub fn use_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    /// Register (or replace) the route for `host`.
    ///
    /// `host` is either an exact host or a `*.`-prefixed wildcard.
    pub fn route(&self, host: &str, backend: &str, options: RouteOptions) -> Result<(), ProxyError> {
        let url = parse_backend(backend)?;
        tracing::info!(host, backend = %url, "Route registered");
        self.router.add(host, Arc::new(Route::new(url, options)));
        Ok(())
    }

    /// Remove the route for `host`. Returns true if it existed.
    pub fn remove_route(&self, host: &str) -> bool {
        self.router.remove(host)
    }

    /// The live routing table; routes may be changed while serving.
    pub fn router(&self) -> Arc<ProxyRouter> {
        Arc::clone(&self.router)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum application with all server-level layers.
    ///
    /// Global middleware registered after this call is not seen by the
    /// returned application.
    #[allow(deprecated)]
    pub fn app(&self) -> Router {
        let state = AppState {
            router: Arc::clone(&self.router),
            middlewares: self.middlewares.clone().into(),
            body_limit: BodyLimit::new(self.config.max_request_body),
        };

        let write_timeout = match self.config.write_timeout() {
            d if d.is_zero() => Duration::MAX,
            d => d,
        };

        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(write_timeout))
            .layer(from_fn_with_state(self.access_log.clone(), access_log_middleware))
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = Listener::bind(&self.config.listen, self.config.max_connections).await?;
        self.run(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` resolves, then
    /// drain in-flight requests for up to the shutdown timeout.
    pub async fn run<F>(self, listener: Listener, shutdown: F) -> Result<(), ProxyError>
    where
        F: Future<Output = ()> + Send,
    {
        let app = self.app();

        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new())
            .max_buf_size(self.config.max_header_bytes.max(MIN_HEADER_BUFFER))
            .keep_alive(!self.config.idle_timeout().is_zero());
        // Also the idle bound between requests on a kept-alive connection.
        if !self.config.read_timeout().is_zero() {
            http.header_read_timeout(self.config.read_timeout());
        }

        let graceful = GracefulShutdown::new();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Proxy server starting");
        }

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(connection) => connection,
                        Err(ListenerError::Accept(err)) => {
                            tracing::warn!(error = %err, "Failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    };

                    let app = app.clone();
                    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        let mut request = request.map(Body::new);
                        request.extensions_mut().insert(ConnectInfo(peer));
                        app.clone().oneshot(request)
                    });

                    let connection = graceful.watch(http.serve_connection(TokioIo::new(stream), service));
                    connections.spawn(async move {
                        if let Err(err) = connection.await {
                            tracing::debug!(peer = %peer, error = %err, "Connection closed with error");
                        }
                        drop(permit);
                    });
                }
            }
        }

        drop(listener);
        tracing::info!(
            in_flight = connections.len(),
            "Shutdown signal received, draining connections"
        );

        tokio::select! {
            () = graceful.shutdown() => tracing::info!("All connections drained"),
            () = tokio::time::sleep(self.config.shutdown_timeout()) => {
                tracing::warn!(
                    remaining = connections.len(),
                    "Shutdown timeout elapsed, closing remaining connections"
                );
                connections.abort_all();
            }
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

fn parse_backend(backend: &str) -> Result<Url, ProxyError> {
    let url = Url::parse(backend).map_err(|source| ProxyError::InvalidBackendUrl {
        url: backend.to_string(),
        source,
    })?;

    let unsupported = |reason| ProxyError::UnsupportedBackend {
        url: backend.to_string(),
        reason,
    };
    match url.scheme() {
        "http" => {}
        "https" => return Err(unsupported("https backends are not supported")),
        _ => return Err(unsupported("only http backends are supported")),
    }
    if url.host_str().is_none() {
        return Err(unsupported("backend url has no host"));
    }

    Ok(url)
}

/// Main proxy handler.
/// Looks up the route by Host, then runs the merged middleware chain
/// ending in the backend call.
async fn proxy_handler(State(state): State<AppState>, mut request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let Some(host) = request_host(&request) else {
        tracing::debug!("Request without Host header");
        metrics::record_request(&method, 400, NO_BACKEND, start);
        return response::missing_host();
    };

    let Some(route) = state.router.lookup(&host) else {
        tracing::debug!(host = %host, "No route found for host");
        metrics::record_request(&method, 404, NO_BACKEND, start);
        return response::no_route();
    };

    tracing::debug!(host = %host, backend = %route.backend(), "Proxying request");
    request.extensions_mut().insert(OriginalHost(host));

    let pipeline = compose(&state.middlewares, route.middlewares(), state.body_limit);
    let handler = chain(&pipeline, route.handler());
    let response = match handler.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    metrics::record_request(
        &method,
        response.status().as_u16(),
        backend_authority(route.backend()),
        start,
    );
    response
}
