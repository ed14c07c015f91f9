//! Request handling and transformation.
//!
//! # Responsibilities
//! - Extract routing-relevant information (host, client address)
//! - Prepare request for forwarding to backend
//!
//! # Design Decisions
//! - The inbound Host is captured once at handler entry, before any
//!   middleware can rewrite headers
//! - Hop-by-hop headers never cross the proxy
//! - X-Forwarded-For is appended to, never replaced

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::uri::InvalidUri;
use axum::http::{Uri, Version};
use thiserror::Error;
use url::{Position, Url};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers scoped to a single connection.
pub const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
    header::TRAILER,
];

/// The Host the client asked for, as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalHost(pub String);

/// Failure to turn an inbound request into a backend request.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid backend uri: {0}")]
    Uri(#[from] InvalidUri),

    #[error("invalid header value: {0}")]
    Header(#[from] header::InvalidHeaderValue),
}

/// The request host: the Host header, falling back to the URI authority.
pub fn request_host(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(str::to_owned)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// The TCP peer address recorded by the accept loop.
pub fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// The peer IP with IPv6 loopback reported as 127.0.0.1.
pub fn peer_ip(request: &Request) -> Option<IpAddr> {
    peer_addr(request).map(|addr| match addr.ip() {
        IpAddr::V6(v6) if v6.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        ip => ip,
    })
}

/// Client identity for rate limiting.
///
/// The last X-Forwarded-For entry wins when it is a valid IP; otherwise the
/// TCP peer address is used.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    request
        .headers()
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .last()
        .and_then(|last| last.parse().ok())
        .or_else(|| peer_ip(request))
}

/// Remove hop-by-hop headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// `host[:port]` of a backend URL.
pub fn backend_authority(backend: &Url) -> &str {
    &backend[Position::BeforeHost..Position::AfterPort]
}

/// Join the backend prefix with the inbound path, keeping the inbound query.
pub fn backend_uri(backend: &Url, inbound: &Uri) -> Result<Uri, InvalidUri> {
    let prefix = backend.path().trim_end_matches('/');
    let path = inbound.path();

    let mut target = format!("{}://{}{}", backend.scheme(), backend_authority(backend), prefix);
    if !path.starts_with('/') {
        target.push('/');
    }
    target.push_str(path);
    if let Some(query) = inbound.query() {
        target.push('?');
        target.push_str(query);
    }

    target.parse()
}

/// Build the request sent to the backend.
///
/// Consumes the inbound request; the body is forwarded as a stream.
pub fn build_backend_request(
    backend: &Url,
    preserve_host: bool,
    request: Request,
) -> Result<Request, BuildError> {
    let original_host = request
        .extensions()
        .get::<OriginalHost>()
        .map(|OriginalHost(host)| host.clone())
        .or_else(|| request_host(&request));
    let peer = peer_ip(&request);

    let (parts, body) = request.into_parts();
    let uri = backend_uri(backend, &parts.uri)?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    if let Some(peer) = peer {
        let prior: Vec<&str> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let forwarded = if prior.is_empty() {
            peer.to_string()
        } else {
            format!("{}, {}", prior.join(", "), peer)
        };
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&forwarded)?);
    }

    if let Some(host) = &original_host {
        headers.insert(X_FORWARDED_HOST, HeaderValue::from_str(host)?);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    let host = match (&original_host, preserve_host) {
        (Some(host), true) => HeaderValue::from_str(host)?,
        _ => HeaderValue::from_str(backend_authority(backend))?,
    };
    headers.insert(header::HOST, host);

    let mut backend_request = Request::new(body);
    *backend_request.method_mut() = parts.method;
    *backend_request.uri_mut() = uri;
    *backend_request.version_mut() = Version::HTTP_11;
    *backend_request.headers_mut() = headers;

    Ok(backend_request)
}
