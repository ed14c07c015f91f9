//! Response handling and transformation.
//!
//! # Responsibilities
//! - Transform backend response for client
//! - Map proxy failures to fixed status codes and bodies
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Upstream error details are logged, never sent to the client

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;

use crate::http::request::strip_hop_by_hop;

/// Convert a backend response into the response sent to the client.
pub fn from_backend(response: hyper::Response<Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}

pub fn missing_host() -> Response {
    (StatusCode::BAD_REQUEST, "Missing Host header").into_response()
}

pub fn no_route() -> Response {
    (StatusCode::NOT_FOUND, "No route found for host").into_response()
}

pub fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
}

pub fn payload_too_large() -> Response {
    (StatusCode::PAYLOAD_TOO_LARGE, "Request Entity Too Large").into_response()
}

pub fn internal_error(message: &'static str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}
