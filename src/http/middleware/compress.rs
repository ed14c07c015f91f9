//! Gzip response compression.
//!
//! Compression engages only when the client accepts gzip, the response
//! content type is in the allow-list, and the backend has not already
//! encoded the body. Body frames are buffered until more than `min_size`
//! bytes have arrived; a body that ends first is sent unchanged with its
//! original headers. Past the threshold the rest of the body is streamed
//! through the encoder.

use std::io::{self, Write};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::stream;
use http_body_util::BodyExt;

use crate::config::schema::CompressConfig;

/// Compiled compression settings.
pub struct Compress {
    min_size: usize,
    level: Compression,
    types: Vec<String>,
}

impl Compress {
    pub fn new(config: &CompressConfig) -> Self {
        let level = match config.level {
            level @ 1..=9 => Compression::new(level),
            other => {
                tracing::warn!(level = other, "Invalid gzip level, using default");
                Compression::default()
            }
        };

        Self {
            min_size: config.min_size,
            level,
            types: config.types.iter().map(|t| t.to_ascii_lowercase()).collect(),
        }
    }

    fn is_compressible(&self, headers: &HeaderMap) -> bool {
        if headers.contains_key(header::CONTENT_ENCODING) {
            return false;
        }

        let Some(content_type) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };

        let base = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.types.iter().any(|t| *t == base)
    }

    async fn compress(&self, response: Response) -> Response {
        let (mut parts, mut body) = response.into_parts();
        let mut buffered = BytesMut::new();

        while buffered.len() <= self.min_size {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        buffered.extend_from_slice(&data);
                    }
                }
                Some(Err(err)) => {
                    let replay = stream::iter([Ok(buffered.freeze()), Err(err)]);
                    return Response::from_parts(parts, Body::from_stream(replay));
                }
                None => return Response::from_parts(parts, Body::from(buffered.freeze())),
            }
        }

        parts
            .headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        parts.headers.remove(header::CONTENT_LENGTH);
        parts
            .headers
            .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));

        let encoder = GzEncoder::new(Vec::new(), self.level);
        let stream = gzip_stream(buffered.freeze(), body, encoder);
        Response::from_parts(parts, Body::from_stream(stream))
    }
}

/// Compress `first` and then the remaining body, yielding compressed chunks.
fn gzip_stream(
    first: Bytes,
    body: Body,
    encoder: GzEncoder<Vec<u8>>,
) -> impl futures_util::Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(Some((Some(first), body, encoder)), |state| async move {
        let (mut pending, mut body, mut encoder) = state?;
        loop {
            let data = match pending.take() {
                Some(data) => data,
                None => match body.frame().await {
                    Some(Ok(frame)) => match frame.into_data() {
                        Ok(data) => data,
                        Err(_) => continue,
                    },
                    Some(Err(err)) => return Some((Err(io::Error::other(err)), None)),
                    None => return Some((encoder.finish().map(Bytes::from), None)),
                },
            };

            if let Err(err) = encoder.write_all(&data) {
                return Some((Err(err), None));
            }
            let chunk = std::mem::take(encoder.get_mut());
            if !chunk.is_empty() {
                return Some((Ok(Bytes::from(chunk)), Some((None, body, encoder))));
            }
        }
    })
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("gzip"))
}

pub async fn compress_middleware(
    State(compress): State<Arc<Compress>>,
    request: Request,
    next: Next,
) -> Response {
    let wants_gzip = accepts_gzip(request.headers());
    let response = next.run(request).await;

    if wants_gzip && compress.is_compressible(response.headers()) {
        compress.compress(response).await
    } else {
        response
    }
}
