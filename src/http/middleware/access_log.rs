//! Access log layer.
//!
//! Wraps the whole application so every request is logged, including
//! 400 and 404 answers produced before any route middleware runs. The
//! entry is emitted when the response body finishes streaming (or is
//! dropped early), so `size` and `duration_ms` cover the full transfer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use chrono::Local;
use http_body::{Frame, SizeHint};

use crate::http::request::peer_ip;
use crate::observability::access_log::{AccessLogEntry, AccessLogSink};
use crate::security::basic_auth::claimed_username;

/// Optional sink shared by every connection.
pub type AccessLogState = Option<Arc<dyn AccessLogSink>>;

pub async fn access_log_middleware(
    State(sink): State<AccessLogState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(sink) = sink else {
        return next.run(request).await;
    };

    let started = Instant::now();
    let mut entry = AccessLogEntry {
        time: Local::now(),
        method: request.method().to_string(),
        path: request
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| "/".to_string()),
        protocol: format!("{:?}", request.version()),
        status: 0,
        size: 0,
        ip: peer_ip(&request)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string()),
        username: claimed_username(request.headers()),
        referer: header_string(request.headers(), header::REFERER),
        user_agent: header_string(request.headers(), header::USER_AGENT),
        duration_ms: 0,
    };

    let response = next.run(request).await;
    entry.status = response.status().as_u16();

    response.map(|body| {
        Body::new(LoggedBody {
            inner: body,
            pending: Some(PendingEntry {
                sink,
                entry,
                started,
            }),
        })
    })
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

struct PendingEntry {
    sink: Arc<dyn AccessLogSink>,
    entry: AccessLogEntry,
    started: Instant,
}

/// Counts body bytes and emits the log entry exactly once.
struct LoggedBody {
    inner: Body,
    pending: Option<PendingEntry>,
}

impl LoggedBody {
    fn finish(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            pending.entry.duration_ms =
                u64::try_from(pending.started.elapsed().as_millis()).unwrap_or(u64::MAX);
            pending.sink.log(&pending.entry);
        }
    }
}

impl http_body::Body for LoggedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(pending)) = (frame.data_ref(), this.pending.as_mut()) {
                    pending.entry.size += data.len() as u64;
                }
            }
            Poll::Ready(Some(Err(err))) => {
                tracing::error!(error = %err, "Failed to copy response body");
                this.finish();
            }
            Poll::Ready(None) => this.finish(),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for LoggedBody {
    fn drop(&mut self) {
        self.finish();
    }
}
