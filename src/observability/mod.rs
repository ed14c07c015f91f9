//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Per request:
//!     → access_log.rs (one line per completed request)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::{AccessLogEntry, AccessLogFormat, AccessLogSink, AccessLogger};
