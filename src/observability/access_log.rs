//! Access logging.
//!
//! # Responsibilities
//! - Describe one completed request (`AccessLogEntry`)
//! - Render entries in Common, Combined or JSON format
//! - Write one line per request to the configured output
//!
//! # Design Decisions
//! - Sinks are a trait so tests and embedders can capture entries
//! - Write failures are reported through `tracing`, never to the client

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Output format for access log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLogFormat {
    #[default]
    Common,
    Combined,
    Json,
}

/// One completed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLogEntry {
    /// When the request arrived.
    pub time: DateTime<Local>,
    pub method: String,
    /// Path and query as received.
    pub path: String,
    pub protocol: String,
    pub status: u16,
    /// Response body bytes written to the client.
    pub size: u64,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub duration_ms: u64,
}

const CLF_TIME: &str = "%d/%b/%Y:%H:%M:%S %z";

impl AccessLogEntry {
    /// Render the entry as a single line without the trailing newline.
    pub fn render(&self, format: AccessLogFormat) -> Result<String, serde_json::Error> {
        let common = || {
            format!(
                "{} - {} [{}] \"{} {} {}\" {} {}",
                self.ip,
                self.username.as_deref().unwrap_or("-"),
                self.time.format(CLF_TIME),
                self.method,
                self.path,
                self.protocol,
                self.status,
                self.size,
            )
        };

        match format {
            AccessLogFormat::Common => Ok(common()),
            AccessLogFormat::Combined => Ok(format!(
                "{} \"{}\" \"{}\"",
                common(),
                self.referer.as_deref().unwrap_or("-"),
                self.user_agent.as_deref().unwrap_or("-"),
            )),
            AccessLogFormat::Json => serde_json::to_string(self),
        }
    }
}

/// Destination for completed request entries.
pub trait AccessLogSink: Send + Sync {
    fn log(&self, entry: &AccessLogEntry);
}

/// Line-oriented access logger writing to stdout or any writer.
pub struct AccessLogger {
    format: AccessLogFormat,
    output: Mutex<Box<dyn Write + Send>>,
}

impl AccessLogger {
    pub fn stdout(format: AccessLogFormat) -> Self {
        Self::with_writer(format, io::stdout())
    }

    pub fn with_writer(format: AccessLogFormat, writer: impl Write + Send + 'static) -> Self {
        Self {
            format,
            output: Mutex::new(Box::new(writer)),
        }
    }

    pub fn format(&self) -> AccessLogFormat {
        self.format
    }
}

impl AccessLogSink for AccessLogger {
    fn log(&self, entry: &AccessLogEntry) {
        let line = match entry.render(self.format) {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "Failed to format access log entry");
                return;
            }
        };

        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(output, "{line}") {
            tracing::error!(error = %err, "Failed to write access log entry");
        }
    }
}
