//! Structured event logger for emberdb
//!
//! Each event renders as one JSON object: event name, severity, then the
//! fields in sorted key order. Rendering is deterministic, so two calls with
//! the same fields in any order produce identical text.
//!
//! Output goes through `tracing` under the `emberdb` target; the embedding
//! application decides where it ends up.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 0,
    Info = 1,
    /// Recoverable: skipped lines, retries, rebuilds
    Warn = 2,
    Error = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct Entry<'a> {
    event: &'a str,
    severity: &'static str,
    #[serde(flatten)]
    fields: BTreeMap<&'a str, &'a str>,
}

pub struct Logger;

impl Logger {
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if !Self::enabled(severity) {
            return;
        }
        let line = Self::render(severity, event, fields);
        match severity {
            Severity::Trace => tracing::trace!(target: "emberdb", "{}", line),
            Severity::Info => tracing::info!(target: "emberdb", "{}", line),
            Severity::Warn => tracing::warn!(target: "emberdb", "{}", line),
            Severity::Error => tracing::error!(target: "emberdb", "{}", line),
        }
    }

    /// Skips rendering when no subscriber wants this level.
    fn enabled(severity: Severity) -> bool {
        match severity {
            Severity::Trace => tracing::enabled!(target: "emberdb", Level::TRACE),
            Severity::Info => tracing::enabled!(target: "emberdb", Level::INFO),
            Severity::Warn => tracing::enabled!(target: "emberdb", Level::WARN),
            Severity::Error => tracing::enabled!(target: "emberdb", Level::ERROR),
        }
    }

    fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let entry = Entry {
            event,
            severity: severity.as_str(),
            fields: fields.iter().copied().collect(),
        };
        // String-only maps cannot fail to serialize
        serde_json::to_string(&entry).unwrap_or_else(|_| event.to_string())
    }

    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }
}
