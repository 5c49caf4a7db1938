//! Observability subsystem for emberdb
//!
//! - Structured event logging routed through `tracing`
//! - Monotonic operational counters
//!
//! Observability never changes execution: logging failures are swallowed
//! and counters are never read on a decision path.

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
