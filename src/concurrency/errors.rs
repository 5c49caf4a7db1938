//! Concurrency coordinator error types
//!
//! Error codes:
//! - EMBER_QUEUE_CLOSED (ERROR) - operation submitted after shutdown
//! - EMBER_OPERATION_ABORTED (ERROR) - queued operation purged or panicked
//! - EMBER_QUEUE_DRAIN_TIMEOUT (ERROR) - queue did not drain in time

use std::fmt;
use std::time::Duration;

use super::queue::OperationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueErrorCode {
    EmberQueueClosed,
    EmberOperationAborted,
    EmberQueueDrainTimeout,
}

impl QueueErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            QueueErrorCode::EmberQueueClosed => "EMBER_QUEUE_CLOSED",
            QueueErrorCode::EmberOperationAborted => "EMBER_OPERATION_ABORTED",
            QueueErrorCode::EmberQueueDrainTimeout => "EMBER_QUEUE_DRAIN_TIMEOUT",
        }
    }
}

impl fmt::Display for QueueErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Operation queue error.
///
/// Errors about a specific operation carry the context captured when it was
/// submitted, so a purged operation can be traced back to its call site.
#[derive(Debug, Clone)]
pub struct QueueError {
    code: QueueErrorCode,
    message: String,
    context: Option<OperationContext>,
}

impl QueueError {
    pub fn closed(context: &OperationContext) -> Self {
        Self {
            code: QueueErrorCode::EmberQueueClosed,
            message: format!("Operation queue is shut down; '{}' was not run", context.label),
            context: Some(context.clone()),
        }
    }

    pub fn aborted(context: &OperationContext) -> Self {
        Self {
            code: QueueErrorCode::EmberOperationAborted,
            message: format!(
                "Operation '{}' was purged from the queue before completing",
                context.label
            ),
            context: Some(context.clone()),
        }
    }

    pub fn drain_timeout(timeout: Duration, purged: usize) -> Self {
        Self {
            code: QueueErrorCode::EmberQueueDrainTimeout,
            message: format!(
                "Queue did not drain within {:?}; {} operation(s) force-failed",
                timeout, purged
            ),
            context: None,
        }
    }

    pub fn code(&self) -> QueueErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Submission context of the failed operation, if the error is about one
    pub fn context(&self) -> Option<&OperationContext> {
        self.context.as_ref()
    }
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ERROR] {}: {}", self.code.code(), self.message)?;
        if let Some(ref ctx) = self.context {
            write!(
                f,
                " (operation_id: {}, submitted_at: {}, enqueued_at: {})",
                ctx.id,
                ctx.caller,
                ctx.enqueued_at.to_rfc3339()
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for QueueError {}

pub type QueueResult<T> = Result<T, QueueError>;
