//! Executor error types
//!
//! Error codes:
//! - EMBER_EXECUTION_FAILED (ERROR) - candidate lines could not be read
//! - EMBER_EXECUTION_TIMEOUT (ERROR) - a read exceeded the configured I/O timeout

use std::fmt;

use crate::storage::{StorageError, StorageErrorCode};

/// Severity levels for executor errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Query failed; the database is unaffected
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorCode {
    /// Reading candidate or scanned lines failed
    EmberExecutionFailed,
    /// A read stalled past the I/O timeout
    EmberExecutionTimeout,
}

impl ExecutorErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorErrorCode::EmberExecutionFailed => "EMBER_EXECUTION_FAILED",
            ExecutorErrorCode::EmberExecutionTimeout => "EMBER_EXECUTION_TIMEOUT",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for ExecutorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Executor error type with full context
#[derive(Debug)]
pub struct ExecutorError {
    code: ExecutorErrorCode,
    message: String,
    /// Byte offset of the line being read, if known
    offset: Option<u64>,
    source: Option<StorageError>,
}

impl ExecutorError {
    /// Wraps a storage failure hit while reading at `offset`.
    pub fn read_failed(offset: Option<u64>, source: StorageError) -> Self {
        let code = if source.code() == StorageErrorCode::EmberIoTimeout {
            ExecutorErrorCode::EmberExecutionTimeout
        } else {
            ExecutorErrorCode::EmberExecutionFailed
        };
        let message = match offset {
            Some(at) => format!("Read failed at offset {}: {}", at, source.message()),
            None => format!("Read failed: {}", source.message()),
        };
        Self {
            code,
            message,
            offset,
            source: Some(source),
        }
    }

    pub fn code(&self) -> ExecutorErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Whether the underlying storage error calls for a consistency check
    pub fn needs_consistency_check(&self) -> bool {
        self.source
            .as_ref()
            .map(StorageError::needs_consistency_check)
            .unwrap_or(false)
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for ExecutorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<StorageError> for ExecutorError {
    fn from(err: StorageError) -> Self {
        ExecutorError::read_failed(None, err)
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
