//! Storage error types
//!
//! Error codes:
//! - EMBER_STORAGE_IO_ERROR (ERROR)
//! - EMBER_STORAGE_WRITE_FAILED (ERROR)
//! - EMBER_STORAGE_READ_FAILED (ERROR)
//! - EMBER_SHORT_READ (ERROR) - zero bytes where data was expected
//! - EMBER_RENAME_FAILED (ERROR) - atomic swap exhausted its retries
//! - EMBER_IO_TIMEOUT (ERROR) - read abandoned after the configured timeout

use std::fmt;
use std::io;
use std::time::Duration;

/// Storage-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Disk I/O failure
    EmberStorageIoError,
    /// Append or rewrite failed
    EmberStorageWriteFailed,
    /// Read failed
    EmberStorageReadFailed,
    /// Read returned 0 bytes where more were expected
    EmberShortRead,
    /// Temp file could not be swapped into place
    EmberRenameFailed,
    /// Read did not complete within the I/O timeout
    EmberIoTimeout,
}

impl StorageErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::EmberStorageIoError => "EMBER_STORAGE_IO_ERROR",
            StorageErrorCode::EmberStorageWriteFailed => "EMBER_STORAGE_WRITE_FAILED",
            StorageErrorCode::EmberStorageReadFailed => "EMBER_STORAGE_READ_FAILED",
            StorageErrorCode::EmberShortRead => "EMBER_SHORT_READ",
            StorageErrorCode::EmberRenameFailed => "EMBER_RENAME_FAILED",
            StorageErrorCode::EmberIoTimeout => "EMBER_IO_TIMEOUT",
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Storage error with context
#[derive(Debug)]
pub struct StorageError {
    code: StorageErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl StorageError {
    /// Create a new storage I/O error
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::EmberStorageIoError,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a new write failed error
    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::EmberStorageWriteFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a new read failed error
    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::EmberStorageReadFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Zero bytes returned for a non-empty range
    pub fn short_read(start: u64, expected: usize) -> Self {
        Self {
            code: StorageErrorCode::EmberShortRead,
            message: format!(
                "Read returned 0 bytes, expected {} (concurrent writer or corruption)",
                expected
            ),
            details: Some(format!("byte_offset: {}", start)),
            source: None,
        }
    }

    /// Rename retries exhausted
    pub fn rename_failed(attempts: u32, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::EmberRenameFailed,
            message: format!("Failed to swap temp file into place after {} attempts", attempts),
            details: None,
            source: Some(source),
        }
    }

    /// Read abandoned after timeout
    pub fn timed_out(operation: &str, timeout: Duration) -> Self {
        Self {
            code: StorageErrorCode::EmberIoTimeout,
            message: format!("{} did not complete within {:?}", operation, timeout),
            details: None,
            source: None,
        }
    }

    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Whether the data file should be checked for consistency before reuse
    pub fn needs_consistency_check(&self) -> bool {
        self.code == StorageErrorCode::EmberShortRead
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ERROR] {}: {}", self.code.code(), self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
