//! Index error types
//!
//! Error codes:
//! - EMBER_INDEX_CORRUPT (REBUILD) - index file bytes could not be decoded
//! - EMBER_INDEX_STALE (REBUILD) - postings or offsets disagree with the data file
//! - EMBER_INDEX_ENCODE_FAILED (ERROR) - snapshot could not be serialized
//! - EMBER_INDEX_UNKNOWN_FIELD (ERROR) - index declared on a field the schema lacks

use std::fmt;

/// Severity levels for index errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Recoverable by rebuilding the index from the data file
    Rebuild,
    /// Operation failed
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Rebuild => write!(f, "REBUILD"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorCode {
    /// Index payload unreadable
    EmberIndexCorrupt,
    /// Index references lines or offsets the data file does not have
    EmberIndexStale,
    /// Snapshot serialization failed
    EmberIndexEncodeFailed,
    /// Indexed field missing from the schema
    EmberIndexUnknownField,
}

impl IndexErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            IndexErrorCode::EmberIndexCorrupt => "EMBER_INDEX_CORRUPT",
            IndexErrorCode::EmberIndexStale => "EMBER_INDEX_STALE",
            IndexErrorCode::EmberIndexEncodeFailed => "EMBER_INDEX_ENCODE_FAILED",
            IndexErrorCode::EmberIndexUnknownField => "EMBER_INDEX_UNKNOWN_FIELD",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IndexErrorCode::EmberIndexCorrupt | IndexErrorCode::EmberIndexStale => Severity::Rebuild,
            IndexErrorCode::EmberIndexEncodeFailed | IndexErrorCode::EmberIndexUnknownField => {
                Severity::Error
            }
        }
    }
}

impl fmt::Display for IndexErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct IndexError {
    code: IndexErrorCode,
    message: String,
}

impl IndexError {
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::EmberIndexCorrupt,
            message: reason.into(),
        }
    }

    pub fn stale(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::EmberIndexStale,
            message: reason.into(),
        }
    }

    pub fn encode_failed(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::EmberIndexEncodeFailed,
            message: reason.into(),
        }
    }

    pub fn unknown_field(field: &str) -> Self {
        Self {
            code: IndexErrorCode::EmberIndexUnknownField,
            message: format!("Cannot index '{}': field is not declared in the schema", field),
        }
    }

    pub fn code(&self) -> IndexErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether rebuilding from the data file resolves this error
    pub fn needs_rebuild(&self) -> bool {
        self.severity() == Severity::Rebuild
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)
    }
}

impl std::error::Error for IndexError {}

pub type IndexResult<T> = Result<T, IndexError>;
