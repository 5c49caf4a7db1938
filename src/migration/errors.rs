//! Migration error types
//!
//! Error codes:
//! - EMBER_MIGRATION_NOT_LEGACY (ERROR) - file tail is not a legacy index + offsets pair
//! - EMBER_MIGRATION_IO (ERROR) - reading or rewriting a file failed
//! - EMBER_MIGRATION_INVALID_INDEX (ERROR) - legacy index line could not be interpreted

use std::fmt;

use crate::index::IndexError;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationErrorCode {
    EmberMigrationNotLegacy,
    EmberMigrationIo,
    EmberMigrationInvalidIndex,
}

impl MigrationErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationErrorCode::EmberMigrationNotLegacy => "EMBER_MIGRATION_NOT_LEGACY",
            MigrationErrorCode::EmberMigrationIo => "EMBER_MIGRATION_IO",
            MigrationErrorCode::EmberMigrationInvalidIndex => "EMBER_MIGRATION_INVALID_INDEX",
        }
    }
}

impl fmt::Display for MigrationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
enum Cause {
    Storage(StorageError),
    Index(IndexError),
}

/// Migration error with full context
#[derive(Debug)]
pub struct MigrationError {
    code: MigrationErrorCode,
    message: String,
    source: Option<Cause>,
}

impl MigrationError {
    pub fn not_legacy(path: &std::path::Path) -> Self {
        Self {
            code: MigrationErrorCode::EmberMigrationNotLegacy,
            message: format!(
                "{} does not end with a legacy index line and offsets line",
                path.display()
            ),
            source: None,
        }
    }

    pub fn io(message: impl Into<String>, source: StorageError) -> Self {
        Self {
            code: MigrationErrorCode::EmberMigrationIo,
            message: message.into(),
            source: Some(Cause::Storage(source)),
        }
    }

    pub fn invalid_index(message: impl Into<String>) -> Self {
        Self {
            code: MigrationErrorCode::EmberMigrationInvalidIndex,
            message: message.into(),
            source: None,
        }
    }

    pub fn code(&self) -> MigrationErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ERROR] {}: {}", self.code, self.message)?;
        match &self.source {
            Some(Cause::Storage(e)) => write!(f, " (caused by: {})", e),
            Some(Cause::Index(e)) => write!(f, " (caused by: {})", e),
            None => Ok(()),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(Cause::Storage(e)) => Some(e),
            Some(Cause::Index(e)) => Some(e),
            None => None,
        }
    }
}

impl From<IndexError> for MigrationError {
    fn from(err: IndexError) -> Self {
        Self {
            code: MigrationErrorCode::EmberMigrationInvalidIndex,
            message: "Legacy index could not be converted".to_string(),
            source: Some(Cause::Index(err)),
        }
    }
}

impl From<StorageError> for MigrationError {
    fn from(err: StorageError) -> Self {
        MigrationError::io("Legacy file access failed", err)
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
