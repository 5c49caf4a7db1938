//! Database error type
//!
//! Aggregates every subsystem error. Subsystem errors keep their own code
//! and severity; `DbError` only routes them.

use thiserror::Error;

use crate::concurrency::QueueError;
use crate::executor::ExecutorError;
use crate::index::IndexError;
use crate::migration::MigrationError;
use crate::planner::PlannerError;
use crate::schema::SchemaError;
use crate::storage::StorageError;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database is closed")]
    Closed,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl DbError {
    /// Stable error code, when the error came from a subsystem
    pub fn code(&self) -> &'static str {
        match self {
            DbError::Schema(e) => e.code().code(),
            DbError::Storage(e) => e.code().code(),
            DbError::Index(e) => e.code().code(),
            DbError::Planner(e) => e.code().code(),
            DbError::Executor(e) => e.code().code(),
            DbError::Queue(e) => e.code().code(),
            DbError::Migration(e) => e.code().as_str(),
            DbError::Config(_) => "EMBER_CONFIG_INVALID",
            DbError::Closed => "EMBER_DATABASE_CLOSED",
            DbError::Task(_) => "EMBER_TASK_FAILED",
        }
    }
}
