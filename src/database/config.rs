//! Database configuration
//!
//! Loaded from a JSON document or built in code. Every setting has a
//! default except the field list.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{DbError, DbResult};
use crate::concurrency::DEFAULT_MAX_READERS;
use crate::index::DEFAULT_COMPACTION_RUN;
use crate::planner::IndexedQueryMode;
use crate::schema::{FieldDef, Schema};
use crate::storage::{HandlerOptions, DEFAULT_MAX_GROUP_BYTES};
use crate::write::{FlushPolicy, DEFAULT_MAX_AGE, DEFAULT_MAX_RECORDS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Declared fields, in persisted column order
    pub fields: Vec<FieldDef>,
    /// Indexed field names
    pub indexes: Vec<String>,
    /// Map indexed string values to integer term ids
    pub term_mapping: bool,
    pub indexed_query_mode: IndexedQueryMode,
    /// Buffered records that trigger a flush
    pub insert_buffer_size: usize,
    /// Time since the last flush that triggers one on the next insert
    pub flush_interval_ms: u64,
    /// Concurrently open read descriptors
    pub max_read_concurrency: usize,
    /// Upper bound for one coalesced range read
    pub max_group_bytes: u64,
    /// Abandon reads slower than this
    pub io_timeout_ms: Option<u64>,
    /// Brotli-compress the index file
    pub compress_index: bool,
    /// Shortest run of consecutive lines stored as a range
    pub range_compaction_min: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            indexes: Vec::new(),
            term_mapping: true,
            indexed_query_mode: IndexedQueryMode::Permissive,
            insert_buffer_size: DEFAULT_MAX_RECORDS,
            flush_interval_ms: DEFAULT_MAX_AGE.as_millis() as u64,
            max_read_concurrency: DEFAULT_MAX_READERS,
            max_group_bytes: DEFAULT_MAX_GROUP_BYTES,
            io_timeout_ms: None,
            compress_index: false,
            range_compaction_min: DEFAULT_COMPACTION_RUN,
        }
    }
}

impl DatabaseConfig {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn with_indexes(mut self, indexes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.indexes = indexes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mode(mut self, mode: IndexedQueryMode) -> Self {
        self.indexed_query_mode = mode;
        self
    }

    pub fn with_term_mapping(mut self, enabled: bool) -> Self {
        self.term_mapping = enabled;
        self
    }

    pub fn with_buffer_size(mut self, records: usize) -> Self {
        self.insert_buffer_size = records;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_index = enabled;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn from_json(text: &str) -> DbResult<Self> {
        serde_json::from_str(text).map_err(|e| DbError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Reads a configuration file.
    pub fn from_file(path: &Path) -> DbResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DbError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Checks the settings and builds the schema.
    pub fn validate(&self) -> DbResult<Schema> {
        let schema = Schema::new(self.fields.clone())?;
        if let Some(missing) = self.indexes.iter().find(|i| schema.position(i).is_none()) {
            return Err(DbError::Config(format!(
                "Index on '{}' names a field that is not declared",
                missing
            )));
        }
        if self.insert_buffer_size == 0 {
            return Err(DbError::Config("insert_buffer_size must be at least 1".to_string()));
        }
        if self.max_read_concurrency == 0 {
            return Err(DbError::Config("max_read_concurrency must be at least 1".to_string()));
        }
        if self.range_compaction_min < 2 {
            return Err(DbError::Config("range_compaction_min must be at least 2".to_string()));
        }
        Ok(schema)
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            max_records: self.insert_buffer_size,
            max_age: Duration::from_millis(self.flush_interval_ms),
        }
    }

    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            max_group_bytes: self.max_group_bytes,
            io_timeout: self.io_timeout_ms.map(Duration::from_millis),
        }
    }
}
