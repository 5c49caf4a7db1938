//! Database subsystem
//!
//! The public entry point: open a data file with a [`DatabaseConfig`],
//! then insert, query, update and delete records.

mod config;
mod database;
mod errors;
mod walker;

pub use config::DatabaseConfig;
pub use database::{index_path_for, Database, DatabaseStats};
pub use errors::{DbError, DbResult};
pub use walker::{Walker, DEFAULT_WALK_BATCH};
