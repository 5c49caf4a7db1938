//! emberdb - an embedded line-delimited database
//!
//! Records live one per line in a data file as positional JSON arrays.
//! A companion index file persists per-field postings and the line
//! offset table, so queries on indexed fields read only matching lines.

pub mod cli;
pub mod concurrency;
pub mod database;
pub mod executor;
pub mod index;
pub mod migration;
pub mod observability;
pub mod planner;
pub mod schema;
pub mod storage;
pub mod write;

pub use database::{Database, DatabaseConfig, DatabaseStats, DbError, DbResult, Walker};
pub use executor::FindOptions;
pub use index::ExistsOptions;
pub use planner::IndexedQueryMode;
pub use schema::{FieldDef, FieldType, Schema};
pub use write::InsertSession;
