//! Schema subsystem for emberdb
//!
//! A schema is an ordered list of named, typed fields. Records are accepted
//! as JSON objects and persisted as positional JSON arrays in declaration
//! order, so on-disk rows never depend on caller key order.

mod errors;
mod types;

pub use errors::{SchemaError, SchemaErrorCode, SchemaResult, ValidationDetails};
pub use types::{json_type_name, FieldDef, FieldType, Schema};
