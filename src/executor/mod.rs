//! Query Executor subsystem for emberdb
//!
//! Consumes query plans and produces records in line order.
//!
//! # Execution Flow (strict order)
//!
//! 1. Obtain candidate lines from the index, when any referenced field is indexed
//! 2. Read candidate lines through grouped range reads, or scan the whole file
//! 3. Skip unparsable lines
//! 4. Filter rows the index could not answer exactly
//! 5. Apply skip, then limit
//!
//! # Invariants
//!
//! - Deterministic: same plan and same data give the same results
//! - Index and filter agree on every operator
//! - Availability: one bad line never fails a query

mod errors;
mod executor;
mod filters;

pub use errors::{ExecutorError, ExecutorErrorCode, ExecutorResult};
pub use executor::{ExecutionResult, FindOptions, MatchedRecord, QueryExecutor, QuerySource, READ_BATCH};
pub use filters::PredicateFilter;
