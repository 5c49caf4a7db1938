//! Query planner for emberdb
//!
//! Turns caller criteria into a normalized `Criteria` tree and decides
//! which referenced fields the index can answer.
//!
//! # Design Principles
//!
//! - One normalization pass: evaluation matches on variants, never on JSON shape
//! - Top-level keys without `$or` are ANDed
//! - `$not` subtracts its body's matches from all lines; an empty body excludes nothing
//! - Strict mode fails before any I/O, naming every offending field

mod ast;
mod errors;
mod planner;

pub use ast::{CompareOp, Condition, Criteria, Pattern};
pub use errors::{PlannerError, PlannerErrorCode, PlannerResult};
pub use planner::{IndexMetadata, IndexedQueryMode, QueryPlan, QueryPlanner};
