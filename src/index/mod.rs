//! Index engine subsystem for emberdb
//!
//! Per-field postings that map indexed values to data-file line numbers,
//! plus the byte offset of every line. The index is derived state: the data
//! file stays the source of truth and the index is rebuilt from it whenever
//! the persisted snapshot cannot be trusted.
//!
//! # Design Principles
//!
//! - Hybrid postings: sparse lines in a set, long runs as inclusive ranges
//! - Deterministic: BTreeMap iteration order, sorted line numbers
//! - Typed keys: integers and floats with equal value share one key
//! - Normalize on load: string line numbers become integers before use
//!
//! # Invariants
//!
//! - Every posting references a line below `line_count`
//! - Offsets are strictly increasing and there is one per line
//! - Removing lines renumbers survivors so they stay dense

mod engine;
mod errors;
mod key;
pub mod persist;
mod postings;
mod terms;

pub use engine::{Candidates, ExistsOptions, IndexEngine, LineSet};
pub use errors::{IndexError, IndexErrorCode, IndexResult, Severity};
pub use key::IndexKey;
pub use persist::{
    decode, encode, IndexData, IndexSnapshot, LenientUint, LoadedIndex, PostingsEntry,
    SNAPSHOT_VERSION,
};
pub use postings::Postings;
pub use terms::TermDictionary;

/// Runs of at least this many consecutive lines are stored as a range
pub const DEFAULT_COMPACTION_RUN: usize = 64;
