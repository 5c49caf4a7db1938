//! Data file storage for emberdb
//!
//! The data file holds one record per line, each line a JSON array whose
//! positions follow the declared schema. This layer is the only code that
//! touches the data file.
//!
//! # Design Principles
//!
//! - Reads favor availability: corrupt lines are skipped, never fatal
//! - Writes favor safety: rewrites go through temp file + rename
//! - A short read of zero bytes is a hard error (writer race or corruption)
//! - Read descriptors are bounded by the shared `ReadLimiter`
//!
//! # Line numbering
//!
//! A record's line number is its position among non-blank lines. Corrupt
//! lines keep their number until a rewrite discards them, at which point
//! `RewriteOutcome::removed_lines` reports them for renumbering.

mod errors;
mod handler;
mod lines;
mod reader;
mod scan;
mod writer;

pub use errors::{StorageError, StorageErrorCode, StorageResult};
pub use handler::{
    ByteRange, FileHandler, HandlerOptions, COMPLETION_CAP, COMPLETION_STEP, DEFAULT_MAX_GROUP_BYTES,
};
pub use lines::{decode_line, encode_row, is_parseable, split_concatenated};
pub use reader::TAIL_CHUNK;
pub use scan::{ScanSummary, ScannedLine, SCAN_CHUNK};
pub use writer::{write_atomic, AppendOutcome, RewriteOutcome, RENAME_ATTEMPTS, RENAME_BACKOFF};
