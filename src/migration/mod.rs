//! Legacy layout migration for emberdb
//!
//! Older databases kept their index and offset table as the last two lines
//! of the data file. Opening such a file imports it into the current
//! two-file layout once; afterwards the data file holds only records.

mod errors;
mod legacy;

pub use errors::{MigrationError, MigrationErrorCode, MigrationResult};
pub use legacy::{is_legacy, migrate_legacy, MigrationReport};
