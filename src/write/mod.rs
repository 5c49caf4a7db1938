//! Write path: insert buffer and batched insert sessions

mod buffer;
mod session;

pub use buffer::{FlushPolicy, WriteBuffer, DEFAULT_MAX_AGE, DEFAULT_MAX_RECORDS};
pub use session::{InsertSession, DEFAULT_MAX_PENDING, DEFAULT_SESSION_BATCH};
