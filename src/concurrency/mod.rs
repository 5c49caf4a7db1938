//! Concurrency coordinator
//!
//! Three independent primitives:
//! - `FileLock`: guards multi-step access to the data file. Rewrites and
//!   appends are exclusive; reads share.
//! - `ReadLimiter`: caps simultaneously open read descriptors.
//! - `OperationQueue`: runs logical mutations strictly one at a time in
//!   submission order.
//!
//! A caller never holds the file lock while waiting on the queue.

mod errors;
mod limiter;
mod lock;
mod queue;

pub use errors::{QueueError, QueueErrorCode, QueueResult};
pub use limiter::{ReadLimiter, ReadPermit, DEFAULT_MAX_READERS};
pub use lock::{ExclusiveFileGuard, FileLock, SharedFileGuard};
pub use queue::{OperationContext, OperationQueue, QueueStats};
