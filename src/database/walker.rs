//! Lazy record iteration
//!
//! A `Walker` reads matching records one batch of lines at a time. Each
//! batch takes the read locks only while it is being read, so writers
//! interleave between batches. Deletes between batches renumber lines; the
//! cursor is carried over to the new numbering, so surviving records are
//! neither skipped nor repeated. Records inserted meanwhile are yielded if
//! the walk has not passed their line yet.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use serde_json::Value;

use super::database::Database;
use super::errors::DbResult;
use crate::planner::Criteria;

/// Lines examined per batch when the caller passes 0
pub const DEFAULT_WALK_BATCH: usize = 256;

pub struct Walker {
    db: Database,
    /// Keeps line removals logged while this walker lives
    _token: Arc<()>,
    criteria: Criteria,
    batch_size: usize,
    /// First line of the next batch; `None` once the end was reached
    cursor: Option<usize>,
    /// Numbering epoch of `cursor`; `None` before the first batch
    epoch: Option<u64>,
    ready: VecDeque<Value>,
}

impl Walker {
    pub(crate) fn new(db: Database, token: Arc<()>, criteria: Criteria, batch_size: usize) -> Self {
        Self {
            db,
            _token: token,
            criteria,
            batch_size: if batch_size == 0 { DEFAULT_WALK_BATCH } else { batch_size },
            cursor: Some(0),
            epoch: None,
            ready: VecDeque::new(),
        }
    }

    /// Next matching record, or `None` when the walk is finished.
    ///
    /// Unreadable lines are skipped.
    pub async fn next(&mut self) -> DbResult<Option<Value>> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            let Some(from) = self.cursor else {
                return Ok(None);
            };
            let batch = self
                .db
                .walk_batch(&self.criteria, from, self.batch_size, self.epoch)
                .await?;
            self.ready.extend(batch.records);
            self.cursor = batch.next;
            self.epoch = Some(batch.epoch);
        }
    }

    /// Starts over from the first line.
    pub fn restart(&mut self) {
        self.cursor = Some(0);
        self.epoch = None;
        self.ready.clear();
    }

    /// Drains the remaining records into a vector.
    pub async fn collect(mut self) -> DbResult<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }

    /// Adapts the walker into a `Stream`. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = DbResult<Value>> {
        stream::unfold(Some(self), |walker| async move {
            let mut walker = walker?;
            match walker.next().await {
                Ok(Some(record)) => Some((Ok(record), Some(walker))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
