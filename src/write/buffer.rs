//! Insert buffer
//!
//! Inserted rows wait here until a flush appends them to the data file in
//! one write. Buffered rows are already indexed under provisional line
//! numbers that continue after the last data file line, so a flush only
//! has to record their offsets.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Default record count that triggers a flush
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// Default time since the last flush that triggers one
pub const DEFAULT_MAX_AGE: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_records: usize,
    pub max_age: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

#[derive(Debug)]
pub struct WriteBuffer {
    policy: FlushPolicy,
    rows: Vec<Vec<Value>>,
    last_flush: Instant,
}

impl WriteBuffer {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            rows: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    pub fn push(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Replaces the buffered row at `i`, returning the old one.
    pub fn replace(&mut self, i: usize, row: Vec<Value>) -> Option<Vec<Value>> {
        self.rows.get_mut(i).map(|slot| std::mem::replace(slot, row))
    }

    /// Removes the buffered rows at `indices`.
    pub fn remove_many(&mut self, indices: &[usize]) {
        if indices.is_empty() {
            return;
        }
        let doomed: HashSet<usize> = indices.iter().copied().collect();
        let mut i = 0;
        self.rows.retain(|_| {
            let keep = !doomed.contains(&i);
            i += 1;
            keep
        });
    }

    /// Whether the record count or the time since the last flush crossed the policy
    pub fn should_flush(&self) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        self.rows.len() >= self.policy.max_records || self.last_flush.elapsed() >= self.policy.max_age
    }

    /// Drops the first `n` rows once they are safely on disk.
    pub fn drain_front(&mut self, n: usize) {
        let n = n.min(self.rows.len());
        self.rows.drain(..n);
    }

    pub fn mark_flushed(&mut self) {
        self.last_flush = Instant::now();
    }
}
