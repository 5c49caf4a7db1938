//! Insert session
//!
//! Groups added records into fixed-size batches. Every full batch is
//! queued as an insert followed by a flush, and awaited in the background
//! while the caller keeps adding. At most `max_pending` batches are in
//! flight; adding past that waits for the oldest to finish.
//!
//! After `commit` returns, every accepted record is in the data file and
//! the index.

use serde_json::Value;
use tokio::task::JoinSet;

use crate::database::{Database, DbError, DbResult};

/// Default records per batch
pub const DEFAULT_SESSION_BATCH: usize = 1000;

/// Default batches in flight
pub const DEFAULT_MAX_PENDING: usize = 4;

pub struct InsertSession {
    db: Database,
    batch_size: usize,
    max_pending: usize,
    current: Vec<Vec<Value>>,
    in_flight: JoinSet<DbResult<usize>>,
    accepted: usize,
    committed: usize,
}

impl InsertSession {
    pub(crate) fn new(db: Database, batch_size: usize, max_pending: usize) -> Self {
        let batch_size = if batch_size == 0 { DEFAULT_SESSION_BATCH } else { batch_size };
        Self {
            db,
            batch_size,
            max_pending: max_pending.max(1),
            current: Vec::with_capacity(batch_size),
            in_flight: JoinSet::new(),
            accepted: 0,
            committed: 0,
        }
    }

    /// Records accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Records known to be flushed
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Batches queued but not yet finished
    pub fn pending_batches(&self) -> usize {
        self.in_flight.len()
    }

    /// Validates and accepts one record.
    pub async fn add(&mut self, record: &Value) -> DbResult<()> {
        let row = self.db.schema().to_row(record)?;
        self.current.push(row);
        self.accepted += 1;
        if self.current.len() >= self.batch_size {
            self.dispatch().await?;
        }
        Ok(())
    }

    pub async fn add_many(&mut self, records: &[Value]) -> DbResult<()> {
        for record in records {
            self.add(record).await?;
        }
        Ok(())
    }

    /// Queues the current batch, waiting first if too many are in flight.
    async fn dispatch(&mut self) -> DbResult<()> {
        while self.in_flight.len() >= self.max_pending {
            self.join_one().await?;
        }
        let rows = std::mem::take(&mut self.current);
        let insert = self.db.insert_rows(rows);
        let flush = self.db.flush();
        self.in_flight.spawn(async move {
            let inserted = insert.await?;
            flush.await?;
            Ok(inserted)
        });
        Ok(())
    }

    async fn join_one(&mut self) -> DbResult<()> {
        match self.in_flight.join_next().await {
            Some(Ok(result)) => {
                self.committed += result?;
                Ok(())
            }
            Some(Err(e)) => Err(DbError::Task(e.to_string())),
            None => Ok(()),
        }
    }

    /// Waits for every batch in flight, then flushes the remainder.
    ///
    /// Returns the number of records committed by this session.
    pub async fn commit(mut self) -> DbResult<usize> {
        while !self.in_flight.is_empty() {
            self.join_one().await?;
        }
        if !self.current.is_empty() {
            let rows = std::mem::take(&mut self.current);
            let insert = self.db.insert_rows(rows);
            let flush = self.db.flush();
            self.committed += insert.await?;
            flush.await?;
        }
        Ok(self.committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseConfig;
    use crate::schema::FieldDef;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> Database {
        let config = DatabaseConfig::new(vec![FieldDef::number("n")]).with_indexes(["n"]);
        Database::open(dir.path().join("session.jsonl"), config).await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_flushes_everything() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        let mut session = db.insert_session(10, 2);
        for i in 0..35 {
            session.add(&json!({"n": i})).await.unwrap();
        }
        assert_eq!(session.accepted(), 35);
        assert!(session.pending_batches() <= 2);

        assert_eq!(session.commit().await.unwrap(), 35);
        let stats = db.stats().await;
        assert_eq!(stats.record_count, 35);
        assert_eq!(stats.buffered, 0);
        assert_eq!(db.count(&json!({"n": {"$gte": 30}})).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_invalid_record_is_not_accepted() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        let mut session = db.insert_session(10, 2);
        session.add(&json!({"n": 1})).await.unwrap();
        assert!(session.add(&json!({"n": "x"})).await.is_err());
        assert_eq!(session.accepted(), 1);
        assert_eq!(session.commit().await.unwrap(), 1);
    }
}
