//! Database facade
//!
//! Ties storage, index, planner, executor and queue together.
//!
//! Mutations (`insert`, `update`, `delete`, `flush`, `save`) are submitted
//! to the operation queue when called and run one at a time in call order.
//! Reads take the state read lock directly; they see buffered records
//! immediately and never observe a mutation halfway.
//!
//! Durability boundary is `save()`. Dropping without `close()` loses
//! buffered records.

use std::future::{ready, Future};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::Either;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::config::DatabaseConfig;
use super::errors::{DbError, DbResult};
use super::walker::Walker;
use crate::concurrency::{FileLock, OperationQueue, QueueStats, ReadLimiter};
use crate::executor::{ExecutionResult, FindOptions, MatchedRecord, QueryExecutor, QuerySource};
use crate::index::{decode, encode, ExistsOptions, IndexEngine, IndexError};
use crate::migration::{is_legacy, migrate_legacy};
use crate::observability::{Logger, MetricsRegistry, MetricsSnapshot};
use crate::planner::{Condition, Criteria, IndexMetadata, Pattern, QueryPlan, QueryPlanner};
use crate::schema::Schema;
use crate::storage::{encode_row, write_atomic, ByteRange, FileHandler};
use crate::write::{InsertSession, WriteBuffer};

/// Point-in-time view of an open database
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    /// Data file lines plus buffered records
    pub record_count: usize,
    pub buffered: usize,
    pub indexed_fields: Vec<String>,
    pub queue: QueueStats,
    pub metrics: MetricsSnapshot,
}

/// Handle to an open database. Clones share the same instance.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DbInner>,
}

pub(crate) struct DbInner {
    path: PathBuf,
    index_path: PathBuf,
    config: DatabaseConfig,
    schema: Schema,
    index_meta: IndexMetadata,
    handler: FileHandler,
    file_lock: FileLock,
    state: RwLock<DbState>,
    queue: OperationQueue,
    metrics: MetricsRegistry,
    closed: AtomicBool,
    /// One clone per live walker
    walkers: Arc<()>,
}

struct DbState {
    engine: IndexEngine,
    /// Start of every data file line, unreadable lines included
    offsets: Vec<u64>,
    /// End of the last data file line
    data_end: u64,
    buffer: WriteBuffer,
    /// In-memory index differs from the index file
    dirty: bool,
    /// Bumped whenever lines are removed and later lines renumbered
    epoch: u64,
    /// Sorted removed lines per epoch, kept only while walkers are alive
    renumbered: Vec<(u64, Vec<usize>)>,
}

impl DbState {
    fn record_count(&self) -> usize {
        self.offsets.len() + self.buffer.len()
    }

    fn line_range(&self, line: usize) -> ByteRange {
        let end = self.offsets.get(line + 1).copied().unwrap_or(self.data_end);
        ByteRange::new(self.offsets[line], end)
    }

    /// Drops `removed` lines from the index, shifting later lines down.
    ///
    /// With walkers alive the removal is logged so their cursors can be
    /// moved onto the new numbering.
    fn remove_lines(&mut self, mut removed: Vec<usize>, walkers_alive: bool) {
        self.engine.remove_lines(&removed);
        self.engine.set_line_count(self.record_count());
        if removed.is_empty() {
            return;
        }
        self.epoch += 1;
        if walkers_alive {
            removed.sort_unstable();
            removed.dedup();
            self.renumbered.push((self.epoch, removed));
        } else {
            self.renumbered.clear();
        }
    }

    /// Where `line`, as numbered at epoch `since`, sits now.
    fn translate(&self, line: usize, since: u64) -> usize {
        self.renumbered
            .iter()
            .filter(|(epoch, _)| *epoch > since)
            .fold(line, |line, (_, removed)| {
                line - removed.partition_point(|l| *l < line)
            })
    }

    fn source<'a>(&'a self, inner: &'a DbInner) -> QuerySource<'a> {
        QuerySource {
            schema: &inner.schema,
            handler: &inner.handler,
            engine: &self.engine,
            offsets: &self.offsets,
            data_end: self.data_end,
            pending: self.buffer.rows(),
        }
    }
}

/// `<stem>.idx.<ext>` beside the data file
pub fn index_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.idx.{}", stem, ext.to_string_lossy()),
        None => format!("{}.idx", stem),
    };
    path.with_file_name(name)
}

impl Database {
    /// Opens or creates the database at `path`.
    ///
    /// A legacy single-file layout is split into data and index files
    /// first. A missing, unreadable or stale index is rebuilt from the
    /// data file.
    pub async fn open(path: impl AsRef<Path>, config: DatabaseConfig) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let schema = config.validate()?;
        let index_path = index_path_for(&path);
        let limiter = Arc::new(ReadLimiter::new(config.max_read_concurrency));
        let handler = FileHandler::new(path.clone(), limiter, config.handler_options());
        handler.ensure_exists().await?;

        let index_exists = tokio::fs::try_exists(&index_path).await.unwrap_or(false);
        if !index_exists && is_legacy(&handler).await? {
            migrate_legacy(&handler, &index_path, config.compress_index).await?;
        }

        let metrics = MetricsRegistry::new();
        let state = load_state(&handler, &index_path, &schema, &config, &metrics).await?;
        let index_meta = IndexMetadata::with_indexes(config.indexes.iter().cloned());

        let records = state.record_count().to_string();
        let path_str = path.display().to_string();
        Logger::info("DATABASE_OPENED", &[("path", &path_str), ("records", &records)]);

        Ok(Self {
            inner: Arc::new(DbInner {
                path,
                index_path,
                config,
                schema,
                index_meta,
                handler,
                file_lock: FileLock::new(),
                state: RwLock::new(state),
                queue: OperationQueue::start(),
                metrics,
                closed: AtomicBool::new(false),
                walkers: Arc::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn index_path(&self) -> &Path {
        &self.inner.index_path
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    fn planner(&self) -> QueryPlanner<'_> {
        QueryPlanner::new(&self.inner.index_meta, self.inner.config.indexed_query_mode)
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }

    /// Queues `operation` unless preparation failed or the database is closed.
    #[track_caller]
    fn submit<P, T, F>(
        &self,
        label: &'static str,
        prepared: DbResult<P>,
        operation: impl FnOnce(Arc<DbInner>, P) -> F,
    ) -> impl Future<Output = DbResult<T>> + Send + 'static
    where
        F: Future<Output = DbResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let prepared = match self.ensure_open().and(prepared) {
            Ok(p) => p,
            Err(e) => return Either::Left(ready(Err(e))),
        };
        let inner = Arc::clone(&self.inner);
        Either::Right(self.inner.queue.enqueue(label, operation(inner, prepared)))
    }

    /// Buffers one record. The record is validated and copied before this
    /// returns; the queued insert runs in call order.
    ///
    /// Once buffered the record counts as inserted. If the flush it
    /// triggers fails, the failure is logged and the record stays buffered
    /// for the next flush.
    #[track_caller]
    pub fn insert(&self, record: &Value) -> impl Future<Output = DbResult<usize>> + Send + 'static {
        let rows = self.inner.schema.to_row(record).map(|row| vec![row]).map_err(DbError::from);
        self.submit("insert", rows, |inner, rows| async move { inner.insert_rows(rows).await })
    }

    /// Buffers several records as one operation. Nothing is inserted if
    /// any record fails validation.
    #[track_caller]
    pub fn insert_many(&self, records: &[Value]) -> impl Future<Output = DbResult<usize>> + Send + 'static {
        let rows = records
            .iter()
            .map(|r| self.inner.schema.to_row(r))
            .collect::<Result<Vec<_>, _>>()
            .map_err(DbError::from);
        self.submit("insert_many", rows, |inner, rows| async move { inner.insert_rows(rows).await })
    }

    #[track_caller]
    pub(crate) fn insert_rows(&self, rows: Vec<Vec<Value>>) -> impl Future<Output = DbResult<usize>> + Send + 'static {
        self.submit("insert_batch", Ok(rows), |inner, rows| async move { inner.insert_rows(rows).await })
    }

    /// Applies `changes` to every record matching `criteria`.
    ///
    /// Returns the number of records updated.
    #[track_caller]
    pub fn update(&self, criteria: &Value, changes: &Value) -> impl Future<Output = DbResult<usize>> + Send + 'static {
        let prepared = self.planner().plan_json(criteria).map_err(DbError::from).and_then(|plan| {
            let blank = vec![Value::Null; self.inner.schema.len()];
            self.inner.schema.apply_changes(&blank, changes)?;
            Ok((plan, changes.clone()))
        });
        self.submit("update", prepared, |inner, (plan, changes)| async move {
            inner.update_matching(plan, changes).await
        })
    }

    /// Removes every record matching `criteria`. Returns the number removed.
    #[track_caller]
    pub fn delete(&self, criteria: &Value) -> impl Future<Output = DbResult<usize>> + Send + 'static {
        let plan = self.planner().plan_json(criteria).map_err(DbError::from);
        self.submit("delete", plan, |inner, plan| async move { inner.delete_matching(plan).await })
    }

    /// Appends all buffered records to the data file.
    #[track_caller]
    pub fn flush(&self) -> impl Future<Output = DbResult<usize>> + Send + 'static {
        self.submit("flush", Ok(()), |inner, ()| async move { inner.flush().await })
    }

    /// Flushes, then writes the index file atomically.
    #[track_caller]
    pub fn save(&self) -> impl Future<Output = DbResult<()>> + Send + 'static {
        self.submit("save", Ok(()), |inner, ()| async move { inner.save().await })
    }

    /// Drains queued operations, saves, and stops accepting work.
    pub async fn close(&self) -> DbResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        let saved = self.inner.queue.enqueue("close", async move { inner.save().await }).await;
        self.inner.queue.wait_for_completion(None).await?;
        self.inner.queue.shutdown();

        let path = self.inner.path.display().to_string();
        Logger::info("DATABASE_CLOSED", &[("path", &path)]);
        saved
    }

    /// Waits for queued operations. On timeout the remaining ones are purged.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> DbResult<()> {
        self.inner.queue.wait_for_completion(timeout).await?;
        Ok(())
    }

    /// Records matching `criteria`, in line order.
    pub async fn find(&self, criteria: &Value, options: FindOptions) -> DbResult<Vec<Value>> {
        self.ensure_open()?;
        let plan = self.planner().plan_json(criteria)?;
        let result = self.inner.execute(&plan, &options).await?;
        Ok(self.to_objects(result.records))
    }

    pub async fn find_one(&self, criteria: &Value) -> DbResult<Option<Value>> {
        let mut found = self.find(criteria, FindOptions::limit(1)).await?;
        Ok(found.pop())
    }

    pub async fn count(&self, criteria: &Value) -> DbResult<usize> {
        self.ensure_open()?;
        let plan = self.planner().plan_json(criteria)?;
        let result = self.inner.execute(&plan, &FindOptions::default()).await?;
        Ok(result.records.len())
    }

    /// Whether any record holds `value` in `field`.
    ///
    /// `value` may be a single value or an array of values; with
    /// `options.all` every value must occur on the same record. Answered
    /// from the index when the field is indexed, otherwise by a query
    /// that stops at the first match.
    pub async fn exists(&self, field: &str, value: &Value, options: &ExistsOptions) -> DbResult<bool> {
        self.ensure_open()?;
        let values: Vec<Value> = match value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        let criteria = exists_criteria(field, &values, options)?;
        let planner = self.planner();
        planner.check(&criteria)?;

        {
            let state = self.inner.state.read().await;
            if let Some(found) = state.engine.exists(field, &values, options) {
                return Ok(found);
            }
        }
        let plan = planner.plan(criteria)?;
        let result = self.inner.execute(&plan, &FindOptions::limit(1)).await?;
        Ok(!result.records.is_empty())
    }

    /// Lazy, restartable iteration over records matching `criteria`.
    pub fn walk(&self, criteria: &Value, batch_size: usize) -> DbResult<Walker> {
        self.ensure_open()?;
        let plan = self.planner().plan_json(criteria)?;
        let token = Arc::clone(&self.inner.walkers);
        Ok(Walker::new(self.clone(), token, plan.criteria, batch_size))
    }

    /// Reads records matching `criteria` among lines `[from, from + count)`.
    ///
    /// `from` is numbered as of epoch `since` and is first moved past any
    /// removals made after it; `None` means the current numbering.
    pub(crate) async fn walk_batch(
        &self,
        criteria: &Criteria,
        from: usize,
        count: usize,
        since: Option<u64>,
    ) -> DbResult<WalkBatch> {
        self.ensure_open()?;
        let state = self.inner.state.read().await;
        let from = match since {
            Some(epoch) => state.translate(from, epoch),
            None => from,
        };
        let total = state.record_count();
        if from >= total {
            return Ok(WalkBatch {
                records: Vec::new(),
                next: None,
                epoch: state.epoch,
            });
        }
        let end = from.saturating_add(count.max(1)).min(total);
        let lines: Vec<usize> = match state.engine.candidates(criteria) {
            Some(candidates) => candidates.lines.range(from..end).copied().collect(),
            None => (from..end).collect(),
        };

        let records = {
            let _file = self.inner.file_lock.shared().await;
            QueryExecutor::new(state.source(&self.inner), &self.inner.metrics)
                .fetch_lines(&lines, Some(criteria))
                .await?
        };
        Ok(WalkBatch {
            records: self.to_objects(records),
            next: (end < total).then_some(end),
            epoch: state.epoch,
        })
    }

    /// Batched inserts flushed in the background.
    pub fn insert_session(&self, batch_size: usize, max_pending: usize) -> InsertSession {
        InsertSession::new(self.clone(), batch_size, max_pending)
    }

    /// Data file lines plus buffered records
    pub async fn record_count(&self) -> usize {
        self.inner.state.read().await.record_count()
    }

    pub async fn stats(&self) -> DatabaseStats {
        let state = self.inner.state.read().await;
        DatabaseStats {
            record_count: state.record_count(),
            buffered: state.buffer.len(),
            indexed_fields: state.engine.indexed_fields(),
            queue: self.inner.queue.stats(),
            metrics: self.inner.metrics.snapshot(),
        }
    }

    fn to_objects(&self, records: Vec<MatchedRecord>) -> Vec<Value> {
        records
            .into_iter()
            .map(|r| self.inner.schema.to_object(&r.row))
            .collect()
    }
}

/// One step of a walk
pub(crate) struct WalkBatch {
    pub records: Vec<Value>,
    /// First line of the next batch; `None` once the end was reached
    pub next: Option<usize>,
    /// Numbering epoch `next` refers to
    pub epoch: u64,
}

impl DbInner {
    fn walkers_alive(&self) -> bool {
        Arc::strong_count(&self.walkers) > 1
    }

    async fn execute(&self, plan: &QueryPlan, options: &FindOptions) -> DbResult<ExecutionResult> {
        let state = self.state.read().await;
        let _file = self.file_lock.shared().await;
        let result = QueryExecutor::new(state.source(self), &self.metrics)
            .execute(plan, options)
            .await?;
        Ok(result)
    }

    async fn insert_rows(&self, rows: Vec<Vec<Value>>) -> DbResult<usize> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let count = rows.len();
        let base = state.record_count();
        for (i, row) in rows.into_iter().enumerate() {
            state.engine.add_record(base + i, &row);
            state.buffer.push(row);
        }
        state.dirty = true;
        self.metrics.add_inserted(count as u64);

        // The rows are accepted once buffered; a failed auto-flush leaves
        // them queued for the next flush instead of failing the insert.
        if state.buffer.should_flush() {
            if let Err(e) = self.flush_locked(state).await {
                let buffered = state.buffer.len().to_string();
                let error = e.to_string();
                Logger::warn("AUTO_FLUSH_FAILED", &[("buffered", &buffered), ("error", &error)]);
            }
        }
        Ok(count)
    }

    async fn flush(&self) -> DbResult<usize> {
        let mut guard = self.state.write().await;
        let flushed = self.flush_locked(&mut guard).await?;
        Ok(flushed)
    }

    /// Appends buffered rows until the buffer is empty.
    ///
    /// Rows leave the buffer only after their append succeeded, so a failed
    /// or abandoned flush keeps them queryable and retries them next time.
    async fn flush_locked(&self, state: &mut DbState) -> DbResult<usize> {
        let mut flushed = 0;
        while !state.buffer.is_empty() {
            let lines: Vec<String> = state.buffer.rows().iter().map(|r| encode_row(r)).collect();
            let outcome = {
                let _file = self.file_lock.exclusive().await;
                self.handler.append_lines(&lines).await?
            };

            let bytes = outcome.end.saturating_sub(state.data_end);
            state.offsets.extend(outcome.offsets);
            state.data_end = outcome.end;
            state.buffer.drain_front(lines.len());
            self.metrics.record_flush(bytes);
            flushed += lines.len();

            let records = lines.len().to_string();
            let bytes = bytes.to_string();
            Logger::trace("BUFFER_FLUSHED", &[("bytes", &bytes), ("records", &records)]);
        }
        state.buffer.mark_flushed();
        Ok(flushed)
    }

    async fn matching(&self, state: &DbState, plan: &QueryPlan) -> DbResult<Vec<MatchedRecord>> {
        let _file = self.file_lock.shared().await;
        let result = QueryExecutor::new(state.source(self), &self.metrics)
            .execute(plan, &FindOptions::default())
            .await?;
        Ok(result.records)
    }

    async fn update_matching(&self, plan: QueryPlan, changes: Value) -> DbResult<usize> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let matched = self.matching(state, &plan).await?;

        let mut updates = Vec::with_capacity(matched.len());
        for record in matched {
            let updated = self.schema.apply_changes(&record.row, &changes)?;
            updates.push((record.line, record.row, updated));
        }
        if updates.is_empty() {
            return Ok(0);
        }

        let file_lines = state.offsets.len();
        let split = updates.partition_point(|(line, _, _)| *line < file_lines);
        let (in_file, buffered) = updates.split_at(split);

        let mut removed = Vec::new();
        if !in_file.is_empty() {
            removed = self.rewrite_updated(state, in_file).await?;
        }
        for (line, _, updated) in buffered {
            state.buffer.replace(line - file_lines, updated.clone());
        }

        for (line, old, updated) in &updates {
            state.engine.remove_record(*line, old);
            state.engine.add_record(*line, updated);
        }
        state.remove_lines(removed, self.walkers_alive());
        state.dirty = true;

        self.metrics.add_updated(updates.len() as u64);
        Ok(updates.len())
    }

    /// Writes updated file rows. Same-length rows are overwritten in
    /// place; otherwise the file is rewritten. Returns lines the rewrite
    /// removed.
    async fn rewrite_updated(
        &self,
        state: &mut DbState,
        updates: &[(usize, Vec<Value>, Vec<Value>)],
    ) -> DbResult<Vec<usize>> {
        let ranges: Vec<ByteRange> = updates.iter().map(|(line, _, _)| state.line_range(*line)).collect();
        let lines: Vec<String> = updates.iter().map(|(_, _, row)| encode_row(row)).collect();

        let _file = self.file_lock.exclusive().await;
        let current = self.handler.read_ranges(&ranges).await?;
        let fits = current.iter().zip(&lines).all(|(raw, line)| same_length_line(raw, line));

        if fits {
            for (range, line) in ranges.iter().zip(&lines) {
                self.handler.write_in_place(range.start, line).await?;
            }
            return Ok(Vec::new());
        }

        let replacements: Vec<Option<String>> = lines.into_iter().map(Some).collect();
        let outcome = self.handler.replace_lines(&ranges, &replacements).await?;
        state.offsets = outcome.offsets;
        state.data_end = outcome.len;
        self.metrics.increment_rewrites();
        Ok(outcome.removed_lines)
    }

    async fn delete_matching(&self, plan: QueryPlan) -> DbResult<usize> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let matched = self.matching(state, &plan).await?;
        if matched.is_empty() {
            return Ok(0);
        }

        let file_lines = state.offsets.len();
        let split = matched.partition_point(|r| r.line < file_lines);
        let (in_file, buffered) = matched.split_at(split);

        let mut removed: Vec<usize> = Vec::with_capacity(matched.len());
        if !in_file.is_empty() {
            let ranges: Vec<ByteRange> = in_file.iter().map(|r| state.line_range(r.line)).collect();
            let replacements = vec![None; ranges.len()];
            let outcome = {
                let _file = self.file_lock.exclusive().await;
                self.handler.replace_lines(&ranges, &replacements).await?
            };
            state.offsets = outcome.offsets;
            state.data_end = outcome.len;
            removed.extend(outcome.removed_lines);
            self.metrics.increment_rewrites();
        }

        let buffer_positions: Vec<usize> = buffered.iter().map(|r| r.line - file_lines).collect();
        state.buffer.remove_many(&buffer_positions);
        removed.extend(buffered.iter().map(|r| r.line));

        state.remove_lines(removed, self.walkers_alive());
        state.dirty = true;

        self.metrics.add_deleted(matched.len() as u64);
        Ok(matched.len())
    }

    async fn save(&self) -> DbResult<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        self.flush_locked(state).await?;
        if !state.dirty {
            return Ok(());
        }

        state.engine.compact(self.config.range_compaction_min);
        state.engine.set_line_count(state.offsets.len());
        let bytes = encode(&state.engine.to_snapshot(&state.offsets), self.config.compress_index)?;
        {
            let _file = self.file_lock.exclusive().await;
            write_atomic(&self.index_path, &bytes).await?;
        }
        state.dirty = false;

        let records = state.offsets.len().to_string();
        let size = bytes.len().to_string();
        Logger::info("INDEX_SAVED", &[("bytes", &size), ("records", &records)]);
        Ok(())
    }
}

/// Whether `line` can overwrite `raw` (a line plus its terminator) in place
fn same_length_line(raw: &[u8], line: &str) -> bool {
    match raw.split_last() {
        Some((b'\n', body)) => body.len() == line.len() && !body.contains(&b'\n'),
        _ => false,
    }
}

/// Criteria equivalent to an existence check, for fields the index cannot answer
fn exists_criteria(field: &str, values: &[Value], options: &ExistsOptions) -> DbResult<Criteria> {
    if values.is_empty() {
        return Ok(Criteria::Nothing);
    }
    let condition = |value: &Value| -> DbResult<Criteria> {
        let condition = match value {
            Value::String(s) if options.case_insensitive => {
                Condition::Regex(Pattern::equals_ignore_case(s)?)
            }
            other => Condition::Eq(other.clone()),
        };
        Ok(Criteria::field(field, condition))
    };

    let wanted = values.iter().map(&condition).collect::<DbResult<Vec<_>>>()?;
    let mut clauses = vec![if options.all {
        Criteria::And(wanted)
    } else {
        Criteria::Or(wanted)
    }];
    for excluded in &options.excludes {
        clauses.push(Criteria::Not(Box::new(condition(excluded)?)));
    }
    Ok(if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Criteria::And(clauses)
    })
}

/// Restores in-memory state from the index file, rebuilding when needed.
async fn load_state(
    handler: &FileHandler,
    index_path: &Path,
    schema: &Schema,
    config: &DatabaseConfig,
    metrics: &MetricsRegistry,
) -> DbResult<DbState> {
    let data_end = handler.len().await?;
    let buffer = WriteBuffer::new(config.flush_policy());

    let loaded = match tokio::fs::read(index_path).await {
        Ok(bytes) => Some(load_index(handler, &bytes, schema, config).await),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => Some(Err(IndexError::corrupt(format!("Index file unreadable: {}", e)))),
    };

    match loaded {
        Some(Ok((engine, offsets))) => Ok(DbState {
            engine,
            offsets,
            data_end,
            buffer,
            dirty: false,
            epoch: 0,
            renumbered: Vec::new(),
        }),
        None if data_end == 0 => Ok(DbState {
            engine: IndexEngine::new(schema, &config.indexes, config.term_mapping)?,
            offsets: Vec::new(),
            data_end,
            buffer,
            dirty: true,
            epoch: 0,
            renumbered: Vec::new(),
        }),
        other => {
            let reason = match other {
                Some(Err(e)) => e.message().to_string(),
                _ => "index file missing".to_string(),
            };
            let (engine, offsets) = rebuild_index(handler, schema, config).await?;
            metrics.increment_index_rebuilds();
            let records = offsets.len().to_string();
            Logger::warn("INDEX_REBUILT", &[("reason", &reason), ("records", &records)]);
            Ok(DbState {
                engine,
                offsets,
                data_end,
                buffer,
                dirty: true,
                epoch: 0,
                renumbered: Vec::new(),
            })
        }
    }
}

async fn load_index(
    handler: &FileHandler,
    bytes: &[u8],
    schema: &Schema,
    config: &DatabaseConfig,
) -> Result<(IndexEngine, Vec<u64>), IndexError> {
    let snapshot = decode(bytes)?;
    let loaded = IndexEngine::from_snapshot(schema, &config.indexes, config.term_mapping, &snapshot)?;
    if !tail_matches(handler, &loaded.offsets).await {
        return Err(IndexError::stale("Offsets do not match the end of the data file"));
    }
    Ok((loaded.engine, loaded.offsets))
}

/// The last recorded offset must start the final line of the file.
async fn tail_matches(handler: &FileHandler, offsets: &[u64]) -> bool {
    let (from, expected) = match offsets.last() {
        Some(last) => (*last, 1),
        None => (0, 0),
    };
    if from > 0 {
        match handler.read_range(from - 1, from).await {
            Ok(byte) if byte == b"\n" => {}
            _ => return false,
        }
    }
    let mut seen = 0;
    let scanned = handler
        .scan_lines(from, offsets.len().saturating_sub(1), |_| {
            seen += 1;
            if seen > expected {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await;
    scanned.is_ok() && seen == expected
}

async fn rebuild_index(
    handler: &FileHandler,
    schema: &Schema,
    config: &DatabaseConfig,
) -> DbResult<(IndexEngine, Vec<u64>)> {
    let mut engine = IndexEngine::new(schema, &config.indexes, config.term_mapping)?;
    let mut offsets = Vec::new();
    handler
        .scan_lines(0, 0, |scanned| {
            offsets.push(scanned.offset);
            if let Some(row) = scanned.row {
                engine.add_record(scanned.line, &row);
            }
            ControlFlow::Continue(())
        })
        .await?;
    engine.set_line_count(offsets.len());
    Ok((engine, offsets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::IndexedQueryMode;
    use crate::schema::FieldDef;
    use serde_json::json;
    use tempfile::TempDir;

    fn config() -> DatabaseConfig {
        DatabaseConfig::new(vec![
            FieldDef::string("name"),
            FieldDef::number("age"),
            FieldDef::string("city"),
        ])
        .with_indexes(["name", "age"])
    }

    async fn open(dir: &TempDir) -> Database {
        Database::open(dir.path().join("people.jsonl"), config()).await.unwrap()
    }

    #[test]
    fn test_index_path_naming() {
        assert_eq!(
            index_path_for(Path::new("/data/people.jsonl")),
            PathBuf::from("/data/people.idx.jsonl")
        );
        assert_eq!(index_path_for(Path::new("/data/people")), PathBuf::from("/data/people.idx"));
    }

    #[test]
    fn test_same_length_line() {
        assert!(same_length_line(b"[\"a\",1]\n", "[\"b\",2]"));
        assert!(!same_length_line(b"[\"a\",1]\n", "[\"bb\",2]"));
        assert!(!same_length_line(b"[\"a\",1]", "[\"b\",2]"));
    }

    #[tokio::test]
    async fn test_buffered_records_are_visible() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.insert(&json!({"name": "ann", "age": 30})).await.unwrap();

        assert_eq!(db.stats().await.buffered, 1);
        let found = db.find(&json!({"name": "ann"}), FindOptions::default()).await.unwrap();
        assert_eq!(found, vec![json!({"name": "ann", "age": 30, "city": null})]);
    }

    #[tokio::test]
    async fn test_failed_auto_flush_keeps_insert() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.jsonl");
        let db = Database::open(&path, config().with_buffer_size(1)).await.unwrap();

        // A directory in place of the data file makes every append fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert_eq!(db.insert(&json!({"name": "ann", "age": 30})).await.unwrap(), 1);
        assert_eq!(db.stats().await.buffered, 1);
        assert_eq!(db.count(&json!({"name": "ann"})).await.unwrap(), 1);
        assert!(db.flush().await.is_err());

        std::fs::remove_dir(&path).unwrap();
        std::fs::write(&path, b"").unwrap();
        assert_eq!(db.flush().await.unwrap(), 1);
        assert_eq!(db.stats().await.buffered, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[\"ann\",30,null]\n");
        assert_eq!(db.count(&json!({"name": "ann"})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_record_rejected_before_queue() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        let err = db.insert(&json!({"name": 5})).await.unwrap_err();
        assert!(matches!(err, DbError::Schema(_)));
        assert_eq!(db.stats().await.queue.enqueued, 0);
    }

    #[tokio::test]
    async fn test_update_in_place_and_resized() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.insert_many(&[json!({"name": "ann", "age": 30}), json!({"name": "bob", "age": 40})])
            .await
            .unwrap();
        db.flush().await.unwrap();

        assert_eq!(db.update(&json!({"name": "ann"}), &json!({"age": 31})).await.unwrap(), 1);
        assert_eq!(db.stats().await.metrics.rewrites, 0);

        db.update(&json!({"name": "bob"}), &json!({"city": "Lisbon"})).await.unwrap();
        assert_eq!(db.stats().await.metrics.rewrites, 1);

        let ann = db.find_one(&json!({"age": 31})).await.unwrap().unwrap();
        assert_eq!(ann["name"], "ann");
        let bob = db.find_one(&json!({"name": "bob"})).await.unwrap().unwrap();
        assert_eq!(bob["city"], "Lisbon");
        assert_eq!(db.count(&json!({"age": 30})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_spans_file_and_buffer() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.insert_many(&[json!({"name": "a", "age": 1}), json!({"name": "b", "age": 2})])
            .await
            .unwrap();
        db.flush().await.unwrap();
        db.insert_many(&[json!({"name": "c", "age": 1}), json!({"name": "d", "age": 2})])
            .await
            .unwrap();

        assert_eq!(db.delete(&json!({"age": 1})).await.unwrap(), 2);
        assert_eq!(db.record_count().await, 2);
        let names: Vec<Value> = db
            .find(&Value::Null, FindOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("b"), json!("d")]);
        assert_eq!(db.count(&json!({"name": "d"})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exists_uses_index_and_fallback() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.insert_many(&[
            json!({"name": "Ann", "age": 30, "city": "Porto"}),
            json!({"name": "bob", "age": 40, "city": "Lisbon"}),
        ])
        .await
        .unwrap();

        let plain = ExistsOptions::default();
        assert!(db.exists("name", &json!("Ann"), &plain).await.unwrap());
        assert!(!db.exists("name", &json!("ann"), &plain).await.unwrap());
        let ci = ExistsOptions {
            case_insensitive: true,
            ..ExistsOptions::default()
        };
        assert!(db.exists("name", &json!("ann"), &ci).await.unwrap());
        assert!(db.exists("city", &json!("porto"), &ci).await.unwrap());
        assert!(!db.exists("city", &json!("Faro"), &plain).await.unwrap());
    }

    #[tokio::test]
    async fn test_case_insensitive_exists_agrees_with_find() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.insert_many(&[
            json!({"name": "ΟΔΟΣ", "city": "ΟΔΟΣ"}),
            json!({"name": "Straße", "city": "Straße"}),
        ])
        .await
        .unwrap();
        let ci = ExistsOptions {
            case_insensitive: true,
            ..ExistsOptions::default()
        };

        // "name" is answered by the index, "city" by a query.
        for wanted in ["οδοσ", "οδος", "STRASSE", "straße"] {
            let regex = json!({"name": {"$regex": format!("^{}$", wanted), "$options": "i"}});
            let found = !db.find(&regex, FindOptions::limit(1)).await.unwrap().is_empty();
            assert_eq!(db.exists("name", &json!(wanted), &ci).await.unwrap(), found, "{}", wanted);
            assert_eq!(db.exists("city", &json!(wanted), &ci).await.unwrap(), found, "{}", wanted);
        }
        assert!(db.exists("name", &json!("οδοσ"), &ci).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_batch_records_call_site() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let blocker = db.inner.queue.enqueue("gate", async move {
            let _ = gate.await;
            Ok::<_, DbError>(())
        });

        let line = line!() + 1;
        let batch = db.insert_rows(vec![vec![json!("ann"), json!(30), Value::Null]]);
        db.wait_for_completion(Some(Duration::from_millis(50))).await.unwrap_err();

        let caller = match batch.await {
            Err(DbError::Queue(e)) => e.context().unwrap().caller,
            other => panic!("expected a queue error, got {:?}", other),
        };
        assert!(caller.file().ends_with("database.rs"));
        assert_eq!(caller.line(), line);

        let _ = release.send(());
        assert!(blocker.await.is_err());
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_unindexed_exists() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(
            dir.path().join("strict.jsonl"),
            config().with_mode(IndexedQueryMode::Strict),
        )
        .await
        .unwrap();
        let err = db
            .exists("city", &json!("Porto"), &ExistsOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Planner(_)));
    }

    #[tokio::test]
    async fn test_closed_database_rejects_work() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir).await;
        db.insert(&json!({"name": "ann"})).await.unwrap();
        db.close().await.unwrap();

        assert!(matches!(db.insert(&json!({"name": "bob"})).await, Err(DbError::Closed)));
        assert!(matches!(
            db.find(&Value::Null, FindOptions::default()).await,
            Err(DbError::Closed)
        ));
        assert!(db.index_path().exists());
    }

    #[tokio::test]
    async fn test_stale_index_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.jsonl");
        {
            let db = Database::open(&path, config()).await.unwrap();
            db.insert(&json!({"name": "ann", "age": 30})).await.unwrap();
            db.close().await.unwrap();
        }
        tokio::fs::write(&path, "[\"ann\",30,null]\n[\"bob\",40,null]\n").await.unwrap();

        let db = Database::open(&path, config()).await.unwrap();
        assert_eq!(db.stats().await.metrics.index_rebuilds, 1);
        assert_eq!(db.count(&json!({"name": "bob"})).await.unwrap(), 1);
    }
}
