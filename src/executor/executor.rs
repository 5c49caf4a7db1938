//! Query executor for emberdb
//!
//! Execution flow:
//! 1. Ask the index for candidate lines (skipped when no field is indexed)
//! 2. Indexed path: read only candidate lines, in batches of grouped reads;
//!    lines past the data file come from the write buffer
//! 3. Streaming path: scan the whole data file, then the write buffer
//! 4. Filter rows unless the index answer was exact
//! 5. Apply skip, then limit, in line order
//!
//! Unparsable lines are skipped on both paths. Candidates at or past the
//! record count mean the index is stale; they are dropped with a warning.

use std::ops::ControlFlow;

use serde_json::Value;

use crate::index::{Candidates, IndexEngine};
use crate::observability::{Logger, MetricsRegistry};
use crate::planner::{Criteria, QueryPlan};
use crate::schema::Schema;
use crate::storage::{decode_line, ByteRange, FileHandler};

use super::errors::{ExecutorError, ExecutorResult};
use super::filters::PredicateFilter;

/// Candidate lines read per grouped read
pub const READ_BATCH: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Matches to pass over before collecting
    pub skip: usize,
    /// Maximum matches to return; `None` returns all
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            skip: 0,
            limit: Some(limit),
        }
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

/// A matching record and the line it lives on
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedRecord {
    pub line: usize,
    pub row: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Matches in line order
    pub records: Vec<MatchedRecord>,
    /// Lines read or scanned
    pub scanned_count: usize,
    /// Whether candidates came from the index
    pub used_index: bool,
    /// Whether collection stopped at the limit
    pub limit_applied: bool,
}

/// Everything a query reads, borrowed from the open database
pub struct QuerySource<'a> {
    pub schema: &'a Schema,
    pub handler: &'a FileHandler,
    pub engine: &'a IndexEngine,
    /// Byte offset of every data file line
    pub offsets: &'a [u64],
    /// End of the last data file line
    pub data_end: u64,
    /// Buffered rows, numbered after the last data file line
    pub pending: &'a [Vec<Value>],
}

impl QuerySource<'_> {
    /// Lines in the data file plus buffered rows
    pub fn record_count(&self) -> usize {
        self.offsets.len() + self.pending.len()
    }

    fn line_range(&self, line: usize) -> ByteRange {
        let start = self.offsets[line];
        let end = self
            .offsets
            .get(line + 1)
            .copied()
            .unwrap_or(self.data_end);
        ByteRange::new(start, end)
    }
}

/// Collects matches while honoring skip and limit
struct Collector {
    to_skip: usize,
    limit: Option<usize>,
    records: Vec<MatchedRecord>,
    scanned: usize,
    limit_applied: bool,
}

impl Collector {
    fn new(options: &FindOptions) -> Self {
        Self {
            to_skip: options.skip,
            limit: options.limit,
            records: Vec::new(),
            scanned: 0,
            limit_applied: false,
        }
    }

    fn is_full(&self) -> bool {
        self.limit.map(|l| self.records.len() >= l).unwrap_or(false)
    }

    /// Offers a matching record; returns `Break` once the limit is reached.
    fn offer(&mut self, line: usize, row: Vec<Value>) -> ControlFlow<()> {
        if self.is_full() {
            return ControlFlow::Break(());
        }
        if self.to_skip > 0 {
            self.to_skip -= 1;
            return ControlFlow::Continue(());
        }
        self.records.push(MatchedRecord { line, row });
        if self.is_full() {
            self.limit_applied = true;
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn finish(self, used_index: bool) -> ExecutionResult {
        ExecutionResult {
            records: self.records,
            scanned_count: self.scanned,
            used_index,
            limit_applied: self.limit_applied,
        }
    }
}

/// Query executor that processes plans against the data file and buffer
pub struct QueryExecutor<'a> {
    source: QuerySource<'a>,
    metrics: &'a MetricsRegistry,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(source: QuerySource<'a>, metrics: &'a MetricsRegistry) -> Self {
        Self { source, metrics }
    }

    /// Executes a plan. Same plan and same data give the same results.
    pub async fn execute(&self, plan: &QueryPlan, options: &FindOptions) -> ExecutorResult<ExecutionResult> {
        if options.limit == Some(0) {
            return Ok(ExecutionResult::default());
        }
        let candidates = if plan.uses_index() {
            self.source.engine.candidates(&plan.criteria)
        } else {
            None
        };
        match candidates {
            Some(candidates) => {
                self.metrics.increment_indexed_queries();
                self.execute_indexed(&plan.criteria, candidates, options).await
            }
            None => {
                self.metrics.increment_streaming_queries();
                self.execute_streaming(&plan.criteria, options).await
            }
        }
    }

    /// Reads the given lines, ascending, and keeps those matching `filter`.
    ///
    /// Unparsable lines and lines past the record count are left out.
    pub async fn fetch_lines(&self, lines: &[usize], filter: Option<&Criteria>) -> ExecutorResult<Vec<MatchedRecord>> {
        let mut out = Vec::with_capacity(lines.len());
        for chunk in lines.chunks(READ_BATCH) {
            for (line, row) in self.read_batch(chunk).await? {
                let keep = filter
                    .map(|c| PredicateFilter::matches(self.source.schema, &row, c))
                    .unwrap_or(true);
                if keep {
                    out.push(MatchedRecord { line, row });
                }
            }
        }
        Ok(out)
    }

    async fn execute_indexed(
        &self,
        criteria: &Criteria,
        candidates: Candidates,
        options: &FindOptions,
    ) -> ExecutorResult<ExecutionResult> {
        let total = self.source.record_count();
        let mut lines: Vec<usize> = candidates.lines.into_iter().collect();
        let valid = lines.partition_point(|l| *l < total);
        if valid < lines.len() {
            let dropped = (lines.len() - valid).to_string();
            let count = total.to_string();
            Logger::warn(
                "INDEX_STALE_CANDIDATES",
                &[("dropped", &dropped), ("record_count", &count)],
            );
            lines.truncate(valid);
        }

        let mut collector = Collector::new(options);
        'batches: for chunk in lines.chunks(READ_BATCH) {
            let rows = self.read_batch(chunk).await?;
            collector.scanned += chunk.len();
            for (line, row) in rows {
                if !candidates.exact && !PredicateFilter::matches(self.source.schema, &row, criteria) {
                    continue;
                }
                if collector.offer(line, row).is_break() {
                    break 'batches;
                }
            }
        }
        Ok(collector.finish(true))
    }

    async fn execute_streaming(&self, criteria: &Criteria, options: &FindOptions) -> ExecutorResult<ExecutionResult> {
        let schema = self.source.schema;
        let file_lines = self.source.offsets.len();
        let mut collector = Collector::new(options);
        let mut stopped = false;

        if file_lines > 0 {
            let summary = self
                .source
                .handler
                .scan_lines(0, 0, |scanned| {
                    if scanned.line >= file_lines {
                        return ControlFlow::Break(());
                    }
                    collector.scanned += 1;
                    let Some(row) = scanned.row else {
                        return ControlFlow::Continue(());
                    };
                    if !PredicateFilter::matches(schema, &row, criteria) {
                        return ControlFlow::Continue(());
                    }
                    let flow = collector.offer(scanned.line, row);
                    stopped = flow.is_break();
                    flow
                })
                .await
                .map_err(|e| ExecutorError::read_failed(None, e))?;
            if summary.skipped > 0 {
                self.metrics.add_lines_skipped(summary.skipped as u64);
            }
        }

        if !stopped {
            for (i, row) in self.source.pending.iter().enumerate() {
                collector.scanned += 1;
                if !PredicateFilter::matches(schema, row, criteria) {
                    continue;
                }
                if collector.offer(file_lines + i, row.clone()).is_break() {
                    break;
                }
            }
        }
        Ok(collector.finish(false))
    }

    /// Decodes up to one batch of ascending lines.
    async fn read_batch(&self, lines: &[usize]) -> ExecutorResult<Vec<(usize, Vec<Value>)>> {
        let file_lines = self.source.offsets.len();
        let split = lines.partition_point(|l| *l < file_lines);
        let (in_file, buffered) = lines.split_at(split);

        let mut rows = Vec::with_capacity(lines.len());
        if !in_file.is_empty() {
            let ranges: Vec<ByteRange> = in_file.iter().map(|l| self.source.line_range(*l)).collect();
            let first = ranges.first().map(|r| r.start);
            let chunks = self
                .source
                .handler
                .read_ranges(&ranges)
                .await
                .map_err(|e| ExecutorError::read_failed(first, e))?;
            for ((line, range), bytes) in in_file.iter().zip(&ranges).zip(chunks) {
                match decode_line(&bytes) {
                    Some(row) => rows.push((*line, row)),
                    None => {
                        self.metrics.add_lines_skipped(1);
                        let line_str = line.to_string();
                        let offset_str = range.start.to_string();
                        Logger::warn(
                            "LINE_SKIPPED",
                            &[("line", &line_str), ("offset", &offset_str)],
                        );
                    }
                }
            }
        }
        for line in buffered {
            if let Some(row) = self.source.pending.get(line - file_lines) {
                rows.push((*line, row.clone()));
            }
        }
        Ok(rows)
    }
}
