//! Streaming line scan
//!
//! Reads the data file sequentially in bounded chunks and hands each
//! non-blank line to a visitor. Line numbers count every non-blank line,
//! including lines that fail to decode, so they stay aligned with the
//! offset table rebuilt from the scanned offsets.

use std::ops::ControlFlow;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

use super::errors::{StorageError, StorageResult};
use super::handler::FileHandler;
use super::lines::decode_line;
use crate::observability::Logger;

/// Read buffer size for sequential scans
pub const SCAN_CHUNK: usize = 64 * 1024;

/// One line visited by a scan
#[derive(Debug)]
pub struct ScannedLine {
    pub line: usize,
    pub offset: u64,
    /// Decoded row; `None` for a corrupt line
    pub row: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Non-blank lines visited
    pub lines: usize,
    /// Lines that could not be decoded
    pub skipped: usize,
    /// Byte position where the scan stopped
    pub end: u64,
}

impl FileHandler {
    /// Visits lines starting at `from_offset`, numbering from `start_line`.
    ///
    /// The visitor returns `ControlFlow::Break` to stop early. Corrupt lines
    /// are passed with `row: None` and logged; they never abort the scan.
    pub async fn scan_lines<F>(
        &self,
        from_offset: u64,
        start_line: usize,
        mut visit: F,
    ) -> StorageResult<ScanSummary>
    where
        F: FnMut(ScannedLine) -> ControlFlow<()>,
    {
        let mut summary = ScanSummary {
            end: from_offset,
            ..ScanSummary::default()
        };
        if from_offset >= self.len().await? {
            return Ok(summary);
        }

        let _permit = self.acquire_read().await?;
        let mut file = self.open_read().await?;
        file.seek(std::io::SeekFrom::Start(from_offset))
            .await
            .map_err(|e| StorageError::read_failed("Failed to seek for scan", e))?;
        let mut reader = BufReader::with_capacity(SCAN_CHUNK, file);
        let mut buf = Vec::new();
        let mut line = start_line;

        loop {
            buf.clear();
            let n = self
                .with_timeout("scan_lines", async {
                    reader
                        .read_until(b'\n', &mut buf)
                        .await
                        .map_err(|e| StorageError::read_failed("Failed to read line during scan", e))
                })
                .await?;
            if n == 0 {
                break;
            }
            let offset = summary.end;
            summary.end += n as u64;
            if buf.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            let row = decode_line(&buf);
            if row.is_none() {
                summary.skipped += 1;
                let line_str = line.to_string();
                let offset_str = offset.to_string();
                Logger::warn(
                    "LINE_SKIPPED",
                    &[("line", &line_str), ("offset", &offset_str)],
                );
            }
            summary.lines += 1;
            let flow = visit(ScannedLine { line, offset, row });
            line += 1;
            if flow.is_break() {
                break;
            }
        }
        Ok(summary)
    }
}
