//! Legacy single-file import
//!
//! The legacy layout keeps everything in one file:
//!
//! ```text
//! ["row", 1]            data lines
//! ["row", 2]
//! {"data": {...}}       index line
//! [0, 11]               offsets line
//! ```
//!
//! Migration strips the two trailing lines from the data file and writes
//! them out as a separate index file. The data file is rewritten first: if
//! the process stops before the index is written, the next open rebuilds
//! the index from clean data.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};

use super::errors::{MigrationError, MigrationResult};
use crate::index::{encode, IndexData, IndexSnapshot, LenientUint, SNAPSHOT_VERSION};
use crate::observability::Logger;
use crate::storage::{write_atomic, FileHandler, StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Data lines kept in the data file
    pub records: usize,
    /// Whether the legacy index was carried over; otherwise it is rebuilt on open
    pub index_written: bool,
    /// Data file size after migration
    pub data_len: u64,
}

/// Whether the file ends with a legacy index line followed by an offsets line.
///
/// Reads only the file tail.
pub async fn is_legacy(handler: &FileHandler) -> StorageResult<bool> {
    let tail = handler.read_last_lines(2).await?;
    if tail.len() < 2 {
        return Ok(false);
    }
    Ok(parse_index_line(&tail[0]).is_some() && parse_offsets_line(&tail[1]).is_some())
}

/// Splits a legacy file into data file + index file.
pub async fn migrate_legacy(
    handler: &FileHandler,
    index_path: &Path,
    compress: bool,
) -> MigrationResult<MigrationReport> {
    let path = handler.path();
    let content = tokio::fs::read(path).await.map_err(|e| {
        MigrationError::io(
            format!("Failed to read {}", path.display()),
            StorageError::read_failed("Failed to read legacy file", e),
        )
    })?;

    let spans = line_spans(&content);
    let &[.., (index_start, index_end), (offsets_start, offsets_end)] = spans.as_slice() else {
        return Err(MigrationError::not_legacy(path));
    };
    let index_obj = parse_index_line(&content[index_start..index_end])
        .ok_or_else(|| MigrationError::not_legacy(path))?;
    let offsets = parse_offsets_line(&content[offsets_start..offsets_end])
        .ok_or_else(|| MigrationError::not_legacy(path))?;

    let data = &content[..index_start];
    let data_spans = &spans[..spans.len() - 2];
    write_atomic(path, data).await?;

    let consistent = data_spans.len() == offsets.len()
        && data_spans
            .iter()
            .zip(&offsets)
            .all(|((start, _), offset)| *start as u64 == *offset);

    let mut index_written = false;
    if !consistent {
        let expected = offsets.len().to_string();
        let found = data_spans.len().to_string();
        Logger::warn(
            "LEGACY_OFFSETS_MISMATCH",
            &[("data_lines", &found), ("offsets", &expected)],
        );
    } else {
        match legacy_snapshot(index_obj, &offsets) {
            Ok(snapshot) => {
                let bytes = encode(&snapshot, compress)?;
                write_atomic(index_path, &bytes).await?;
                index_written = true;
            }
            Err(e) => {
                Logger::warn("LEGACY_INDEX_UNREADABLE", &[("reason", e.message())]);
            }
        }
    }

    let records = data_spans.len().to_string();
    let written = index_written.to_string();
    Logger::info(
        "LEGACY_MIGRATED",
        &[("index_written", &written), ("records", &records)],
    );
    Ok(MigrationReport {
        records: data_spans.len(),
        index_written,
        data_len: data.len() as u64,
    })
}

/// `(start, end)` of every non-blank line, terminator excluded
fn line_spans(content: &[u8]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, b) in content.iter().enumerate() {
        if *b == b'\n' {
            push_span(content, start, i, &mut spans);
            start = i + 1;
        }
    }
    push_span(content, start, content.len(), &mut spans);
    spans
}

fn push_span(content: &[u8], start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    if !content[start..end].iter().all(|b| b.is_ascii_whitespace()) {
        spans.push((start, end));
    }
}

fn parse_index_line(bytes: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Non-negative integers, strictly increasing, starting at 0
fn parse_offsets_line(bytes: &[u8]) -> Option<Vec<u64>> {
    let Ok(Value::Array(items)) = serde_json::from_slice::<Value>(bytes) else {
        return None;
    };
    let offsets: Vec<u64> = items.iter().map(Value::as_u64).collect::<Option<_>>()?;
    let starts_at_zero = offsets.first().map(|o| *o == 0).unwrap_or(true);
    let increasing = offsets.windows(2).all(|w| w[0] < w[1]);
    (starts_at_zero && increasing).then_some(offsets)
}

/// Accepts a full snapshot object, `{"data": ...}`, or a bare field map.
fn legacy_snapshot(mut obj: Map<String, Value>, offsets: &[u64]) -> MigrationResult<IndexSnapshot> {
    let term_mapping: BTreeMap<String, Vec<String>> = match obj.remove("termMapping") {
        Some(v) => serde_json::from_value(v)
            .map_err(|e| MigrationError::invalid_index(format!("Invalid term mapping: {}", e)))?,
        None => BTreeMap::new(),
    };

    let value = Value::Object(obj);
    let parsed = if value.get("index").is_some() {
        serde_json::from_value::<IndexSnapshot>(value)
    } else if value.get("data").is_some() {
        serde_json::from_value::<IndexData>(value).map(|index| IndexSnapshot {
            index,
            ..IndexSnapshot::default()
        })
    } else {
        serde_json::from_value(value).map(|data| IndexSnapshot {
            index: IndexData { data },
            ..IndexSnapshot::default()
        })
    };
    let mut snapshot =
        parsed.map_err(|e| MigrationError::invalid_index(format!("Invalid legacy index: {}", e)))?;

    if snapshot.term_mapping.is_empty() {
        snapshot.term_mapping = term_mapping;
    }
    snapshot.offsets = offsets.iter().map(|o| LenientUint(*o)).collect();
    snapshot.record_count = LenientUint(offsets.len() as u64);
    snapshot.version = SNAPSHOT_VERSION;
    Ok(snapshot)
}
