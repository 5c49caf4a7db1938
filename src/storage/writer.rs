//! Data file mutation: appends, in-place updates, atomic rewrites
//!
//! Appends and in-place writes are fsynced before returning. Rewrites go
//! through a temp file beside the target and are swapped in by rename; the
//! original file is never touched until the temp file is complete and
//! durable.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};
use super::handler::{read_at, ByteRange, FileHandler};
use super::lines::{decode_line, encode_row, is_parseable};
use crate::observability::Logger;

/// Rename attempts before an atomic swap is reported as failed
pub const RENAME_ATTEMPTS: u32 = 5;

/// First backoff delay between rename attempts; doubles each retry
pub const RENAME_BACKOFF: Duration = Duration::from_millis(20);

/// Result of an append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Starting byte offset of each appended line, in order
    pub offsets: Vec<u64>,
    /// File size after the append
    pub end: u64,
}

/// Result of an atomic rewrite
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Offset table of the rewritten file
    pub offsets: Vec<u64>,
    /// Old line numbers that no longer exist (deletions and discarded lines), ascending
    pub removed_lines: Vec<usize>,
    /// Lines discarded because they failed validation
    pub dropped: usize,
    /// File size after the rewrite
    pub len: u64,
}

impl FileHandler {
    /// Appends lines in one write and fsyncs.
    ///
    /// A missing trailing newline on the existing file is repaired first so
    /// the new lines never fuse with a truncated record.
    pub async fn append_lines(&self, lines: &[String]) -> StorageResult<AppendOutcome> {
        let start = self.len().await?;
        let mut buf = String::new();
        if start > 0 && !self.ends_with_newline(start).await? {
            buf.push('\n');
        }

        let mut offsets = Vec::with_capacity(lines.len());
        for line in lines {
            offsets.push(start + buf.len() as u64);
            buf.push_str(line);
            buf.push('\n');
        }
        if lines.is_empty() {
            return Ok(AppendOutcome { offsets, end: start });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())
            .await
            .map_err(|e| StorageError::write_failed("Failed to open data file for append", e))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| StorageError::write_failed("Failed to append lines", e))?;
        file.sync_data()
            .await
            .map_err(|e| StorageError::write_failed("Failed to fsync data file", e))?;

        Ok(AppendOutcome {
            offsets,
            end: start + buf.len() as u64,
        })
    }

    /// Overwrites bytes at `offset` with `line`.
    ///
    /// Only valid when `line` has exactly the length of the line it
    /// replaces (terminator excluded); the existing `\n` stays in place.
    pub async fn write_in_place(&self, offset: u64, line: &str) -> StorageResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.path())
            .await
            .map_err(|e| StorageError::write_failed("Failed to open data file for update", e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| StorageError::write_failed("Failed to seek for update", e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::write_failed("Failed to write updated line", e))?;
        file.sync_data()
            .await
            .map_err(|e| StorageError::write_failed("Failed to fsync data file", e))?;
        Ok(())
    }

    /// Rewrites the file with `ranges[i]` replaced by `replacements[i]`.
    ///
    /// `None` deletes the line. Ranges must start on line boundaries. Every
    /// other line is copied unchanged after being validated; unparseable
    /// lines are discarded with a warning. On failure the original file is
    /// left untouched and the temp file removed.
    pub async fn replace_lines(
        &self,
        ranges: &[ByteRange],
        replacements: &[Option<String>],
    ) -> StorageResult<RewriteOutcome> {
        let mut edits: Vec<(ByteRange, Option<&str>)> = ranges
            .iter()
            .copied()
            .zip(replacements.iter().map(|r| r.as_deref()))
            .collect();
        edits.sort_by_key(|(range, _)| range.start);

        let temp = temp_path_for(self.path());
        let written = self.copy_with_edits(&temp, &edits).await;
        let outcome = match written {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                return Err(e);
            }
        };

        if let Err(e) = swap_into_place(&temp, self.path()).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        if outcome.dropped > 0 {
            let dropped = outcome.dropped.to_string();
            Logger::warn("REWRITE_DISCARDED_LINES", &[("count", &dropped)]);
        }
        Ok(outcome)
    }

    async fn copy_with_edits(
        &self,
        temp: &Path,
        edits: &[(ByteRange, Option<&str>)],
    ) -> StorageResult<RewriteOutcome> {
        let source = File::open(self.path())
            .await
            .map_err(|e| StorageError::read_failed("Failed to open data file for rewrite", e))?;
        let target = File::create(temp)
            .await
            .map_err(|e| StorageError::write_failed("Failed to create temp file", e))?;
        let mut reader = BufReader::new(source);
        let mut writer = BufWriter::new(target);

        let mut outcome = RewriteOutcome::default();
        let mut next_edit = 0usize;
        let mut covered_until = 0u64;
        let mut line_start = 0u64;
        let mut ordinal = 0usize;
        let mut written = 0u64;
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| StorageError::read_failed("Failed to read data file during rewrite", e))?;
            if n == 0 {
                break;
            }
            let start = line_start;
            line_start += n as u64;
            let blank = line.iter().all(|b| b.is_ascii_whitespace());

            while next_edit < edits.len() && edits[next_edit].0.start < start {
                let offset = edits[next_edit].0.start.to_string();
                Logger::warn("REWRITE_RANGE_UNALIGNED", &[("offset", &offset)]);
                next_edit += 1;
            }

            if next_edit < edits.len() && edits[next_edit].0.start == start {
                let (range, replacement) = edits[next_edit];
                next_edit += 1;
                covered_until = range.end;
                match replacement {
                    Some(new_line) => {
                        outcome.offsets.push(written);
                        written += emit(&mut writer, new_line.as_bytes()).await?;
                    }
                    None if !blank => outcome.removed_lines.push(ordinal),
                    None => {}
                }
                if !blank {
                    ordinal += 1;
                }
                continue;
            }

            if blank {
                continue;
            }

            if start < covered_until {
                outcome.removed_lines.push(ordinal);
                ordinal += 1;
                continue;
            }

            // Keep whatever the read path would return for this line.
            let content = line.strip_suffix(b"\n").unwrap_or(&line);
            let repaired = if is_parseable(content) {
                None
            } else {
                match decode_line(content) {
                    Some(row) => Some(encode_row(&row)),
                    None => {
                        outcome.dropped += 1;
                        outcome.removed_lines.push(ordinal);
                        ordinal += 1;
                        continue;
                    }
                }
            };
            if repaired.is_some() {
                let offset = start.to_string();
                Logger::warn("REWRITE_RECOVERED_LINE", &[("offset", &offset)]);
            }
            let content = repaired.as_ref().map(|r| r.as_bytes()).unwrap_or(content);
            outcome.offsets.push(written);
            written += emit(&mut writer, content).await?;
            ordinal += 1;
        }

        writer
            .flush()
            .await
            .map_err(|e| StorageError::write_failed("Failed to flush temp file", e))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| StorageError::write_failed("Failed to fsync temp file", e))?;

        outcome.len = written;
        Ok(outcome)
    }

    async fn ends_with_newline(&self, size: u64) -> StorageResult<bool> {
        let mut file = self.open_read().await?;
        let last = read_at(&mut file, size - 1, 1)
            .await
            .map_err(|e| StorageError::read_failed("Failed to read file tail", e))?;
        Ok(last.first() == Some(&b'\n'))
    }
}

async fn emit(writer: &mut BufWriter<File>, content: &[u8]) -> StorageResult<u64> {
    writer
        .write_all(content)
        .await
        .map_err(|e| StorageError::write_failed("Failed to write temp file", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| StorageError::write_failed("Failed to write temp file", e))?;
    Ok(content.len() as u64 + 1)
}

fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    target.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// Writes `bytes` to `path` atomically via temp file and rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let temp = temp_path_for(path);
    let written = async {
        let mut file = File::create(&temp)
            .await
            .map_err(|e| StorageError::write_failed("Failed to create temp file", e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::write_failed("Failed to write temp file", e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::write_failed("Failed to fsync temp file", e))?;
        Ok::<(), StorageError>(())
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    if let Err(e) = swap_into_place(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
    )
}

/// Renames `temp` over `target`, retrying lock-like failures with backoff.
///
/// Other rename errors (e.g. cross-device) fall back to copying the temp
/// file's bytes over the target and deleting the temp file.
pub(crate) async fn swap_into_place(temp: &Path, target: &Path) -> StorageResult<()> {
    let mut delay = RENAME_BACKOFF;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match fs::rename(temp, target).await {
            Ok(()) => {
                sync_parent_dir(target).await;
                return Ok(());
            }
            Err(e) if is_transient(&e) && attempt < RENAME_ATTEMPTS => {
                let attempt_str = attempt.to_string();
                let delay_ms = delay.as_millis().to_string();
                Logger::warn(
                    "RENAME_RETRY",
                    &[("attempt", &attempt_str), ("delay_ms", &delay_ms), ("error", &e.to_string())],
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) if is_transient(&e) => return Err(StorageError::rename_failed(attempt, e)),
            Err(e) => {
                Logger::warn("RENAME_FALLBACK_COPY", &[("error", &e.to_string())]);
                return copy_over(temp, target).await;
            }
        }
    }
}

async fn copy_over(temp: &Path, target: &Path) -> StorageResult<()> {
    let bytes = fs::read(temp)
        .await
        .map_err(|e| StorageError::read_failed("Failed to read temp file", e))?;
    let mut file = File::create(target)
        .await
        .map_err(|e| StorageError::write_failed("Failed to open target for copy", e))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| StorageError::write_failed("Failed to copy temp file over target", e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::write_failed("Failed to fsync target", e))?;
    fs::remove_file(temp)
        .await
        .map_err(|e| StorageError::io_error("Failed to remove temp file", e))?;
    Ok(())
}

async fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::ReadLimiter;
    use crate::storage::HandlerOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn handler_with(content: &[u8]) -> (TempDir, FileHandler) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        fs::write(&path, content).await.unwrap();
        let handler = FileHandler::new(path, Arc::new(ReadLimiter::default()), HandlerOptions::default());
        (dir, handler)
    }

    fn leftover_temp_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[tokio::test]
    async fn test_append_reports_offsets() {
        let (_dir, handler) = handler_with(b"[0]\n").await;
        let out = handler
            .append_lines(&["[1]".to_string(), "[22]".to_string()])
            .await
            .unwrap();
        assert_eq!(out.offsets, vec![4, 8]);
        assert_eq!(out.end, 13);
        assert_eq!(fs::read(handler.path()).await.unwrap(), b"[0]\n[1]\n[22]\n");
    }

    #[tokio::test]
    async fn test_append_repairs_missing_terminator() {
        let (_dir, handler) = handler_with(b"[0]").await;
        let out = handler.append_lines(&["[1]".to_string()]).await.unwrap();
        assert_eq!(out.offsets, vec![4]);
        assert_eq!(fs::read(handler.path()).await.unwrap(), b"[0]\n[1]\n");
    }

    #[tokio::test]
    async fn test_write_in_place() {
        let (_dir, handler) = handler_with(b"[1]\n[2]\n").await;
        handler.write_in_place(4, "[9]").await.unwrap();
        assert_eq!(fs::read(handler.path()).await.unwrap(), b"[1]\n[9]\n");
    }

    #[tokio::test]
    async fn test_replace_and_delete_lines() {
        let (dir, handler) = handler_with(b"[1]\n[2]\n[3]\n[4]\n").await;
        let out = handler
            .replace_lines(
                &[ByteRange::new(4, 8), ByteRange::new(12, 16)],
                &[Some("[20,20]".to_string()), None],
            )
            .await
            .unwrap();

        assert_eq!(fs::read(handler.path()).await.unwrap(), b"[1]\n[20,20]\n[3]\n");
        assert_eq!(out.offsets, vec![0, 4, 12]);
        assert_eq!(out.removed_lines, vec![3]);
        assert_eq!(out.dropped, 0);
        assert_eq!(out.len, 16);
        assert_eq!(leftover_temp_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_rewrite_discards_unparseable_lines() {
        let (_dir, handler) = handler_with(b"[1]\nnot json\n\n[3]\n").await;
        let out = handler.replace_lines(&[], &[]).await.unwrap();
        assert_eq!(fs::read(handler.path()).await.unwrap(), b"[1]\n[3]\n");
        assert_eq!(out.dropped, 1);
        assert_eq!(out.removed_lines, vec![1]);
        assert_eq!(out.offsets, vec![0, 4]);
    }

    #[tokio::test]
    async fn test_rewrite_keeps_recoverable_lines() {
        let (_dir, handler) = handler_with(b"[0,\"a\"]\n[1,\"b\"][2,\"c\"]\n[3,\"d\"]\n").await;
        let out = handler
            .replace_lines(&[ByteRange::new(23, 31)], &[None])
            .await
            .unwrap();
        assert_eq!(fs::read(handler.path()).await.unwrap(), b"[0,\"a\"]\n[1,\"b\"]\n");
        assert_eq!(out.dropped, 0);
        assert_eq!(out.removed_lines, vec![2]);
        assert_eq!(out.offsets, vec![0, 8]);
    }

    #[tokio::test]
    async fn test_failed_rewrite_leaves_original() {
        let dir = TempDir::new().unwrap();
        let handler = FileHandler::new(
            dir.path().join("missing.jsonl"),
            Arc::new(ReadLimiter::default()),
            HandlerOptions::default(),
        );
        assert!(handler.replace_lines(&[], &[]).await.is_err());
        assert_eq!(leftover_temp_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.idx.jsonl");
        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"second");
        assert_eq!(leftover_temp_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_swap_moves_temp_into_place() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.tmp");
        let target = dir.path().join("a.jsonl");
        fs::write(&temp, b"payload").await.unwrap();
        swap_into_place(&temp, &target).await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"payload");
        assert!(!temp.exists());
    }
}
