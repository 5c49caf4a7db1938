//! Byte-range access to the data file
//!
//! `FileHandler` owns no open descriptor between calls. Every read opens its
//! own descriptor under a `ReadLimiter` permit and drops it before returning,
//! so the number of open read descriptors never exceeds the limiter's size.
//!
//! The handler does not lock. Callers hold the database `FileLock` around
//! any sequence of calls that must observe one consistent file.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::errors::{StorageError, StorageResult};
use super::lines::is_parseable;
use crate::concurrency::{ReadLimiter, ReadPermit};
use crate::observability::Logger;

/// Default upper bound for one coalesced physical read
pub const DEFAULT_MAX_GROUP_BYTES: u64 = 512 * 1024;

/// Forward read increment used when completing a truncated line
pub const COMPLETION_STEP: usize = 2 * 1024;

/// Total bytes read forward before giving up on completing a line
pub const COMPLETION_CAP: usize = 20 * 1024;

/// Half-open byte range `[start, end)` in the data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Ranges are coalesced into one read while the group stays under this size
    pub max_group_bytes: u64,
    /// Reads slower than this are abandoned with `EMBER_IO_TIMEOUT`
    pub io_timeout: Option<Duration>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            max_group_bytes: DEFAULT_MAX_GROUP_BYTES,
            io_timeout: None,
        }
    }
}

pub struct FileHandler {
    path: PathBuf,
    limiter: Arc<ReadLimiter>,
    options: HandlerOptions,
}

impl FileHandler {
    pub fn new(path: impl Into<PathBuf>, limiter: Arc<ReadLimiter>, options: HandlerOptions) -> Self {
        Self {
            path: path.into(),
            limiter,
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &HandlerOptions {
        &self.options
    }

    /// Current file size. A missing file has size 0.
    pub async fn len(&self) -> StorageResult<u64> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StorageError::io_error(
                format!("Failed to stat data file: {}", self.path.display()),
                e,
            )),
        }
    }

    /// Creates the data file (and parent directories) if missing.
    pub async fn ensure_exists(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    StorageError::write_failed(
                        format!("Failed to create data directory: {}", parent.display()),
                        e,
                    )
                })?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                StorageError::write_failed(
                    format!("Failed to create data file: {}", self.path.display()),
                    e,
                )
            })?;
        Ok(())
    }

    /// Reads `[start, end)`, clamping `end` to the file size.
    ///
    /// Out-of-bounds ranges yield an empty buffer. Zero bytes returned for a
    /// non-empty clamped range raise `EMBER_SHORT_READ`; a partial read is
    /// returned truncated with a warning.
    pub async fn read_range(&self, start: u64, end: u64) -> StorageResult<Vec<u8>> {
        let _permit = self.acquire_read().await?;
        self.with_timeout("read_range", async {
            let size = self.len().await?;
            let end = end.min(size);
            if start >= size || end <= start {
                return Ok(Vec::new());
            }
            let mut file = self.open_read().await?;
            read_checked(&mut file, start, (end - start) as usize).await
        })
        .await
    }

    /// Reads many ranges through one descriptor, coalescing neighbours.
    ///
    /// `ranges` must be ascending by `start`. Results come back in input
    /// order. A range whose bytes neither end on a terminator nor parse is
    /// read forward until it does; see `complete_with`.
    pub async fn read_ranges(&self, ranges: &[ByteRange]) -> StorageResult<Vec<Vec<u8>>> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        let _permit = self.acquire_read().await?;
        self.with_timeout("read_ranges", async {
            let size = self.len().await?;
            let mut file = self.open_read().await?;
            let mut results = Vec::with_capacity(ranges.len());

            for group in group_ranges(ranges, self.options.max_group_bytes) {
                let group_start = group.span.start.min(size);
                let group_end = group.span.end.min(size);
                let buf = if group_end > group_start {
                    read_checked(&mut file, group_start, (group_end - group_start) as usize).await?
                } else {
                    Vec::new()
                };

                for range in &ranges[group.first..group.last] {
                    let lo = (range.start.saturating_sub(group_start) as usize).min(buf.len());
                    let hi = (range.end.saturating_sub(group_start) as usize).min(buf.len());
                    let slice = buf[lo..hi.max(lo)].to_vec();
                    let completed = if slice.is_empty() {
                        slice
                    } else {
                        complete_with(&mut file, size, range.start, slice).await?
                    };
                    results.push(completed);
                }
            }
            Ok(results)
        })
        .await
    }

    pub(crate) async fn acquire_read(&self) -> StorageResult<ReadPermit<'_>> {
        self.limiter.acquire().await.map_err(|e| {
            StorageError::read_failed(
                "Read limiter closed",
                io::Error::new(io::ErrorKind::Other, e.to_string()),
            )
        })
    }

    pub(crate) async fn open_read(&self) -> StorageResult<File> {
        File::open(&self.path).await.map_err(|e| {
            StorageError::read_failed(
                format!("Failed to open data file: {}", self.path.display()),
                e,
            )
        })
    }

    pub(crate) async fn with_timeout<T, F>(&self, operation: &str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match self.options.io_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::timed_out(operation, limit)),
            },
            None => fut.await,
        }
    }
}

struct RangeGroup {
    span: ByteRange,
    first: usize,
    last: usize,
}

fn group_ranges(ranges: &[ByteRange], max_group_bytes: u64) -> Vec<RangeGroup> {
    let mut groups: Vec<RangeGroup> = Vec::new();
    for (i, range) in ranges.iter().enumerate() {
        if let Some(group) = groups.last_mut() {
            let fits = range.start >= group.span.end
                && range.end.saturating_sub(group.span.start) <= max_group_bytes;
            if fits {
                group.span.end = range.end;
                group.last = i + 1;
                continue;
            }
        }
        groups.push(RangeGroup {
            span: *range,
            first: i,
            last: i + 1,
        });
    }
    groups
}

/// Reads up to `len` bytes at `offset`, stopping early only at end of file.
pub(crate) async fn read_at(file: &mut File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

async fn read_checked(file: &mut File, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
    let buf = read_at(file, offset, len)
        .await
        .map_err(|e| StorageError::read_failed(format!("Failed to read at offset {}", offset), e))?;

    if buf.is_empty() && len > 0 {
        return Err(StorageError::short_read(offset, len));
    }
    if buf.len() < len {
        let offset = offset.to_string();
        let expected = len.to_string();
        let actual = buf.len().to_string();
        Logger::warn(
            "SHORT_READ",
            &[("actual", &actual), ("expected", &expected), ("offset", &offset)],
        );
    }
    Ok(buf)
}

/// Extends a line that does not end on a terminator.
///
/// If the bytes already parse as a record they are returned unchanged.
/// Otherwise reads forward in `COMPLETION_STEP` increments, testing each
/// newline found, until a parseable line is formed or `COMPLETION_CAP`
/// bytes were consumed; then the original bytes are returned and the
/// caller treats them as a corrupt line.
async fn complete_with(file: &mut File, size: u64, start: u64, bytes: Vec<u8>) -> StorageResult<Vec<u8>> {
    if bytes.ends_with(b"\n") || is_parseable(&bytes) {
        return Ok(bytes);
    }

    let mut acc = bytes.clone();
    let mut pos = start + bytes.len() as u64;
    let mut consumed = 0usize;

    while consumed < COMPLETION_CAP && pos < size {
        let step = (COMPLETION_STEP as u64).min(size - pos) as usize;
        let chunk = read_at(file, pos, step)
            .await
            .map_err(|e| StorageError::read_failed("Failed to read line continuation", e))?;
        if chunk.is_empty() {
            break;
        }
        pos += chunk.len() as u64;
        consumed += chunk.len();

        let base = acc.len();
        acc.extend_from_slice(&chunk);
        for (i, byte) in chunk.iter().enumerate() {
            if *byte == b'\n' && is_parseable(&acc[..base + i]) {
                acc.truncate(base + i + 1);
                return Ok(acc);
            }
        }
    }

    let start = start.to_string();
    let consumed = consumed.to_string();
    Logger::warn(
        "LINE_COMPLETION_FAILED",
        &[("bytes_read", &consumed), ("offset", &start)],
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn handler_with(content: &[u8]) -> (TempDir, FileHandler) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        fs::write(&path, content).await.unwrap();
        let handler = FileHandler::new(path, Arc::new(ReadLimiter::default()), HandlerOptions::default());
        (dir, handler)
    }

    #[tokio::test]
    async fn test_read_range_clamps_to_file_size() {
        let (_dir, handler) = handler_with(b"[1]\n[2]\n").await;
        assert_eq!(handler.read_range(4, 100).await.unwrap(), b"[2]\n");
        assert!(handler.read_range(100, 200).await.unwrap().is_empty());
        assert!(handler.read_range(5, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_has_zero_len() {
        let dir = TempDir::new().unwrap();
        let handler = FileHandler::new(
            dir.path().join("absent.jsonl"),
            Arc::new(ReadLimiter::default()),
            HandlerOptions::default(),
        );
        assert_eq!(handler.len().await.unwrap(), 0);
        handler.ensure_exists().await.unwrap();
        assert!(handler.path().exists());
    }

    #[tokio::test]
    async fn test_read_ranges_preserves_order_and_boundaries() {
        let (_dir, handler) = handler_with(b"[1]\n[22]\n[333]\n").await;
        let ranges = [ByteRange::new(0, 4), ByteRange::new(4, 9), ByteRange::new(9, 15)];
        let out = handler.read_ranges(&ranges).await.unwrap();
        assert_eq!(out, vec![b"[1]\n".to_vec(), b"[22]\n".to_vec(), b"[333]\n".to_vec()]);
    }

    #[test]
    fn test_grouping_respects_max_group_bytes() {
        let ranges = [
            ByteRange::new(0, 10),
            ByteRange::new(10, 20),
            ByteRange::new(50, 60),
            ByteRange::new(100, 130),
        ];
        let groups = group_ranges(&ranges, 64);
        let spans: Vec<(usize, usize)> = groups.iter().map(|g| (g.first, g.last)).collect();
        assert_eq!(spans, vec![(0, 3), (3, 4)]);
        assert_eq!(groups[0].span, ByteRange::new(0, 60));
    }

    #[test]
    fn test_grouping_never_merges_out_of_order_ranges() {
        let ranges = [ByteRange::new(20, 30), ByteRange::new(0, 10)];
        assert_eq!(group_ranges(&ranges, 1024).len(), 2);
    }

    #[tokio::test]
    async fn test_short_range_reads_forward_to_terminator() {
        let (_dir, handler) = handler_with(b"[\"abcdef\",1]\n[2]\n").await;
        let out = handler.read_ranges(&[ByteRange::new(0, 5)]).await.unwrap();
        assert_eq!(out[0], b"[\"abcdef\",1]\n");
    }

    #[tokio::test]
    async fn test_parseable_range_is_not_extended() {
        let (_dir, handler) = handler_with(b"[1][2]").await;
        let out = handler.read_ranges(&[ByteRange::new(0, 3)]).await.unwrap();
        assert_eq!(out[0], b"[1]");
    }

    #[tokio::test]
    async fn test_completion_gives_up_after_cap() {
        let mut content = b"[\"".to_vec();
        content.extend(std::iter::repeat(b'x').take(COMPLETION_CAP + 4096));
        content.extend_from_slice(b"\"]\n");
        let (_dir, handler) = handler_with(&content).await;

        let out = handler.read_ranges(&[ByteRange::new(0, 4)]).await.unwrap();
        assert_eq!(out[0], b"[\"xx");
    }
}
