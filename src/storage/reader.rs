//! Backward tail reads
//!
//! Reads the last lines of the data file by walking backward in fixed-size
//! chunks, so inspecting trailing metadata on a large file costs a few
//! kilobytes of I/O instead of a full scan. Each chunk is examined once,
//! so a very long last line costs time linear in its length.

use std::collections::VecDeque;

use super::errors::{StorageError, StorageResult};
use super::handler::{read_at, FileHandler};

/// Chunk size for backward scans
pub const TAIL_CHUNK: u64 = 4 * 1024;

impl FileHandler {
    /// Returns up to `n` last non-blank lines, in file order, without terminators.
    pub async fn read_last_lines(&self, n: usize) -> StorageResult<Vec<Vec<u8>>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let _permit = self.acquire_read().await?;
        self.with_timeout("read_last_lines", async {
            let size = self.len().await?;
            if size == 0 {
                return Ok(Vec::new());
            }
            let mut file = self.open_read().await?;
            let mut chunks: VecDeque<Vec<u8>> = VecDeque::new();
            let mut pos = size;
            // Non-blank lines known to be complete: each needs a newline before it.
            let mut complete = 0usize;
            // Whether the bytes after the last newline seen so far hold anything.
            let mut pending_content = false;

            while pos > 0 && complete < n {
                let chunk_start = pos.saturating_sub(TAIL_CHUNK);
                let chunk = read_at(&mut file, chunk_start, (pos - chunk_start) as usize)
                    .await
                    .map_err(|e| StorageError::read_failed("Failed to read file tail", e))?;
                if chunk.is_empty() {
                    return Err(StorageError::short_read(chunk_start, (pos - chunk_start) as usize));
                }
                for byte in chunk.iter().rev() {
                    if *byte == b'\n' {
                        if pending_content {
                            complete += 1;
                        }
                        pending_content = false;
                    } else if !byte.is_ascii_whitespace() {
                        pending_content = true;
                    }
                }
                pos = chunk_start;
                chunks.push_front(chunk);
            }

            let mut tail = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
            for chunk in chunks {
                tail.extend_from_slice(&chunk);
            }
            let mut segments: Vec<&[u8]> = tail.split(|b| *b == b'\n').collect();
            // The first segment may be cut mid-line unless the start of file was reached.
            if pos > 0 && !segments.is_empty() {
                segments.remove(0);
            }
            let lines: Vec<&[u8]> = segments
                .into_iter()
                .filter(|s| !s.iter().all(|b| b.is_ascii_whitespace()))
                .collect();
            let skip = lines.len().saturating_sub(n);
            Ok(lines[skip..].iter().map(|l| l.to_vec()).collect())
        })
        .await
    }

    /// Returns the final non-blank line, if any.
    pub async fn read_last_line(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read_last_lines(1).await?.pop())
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
        tokio::fs::write(&path, content).await.unwrap();
        let handler = FileHandler::new(path, Arc::new(ReadLimiter::default()), HandlerOptions::default());
        (dir, handler)
    }

    #[tokio::test]
    async fn test_last_line_of_small_file() {
        let (_dir, handler) = handler_with(b"[1]\n[2]\n\n").await;
        assert_eq!(handler.read_last_line().await.unwrap(), Some(b"[2]".to_vec()));
    }

    #[tokio::test]
    async fn test_last_line_without_terminator() {
        let (_dir, handler) = handler_with(b"[1]\n[2]").await;
        assert_eq!(handler.read_last_line().await.unwrap(), Some(b"[2]".to_vec()));
    }

    #[tokio::test]
    async fn test_empty_file_has_no_last_line() {
        let (_dir, handler) = handler_with(b"").await;
        assert_eq!(handler.read_last_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_lines_span_chunks() {
        let long = "x".repeat(TAIL_CHUNK as usize * 2);
        let content = format!("[\"head\"]\n[\"{}\"]\n[1]\n", long);
        let (_dir, handler) = handler_with(content.as_bytes()).await;

        let lines = handler.read_last_lines(2).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("[\"{}\"]", long).into_bytes());
        assert_eq!(lines[1], b"[1]".to_vec());
    }

    #[tokio::test]
    async fn test_last_lines_fewer_than_requested() {
        let (_dir, handler) = handler_with(b"[1]\n").await;
        assert_eq!(handler.read_last_lines(3).await.unwrap(), vec![b"[1]".to_vec()]);
    }

    #[tokio::test]
    async fn test_last_lines_of_very_long_line() {
        let long = "y".repeat(4 * 1024 * 1024);
        let content = format!("[0]\n[\"{}\"]\n", long);
        let (_dir, handler) = handler_with(content.as_bytes()).await;

        let started = std::time::Instant::now();
        let lines = handler.read_last_lines(2).await.unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        assert_eq!(lines[0], b"[0]".to_vec());
        assert_eq!(lines[1].len(), long.len() + 4);
    }

    #[tokio::test]
    async fn test_blank_lines_do_not_count() {
        let mut content = b"[1]\n[2]\n".to_vec();
        content.extend(std::iter::repeat(b'\n').take(TAIL_CHUNK as usize * 3));
        let (_dir, handler) = handler_with(&content).await;
        assert_eq!(
            handler.read_last_lines(2).await.unwrap(),
            vec![b"[1]".to_vec(), b"[2]".to_vec()]
        );
    }
}
