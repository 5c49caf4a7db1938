//! File lock guarding every multi-step access to the data file
//!
//! Readers (range walks, streaming scans) share the lock; appends and
//! atomic rewrites take it exclusively. Guards release on drop, so every
//! exit path, including `?` and panics, gives the lock back.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared access: the file will not be rewritten while held
pub type SharedFileGuard<'a> = RwLockReadGuard<'a, ()>;

/// Exclusive access: no reader observes the file while held
pub type ExclusiveFileGuard<'a> = RwLockWriteGuard<'a, ()>;

#[derive(Debug, Default)]
pub struct FileLock {
    inner: RwLock<()>,
}

impl FileLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire for reading. Many holders may coexist.
    pub async fn shared(&self) -> SharedFileGuard<'_> {
        self.inner.read().await
    }

    /// Acquire for mutation. Waits for all readers to leave.
    pub async fn exclusive(&self) -> ExclusiveFileGuard<'_> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_readers_share() {
        let lock = FileLock::new();
        let _a = lock.shared().await;
        let b = tokio::time::timeout(Duration::from_millis(50), lock.shared()).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_writer_excludes_readers() {
        let lock = Arc::new(FileLock::new());
        let guard = lock.exclusive().await;

        let reader = tokio::time::timeout(Duration::from_millis(50), lock.shared()).await;
        assert!(reader.is_err());

        drop(guard);
        let reader = tokio::time::timeout(Duration::from_millis(50), lock.shared()).await;
        assert!(reader.is_ok());
    }

    #[tokio::test]
    async fn test_guard_released_on_error_path() {
        async fn failing(lock: &FileLock) -> Result<(), &'static str> {
            let _guard = lock.exclusive().await;
            let step: Result<(), &'static str> = Err("boom");
            step?;
            Ok(())
        }

        let lock = FileLock::new();
        assert!(failing(&lock).await.is_err());
        let again = tokio::time::timeout(Duration::from_millis(50), lock.exclusive()).await;
        assert!(again.is_ok());
    }
}
