//! Read concurrency limiter
//!
//! Caps the number of simultaneously open read descriptors. Waiters are
//! served in FIFO order (tokio's semaphore is fair).

use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};

/// Default number of concurrent read descriptors
pub const DEFAULT_MAX_READERS: usize = 4;

/// A held read slot; dropping it frees the slot.
pub type ReadPermit<'a> = SemaphorePermit<'a>;

#[derive(Debug)]
pub struct ReadLimiter {
    semaphore: Semaphore,
    max: usize,
}

impl ReadLimiter {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Semaphore::new(max),
            max,
        }
    }

    /// Wait for a free read slot.
    pub async fn acquire(&self) -> Result<ReadPermit<'_>, AcquireError> {
        self.semaphore.acquire().await
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.max - self.available()
    }
}

impl Default for ReadLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_READERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_zero_is_clamped_to_one() {
        let limiter = ReadLimiter::new(0);
        assert_eq!(limiter.max(), 1);
        let _p = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_max_concurrent_holders() {
        let limiter = Arc::new(ReadLimiter::new(3));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let limiter = Arc::clone(&limiter);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.available(), 3);
    }
}
