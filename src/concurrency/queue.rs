//! Operation queue: FIFO, one operation at a time
//!
//! Every mutating database operation is submitted here. A single consumer
//! task pulls operations in submission order and runs each to completion
//! before starting the next, regardless of how callers await their results.
//!
//! Submission order is fixed at the moment `enqueue` is called, not when the
//! returned future is first polled.
//!
//! `wait_for_completion` must not be called from inside a queued operation:
//! the operation would wait for itself.
//!
//! A purge never cancels an operation that already started. Its caller is
//! failed and the consumer moves on, while the operation itself runs to
//! completion in the background. Database operations take the state lock,
//! so later operations still wait for it before touching shared state.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use super::errors::{QueueError, QueueResult};
use crate::observability::Logger;

type QueuedTask = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

/// Where and when an operation was submitted.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub id: Uuid,
    pub label: &'static str,
    pub enqueued_at: DateTime<Utc>,
    pub caller: &'static Location<'static>,
}

impl OperationContext {
    fn new(label: &'static str, caller: &'static Location<'static>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            enqueued_at: Utc::now(),
            caller,
        }
    }

    fn log_purged(&self) {
        let id = self.id.to_string();
        let caller = self.caller.to_string();
        let enqueued_at = self.enqueued_at.to_rfc3339();
        Logger::warn(
            "QUEUE_OPERATION_PURGED",
            &[
                ("caller", &caller),
                ("enqueued_at", &enqueued_at),
                ("label", self.label),
                ("operation_id", &id),
            ],
        );
    }
}

struct QueuedOperation {
    context: OperationContext,
    task: QueuedTask,
    abandon: oneshot::Sender<()>,
}

struct RunningOperation {
    context: OperationContext,
    /// Fails the caller's future
    abandon: oneshot::Sender<()>,
    /// Releases the consumer from waiting on the task
    detach: oneshot::Sender<()>,
}

/// Execution statistics across all operations run by one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub purged: u64,
    pub pending: usize,
    pub running: bool,
    #[serde(skip)]
    pub total_duration: Duration,
    #[serde(skip)]
    pub max_duration: Duration,
}

impl QueueStats {
    /// Mean duration of completed operations
    pub fn average_duration(&self) -> Duration {
        if self.completed == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.completed as u32
        }
    }

    fn record(&mut self, elapsed: Duration, succeeded: bool) {
        self.completed += 1;
        self.total_duration += elapsed;
        self.max_duration = self.max_duration.max(elapsed);
        if succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedOperation>,
    running: Option<RunningOperation>,
    shutdown: bool,
    stats: QueueStats,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_none()
    }
}

#[derive(Default)]
struct QueueShared {
    state: Mutex<QueueState>,
    wake: Notify,
    idle: Notify,
}

impl QueueShared {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sequential executor for logical database operations.
pub struct OperationQueue {
    shared: Arc<QueueShared>,
}

impl OperationQueue {
    /// Creates the queue and spawns its consumer on the current runtime.
    pub fn start() -> Self {
        let shared = Arc::new(QueueShared::default());
        tokio::spawn(run_consumer(Arc::clone(&shared)));
        Self { shared }
    }

    /// Submits an operation and returns a future for its result.
    ///
    /// The operation's own error type must absorb queue failures, so a
    /// purged or rejected operation surfaces through the same `Result`.
    #[track_caller]
    pub fn enqueue<T, E, F>(
        &self,
        label: &'static str,
        operation: F,
    ) -> impl Future<Output = Result<T, E>> + Send + 'static
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<QueueError> + Send + 'static,
    {
        let context = OperationContext::new(label, Location::caller());
        let (tx, rx) = oneshot::channel();
        let (abandon, abandoned) = oneshot::channel();

        let task: QueuedTask = Box::pin(async move {
            let result = operation.await;
            let ok = result.is_ok();
            let _ = tx.send(result);
            ok
        });

        let submitted = self.submit(QueuedOperation {
            context: context.clone(),
            task,
            abandon,
        });

        async move {
            submitted.map_err(E::from)?;
            tokio::select! {
                biased;
                outcome = rx => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(E::from(QueueError::aborted(&context))),
                },
                Ok(()) = abandoned => Err(E::from(QueueError::aborted(&context))),
            }
        }
    }

    fn submit(&self, op: QueuedOperation) -> QueueResult<()> {
        let mut state = self.shared.lock_state();
        if state.shutdown {
            return Err(QueueError::closed(&op.context));
        }
        state.stats.enqueued += 1;
        state.pending.push_back(op);
        drop(state);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Waits until the queue is empty and idle.
    ///
    /// With a timeout, operations still queued or running when it expires
    /// are force-failed and purged; each caller receives an error carrying
    /// its original submission context. `None` waits indefinitely.
    pub async fn wait_for_completion(&self, timeout: Option<Duration>) -> QueueResult<()> {
        match timeout {
            None => {
                self.wait_idle().await;
                Ok(())
            }
            Some(limit) => match tokio::time::timeout(limit, self.wait_idle()).await {
                Ok(()) => Ok(()),
                Err(_) => {
                    let purged = self.purge();
                    Err(QueueError::drain_timeout(limit, purged))
                }
            },
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.lock_state().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Drops every queued operation and abandons the running one.
    ///
    /// Returns how many callers were force-failed. The abandoned operation
    /// keeps running detached; processing of later submissions continues.
    pub fn purge(&self) -> usize {
        let mut state = self.shared.lock_state();
        let drained: Vec<QueuedOperation> = state.pending.drain(..).collect();
        let running = state.running.take();
        let purged = drained.len() + usize::from(running.is_some());
        state.stats.purged += purged as u64;
        drop(state);

        if let Some(op) = running {
            op.context.log_purged();
            let _ = op.abandon.send(());
            let _ = op.detach.send(());
        }
        for op in drained {
            op.context.log_purged();
        }
        self.shared.idle.notify_waiters();
        purged
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock_state();
        let mut stats = state.stats.clone();
        stats.pending = state.pending.len();
        stats.running = state.running.is_some();
        stats
    }

    /// Stops accepting operations. Already queued operations still run.
    pub fn shutdown(&self) {
        self.shared.lock_state().shutdown = true;
        self.shared.wake.notify_one();
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_consumer(shared: Arc<QueueShared>) {
    loop {
        let next = {
            let mut state = shared.lock_state();
            match state.pending.pop_front() {
                Some(op) => {
                    let handle = tokio::spawn(op.task);
                    let (detach, detached) = oneshot::channel();
                    state.running = Some(RunningOperation {
                        context: op.context,
                        abandon: op.abandon,
                        detach,
                    });
                    Some((handle, detached))
                }
                None if state.shutdown => {
                    drop(state);
                    shared.idle.notify_waiters();
                    return;
                }
                None => None,
            }
        };

        let Some((handle, detached)) = next else {
            shared.idle.notify_waiters();
            shared.wake.notified().await;
            continue;
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            joined = handle => joined,
            // Purged: the dropped handle leaves the task running detached.
            Ok(()) = detached => continue,
        };
        let elapsed = started.elapsed();

        let mut state = shared.lock_state();
        let Some(running) = state.running.take() else {
            continue;
        };
        match outcome {
            Ok(succeeded) => state.stats.record(elapsed, succeeded),
            Err(_) => {
                state.stats.record(elapsed, false);
                Logger::error("QUEUE_OPERATION_PANICKED", &[("label", running.context.label)]);
            }
        }
    }
}
