//! Per-device task runner.
//!
//! The OMCI channel cannot carry two request/response exchanges at once,
//! so each device gets one runner that decides which queued task may
//! touch the channel next.
//!
//! ## Rules
//!
//! - Queued tasks start in priority order (lower number first), FIFO
//!   within a priority
//! - An exclusive task starts only when nothing else runs on the device
//! - Non-exclusive tasks run together, but never beside an exclusive one
//! - A running task is never preempted
//! - Cancelling, stopping or timing out a task frees its slot at once

use crate::config::SchedulerConfig;
use crate::error::{SyncError, SyncResult};
use crate::task::{OmciTask, TaskContext, TaskId};
use crate::transport::OmciTransport;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Job = Box<dyn FnOnce(TaskContext) -> BoxFuture<Outcome> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    TimedOut,
}

struct Queued {
    id: TaskId,
    name: &'static str,
    exclusive: bool,
    job: Job,
}

struct Running {
    name: &'static str,
    exclusive: bool,
    /// Aborts the task body; its watcher then finds the slot already gone.
    abort: AbortHandle,
}

/// Counters of one task runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Tasks waiting to start.
    pub pending: usize,
    /// Tasks running now.
    pub running: usize,
    /// Tasks that returned successfully.
    pub completed: u64,
    /// Tasks that returned an error.
    pub failed: u64,
    /// Tasks stopped by their timeout.
    pub timed_out: u64,
    /// Tasks cancelled before finishing.
    pub cancelled: u64,
}

#[derive(Default)]
struct RunnerState {
    /// Keyed by (priority, sequence).
    pending: BTreeMap<(u8, u64), Queued>,
    running: HashMap<TaskId, Running>,
    next_seq: u64,
    stats: RunnerStats,
}

struct RunnerInner {
    device_id: Arc<str>,
    transport: Arc<dyn OmciTransport>,
    config: SchedulerConfig,
    next_id: AtomicU64,
    state: Mutex<RunnerState>,
}

/// Runs OMCI tasks for one device.
///
/// Cloning gives another handle on the same runner. All methods must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl TaskRunner {
    /// Creates a runner for `device_id`.
    pub fn new(
        device_id: impl Into<Arc<str>>,
        transport: Arc<dyn OmciTransport>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                device_id: device_id.into(),
                transport,
                config,
                next_id: AtomicU64::new(1),
                state: Mutex::new(RunnerState::default()),
            }),
        }
    }

    /// Device this runner serves.
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Queues `task` and returns a handle resolving to its result.
    ///
    /// The handle resolves to [`SyncError::Cancelled`] if the task is
    /// cancelled or panics, and to [`SyncError::Timeout`] if it overruns
    /// its timeout.
    pub fn queue_task<T: OmciTask>(&self, task: T) -> TaskHandle<T::Output> {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let name = task.name();
        let priority = task.priority();
        let exclusive = task.exclusive();
        let timeout = task.timeout().or(self.inner.config.default_task_timeout);
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move |ctx: TaskContext| -> BoxFuture<Outcome> {
            Box::pin(async move {
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, task.run(ctx)).await {
                        Ok(result) => result,
                        Err(_) => Err(SyncError::Timeout),
                    },
                    None => task.run(ctx).await,
                };
                let outcome = match &result {
                    Ok(_) => Outcome::Completed,
                    Err(SyncError::Timeout) => Outcome::TimedOut,
                    Err(_) => Outcome::Failed,
                };
                // The handle may already be gone; nobody is waiting then.
                let _ = tx.send(result);
                outcome
            })
        });

        {
            let mut state = self.inner.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(
                (priority, seq),
                Queued {
                    id,
                    name,
                    exclusive,
                    job,
                },
            );
        }
        tracing::debug!(device_id = %self.inner.device_id, task = name, %id, priority, exclusive, "task queued");

        RunnerInner::pump(&self.inner);
        TaskHandle {
            id,
            receiver: rx,
            runner: Arc::downgrade(&self.inner),
        }
    }

    /// Cancels a queued or running task. Returns false if it already finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        RunnerInner::cancel(&self.inner, id)
    }

    /// Cancels every queued and running task.
    pub fn stop(&self) {
        let (pending, running) = {
            let mut state = self.inner.state.lock();
            let pending = std::mem::take(&mut state.pending);
            let running = std::mem::take(&mut state.running);
            state.stats.cancelled += (pending.len() + running.len()) as u64;
            (pending, running)
        };
        for task in running.values() {
            task.abort.abort();
        }
        if !pending.is_empty() || !running.is_empty() {
            tracing::debug!(
                device_id = %self.inner.device_id,
                pending = pending.len(),
                running = running.len(),
                "task runner stopped"
            );
        }
    }

    /// Returns true if any task is running.
    pub fn is_busy(&self) -> bool {
        !self.inner.state.lock().running.is_empty()
    }

    /// Names of the running tasks.
    pub fn running_tasks(&self) -> Vec<&'static str> {
        self.inner.state.lock().running.values().map(|r| r.name).collect()
    }

    /// Names of the queued tasks in start order.
    pub fn pending_tasks(&self) -> Vec<&'static str> {
        self.inner.state.lock().pending.values().map(|q| q.name).collect()
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> RunnerStats {
        let state = self.inner.state.lock();
        RunnerStats {
            pending: state.pending.len(),
            running: state.running.len(),
            ..state.stats.clone()
        }
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("device_id", &self.inner.device_id)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RunnerInner {
    /// Starts every queued task the rules allow.
    fn pump(this: &Arc<Self>) {
        let mut guard = this.state.lock();
        let state = &mut *guard;
        loop {
            if state.running.values().any(|r| r.exclusive) {
                return;
            }
            let Some(entry) = state.pending.first_entry() else {
                return;
            };
            // Head of line blocks: a waiting exclusive task holds back
            // everything queued behind it.
            if entry.get().exclusive && !state.running.is_empty() {
                return;
            }
            let queued = entry.remove();

            let ctx = TaskContext::new(
                queued.id,
                Arc::clone(&this.device_id),
                Arc::clone(&this.transport),
                this.config.frame_timeout,
            );
            let body = tokio::spawn((queued.job)(ctx));
            let abort = body.abort_handle();
            let runner = Arc::clone(this);
            let id = queued.id;
            let name = queued.name;
            // The slot is released however the body ends, panics included.
            tokio::spawn(async move {
                let outcome = match body.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => {
                        tracing::error!(device_id = %runner.device_id, task = name, %id, "task panicked");
                        Outcome::Failed
                    }
                    Err(_) => Outcome::Failed,
                };
                RunnerInner::finish(&runner, id, outcome);
            });
            tracing::debug!(device_id = %this.device_id, task = queued.name, %id, "task started");
            state.running.insert(
                id,
                Running {
                    name: queued.name,
                    exclusive: queued.exclusive,
                    abort,
                },
            );
        }
    }

    fn finish(this: &Arc<Self>, id: TaskId, outcome: Outcome) {
        {
            let mut state = this.state.lock();
            let Some(task) = state.running.remove(&id) else {
                // Cancelled while completing.
                return;
            };
            match outcome {
                Outcome::Completed => state.stats.completed += 1,
                Outcome::Failed => state.stats.failed += 1,
                Outcome::TimedOut => {
                    state.stats.timed_out += 1;
                    tracing::warn!(device_id = %this.device_id, task = task.name, %id, "task timed out");
                }
            }
            tracing::debug!(device_id = %this.device_id, task = task.name, %id, ?outcome, "task finished");
        }
        Self::pump(this);
    }

    fn cancel(this: &Arc<Self>, id: TaskId) -> bool {
        {
            let mut state = this.state.lock();
            let key = state
                .pending
                .iter()
                .find(|(_, q)| q.id == id)
                .map(|(key, _)| *key);
            if let Some(key) = key {
                state.pending.remove(&key);
                state.stats.cancelled += 1;
                tracing::debug!(device_id = %this.device_id, %id, "queued task cancelled");
                return true;
            }
            match state.running.remove(&id) {
                Some(task) => {
                    task.abort.abort();
                    state.stats.cancelled += 1;
                    tracing::debug!(device_id = %this.device_id, task = task.name, %id, "running task cancelled");
                }
                None => return false,
            }
        }
        Self::pump(this);
        true
    }
}

/// Resolves to the result of a queued task.
///
/// Dropping the handle does not cancel the task.
pub struct TaskHandle<T> {
    id: TaskId,
    receiver: oneshot::Receiver<SyncResult<T>>,
    runner: Weak<RunnerInner>,
}

impl<T> TaskHandle<T> {
    /// Id of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Cancels the task. Returns false if it already finished.
    pub fn cancel(&self) -> bool {
        match self.runner.upgrade() {
            Some(runner) => RunnerInner::cancel(&runner, self.id),
            None => false,
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = SyncResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SyncError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}
