//! Single-threaded serial executor.
//!
//! libsmbclient contexts are not thread-safe, so every backend call has to
//! come from the one thread that owns the context. A [`SerialExecutor`] is
//! that thread: it owns some state `S` outright and runs queued closures
//! against it one at a time, in submission order.
//!
//! # Architecture
//!
//! 1. FUSE callbacks [`post`](ExecutorHandle::post) a boxed
//!    `FnOnce(&mut S)` and return immediately; the closure replies to the
//!    kernel itself when it is done.
//! 2. The worker thread drains an unbounded channel, so posting never blocks
//!    the caller no matter how long the server takes to answer.
//! 3. [`run_blocking`](SerialExecutor::run_blocking) is the one synchronous
//!    path, used for the connect probe and for tests.
//!
//! The same type backs the control thread that drives credential refresh.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, error, trace, warn};

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors that can occur when handing work to an executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The executor is shutting down.
    #[error("executor is shutting down")]
    Shutdown,

    /// The worker thread panicked while running the task.
    #[error("worker thread panicked")]
    WorkerPanic,

    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What the worker does when a task panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanicPolicy {
    /// Log and keep draining the queue.
    Continue,
    /// Log and abort the process. Used where a panic means an internal table
    /// no longer matches what the kernel believes.
    Abort,
}

/// A task to be executed against the worker's state.
type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Task<S>),
    Shutdown,
}

/// Statistics about executor operations.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Number of tasks submitted.
    pub tasks_submitted: AtomicU64,
    /// Number of tasks that ran to completion.
    pub tasks_completed: AtomicU64,
    /// Number of tasks that panicked.
    pub tasks_panicked: AtomicU64,
}

impl ExecutorStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a task submission.
    pub fn record_submit(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed task.
    pub fn record_complete(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a panicked task.
    pub fn record_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Tasks submitted but not yet finished.
    pub fn pending(&self) -> u64 {
        let submitted = self.tasks_submitted.load(Ordering::Relaxed);
        let finished = self.tasks_completed.load(Ordering::Relaxed)
            + self.tasks_panicked.load(Ordering::Relaxed);
        submitted.saturating_sub(finished)
    }
}

/// Cloneable sender side of a [`SerialExecutor`].
pub struct ExecutorHandle<S> {
    sender: Sender<Message<S>>,
    stats: Arc<ExecutorStats>,
}

impl<S> Clone for ExecutorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S> std::fmt::Debug for ExecutorHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("queued", &self.sender.len())
            .finish_non_exhaustive()
    }
}

impl<S: 'static> ExecutorHandle<S> {
    /// Queues `task` to run on the worker thread.
    pub fn post<F>(&self, task: F) -> ExecutorResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.stats.record_submit();
        self.sender
            .send(Message::Run(Box::new(task)))
            .map_err(|_| ExecutorError::Shutdown)
    }
}

/// A dedicated thread that owns `S` and runs queued closures against it.
pub struct SerialExecutor<S> {
    name: String,
    handle: ExecutorHandle<S>,
    worker: Option<JoinHandle<()>>,
}

impl<S: Send + 'static> SerialExecutor<S> {
    /// Starts a worker thread that owns `state`.
    pub fn spawn(name: &str, policy: PanicPolicy, state: S) -> ExecutorResult<Self> {
        Self::spawn_with(name, policy, |_| state)
    }

    /// Starts a worker thread whose state is built by `init`, which receives
    /// a handle to the executor being created so the state can post to
    /// itself.
    pub fn spawn_with<F>(name: &str, policy: PanicPolicy, init: F) -> ExecutorResult<Self>
    where
        F: FnOnce(ExecutorHandle<S>) -> S,
    {
        let (sender, receiver) = unbounded();
        let handle = ExecutorHandle {
            sender,
            stats: Arc::new(ExecutorStats::new()),
        };
        let state = init(handle.clone());
        let stats = Arc::clone(&handle.stats);
        let thread_name = name.to_string();

        let worker = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker_loop(&thread_name, receiver, state, &stats, policy))?;

        debug!(thread = name, "Started serial executor");
        Ok(Self {
            name: name.to_string(),
            handle,
            worker: Some(worker),
        })
    }

    /// Returns a cloneable handle for posting work.
    pub fn handle(&self) -> ExecutorHandle<S> {
        self.handle.clone()
    }

    /// Queues `task` to run on the worker thread.
    pub fn post<F>(&self, task: F) -> ExecutorResult<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.handle.post(task)
    }

    /// Runs `f` on the worker thread and waits for its result.
    ///
    /// Must not be called from the worker thread itself.
    pub fn run_blocking<F, T>(&self, f: F) -> ExecutorResult<T>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);
        self.post(move |state| {
            let _ = result_tx.send(f(state));
        })?;
        // A dropped sender without a value means the task unwound.
        result_rx.recv().map_err(|_| ExecutorError::WorkerPanic)
    }

    /// Waits until every task posted before this call has run.
    pub fn flush(&self) -> ExecutorResult<()> {
        self.run_blocking(|_| ())
    }

    /// Returns the executor statistics.
    pub fn stats(&self) -> Arc<ExecutorStats> {
        Arc::clone(&self.handle.stats)
    }

    /// Stops the worker after the tasks already queued and joins it.
    ///
    /// The state is dropped on the worker thread. Calling this twice is a
    /// no-op.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Fails only if the worker is already gone.
        let _ = self.handle.sender.send(Message::Shutdown);
        if worker.join().is_err() {
            warn!(thread = %self.name, "Worker thread panicked during shutdown");
        }
        debug!(thread = %self.name, "Serial executor stopped");
    }
}

impl<S> Drop for SerialExecutor<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.handle.sender.send(Message::Shutdown);
            if worker.join().is_err() {
                warn!(thread = %self.name, "Worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop<S>(
    name: &str,
    receiver: Receiver<Message<S>>,
    mut state: S,
    stats: &ExecutorStats,
    policy: PanicPolicy,
) {
    trace!(thread = name, "Worker started");
    // Every handle may be dropped without a Shutdown, e.g. when the owner
    // is leaked; a closed channel ends the loop the same way.
    while let Ok(message) = receiver.recv() {
        let task = match message {
            Message::Run(task) => task,
            Message::Shutdown => break,
        };
        match catch_unwind(AssertUnwindSafe(|| task(&mut state))) {
            Ok(()) => stats.record_complete(),
            Err(panic) => {
                stats.record_panic();
                let message = panic_message(panic.as_ref());
                error!(thread = name, panic = %message, "Task panicked");
                if policy == PanicPolicy::Abort {
                    std::process::abort();
                }
            }
        }
    }
    trace!(thread = name, "Worker exiting");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
