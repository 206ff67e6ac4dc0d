//! Task types - identifiers, failures and error sinks.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::error;

/// Unique identifier for a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new task ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Scheduler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A task tried to wait on work only its own thread could run.
    #[error("recursive wait: a task on the events thread cannot wait for another task")]
    RecursiveWait,

    #[error("scheduler is not running")]
    NotRunning,

    /// The task returned an error or panicked; the message says which.
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The task was discarded at shutdown without running.
    #[error("task was dropped before it ran")]
    TaskDropped,

    #[error("failed to spawn events thread: {0}")]
    Spawn(String),
}

/// A failure delivered to an [`ErrorSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// The failing task, `None` for failures outside the queue
    pub task: Option<TaskId>,
    /// What was running: `"task"`, a render job label, `"watchdog"`...
    pub origin: String,
    pub message: String,
    pub panicked: bool,
}

impl TaskFailure {
    pub fn task(task: TaskId, message: impl Into<String>, panicked: bool) -> Self {
        Self {
            task: Some(task),
            origin: "task".to_string(),
            message: message.into(),
            panicked,
        }
    }

    pub fn other(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: None,
            origin: origin.into(),
            message: message.into(),
            panicked: false,
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.panicked { "panicked" } else { "failed" };
        match self.task {
            Some(task) => write!(f, "{} {} {}: {}", self.origin, task, what, self.message),
            None => write!(f, "{} {}: {}", self.origin, what, self.message),
        }
    }
}

/// Receives per-task failures so they are never silently dropped.
pub trait ErrorSink: Send + Sync {
    fn report(&self, failure: &TaskFailure);
}

/// Logs failures with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, failure: &TaskFailure) {
        error!(origin = %failure.origin, panicked = failure.panicked, "{}", failure);
    }
}

/// Keeps failures in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    failures: Arc<Mutex<Vec<TaskFailure>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<TaskFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<TaskFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, failure: &TaskFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure.clone());
    }
}

/// Turn a panic payload into a message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
