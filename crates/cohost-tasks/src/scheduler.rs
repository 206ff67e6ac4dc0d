//! Cooperative Scheduler - one logical events thread, two physical backings
//!
//! Tasks run one at a time in submission order on a single logical "events
//! thread". In [`SchedulerMode::Threaded`] that is a dedicated OS thread; in
//! [`SchedulerMode::Cooperative`] it is whichever thread calls
//! [`Scheduler::pump`] (normally the host's render loop, once per frame).
//! Call sites are identical in both modes.
//!
//! Task lifecycle: queued -> running -> done (async) or done + signalled
//! (wait). A task stays counted as in flight until it has run and signalled
//! its waiter.

use crate::task::{ErrorSink, SchedulerError, TaskFailure, TaskId, TracingSink};
use crate::worker::{run_isolated, run_worker_loop, spawn_worker};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Default name of the dedicated events thread
pub const DEFAULT_THREAD_NAME: &str = "cohost-events";

/// How the events thread is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    /// A dedicated OS thread drains the queue
    #[default]
    Threaded,
    /// The host drains the queue with [`Scheduler::pump`]
    Cooperative,
}

type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// A queued unit of work. The closure reports its own outcome.
pub(crate) struct QueuedTask {
    id: TaskId,
    run: Runnable,
}

pub(crate) enum Job {
    Run(QueuedTask),
    Shutdown,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between submitters and whoever executes tasks.
pub(crate) struct Shared {
    running: AtomicBool,
    in_flight: AtomicUsize,
    executed: AtomicU64,
    /// Thread currently inside a task
    executing: Mutex<Option<ThreadId>>,
    /// Identity of the logical events thread
    events_thread: Mutex<Option<ThreadId>>,
    sink: Arc<dyn ErrorSink>,
}

impl Shared {
    fn new(sink: Arc<dyn ErrorSink>) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            executing: Mutex::new(None),
            events_thread: Mutex::new(None),
            sink,
        })
    }

    /// Run one task unless the scheduler stopped, in which case it is dropped
    /// and its waiter (if any) learns that.
    pub(crate) fn execute(&self, task: QueuedTask) {
        if !self.running.load(Ordering::SeqCst) {
            trace!(task = %task.id, "discarding task after shutdown");
            drop(task);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        let previous = lock(&self.executing).replace(thread::current().id());
        trace!(task = %task.id, "running");
        (task.run)();
        *lock(&self.executing) = previous;

        self.executed.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn report(&self, failure: TaskFailure) {
        self.sink.report(&failure);
    }
}

/// Result slot a waiter blocks on.
struct Completion<T> {
    slot: Mutex<Option<Result<T, SchedulerError>>>,
    done: Condvar,
}

impl<T> Completion<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    fn wait(&self) -> Result<T, SchedulerError> {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            slot = self.done.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// `None` on timeout.
    fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, SchedulerError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.slot);
        loop {
            if let Some(result) = slot.take() {
                return Some(result);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            slot = self
                .done
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Signals the waiter when dropped, whether or not the task ran.
struct Signal<T> {
    completion: Arc<Completion<T>>,
    result: Option<Result<T, SchedulerError>>,
}

impl<T> Signal<T> {
    fn finish(mut self, result: Result<T, SchedulerError>) {
        self.result = Some(result);
    }
}

impl<T> Drop for Signal<T> {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or(Err(SchedulerError::TaskDropped));
        *lock(&self.completion.slot) = Some(result);
        self.completion.done.notify_all();
    }
}

struct Inner {
    mode: SchedulerMode,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Held shared across a submitter's running check and send, exclusively
    /// by shutdown while it stops accepting tasks
    gate: RwLock<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Job::Shutdown);
        }
    }
}

/// FIFO task queue presenting a single logical events thread.
///
/// Cheap to clone; every clone submits to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Build a scheduler. Threaded mode spawns the events thread right away.
    pub fn new(
        mode: SchedulerMode,
        thread_name: &str,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self, SchedulerError> {
        match mode {
            SchedulerMode::Cooperative => Ok(Self::cooperative_with_sink(sink)),
            SchedulerMode::Threaded => {
                let (tx, rx) = unbounded();
                let shared = Shared::new(sink);
                let handle = spawn_worker(thread_name, rx.clone(), shared.clone())
                    .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
                *lock(&shared.events_thread) = Some(handle.thread().id());
                Ok(Self::assemble(mode, tx, rx, shared, Some(handle)))
            }
        }
    }

    /// Dedicated events thread named `cohost-events`, failures logged.
    pub fn threaded() -> Result<Self, SchedulerError> {
        Self::new(SchedulerMode::Threaded, DEFAULT_THREAD_NAME, Arc::new(TracingSink))
    }

    /// Drained by [`Scheduler::pump`] on the calling thread, failures logged.
    pub fn cooperative() -> Self {
        Self::cooperative_with_sink(Arc::new(TracingSink))
    }

    fn cooperative_with_sink(sink: Arc<dyn ErrorSink>) -> Self {
        let (tx, rx) = unbounded();
        let shared = Shared::new(sink);
        // The creating thread pumps until someone else does
        *lock(&shared.events_thread) = Some(thread::current().id());
        Self::assemble(SchedulerMode::Cooperative, tx, rx, shared, None)
    }

    fn assemble(
        mode: SchedulerMode,
        tx: Sender<Job>,
        rx: Receiver<Job>,
        shared: Arc<Shared>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        info!(?mode, "Scheduler started");
        Self {
            inner: Arc::new(Inner {
                mode,
                tx,
                rx,
                shared,
                next_id: AtomicU64::new(1),
                worker: Mutex::new(worker),
                gate: RwLock::new(()),
            }),
        }
    }

    pub fn mode(&self) -> SchedulerMode {
        self.inner.mode
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.running.load(Ordering::SeqCst)
    }

    /// Tasks queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Tasks that have finished running.
    pub fn executed(&self) -> u64 {
        self.inner.shared.executed.load(Ordering::SeqCst)
    }

    /// Whether the caller is the logical events thread.
    pub fn is_events_thread(&self) -> bool {
        *lock(&self.inner.shared.events_thread) == Some(thread::current().id())
    }

    /// Whether the caller is currently inside a task.
    fn is_inside_task(&self) -> bool {
        *lock(&self.inner.shared.executing) == Some(thread::current().id())
    }

    fn next_id(&self) -> TaskId {
        TaskId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn enqueue(&self, id: TaskId, run: Runnable) -> Result<TaskId, SchedulerError> {
        // Shutdown drains the queue only after every accepted send landed
        let _gate = self.inner.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }
        let shared = &self.inner.shared;
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.inner.tx.send(Job::Run(QueuedTask { id, run })).is_err() {
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(SchedulerError::NotRunning);
        }
        trace!(task = %id, "queued");
        Ok(id)
    }

    /// Queue `task` and return immediately.
    ///
    /// An error or panic from the task goes to the error sink.
    pub fn submit_async<F>(&self, task: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let shared = self.inner.shared.clone();
        let id = self.next_id();
        self.enqueue(
            id,
            Box::new(move || {
                if let Err(fault) = run_isolated(task) {
                    shared.report(TaskFailure::task(id, fault.message, fault.panicked));
                }
            }),
        )
    }

    /// Queue `task` and block until it has run, returning its value.
    ///
    /// The task's own error comes back as [`SchedulerError::TaskFailed`] and
    /// is also reported to the error sink. Calling this from inside a task
    /// fails with [`SchedulerError::RecursiveWait`] instead of deadlocking.
    /// In cooperative mode, a call from the pumping thread outside a task
    /// drains the queue inline.
    pub fn submit_and_wait<T, F>(&self, task: F) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let completion = self.submit_signalled(task)?;
        if self.mode() == SchedulerMode::Cooperative && self.is_events_thread() {
            self.pump();
        }
        completion.wait()
    }

    /// Like [`Scheduler::submit_and_wait`] with a deadline.
    ///
    /// `Ok(false)` means the task did not finish in time (it stays queued and
    /// still runs later); `Err(TaskFailed)` means it finished with an error.
    pub fn submit_and_wait_timeout<F>(
        &self,
        task: F,
        timeout: Duration,
    ) -> Result<bool, SchedulerError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let completion = self.submit_signalled(task)?;
        if self.mode() == SchedulerMode::Cooperative && self.is_events_thread() {
            self.pump();
        }
        match completion.wait_timeout(timeout) {
            Some(Ok(())) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }

    fn submit_signalled<T, F>(&self, task: F) -> Result<Arc<Completion<T>>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        if self.is_inside_task() {
            return Err(SchedulerError::RecursiveWait);
        }
        if self.mode() == SchedulerMode::Threaded && self.is_events_thread() {
            return Err(SchedulerError::RecursiveWait);
        }

        let completion = Completion::new();
        let signal = Signal {
            completion: completion.clone(),
            result: None,
        };
        let shared = self.inner.shared.clone();
        let id = self.next_id();
        self.enqueue(
            id,
            Box::new(move || {
                let result = run_isolated(task).map_err(|fault| {
                    shared.report(TaskFailure::task(id, fault.message.clone(), fault.panicked));
                    SchedulerError::TaskFailed(fault.message)
                });
                signal.finish(result);
            }),
        )?;
        Ok(completion)
    }

    /// Answer whether the events thread runs a no-op within `timeout`.
    pub fn probe(&self, timeout: Duration) -> bool {
        matches!(self.submit_and_wait_timeout(|| Ok(()), timeout), Ok(true))
    }

    /// Run the tasks queued right now on the calling thread, without blocking.
    ///
    /// Tasks submitted while pumping wait for the next pump. Returns the
    /// number of tasks run. Does nothing in threaded mode, or when called from
    /// inside a task.
    pub fn pump(&self) -> usize {
        if self.mode() == SchedulerMode::Threaded {
            return 0;
        }
        if self.is_inside_task() {
            debug!("ignoring nested pump");
            return 0;
        }
        *lock(&self.inner.shared.events_thread) = Some(thread::current().id());

        let before = self.executed();
        let pending = self.inner.rx.len();
        for _ in 0..pending {
            match self.inner.rx.try_recv() {
                Ok(Job::Run(task)) => self.inner.shared.execute(task),
                Ok(Job::Shutdown) | Err(_) => break,
            }
        }
        (self.executed() - before) as usize
    }

    /// Block the calling thread, running tasks until shutdown.
    ///
    /// Cooperative mode only; the calling thread becomes the events thread.
    pub fn run_loop(&self) {
        if self.mode() == SchedulerMode::Threaded {
            warn!("run_loop called on a threaded scheduler");
            return;
        }
        *lock(&self.inner.shared.events_thread) = Some(thread::current().id());
        run_worker_loop(&self.inner.rx, &self.inner.shared);
    }

    /// Stop accepting tasks, let the running task finish and drop the rest.
    ///
    /// Waiters of dropped tasks get [`SchedulerError::TaskDropped`]. Safe to
    /// call more than once and from inside a task.
    pub fn shutdown(&self) {
        let shared = &self.inner.shared;
        {
            let _gate = self.inner.gate.write().unwrap_or_else(PoisonError::into_inner);
            if !shared.running.swap(false, Ordering::SeqCst) {
                return;
            }
        }
        info!(pending = self.in_flight(), "Scheduler shutting down");

        let _ = self.inner.tx.send(Job::Shutdown);
        if let Some(handle) = lock(&self.inner.worker).take() {
            if handle.thread().id() == thread::current().id() {
                debug!("shutdown from the events thread, not joining");
            } else if handle.join().is_err() {
                warn!("events thread panicked during shutdown");
            }
        }

        // Whatever is left never runs
        let mut dropped = 0;
        while let Ok(job) = self.inner.rx.try_recv() {
            if let Job::Run(task) = job {
                shared.execute(task);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, "cleared task queue");
        }
        // A run_loop thread may still be parked on the queue
        if self.mode() == SchedulerMode::Cooperative {
            let _ = self.inner.tx.send(Job::Shutdown);
        }
        info!("Scheduler stopped");
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("mode", &self.inner.mode)
            .field("running", &self.is_running())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::CollectingSink;
    use anyhow::bail;
    use crossbeam_channel::bounded;

    fn threaded(sink: &CollectingSink) -> Scheduler {
        Scheduler::new(SchedulerMode::Threaded, "test-events", Arc::new(sink.clone())).unwrap()
    }

    fn cooperative(sink: &CollectingSink) -> Scheduler {
        Scheduler::new(SchedulerMode::Cooperative, "unused", Arc::new(sink.clone())).unwrap()
    }

    #[test]
    fn test_fifo_then_wait_threaded() {
        let sink = CollectingSink::new();
        let scheduler = threaded(&sink);
        let (tx, rx) = unbounded();

        let t1 = tx.clone();
        scheduler
            .submit_async(move || {
                thread::sleep(Duration::from_millis(30));
                t1.send("t1 done").unwrap();
                Ok(())
            })
            .unwrap();
        let t2 = tx.clone();
        let value = scheduler
            .submit_and_wait(move || {
                t2.send("t2 start").unwrap();
                Ok(42)
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(rx.try_recv().unwrap(), "t1 done");
        assert_eq!(rx.try_recv().unwrap(), "t2 start");
        scheduler.shutdown();
    }

    #[test]
    fn test_waiter_unblocks_when_task_fails() {
        let sink = CollectingSink::new();
        let scheduler = threaded(&sink);

        let err = scheduler
            .submit_and_wait::<(), _>(|| bail!("layout pass failed"))
            .unwrap_err();
        assert_eq!(err, SchedulerError::TaskFailed("layout pass failed".into()));

        let err = scheduler
            .submit_and_wait::<(), _>(|| panic!("css parser exploded"))
            .unwrap_err();
        assert_eq!(err, SchedulerError::TaskFailed("css parser exploded".into()));

        let failures = sink.failures();
        assert_eq!(failures.len(), 2);
        assert!(!failures[0].panicked);
        assert!(failures[1].panicked);
        assert_eq!(scheduler.in_flight(), 0);
        scheduler.shutdown();
    }

    #[test]
    fn test_loop_survives_failing_tasks() {
        let sink = CollectingSink::new();
        let scheduler = threaded(&sink);
        scheduler.submit_async(|| bail!("first")).unwrap();
        scheduler.submit_async(|| panic!("second")).unwrap();
        let after = scheduler.submit_and_wait(|| Ok("still alive")).unwrap();
        assert_eq!(after, "still alive");
        assert_eq!(sink.len(), 2);
        scheduler.shutdown();
    }

    #[test]
    fn test_recursive_wait_rejected() {
        let sink = CollectingSink::new();
        let scheduler = threaded(&sink);
        let inner = scheduler.clone();
        let nested = scheduler
            .submit_and_wait(move || Ok(inner.submit_and_wait(|| Ok(1))))
            .unwrap();
        assert_eq!(nested, Err(SchedulerError::RecursiveWait));

        let inner = scheduler.clone();
        let nested = scheduler
            .submit_and_wait(move || Ok(inner.submit_and_wait_timeout(|| Ok(()), Duration::from_secs(1))))
            .unwrap();
        assert_eq!(nested, Err(SchedulerError::RecursiveWait));
        scheduler.shutdown();
    }

    #[test]
    fn test_recursive_wait_rejected_cooperative() {
        let sink = CollectingSink::new();
        let scheduler = cooperative(&sink);
        let inner = scheduler.clone();
        let nested = scheduler
            .submit_and_wait(move || Ok(inner.submit_and_wait(|| Ok(1))))
            .unwrap();
        assert_eq!(nested, Err(SchedulerError::RecursiveWait));
    }

    #[test]
    fn test_async_from_inside_task_runs_later() {
        let sink = CollectingSink::new();
        let scheduler = cooperative(&sink);
        let (tx, rx) = unbounded();
        let inner = scheduler.clone();
        scheduler
            .submit_async(move || {
                let tx = tx.clone();
                inner.submit_async(move || {
                    tx.send("child").unwrap();
                    Ok(())
                })?;
                Ok(())
            })
            .unwrap();

        assert_eq!(scheduler.pump(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.pump(), 1);
        assert_eq!(rx.try_recv().unwrap(), "child");
    }

    #[test]
    fn test_pump_is_non_blocking_and_fifo() {
        let sink = CollectingSink::new();
        let scheduler = cooperative(&sink);
        assert_eq!(scheduler.pump(), 0);

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            scheduler
                .submit_async(move || {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(scheduler.in_flight(), 5);
        assert_eq!(scheduler.pump(), 5);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_cooperative_wait_drains_inline() {
        let sink = CollectingSink::new();
        let scheduler = cooperative(&sink);
        let (tx, rx) = unbounded();
        scheduler
            .submit_async(move || {
                tx.send("t1").unwrap();
                Ok(())
            })
            .unwrap();
        let value = scheduler.submit_and_wait(|| Ok("t2")).unwrap();
        assert_eq!(value, "t2");
        assert_eq!(rx.try_recv().unwrap(), "t1");
    }

    #[test]
    fn test_cooperative_wait_from_other_thread() {
        let sink = CollectingSink::new();
        let scheduler = cooperative(&sink);
        let submitter = scheduler.clone();
        let (done_tx, done_rx) = bounded(1);
        let handle = thread::spawn(move || {
            let value = submitter.submit_and_wait(|| Ok(7)).unwrap();
            done_tx.send(value).unwrap();
        });

        // The waiter only unblocks once this thread pumps
        let mut value = None;
        for _ in 0..200 {
            scheduler.pump();
            if let Ok(v) = done_rx.recv_timeout(Duration::from_millis(10)) {
                value = Some(v);
                break;
            }
        }
        handle.join().unwrap();
        assert_eq!(value, Some(7));
    }

    #[test]
    fn test_timeout_reports_unfinished() {
        let sink = CollectingSink::new();
        let scheduler = threaded(&sink);
        let (release_tx, release_rx) = bounded::<()>(1);
        scheduler
            .submit_async(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap();

        let finished = scheduler
            .submit_and_wait_timeout(|| Ok(()), Duration::from_millis(50))
            .unwrap();
        assert!(!finished);
        assert!(!scheduler.probe(Duration::from_millis(20)));

        release_tx.send(()).unwrap();
        assert!(scheduler.probe(Duration::from_secs(5)));
        assert_eq!(
            scheduler.submit_and_wait_timeout(|| bail!("nope"), Duration::from_secs(5)),
            Err(SchedulerError::TaskFailed("nope".into()))
        );
        scheduler.shutdown();
    }

    #[test]
    fn test_shutdown_drops_pending_and_rejects_new() {
        let sink = CollectingSink::new();
        let scheduler = threaded(&sink);
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded::<()>(1);
        let ran_late = Arc::new(AtomicBool::new(false));

        scheduler
            .submit_async(move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(())
            })
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let late = ran_late.clone();
        scheduler
            .submit_async(move || {
                late.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let waiter = scheduler.clone();
        let (result_tx, result_rx) = bounded(1);
        let waiting = thread::spawn(move || {
            result_tx.send(waiter.submit_and_wait(|| Ok(()))).unwrap();
        });
        // let the waiter enqueue before shutting down
        while scheduler.in_flight() < 3 {
            thread::yield_now();
        }

        let stopper = scheduler.clone();
        let stopping = thread::spawn(move || stopper.shutdown());
        while scheduler.is_running() {
            thread::yield_now();
        }
        release_tx.send(()).unwrap();
        stopping.join().unwrap();
        waiting.join().unwrap();

        assert_eq!(
            result_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Err(SchedulerError::TaskDropped)
        );
        assert!(!ran_late.load(Ordering::SeqCst));
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(
            scheduler.submit_async(|| Ok(())),
            Err(SchedulerError::NotRunning)
        );
        assert!(!scheduler.probe(Duration::from_millis(10)));
    }

    #[test]
    fn test_submitters_racing_shutdown_never_strand_tasks() {
        let sink = CollectingSink::new();
        for _ in 0..300 {
            let scheduler = threaded(&sink);
            let submitters: Vec<_> = (0..4)
                .map(|_| {
                    let submitter = scheduler.clone();
                    thread::spawn(move || while submitter.submit_async(|| Ok(())).is_ok() {})
                })
                .collect();
            let waiter = scheduler.clone();
            let waiting = thread::spawn(move || loop {
                match waiter.submit_and_wait(|| Ok(())) {
                    Ok(()) => continue,
                    Err(e) => return e,
                }
            });

            thread::yield_now();
            scheduler.shutdown();
            for submitter in submitters {
                submitter.join().unwrap();
            }
            let last = waiting.join().unwrap();
            assert!(
                matches!(last, SchedulerError::NotRunning | SchedulerError::TaskDropped),
                "{:?}",
                last
            );
            assert_eq!(scheduler.in_flight(), 0);
        }
        assert!(sink.is_empty());
    }

    #[test]
    fn test_events_thread_identity() {
        let sink = CollectingSink::new();
        let scheduler = threaded(&sink);
        assert!(!scheduler.is_events_thread());
        let inner = scheduler.clone();
        assert!(scheduler
            .submit_and_wait(move || Ok(inner.is_events_thread()))
            .unwrap());
        let name = scheduler
            .submit_and_wait(|| Ok(thread::current().name().map(str::to_string)))
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-events"));
        scheduler.shutdown();

        let scheduler = cooperative(&sink);
        assert!(scheduler.is_events_thread());
    }

    #[test]
    fn test_run_loop_until_shutdown() {
        let sink = CollectingSink::new();
        let scheduler = cooperative(&sink);
        let runner = scheduler.clone();
        let handle = thread::spawn(move || runner.run_loop());

        let (tx, rx) = unbounded();
        scheduler
            .submit_async(move || {
                tx.send(thread::current().id()).unwrap();
                Ok(())
            })
            .unwrap();
        let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(ran_on, thread::current().id());

        scheduler.shutdown();
        handle.join().unwrap();
    }
}
