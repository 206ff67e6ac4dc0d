//! Events thread implementation with panic isolation.

use crate::scheduler::{Job, Shared};
use crate::task::panic_message;
use crossbeam_channel::Receiver;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Why an isolated call did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fault {
    pub message: String,
    pub panicked: bool,
}

/// Spawn the dedicated events thread.
///
/// The thread drains the queue until it sees a shutdown job or every sender
/// is gone.
pub(crate) fn spawn_worker(
    name: &str,
    rx: Receiver<Job>,
    shared: Arc<Shared>,
) -> io::Result<thread::JoinHandle<()>> {
    let thread_name = name.to_string();
    thread::Builder::new().name(thread_name.clone()).spawn(move || {
        info!("Events thread {} started", thread_name);
        run_worker_loop(&rx, &shared);
        info!("Events thread {} stopped", thread_name);
    })
}

/// Blocking loop: one job at a time, in queue order.
pub(crate) fn run_worker_loop(rx: &Receiver<Job>, shared: &Shared) {
    loop {
        // Wait for the next job
        let job = match rx.recv() {
            Ok(job) => job,
            Err(_) => {
                debug!("Task queue disconnected, stopping");
                break;
            }
        };

        match job {
            Job::Shutdown => {
                debug!("Events loop received shutdown");
                break;
            }
            Job::Run(task) => shared.execute(task),
        }
    }
}

/// Run `f` in a panic isolation boundary.
///
/// Errors and panics both come back as a [`Fault`] so one failing task can't
/// take the loop down with it.
pub(crate) fn run_isolated<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, Fault> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Fault {
            message: format!("{:#}", e),
            panicked: false,
        }),
        Err(payload) => Err(Fault {
            message: panic_message(&*payload),
            panicked: true,
        }),
    }
}
