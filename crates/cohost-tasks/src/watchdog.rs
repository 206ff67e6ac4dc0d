//! Watchdog thread for detecting a jammed events thread.

use crate::scheduler::Scheduler;
use crate::task::{ErrorSink, TaskFailure};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    /// How often to ping the events thread
    pub ping_interval_ms: u64,
    /// How long without a heartbeat before it counts as unresponsive
    pub timeout_ms: u64,
}

impl WatchdogConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 500,
            timeout_ms: 5000,
        }
    }
}

/// Time of the last heartbeat task that actually ran.
#[derive(Debug)]
pub struct Heartbeat {
    last: Mutex<Instant>,
    /// A ping is queued and has not run yet
    outstanding: AtomicBool,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
            outstanding: AtomicBool::new(false),
        }
    }

    /// Record a heartbeat.
    pub fn record(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.outstanding.store(false, Ordering::SeqCst);
    }

    /// Claim the right to queue the next ping. `false` while the previous
    /// one is still waiting to run.
    fn claim_ping(&self) -> bool {
        !self.outstanding.swap(true, Ordering::SeqCst)
    }

    fn release_ping(&self) {
        self.outstanding.store(false, Ordering::SeqCst);
    }

    /// Whether a ping is queued but has not run.
    pub fn is_outstanding(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Time since the last heartbeat.
    pub fn age(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.age() > timeout
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running watchdog thread. Dropping it stops the thread.
pub struct Watchdog {
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    heartbeat: Arc<Heartbeat>,
}

impl Watchdog {
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Stop the thread and wait for it.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the loop
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the watchdog thread.
///
/// Every ping interval it queues a heartbeat task on `scheduler`. When no
/// heartbeat has run for longer than the timeout, one failure is reported to
/// `sink` per stall.
pub fn spawn_watchdog(
    config: WatchdogConfig,
    scheduler: Scheduler,
    sink: Arc<dyn ErrorSink>,
) -> io::Result<Watchdog> {
    let heartbeat = Arc::new(Heartbeat::new());
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let beats = heartbeat.clone();

    let handle = thread::Builder::new()
        .name("cohost-watchdog".to_string())
        .spawn(move || {
            debug!("Watchdog started");
            let mut stalled = false;
            loop {
                match stop_rx.recv_timeout(config.ping_interval()) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                if !scheduler.is_running() {
                    break;
                }

                // One ping at a time, so a stall doesn't pile them up
                if beats.claim_ping() {
                    let record = beats.clone();
                    let queued = scheduler.submit_async(move || {
                        record.record();
                        Ok(())
                    });
                    if queued.is_err() {
                        beats.release_ping();
                    }
                }

                // Check for a stall
                if beats.is_stale(config.timeout()) {
                    if !stalled {
                        let age = beats.age();
                        warn!(age_ms = age.as_millis() as u64, "Events thread is unresponsive");
                        sink.report(&TaskFailure::other(
                            "watchdog",
                            format!("events thread unresponsive for {} ms", age.as_millis()),
                        ));
                        stalled = true;
                    }
                } else if stalled {
                    debug!("Events thread responsive again");
                    stalled = false;
                }
            }
            debug!("Watchdog stopped");
        })?;

    Ok(Watchdog {
        stop_tx: Some(stop_tx),
        handle: Some(handle),
        heartbeat,
    })
}
