//! cohost Tasks - one logical events thread for an embedded toolkit
//!
//! Host code hands work to the toolkit through a [`Scheduler`]: tasks run one
//! at a time in submission order, either on a dedicated thread or pumped by
//! the host's render loop. Failures never escape a task; they are delivered
//! to an [`ErrorSink`].

mod scheduler;
mod task;
mod watchdog;
mod worker;

pub use scheduler::{Scheduler, SchedulerMode, DEFAULT_THREAD_NAME};
pub use task::{CollectingSink, ErrorSink, SchedulerError, TaskFailure, TaskId, TracingSink};
pub use watchdog::{spawn_watchdog, Heartbeat, Watchdog, WatchdogConfig};
