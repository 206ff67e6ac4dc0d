//! cohost - run a GL toolkit inside a host application's render loop
//!
//! The host keeps its window, its context and its render loop. [`Bridge`]
//! gives the toolkit a context of its own, a scheduler standing in for its
//! events thread, and offscreen surfaces for its windows, then composites
//! those surfaces into the host's framebuffer once per frame.
//!
//! ```no_run
//! # fn host() -> anyhow::Result<()> {
//! use cohost::{Bridge, BridgeConfig, HostWindow};
//! use cohost_render::{HeadlessPlatform, Platform};
//!
//! let platform = HeadlessPlatform::new();
//! let raw = platform.create_root();
//! platform.make_current(raw)?;
//!
//! let mut bridge = Bridge::start(
//!     Box::new(platform),
//!     raw,
//!     HostWindow::new(0, 0, 800, 600),
//!     BridgeConfig::default(),
//! )?;
//! bridge.render()?;
//! bridge.terminate();
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod render_jobs;

pub use bridge::{Bridge, HostWindow, ShutdownHook};
pub use config::BridgeConfig;
pub use render_jobs::{PaneId, RenderFrame, RenderJob, RenderJobs};
