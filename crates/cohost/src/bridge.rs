//! Bridge - the host's handle on an embedded toolkit.
//!
//! Owns the logical contexts, the window hierarchy, the scheduler that plays
//! the toolkit's events thread, and the render-job queue. Lives on the host's
//! render thread: GL contexts cannot leave it.

use crate::config::BridgeConfig;
use crate::render_jobs::{render_queue, Command, Panes, RenderFrame, RenderJobs, RenderQueue};
use anyhow::{Context, Result};
use cohost_render::glow;
use cohost_render::{Capability, ContextId, ContextRegistry, Platform, RawContext};
use cohost_tasks::{
    spawn_watchdog, ErrorSink, Scheduler, SchedulerMode, TaskFailure, TaskId, TracingSink,
    Watchdog,
};
use cohost_windows::{HierarchyHandle, HostEvent, ViewEvents, WindowEvents};
use glam::IVec2;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Task run on the events thread at terminate, if it is still responsive.
pub type ShutdownHook = Box<dyn FnOnce() -> Result<()> + Send>;

/// The host window the primary surface binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostWindow {
    /// Screen position of the window's top-left corner
    pub position: IVec2,
    /// Framebuffer size in pixels
    pub size: IVec2,
}

impl HostWindow {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            position: IVec2::new(x, y),
            size: IVec2::new(width, height),
        }
    }
}

/// Embedded toolkit runtime.
pub struct Bridge {
    config: BridgeConfig,
    registry: ContextRegistry,
    host: ContextId,
    toolkit: ContextId,
    hierarchy: HierarchyHandle,
    scheduler: Scheduler,
    sink: Arc<dyn ErrorSink>,
    jobs: RenderJobs,
    queue: RenderQueue,
    panes: Panes,
    watchdog: Option<Watchdog>,
    shutdown_hook: Option<ShutdownHook>,
    terminated: Option<bool>,
}

impl Bridge {
    /// Start with failures logged through `tracing`.
    pub fn start(
        platform: Box<dyn Platform>,
        host_raw: RawContext,
        window: HostWindow,
        config: BridgeConfig,
    ) -> Result<Self> {
        Self::start_with_sink(platform, host_raw, window, config, Arc::new(TracingSink))
    }

    /// Wrap the host's current context, create the toolkit's context and
    /// start the events thread. `host_raw` must be current on the calling
    /// thread, and is current again when this returns.
    pub fn start_with_sink(
        platform: Box<dyn Platform>,
        host_raw: RawContext,
        window: HostWindow,
        config: BridgeConfig,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self> {
        let mut registry = ContextRegistry::new(platform, config.context.clone());
        let host = registry
            .wrap_existing(host_raw, "host")
            .context("failed to wrap the host context")?;
        let toolkit = registry
            .create_shared_with(host, "toolkit")
            .context("failed to create the toolkit context")?;

        // The toolkit expects premultiplied blending from the start
        let active = registry.activate(toolkit)?;
        let gl = active.gl();
        gl.set_enabled(Capability::Blend, true);
        gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);

        let scheduler = Scheduler::new(config.scheduler, &config.thread_name, sink.clone())
            .context("failed to start the events thread")?;

        let watchdog = match (config.watchdog, config.scheduler) {
            (Some(watchdog), SchedulerMode::Threaded) => Some(
                spawn_watchdog(watchdog, scheduler.clone(), sink.clone())
                    .context("failed to start the watchdog")?,
            ),
            (Some(_), SchedulerMode::Cooperative) => {
                debug!("watchdog needs a dedicated events thread, not starting it");
                None
            }
            (None, _) => None,
        };

        registry.activate(host)?;

        let hierarchy = HierarchyHandle::for_host(config.compositor, window.position, window.size);
        let (jobs, queue) = render_queue();
        info!(
            mode = ?config.scheduler,
            width = window.size.x,
            height = window.size.y,
            "Bridge started"
        );

        Ok(Self {
            config,
            registry,
            host,
            toolkit,
            hierarchy,
            scheduler,
            sink,
            jobs,
            queue,
            panes: Panes::default(),
            watchdog,
            shutdown_hook: None,
            terminated: None,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The scheduler the toolkit must use for all of its own dispatch.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Shared window hierarchy, for the toolkit's window peers.
    pub fn hierarchy(&self) -> HierarchyHandle {
        self.hierarchy.clone()
    }

    /// Queue for the toolkit's GL work.
    pub fn render_jobs(&self) -> RenderJobs {
        self.jobs.clone()
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn host_context(&self) -> ContextId {
        self.host
    }

    /// The context the toolkit treats as its own.
    pub fn toolkit_context(&self) -> ContextId {
        self.toolkit
    }

    pub fn watchdog(&self) -> Option<&Watchdog> {
        self.watchdog.as_ref()
    }

    pub fn pane_count(&self) -> usize {
        self.panes.len()
    }

    /// Run `hook` on the events thread at terminate, if it still answers.
    pub fn set_shutdown_hook<F>(&mut self, hook: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.shutdown_hook = Some(Box::new(hook));
    }

    /// Queue `task` on the events thread.
    pub fn run_later<F>(&self, task: F) -> Result<TaskId>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Ok(self.scheduler.submit_async(task)?)
    }

    /// Run `task` on the events thread and wait for its value.
    pub fn run_and_wait<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Ok(self.scheduler.submit_and_wait(task)?)
    }

    /// Like [`Bridge::run_and_wait`], giving up after `timeout`. `Ok(false)`
    /// means the task had not run yet.
    pub fn run_and_wait_timeout<F>(&self, task: F, timeout: Duration) -> Result<bool>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Ok(self.scheduler.submit_and_wait_timeout(task, timeout)?)
    }

    /// Forward something that happened to the host window.
    ///
    /// Geometry lands in the hierarchy right away so the next frame uses it;
    /// the toolkit hears about it on its events thread.
    pub fn handle_host_event(&self, event: &HostEvent) -> Result<()> {
        let (window, view) = {
            let mut hierarchy = self.hierarchy.lock();
            let changed = match event {
                HostEvent::Resized(_) => match event.size() {
                    Some((width, height)) => hierarchy.set_host_size(width, height),
                    None => false,
                },
                HostEvent::Moved(pos) => hierarchy.set_host_position(pos.x, pos.y),
                HostEvent::Focused(_) | HostEvent::Input(_) => true,
            };
            if !changed {
                return Ok(());
            }
            match hierarchy.primary().and_then(|id| hierarchy.get(id)) {
                Some(primary) => (primary.events().clone(), primary.view()),
                None => return Ok(()),
            }
        };

        let event = event.clone();
        self.scheduler.submit_async(move || {
            notify(&event, &*window, view.as_deref());
            Ok(())
        })?;
        Ok(())
    }

    /// Produce one frame into the host's framebuffer.
    ///
    /// Pumps the events loop (cooperative mode), runs queued render jobs in
    /// the toolkit context, frees buffers of closed windows and composites
    /// every surface. The host context is current afterwards. Returns the
    /// number of surfaces composited.
    pub fn render(&mut self) -> Result<usize> {
        self.scheduler.pump();

        let commands = self.queue.drain();
        let mut hierarchy = self.hierarchy.lock();
        if !commands.is_empty() {
            self.registry.activate(self.toolkit)?;
            for command in commands {
                let label = command.label();
                let result = match command {
                    Command::Run { job, .. } => {
                        let mut frame = RenderFrame {
                            registry: &mut self.registry,
                            hierarchy: &mut *hierarchy,
                            panes: &mut self.panes,
                            toolkit: self.toolkit,
                        };
                        job(&mut frame)
                    }
                    Command::CreatePane { id, label, renderer } => self.panes.create(
                        &mut self.registry,
                        self.toolkit,
                        id,
                        &label,
                        renderer,
                        &self.config.compositor,
                    ),
                    Command::ReleasePane(id) => self.panes.release(&mut self.registry, id),
                };
                if let Err(e) = result {
                    self.sink.report(&TaskFailure::other(label, format!("{:#}", e)));
                }
            }
            // Jobs may have switched to pane contexts
            self.registry.activate(self.toolkit)?;
            self.registry.sync_active();
        }

        if let Err(e) = hierarchy.release_closed(&mut self.registry) {
            self.sink
                .report(&TaskFailure::other("release surface", e.to_string()));
        }

        let (host, shader) = self.registry.quad_shader(self.host)?;
        let drawn = hierarchy
            .composite(&host, &shader)
            .context("failed to composite surfaces")?;
        Ok(drawn)
    }

    /// Shut the toolkit down and free everything it owned on the GPU.
    ///
    /// Returns whether the events thread was still responsive. Teardown
    /// happens either way; calling this again does nothing.
    pub fn terminate(&mut self) -> bool {
        if let Some(responsive) = self.terminated {
            return responsive;
        }

        let timeout = self.config.teardown_timeout();
        let responsive = self.scheduler.probe(timeout);
        if !responsive {
            warn!(
                timeout_ms = self.config.teardown_timeout_ms,
                "events thread not responding, some task must have jammed it"
            );
        }

        if let Some(hook) = self.shutdown_hook.take() {
            if responsive {
                match self.scheduler.submit_and_wait_timeout(hook, timeout) {
                    Ok(true) => debug!("shutdown hook finished"),
                    Ok(false) => warn!("shutdown hook did not finish in time"),
                    Err(e) => warn!("shutdown hook failed: {}", e),
                }
            }
        }

        self.scheduler.shutdown();
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop();
        }

        let released = match self.hierarchy.lock().release_all(&mut self.registry) {
            Ok(count) => count,
            Err(e) => {
                warn!("failed to release surface buffers: {}", e);
                0
            }
        };
        let panes = self.panes.release_all(&mut self.registry);
        if let Err(e) = self.registry.release(self.toolkit) {
            warn!("failed to release toolkit context: {}", e);
        }
        self.registry.release_owned();
        if let Err(e) = self.registry.activate(self.host) {
            warn!("failed to reactivate host context: {}", e);
        }

        info!(responsive, surfaces = released, panes, "Bridge terminated");
        self.terminated = Some(responsive);
        responsive
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.terminated.is_none() {
            self.terminate();
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("host", &self.host)
            .field("toolkit", &self.toolkit)
            .field("scheduler", &self.scheduler)
            .field("panes", &self.panes.len())
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// Deliver a host event to the primary window and its view.
fn notify(event: &HostEvent, window: &dyn WindowEvents, view: Option<&dyn ViewEvents>) {
    match event {
        HostEvent::Resized(_) => {
            if let Some((width, height)) = event.size() {
                window.resized(width, height);
                if let Some(view) = view {
                    view.resized(width, height);
                }
            }
        }
        HostEvent::Moved(pos) => {
            window.moved(pos.x, pos.y);
            if let Some(view) = view {
                view.moved(pos.x, pos.y);
            }
        }
        HostEvent::Focused(focused) => window.focus_changed(*focused),
        HostEvent::Input(input) => {
            if let Some(view) = view {
                view.input(input);
            }
        }
    }
}
