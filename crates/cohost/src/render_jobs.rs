//! Render jobs - GL work queued by the toolkit for the render thread.
//!
//! The toolkit decides what to draw on its events thread, but every GL call
//! has to happen on the host's render thread. It hands that work over as
//! labelled jobs; [`crate::Bridge::render`] runs them in submission order with
//! the toolkit context current.

use anyhow::{anyhow, Context, Result};
use cohost_render::{ActiveContext, ContextId, ContextRegistry, Gl, ObjectId, Rect};
use cohost_windows::{CompositorConfig, GlPane, PaneRenderer, SurfaceId, WindowHierarchy};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Work for the render thread.
pub type RenderJob = Box<dyn FnOnce(&mut RenderFrame<'_>) -> Result<()> + Send>;

/// Identifier of a GL pane, handed out before the pane exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneId(u64);

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pane#{}", self.0)
    }
}

pub(crate) enum Command {
    Run { label: String, job: RenderJob },
    CreatePane {
        id: PaneId,
        label: String,
        renderer: Box<dyn PaneRenderer>,
    },
    ReleasePane(PaneId),
}

impl Command {
    pub(crate) fn label(&self) -> String {
        match self {
            Command::Run { label, .. } => label.clone(),
            Command::CreatePane { id, .. } => format!("create {}", id),
            Command::ReleasePane(id) => format!("release {}", id),
        }
    }
}

/// Submits render jobs from any thread. Cheap to clone.
#[derive(Clone)]
pub struct RenderJobs {
    tx: Sender<Command>,
    next_pane: Arc<AtomicU64>,
}

impl RenderJobs {
    /// Queue `job` for the next frame.
    pub fn submit<F>(&self, label: impl Into<String>, job: F) -> Result<()>
    where
        F: FnOnce(&mut RenderFrame<'_>) -> Result<()> + Send + 'static,
    {
        self.send(Command::Run {
            label: label.into(),
            job: Box::new(job),
        })
    }

    /// Reserve a pane id. The pane and its context are built on the render
    /// thread at the next frame; jobs submitted after this call can use it.
    pub fn create_pane(&self, label: impl Into<String>, renderer: Box<dyn PaneRenderer>) -> Result<PaneId> {
        let id = PaneId(self.next_pane.fetch_add(1, Ordering::SeqCst));
        self.send(Command::CreatePane {
            id,
            label: label.into(),
            renderer,
        })?;
        Ok(id)
    }

    /// Free a pane's buffer and context at the next frame.
    pub fn release_pane(&self, id: PaneId) -> Result<()> {
        self.send(Command::ReleasePane(id))
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("render thread is gone"))
    }
}

impl fmt::Debug for RenderJobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderJobs")
            .field("pending", &self.tx.len())
            .finish()
    }
}

/// Render-thread end of the queue.
pub(crate) struct RenderQueue {
    rx: Receiver<Command>,
}

impl RenderQueue {
    /// Everything queued so far, in submission order.
    pub(crate) fn drain(&self) -> Vec<Command> {
        self.rx.try_iter().collect()
    }
}

pub(crate) fn render_queue() -> (RenderJobs, RenderQueue) {
    let (tx, rx) = unbounded();
    (
        RenderJobs {
            tx,
            next_pane: Arc::new(AtomicU64::new(1)),
        },
        RenderQueue { rx },
    )
}

/// Pane table owned by the render thread.
#[derive(Debug, Default)]
pub(crate) struct Panes {
    panes: BTreeMap<PaneId, GlPane>,
}

impl Panes {
    pub(crate) fn len(&self) -> usize {
        self.panes.len()
    }

    pub(crate) fn create(
        &mut self,
        registry: &mut ContextRegistry,
        toolkit: ContextId,
        id: PaneId,
        label: &str,
        renderer: Box<dyn PaneRenderer>,
        config: &CompositorConfig,
    ) -> Result<()> {
        let pane = GlPane::new(registry, toolkit, label, renderer, config)?;
        self.panes.insert(id, pane);
        Ok(())
    }

    pub(crate) fn release(&mut self, registry: &mut ContextRegistry, id: PaneId) -> Result<()> {
        let pane = self
            .panes
            .remove(&id)
            .ok_or_else(|| anyhow!("unknown {}", id))?;
        pane.release(registry)?;
        Ok(())
    }

    /// Release every pane, returning how many went cleanly.
    pub(crate) fn release_all(&mut self, registry: &mut ContextRegistry) -> usize {
        let mut released = 0;
        for (id, pane) in std::mem::take(&mut self.panes) {
            match pane.release(registry) {
                Ok(()) => released += 1,
                Err(e) => warn!(pane = %id, "failed to release pane: {}", e),
            }
        }
        released
    }
}

/// What a render job gets to work with.
pub struct RenderFrame<'a> {
    pub(crate) registry: &'a mut ContextRegistry,
    pub(crate) hierarchy: &'a mut WindowHierarchy,
    pub(crate) panes: &'a mut Panes,
    pub(crate) toolkit: ContextId,
}

impl<'a> RenderFrame<'a> {
    /// The toolkit context, made current.
    pub fn activate(&mut self) -> Result<ActiveContext> {
        Ok(self.registry.activate(self.toolkit)?)
    }

    pub fn toolkit_context(&self) -> ContextId {
        self.toolkit
    }

    pub fn hierarchy(&mut self) -> &mut WindowHierarchy {
        self.hierarchy
    }

    /// Draw into `surface`'s buffer with the toolkit context current.
    ///
    /// Returns `Ok(false)` without calling `draw` when the surface has no
    /// area yet.
    pub fn draw_surface<F>(&mut self, surface: SurfaceId, draw: F) -> Result<bool>
    where
        F: FnOnce(&dyn Gl) -> Result<()>,
    {
        let active = self.activate()?;
        if !self.hierarchy.begin_frame(surface, &active)? {
            return Ok(false);
        }
        let drawn = draw(active.gl());
        self.hierarchy.end_frame(surface, &active)?;
        drawn.with_context(|| format!("drawing {}", surface))?;
        Ok(true)
    }

    /// Render a pane into whatever the toolkit has bound, at `bounds`
    /// (top-down, relative to the toolkit's viewport).
    pub fn render_pane(&mut self, id: PaneId, bounds: Rect) -> Result<bool> {
        let pane = self
            .panes
            .panes
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown {}", id))?;
        let drawn = pane.render_into(self.registry, self.toolkit, bounds)?;
        debug!(pane = %id, drawn, "pane rendered");
        Ok(drawn)
    }

    /// Framebuffer the toolkit should target for `surface`.
    pub fn framebuffer_id(&self, surface: SurfaceId) -> ObjectId {
        self.hierarchy.framebuffer_id(surface)
    }
}
