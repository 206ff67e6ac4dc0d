//! Window Hierarchy - primary window, popups, z-order and compositing
//!
//! The first top-level window the toolkit creates is bound to the host's real
//! window and becomes the primary surface. Every other window has an owner
//! and is a secondary surface, placed by absolute screen position relative
//! to the primary. Creation order is z-order: the primary is drawn first,
//! secondaries on top of it in the order they were created.
//!
//! Coordinates are top-down everywhere in this module; conversion to GL's
//! bottom-up viewport happens only when compositing.

use crate::error::WindowError;
use crate::events::{SurfaceView, ViewEvents, WindowEvents};
use crate::focus::FocusChain;
use crate::surface::{Surface, SurfaceId, SurfaceKind};
use cohost_render::glow;
use cohost_render::{
    ActiveContext, Capability, ContextRegistry, ObjectId, OffscreenSurface, QuadShader, Rect,
    StateSnapshot, NO_OBJECT,
};
use glam::IVec2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How surfaces are composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositorConfig {
    /// Flip the primary surface vertically when compositing
    pub flip_primary: bool,
    /// Flip secondary surfaces vertically when compositing
    pub flip_secondary: bool,
    /// Flip GL panes when blitting them into the toolkit's target
    pub flip_panes: bool,
    /// Clear freshly allocated buffers to transparent
    pub clear_new_buffers: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            flip_primary: false,
            flip_secondary: false,
            flip_panes: true,
            clear_new_buffers: true,
        }
    }
}

/// Geometry requested by the toolkit for a window.
///
/// Unset or non-positive values leave the current value in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundsRequest {
    /// Absolute screen x
    pub x: Option<i32>,
    /// Absolute screen y
    pub y: Option<i32>,
    /// Outer (window) size, preferred over the content size
    pub outer: IVec2,
    pub content: IVec2,
}

impl BoundsRequest {
    /// Position and outer size.
    pub fn at(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            outer: IVec2::new(width, height),
            content: IVec2::ZERO,
        }
    }

    fn resolve_size(&self, current: IVec2) -> IVec2 {
        let pick = |outer: i32, content: i32, current: i32| {
            if outer > 0 {
                outer
            } else if content > 0 {
                content
            } else {
                current
            }
        };
        IVec2::new(
            pick(self.outer.x, self.content.x, current.x),
            pick(self.outer.y, self.content.y, current.y),
        )
    }
}

/// All surfaces, in creation order, plus the focus chain.
pub struct WindowHierarchy {
    config: CompositorConfig,
    surfaces: Vec<Surface>,
    primary: Option<SurfaceId>,
    next_id: u32,
    /// Host window position on screen
    host_position: IVec2,
    /// Host framebuffer size
    host_size: IVec2,
    focus: FocusChain,
    /// Buffers of closed surfaces, freed on the render thread
    pending_release: Vec<(SurfaceId, OffscreenSurface)>,
    /// Host state around compositing, reused every frame
    snapshot: StateSnapshot,
}

impl WindowHierarchy {
    pub fn new(config: CompositorConfig, host_position: IVec2, host_size: IVec2) -> Self {
        Self {
            config,
            surfaces: Vec::new(),
            primary: None,
            next_id: 1,
            host_position,
            host_size,
            focus: FocusChain::new(),
            pending_release: Vec::new(),
            snapshot: StateSnapshot::compositing(),
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn host_position(&self) -> IVec2 {
        self.host_position
    }

    pub fn host_size(&self) -> IVec2 {
        self.host_size
    }

    pub fn primary(&self) -> Option<SurfaceId> {
        self.primary
    }

    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: SurfaceId) -> Result<&mut Surface, WindowError> {
        self.surfaces
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(WindowError::UnknownSurface(id))
    }

    /// Every surface in creation order.
    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.iter()
    }

    /// Secondary surfaces in creation order.
    pub fn secondaries(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.iter().filter(|s| !s.is_primary())
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Register a window.
    ///
    /// A window without an owner is bound to the host and becomes the
    /// primary surface; asking for a second one is a configuration error.
    /// Windows with an owner are secondary surfaces.
    pub fn create_window(
        &mut self,
        owner: Option<SurfaceId>,
        events: Arc<dyn WindowEvents>,
    ) -> Result<SurfaceId, WindowError> {
        let kind = match owner {
            None => {
                if let Some(primary) = self.primary {
                    return Err(WindowError::SecondPrimary(primary));
                }
                SurfaceKind::Primary
            }
            Some(owner) => {
                if self.get(owner).is_none() {
                    return Err(WindowError::UnknownSurface(owner));
                }
                SurfaceKind::Secondary
            }
        };

        let id = SurfaceId(self.next_id);
        self.next_id += 1;
        let mut surface = Surface::new(id, kind, owner, events);
        if kind == SurfaceKind::Primary {
            surface.position = self.host_position;
            surface.size = self.host_size;
            self.primary = Some(id);
            self.focus.reset(Some(id));
            info!(surface = %id, width = self.host_size.x, height = self.host_size.y, "primary surface bound to host window");
        } else {
            debug!(surface = %id, owner = ?owner, "secondary surface created");
        }
        self.surfaces.push(surface);
        Ok(id)
    }

    /// Attach (or detach, with `None`) the toolkit view of a window.
    ///
    /// A view attached to the primary is told the host window's size and
    /// position right away. Listeners run with the hierarchy borrowed and
    /// must not call back into it.
    pub fn set_view(
        &mut self,
        id: SurfaceId,
        view: Option<&Arc<dyn ViewEvents>>,
    ) -> Result<(), WindowError> {
        let surface = self.get_mut(id)?;
        surface.view = view.map(SurfaceView::new);

        if let Some(view) = view {
            let size = surface.size;
            if surface.is_primary() {
                let pos = surface.position;
                surface.events.resized(size.x, size.y);
                view.resized(size.x, size.y);
                view.moved(pos.x, pos.y);
                surface.events.moved(pos.x, pos.y);
            } else if surface.has_area() {
                view.resized(size.x, size.y);
            }
        }
        Ok(())
    }

    /// Apply toolkit-requested geometry. Ignored for the primary surface,
    /// whose geometry belongs to the host. Returns whether anything applied.
    pub fn set_bounds(&mut self, id: SurfaceId, request: BoundsRequest) -> Result<bool, WindowError> {
        let surface = self.get_mut(id)?;
        if surface.is_primary() {
            debug!(surface = %id, "ignoring bounds request for the primary surface");
            return Ok(false);
        }

        if let Some(x) = request.x {
            surface.position.x = x;
        }
        if let Some(y) = request.y {
            surface.position.y = y;
        }
        surface.size = request.resolve_size(surface.size);

        let size = surface.size;
        surface.events.resized(size.x, size.y);
        if let Some(view) = surface.view() {
            view.resized(size.x, size.y);
        }
        Ok(true)
    }

    /// The host window was resized. Returns whether the size changed.
    pub fn set_host_size(&mut self, width: i32, height: i32) -> bool {
        let size = IVec2::new(width, height);
        if size == self.host_size {
            return false;
        }
        self.host_size = size;
        if let Some(primary) = self.primary.and_then(|id| self.surfaces.iter_mut().find(|s| s.id == id)) {
            primary.size = size;
        }
        debug!(width, height, "host window resized");
        true
    }

    /// The host window moved on screen. Returns whether the position changed.
    pub fn set_host_position(&mut self, x: i32, y: i32) -> bool {
        let pos = IVec2::new(x, y);
        if pos == self.host_position {
            return false;
        }
        self.host_position = pos;
        if let Some(primary) = self.primary.and_then(|id| self.surfaces.iter_mut().find(|s| s.id == id)) {
            primary.position = pos;
        }
        true
    }

    /// Where a surface is drawn, relative to the primary window's top-left.
    pub fn render_offset(&self, id: SurfaceId) -> Result<IVec2, WindowError> {
        let surface = self.get(id).ok_or(WindowError::UnknownSurface(id))?;
        if surface.is_primary() {
            return Ok(IVec2::ZERO);
        }
        let primary = self
            .primary
            .and_then(|p| self.get(p))
            .ok_or(WindowError::NoPrimary)?;
        Ok(surface.position - primary.position)
    }

    /// The secondary surface under `point` (relative to the primary window),
    /// scanning in creation order; the first hit wins.
    pub fn find_surface_at(&self, point: IVec2) -> Option<SurfaceId> {
        let origin = self.host_position;
        self.secondaries()
            .find(|s| s.contains(s.position - origin, point))
            .map(Surface::id)
    }

    /// Number of owners above `id`.
    pub fn owner_depth(&self, id: SurfaceId) -> Result<usize, WindowError> {
        let mut surface = self.get(id).ok_or(WindowError::UnknownSurface(id))?;
        let mut depth = 0;
        while let Some(owner) = surface.owner.and_then(|o| self.get(o)) {
            depth += 1;
            surface = owner;
            if depth > self.surfaces.len() {
                break;
            }
        }
        Ok(depth)
    }

    pub fn set_focused(&mut self, id: SurfaceId) -> Result<(), WindowError> {
        if self.get(id).is_none() {
            return Err(WindowError::UnknownSurface(id));
        }
        self.focus.set_focused(id, &self.surfaces);
        Ok(())
    }

    /// The focused surface, falling back to the primary if it went away.
    pub fn focused(&mut self) -> Option<SurfaceId> {
        self.focus.focused(self.primary, &self.surfaces)
    }

    /// Remove a surface. Its buffer is queued for release on the render
    /// thread. Closing the primary frees the primary slot.
    pub fn close(&mut self, id: SurfaceId) -> Result<(), WindowError> {
        let index = self
            .surfaces
            .iter()
            .position(|s| s.id == id)
            .ok_or(WindowError::UnknownSurface(id))?;
        let mut surface = self.surfaces.remove(index);
        if let Some(buffer) = surface.buffer.take() {
            self.pending_release.push((id, buffer));
        }
        if self.primary == Some(id) {
            self.primary = None;
            self.focus.reset(None);
            info!(surface = %id, "primary surface closed");
        } else {
            debug!(surface = %id, "secondary surface closed");
        }
        surface.events.closed();
        Ok(())
    }

    pub fn pending_release(&self) -> usize {
        self.pending_release.len()
    }

    /// Free the buffers of surfaces closed since the last call.
    ///
    /// Every buffer is attempted; the first failure is returned.
    pub fn release_closed(&mut self, registry: &mut ContextRegistry) -> Result<usize, WindowError> {
        let pending = std::mem::take(&mut self.pending_release);
        release_buffers(pending, registry)
    }

    /// Free every buffer, open surfaces included. Used at teardown.
    pub fn release_all(&mut self, registry: &mut ContextRegistry) -> Result<usize, WindowError> {
        let mut buffers = std::mem::take(&mut self.pending_release);
        for surface in &mut self.surfaces {
            surface.saved_framebuffer = None;
            if let Some(buffer) = surface.buffer.take() {
                buffers.push((surface.id, buffer));
            }
        }
        release_buffers(buffers, registry)
    }

    /// Prepare a surface for the toolkit to draw a frame into it.
    ///
    /// Allocates or resizes the buffer in the active (toolkit) context, binds
    /// its framebuffer and sets the viewport. Returns `Ok(false)` and binds
    /// nothing when the surface has no area.
    pub fn begin_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<bool, WindowError> {
        let clear = self.config.clear_new_buffers;
        let surface = self.get_mut(id)?;
        if !surface.has_area() {
            return Ok(false);
        }
        let size = surface.size;
        let gl = active.gl();

        match surface.buffer.as_mut() {
            Some(buffer) => {
                buffer
                    .resize(gl, size.x, size.y)
                    .map_err(WindowError::render(id, "resize buffer"))?;
            }
            None => {
                let buffer = OffscreenSurface::new(active, size.x, size.y, clear)
                    .map_err(WindowError::render(id, "allocate buffer"))?;
                surface.buffer = Some(buffer);
            }
        }

        if let Some(buffer) = surface.buffer.as_ref() {
            let prev = buffer.bind(gl);
            gl.viewport([0, 0, size.x, size.y]);
            if surface.saved_framebuffer.is_none() {
                surface.saved_framebuffer = Some(prev);
            }
        }
        Ok(true)
    }

    /// Restore the framebuffer bound before [`WindowHierarchy::begin_frame`].
    pub fn end_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<(), WindowError> {
        let surface = self.get_mut(id)?;
        if let (Some(prev), Some(buffer)) = (surface.saved_framebuffer.take(), surface.buffer.as_ref()) {
            buffer.unbind(active.gl(), prev);
        }
        Ok(())
    }

    /// Framebuffer the toolkit should render `id` into; 0 when there is none.
    pub fn framebuffer_id(&self, id: SurfaceId) -> ObjectId {
        self.get(id).map_or(NO_OBJECT, Surface::framebuffer_id)
    }

    /// Draw every surface into the framebuffer bound in `active` (the host's).
    ///
    /// The primary covers the whole host framebuffer, secondaries follow in
    /// creation order at their offsets. Blending is on and depth testing off
    /// while compositing; the caller's GL state is restored afterwards.
    /// Returns the number of surfaces drawn.
    pub fn composite(&mut self, active: &ActiveContext, shader: &QuadShader) -> Result<usize, WindowError> {
        let target = self.host_size;
        if target.x <= 0 || target.y <= 0 {
            return Ok(0);
        }
        let origin = self.host_position;
        let config = self.config;
        let gl = active.gl();
        let surfaces = &mut self.surfaces;

        self.snapshot.scoped(gl, |gl| -> Result<usize, WindowError> {
            gl.viewport([0, 0, target.x, target.y]);
            gl.set_enabled(Capability::Blend, true);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            gl.set_enabled(Capability::DepthTest, false);

            // Primary first, then secondaries in creation order
            let (primary, secondaries): (Vec<&mut Surface>, Vec<&mut Surface>) =
                surfaces.iter_mut().partition(|s| s.is_primary());

            let mut drawn = 0;
            for surface in primary.into_iter().chain(secondaries) {
                if !surface.has_area() {
                    continue;
                }
                let (dest, flip) = if surface.is_primary() {
                    (Rect::new(0, 0, target.x, target.y), config.flip_primary)
                } else {
                    let offset = surface.position - origin;
                    let size = surface.size;
                    (
                        Rect::new(offset.x, target.y - offset.y - size.y, size.x, size.y),
                        config.flip_secondary,
                    )
                };
                let id = surface.id;
                if let Some(buffer) = surface.buffer.as_mut() {
                    buffer
                        .render(active, shader, dest, flip)
                        .map_err(WindowError::render(id, "composite"))?;
                    drawn += 1;
                }
            }
            Ok(drawn)
        })
    }
}

fn release_buffers(
    buffers: Vec<(SurfaceId, OffscreenSurface)>,
    registry: &mut ContextRegistry,
) -> Result<usize, WindowError> {
    let mut released = 0;
    let mut first_error = None;
    for (id, buffer) in buffers {
        match buffer.release(registry) {
            Ok(()) => released += 1,
            Err(e) => {
                warn!(surface = %id, "failed to release surface buffer: {}", e);
                first_error.get_or_insert(WindowError::Context(e));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(released),
    }
}

impl std::fmt::Debug for WindowHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowHierarchy")
            .field("primary", &self.primary)
            .field("surfaces", &self.surfaces.len())
            .field("host_position", &self.host_position)
            .field("host_size", &self.host_size)
            .field("pending_release", &self.pending_release.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoEvents;
    use cohost_render::{ContextConfig, ContextId, HeadlessPlatform, Int4Param, IntParam, Platform};

    struct Fixture {
        registry: ContextRegistry,
        platform: HeadlessPlatform,
        host: ContextId,
        toolkit: ContextId,
    }

    fn gl_setup() -> Fixture {
        let platform = HeadlessPlatform::new();
        let raw = platform.create_root();
        platform.make_current(raw).unwrap();
        let mut registry = ContextRegistry::new(Box::new(platform.clone()), ContextConfig::default());
        let host = registry.wrap_existing(raw, "host").unwrap();
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        Fixture {
            registry,
            platform,
            host,
            toolkit,
        }
    }

    fn hierarchy() -> WindowHierarchy {
        WindowHierarchy::new(
            CompositorConfig::default(),
            IVec2::new(800, 100),
            IVec2::new(800, 600),
        )
    }

    fn with_view(h: &mut WindowHierarchy, id: SurfaceId) -> Arc<dyn ViewEvents> {
        let view: Arc<dyn ViewEvents> = Arc::new(NoEvents);
        h.set_view(id, Some(&view)).unwrap();
        view
    }

    #[test]
    fn test_second_primary_rejected() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        assert!(matches!(
            h.create_window(None, Arc::new(NoEvents)),
            Err(WindowError::SecondPrimary(p)) if p == primary
        ));
        for _ in 0..5 {
            h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        }
        assert_eq!(h.secondaries().count(), 5);
        assert_eq!(h.primary(), Some(primary));
    }

    #[test]
    fn test_unknown_owner() {
        let mut h = hierarchy();
        assert!(matches!(
            h.create_window(Some(SurfaceId(9)), Arc::new(NoEvents)),
            Err(WindowError::UnknownSurface(_))
        ));
    }

    #[test]
    fn test_primary_tracks_host_geometry() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        assert_eq!(h.get(primary).unwrap().size(), IVec2::new(800, 600));

        assert!(!h.set_bounds(primary, BoundsRequest::at(0, 0, 10, 10)).unwrap());
        assert_eq!(h.get(primary).unwrap().size(), IVec2::new(800, 600));

        assert!(h.set_host_size(1024, 768));
        assert!(!h.set_host_size(1024, 768));
        assert!(h.set_host_position(10, 20));
        let surface = h.get(primary).unwrap();
        assert_eq!(surface.size(), IVec2::new(1024, 768));
        assert_eq!(surface.position(), IVec2::new(10, 20));
    }

    #[test]
    fn test_bounds_prefer_outer_size() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let popup = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();

        h.set_bounds(
            popup,
            BoundsRequest {
                x: Some(820),
                y: Some(110),
                outer: IVec2::new(100, 0),
                content: IVec2::new(90, 40),
            },
        )
        .unwrap();
        assert_eq!(h.get(popup).unwrap().size(), IVec2::new(100, 40));

        // Unset position and size leave the old values
        h.set_bounds(popup, BoundsRequest::default()).unwrap();
        let surface = h.get(popup).unwrap();
        assert_eq!(surface.size(), IVec2::new(100, 40));
        assert_eq!(surface.position(), IVec2::new(820, 110));
    }

    #[test]
    fn test_render_offsets() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let a = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        let b = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        h.set_bounds(a, BoundsRequest::at(820, 110, 100, 50)).unwrap();
        h.set_bounds(b, BoundsRequest::at(900, 500, 60, 30)).unwrap();

        assert_eq!(h.render_offset(primary).unwrap(), IVec2::ZERO);
        assert_eq!(h.render_offset(a).unwrap(), IVec2::new(20, 10));
        assert_eq!(h.render_offset(b).unwrap(), IVec2::new(100, 400));
    }

    #[test]
    fn test_offset_needs_primary() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let popup = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        h.close(primary).unwrap();
        assert!(matches!(h.render_offset(popup), Err(WindowError::NoPrimary)));
    }

    #[test]
    fn test_hit_test_creation_order() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let a = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        let b = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        h.set_bounds(a, BoundsRequest::at(820, 110, 100, 50)).unwrap();
        h.set_bounds(b, BoundsRequest::at(850, 120, 100, 50)).unwrap();

        // (60, 20) is on both
        assert_eq!(h.find_surface_at(IVec2::new(60, 20)), Some(a));
        // only on b
        assert_eq!(h.find_surface_at(IVec2::new(140, 65)), Some(b));
        // edges count
        assert_eq!(h.find_surface_at(IVec2::new(20, 10)), Some(a));
        assert_eq!(h.find_surface_at(IVec2::new(500, 500)), None);
    }

    #[test]
    fn test_owner_depth() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let menu = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        let submenu = h.create_window(Some(menu), Arc::new(NoEvents)).unwrap();
        assert_eq!(h.owner_depth(primary).unwrap(), 0);
        assert_eq!(h.owner_depth(menu).unwrap(), 1);
        assert_eq!(h.owner_depth(submenu).unwrap(), 2);
    }

    #[test]
    fn test_closing_primary_frees_slot() {
        let mut h = hierarchy();
        let first = h.create_window(None, Arc::new(NoEvents)).unwrap();
        h.close(first).unwrap();
        assert_eq!(h.primary(), None);
        let second = h.create_window(None, Arc::new(NoEvents)).unwrap();
        assert_ne!(first, second);
        assert_eq!(h.primary(), Some(second));
    }

    #[test]
    fn test_focus_falls_back_when_popup_closes() {
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let _pv = with_view(&mut h, primary);
        let popup = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        let _v = with_view(&mut h, popup);

        assert_eq!(h.focused(), Some(primary));
        h.set_focused(popup).unwrap();
        assert_eq!(h.focused(), Some(popup));
        h.close(popup).unwrap();
        assert_eq!(h.focused(), Some(primary));
    }

    #[test]
    fn test_zero_size_skips_frame() {
        let mut gl = gl_setup();
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let popup = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();

        let active = gl.registry.activate(gl.toolkit).unwrap();
        assert!(!h.begin_frame(popup, &active).unwrap());
        h.end_frame(popup, &active).unwrap();
        assert_eq!(h.framebuffer_id(popup), NO_OBJECT);
        assert_eq!(gl.platform.allocations().framebuffers, 0);
    }

    #[test]
    fn test_begin_end_frame_binds_buffer() {
        let mut gl = gl_setup();
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();

        let active = gl.registry.activate(gl.toolkit).unwrap();
        assert!(h.begin_frame(primary, &active).unwrap());
        let fbo = h.framebuffer_id(primary);
        assert_ne!(fbo, NO_OBJECT);
        assert_eq!(active.gl().get_integer(IntParam::FramebufferBinding) as ObjectId, fbo);
        h.end_frame(primary, &active).unwrap();
        assert_eq!(active.gl().get_integer(IntParam::FramebufferBinding), 0);

        // Same size next frame: no new texture
        let before = gl.platform.allocations();
        h.begin_frame(primary, &active).unwrap();
        h.end_frame(primary, &active).unwrap();
        assert_eq!(gl.platform.allocations(), before);

        // Host resize reallocates on the next frame
        h.set_host_size(1024, 768);
        h.begin_frame(primary, &active).unwrap();
        h.end_frame(primary, &active).unwrap();
        assert_eq!(gl.platform.allocations().textures, before.textures + 1);
        assert_eq!(h.framebuffer_id(primary), fbo);
    }

    #[test]
    fn test_composite_order_and_state() {
        let mut gl = gl_setup();
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let a = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        let b = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        h.set_bounds(a, BoundsRequest::at(820, 110, 100, 50)).unwrap();
        h.set_bounds(b, BoundsRequest::at(900, 500, 60, 30)).unwrap();

        let active = gl.registry.activate(gl.toolkit).unwrap();
        for id in [primary, a, b] {
            h.begin_frame(id, &active).unwrap();
            h.end_frame(id, &active).unwrap();
        }

        let (host, shader) = gl.registry.quad_shader(gl.host).unwrap();
        gl.platform.clear_events();
        assert_eq!(h.composite(&host, &shader).unwrap(), 3);

        let draws = gl.platform.draws();
        assert_eq!(draws.len(), 3);
        let textures: Vec<ObjectId> = [primary, a, b]
            .iter()
            .map(|id| h.get(*id).unwrap().buffer().unwrap().texture())
            .collect();
        assert_eq!(draws.iter().map(|d| d.texture).collect::<Vec<_>>(), textures);

        assert_eq!(draws[0].vec2("viewPos"), Some([0.0, 0.0]));
        assert_eq!(draws[0].vec2("viewSize"), Some([800.0, 600.0]));
        assert_eq!(draws[1].vec2("viewPos"), Some([20.0, 540.0]));
        assert_eq!(draws[1].vec2("viewSize"), Some([100.0, 50.0]));
        assert_eq!(draws[2].vec2("viewPos"), Some([100.0, 170.0]));
        for draw in &draws {
            assert!(draw.blend);
            assert_eq!(draw.blend_func, (glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA));
            assert!(!draw.depth_test);
            assert_eq!(draw.framebuffer, 0);
            assert_eq!(draw.vec2("targetSize"), Some([800.0, 600.0]));
            assert_eq!(draw.int("yflip"), Some(0));
        }

        // Host state is untouched
        let gl_host = host.gl();
        assert!(!gl_host.is_enabled(Capability::Blend));
        assert_eq!(gl_host.get_integer(IntParam::CurrentProgram), 0);
    }

    #[test]
    fn test_composite_reuses_snapshot_across_frames() {
        let mut gl = gl_setup();
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let active = gl.registry.activate(gl.toolkit).unwrap();
        h.begin_frame(primary, &active).unwrap();
        h.end_frame(primary, &active).unwrap();

        let (host, shader) = gl.registry.quad_shader(gl.host).unwrap();
        let parts = h.snapshot.parts().as_ptr();
        assert_eq!(h.composite(&host, &shader).unwrap(), 1);

        // The host changes its own state between frames
        let gl_host = host.gl();
        gl_host.set_enabled(Capability::Blend, true);
        gl_host.blend_func(glow::ONE, glow::ZERO);
        gl_host.viewport([0, 0, 320, 200]);

        assert_eq!(h.composite(&host, &shader).unwrap(), 1);
        assert_eq!(h.snapshot.parts().as_ptr(), parts);
        assert!(gl_host.is_enabled(Capability::Blend));
        assert_eq!(gl_host.get_integer(IntParam::BlendSrc) as u32, glow::ONE);
        assert_eq!(gl_host.get_integer(IntParam::BlendDst) as u32, glow::ZERO);
        assert_eq!(gl_host.get_integer4(Int4Param::Viewport), [0, 0, 320, 200]);
    }

    #[test]
    fn test_closed_buffers_released_later() {
        let mut gl = gl_setup();
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let popup = h.create_window(Some(primary), Arc::new(NoEvents)).unwrap();
        h.set_bounds(popup, BoundsRequest::at(820, 110, 100, 50)).unwrap();

        let active = gl.registry.activate(gl.toolkit).unwrap();
        h.begin_frame(popup, &active).unwrap();
        h.end_frame(popup, &active).unwrap();
        let live = gl.platform.live_framebuffers();

        h.close(popup).unwrap();
        assert_eq!(h.pending_release(), 1);
        assert_eq!(gl.platform.live_framebuffers(), live);

        assert_eq!(h.release_closed(&mut gl.registry).unwrap(), 1);
        assert_eq!(h.pending_release(), 0);
        assert_eq!(gl.platform.live_framebuffers(), live - 1);
    }

    #[test]
    fn test_release_all_frees_open_surfaces() {
        let mut gl = gl_setup();
        let mut h = hierarchy();
        let primary = h.create_window(None, Arc::new(NoEvents)).unwrap();
        let active = gl.registry.activate(gl.toolkit).unwrap();
        h.begin_frame(primary, &active).unwrap();
        h.end_frame(primary, &active).unwrap();

        assert_eq!(h.release_all(&mut gl.registry).unwrap(), 1);
        assert_eq!(gl.platform.live_framebuffers(), 0);
        assert_eq!(gl.platform.live_textures(), 0);
        assert_eq!(h.framebuffer_id(primary), NO_OBJECT);
    }
}
