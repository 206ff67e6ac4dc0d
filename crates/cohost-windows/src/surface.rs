//! Surface - one renderable window in the hierarchy.

use crate::events::{SurfaceView, ViewEvents, WindowEvents};
use cohost_render::{ObjectId, OffscreenSurface, NO_OBJECT};
use glam::IVec2;
use std::fmt;
use std::sync::Arc;

/// Identifier of a surface, unique for the hierarchy's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) u32);

impl SurfaceId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Bound to the host's real window
    Primary,
    /// Popup or pane window composited over the primary
    Secondary,
}

/// Lifecycle of a surface's peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// No view attached yet
    Unbound,
    BoundEmpty,
    BoundSized,
}

/// A window known to the hierarchy.
///
/// Position is in screen coordinates, top-down. For the primary surface it
/// mirrors the host window.
pub struct Surface {
    pub(crate) id: SurfaceId,
    pub(crate) kind: SurfaceKind,
    pub(crate) owner: Option<SurfaceId>,
    pub(crate) position: IVec2,
    pub(crate) size: IVec2,
    pub(crate) events: Arc<dyn WindowEvents>,
    pub(crate) view: Option<SurfaceView>,
    pub(crate) buffer: Option<OffscreenSurface>,
    /// Framebuffer bound before `begin_frame`, restored by `end_frame`
    pub(crate) saved_framebuffer: Option<ObjectId>,
}

impl Surface {
    pub(crate) fn new(
        id: SurfaceId,
        kind: SurfaceKind,
        owner: Option<SurfaceId>,
        events: Arc<dyn WindowEvents>,
    ) -> Self {
        Self {
            id,
            kind,
            owner,
            position: IVec2::ZERO,
            size: IVec2::ZERO,
            events,
            view: None,
            buffer: None,
            saved_framebuffer: None,
        }
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn kind(&self) -> SurfaceKind {
        self.kind
    }

    pub fn is_primary(&self) -> bool {
        self.kind == SurfaceKind::Primary
    }

    pub fn owner(&self) -> Option<SurfaceId> {
        self.owner
    }

    pub fn position(&self) -> IVec2 {
        self.position
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn has_area(&self) -> bool {
        self.size.x > 0 && self.size.y > 0
    }

    pub fn events(&self) -> &Arc<dyn WindowEvents> {
        &self.events
    }

    /// The attached view, if it is still alive.
    pub fn view(&self) -> Option<Arc<dyn ViewEvents>> {
        self.view.as_ref().and_then(SurfaceView::get)
    }

    pub fn has_live_view(&self) -> bool {
        self.view.as_ref().is_some_and(SurfaceView::is_live)
    }

    pub fn state(&self) -> SurfaceState {
        match (self.has_live_view(), self.has_area()) {
            (false, _) => SurfaceState::Unbound,
            (true, false) => SurfaceState::BoundEmpty,
            (true, true) => SurfaceState::BoundSized,
        }
    }

    pub fn buffer(&self) -> Option<&OffscreenSurface> {
        self.buffer.as_ref()
    }

    /// Framebuffer the toolkit should draw into, 0 before the first frame.
    pub fn framebuffer_id(&self) -> ObjectId {
        self.buffer
            .as_ref()
            .map_or(NO_OBJECT, OffscreenSurface::framebuffer)
    }

    /// Whether `point` (relative to the primary window) falls on this surface,
    /// edges included.
    pub(crate) fn contains(&self, offset: IVec2, point: IVec2) -> bool {
        let local = point - offset;
        (0..=self.size.x).contains(&local.x) && (0..=self.size.y).contains(&local.y)
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("position", &self.position)
            .field("size", &self.size)
            .field("view", &self.view)
            .field("buffer", &self.buffer.as_ref().map(OffscreenSurface::size))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoEvents;

    #[test]
    fn test_hit_includes_edges() {
        let mut surface = Surface::new(SurfaceId(2), SurfaceKind::Secondary, None, Arc::new(NoEvents));
        surface.size = IVec2::new(100, 50);
        let offset = IVec2::new(20, 10);
        assert!(surface.contains(offset, IVec2::new(20, 10)));
        assert!(surface.contains(offset, IVec2::new(120, 60)));
        assert!(!surface.contains(offset, IVec2::new(121, 60)));
        assert!(!surface.contains(offset, IVec2::new(19, 30)));
    }

    #[test]
    fn test_state_follows_view_and_size() {
        let mut surface = Surface::new(SurfaceId(1), SurfaceKind::Primary, None, Arc::new(NoEvents));
        assert_eq!(surface.state(), SurfaceState::Unbound);

        let view: Arc<dyn ViewEvents> = Arc::new(NoEvents);
        surface.view = Some(SurfaceView::new(&view));
        assert_eq!(surface.state(), SurfaceState::BoundEmpty);

        surface.size = IVec2::new(800, 600);
        assert_eq!(surface.state(), SurfaceState::BoundSized);
        assert_eq!(surface.framebuffer_id(), NO_OBJECT);

        drop(view);
        assert_eq!(surface.state(), SurfaceState::Unbound);
    }

    #[test]
    fn test_display() {
        assert_eq!(SurfaceId(4).to_string(), "surface#4");
    }
}
