//! Surface peer - what a toolkit adapter talks to.
//!
//! A toolkit binds its window objects to surfaces through [`SurfacePeer`]
//! instead of subclassing anything. [`WindowHierarchy`] implements it
//! directly; [`HierarchyHandle`] implements it over a hierarchy shared between
//! the events thread and the render thread.

use crate::error::WindowError;
use crate::events::{ViewEvents, WindowEvents};
use crate::hierarchy::{BoundsRequest, CompositorConfig, WindowHierarchy};
use crate::surface::SurfaceId;
use cohost_render::{ActiveContext, ObjectId};
use glam::IVec2;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Window operations a toolkit adapter delegates to the hierarchy.
pub trait SurfacePeer {
    /// Create a window. `None` as owner binds it to the host window.
    fn create_window(
        &mut self,
        owner: Option<SurfaceId>,
        events: Arc<dyn WindowEvents>,
    ) -> Result<SurfaceId, WindowError>;

    fn set_view(&mut self, id: SurfaceId, view: Option<&Arc<dyn ViewEvents>>) -> Result<(), WindowError>;

    fn set_bounds(&mut self, id: SurfaceId, request: BoundsRequest) -> Result<bool, WindowError>;

    /// Bind the surface's framebuffer in `active`. `Ok(false)` means the
    /// surface has nothing to draw into yet.
    fn begin_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<bool, WindowError>;

    fn end_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<(), WindowError>;

    /// Framebuffer to render into, 0 when the surface has none.
    fn framebuffer_id(&self, id: SurfaceId) -> ObjectId;

    fn close(&mut self, id: SurfaceId) -> Result<(), WindowError>;

    /// Give `id` keyboard focus. The surface losing it hears first.
    fn request_focus(&mut self, id: SurfaceId) -> Result<(), WindowError>;

    fn focused(&mut self) -> Option<SurfaceId>;

    /// Secondary surface under `point`, relative to the primary window.
    fn surface_at(&self, point: IVec2) -> Option<SurfaceId>;
}

impl SurfacePeer for WindowHierarchy {
    fn create_window(
        &mut self,
        owner: Option<SurfaceId>,
        events: Arc<dyn WindowEvents>,
    ) -> Result<SurfaceId, WindowError> {
        WindowHierarchy::create_window(self, owner, events)
    }

    fn set_view(&mut self, id: SurfaceId, view: Option<&Arc<dyn ViewEvents>>) -> Result<(), WindowError> {
        WindowHierarchy::set_view(self, id, view)
    }

    fn set_bounds(&mut self, id: SurfaceId, request: BoundsRequest) -> Result<bool, WindowError> {
        WindowHierarchy::set_bounds(self, id, request)
    }

    fn begin_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<bool, WindowError> {
        WindowHierarchy::begin_frame(self, id, active)
    }

    fn end_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<(), WindowError> {
        WindowHierarchy::end_frame(self, id, active)
    }

    fn framebuffer_id(&self, id: SurfaceId) -> ObjectId {
        WindowHierarchy::framebuffer_id(self, id)
    }

    fn close(&mut self, id: SurfaceId) -> Result<(), WindowError> {
        WindowHierarchy::close(self, id)
    }

    fn request_focus(&mut self, id: SurfaceId) -> Result<(), WindowError> {
        WindowHierarchy::set_focused(self, id)
    }

    fn focused(&mut self) -> Option<SurfaceId> {
        WindowHierarchy::focused(self)
    }

    fn surface_at(&self, point: IVec2) -> Option<SurfaceId> {
        WindowHierarchy::find_surface_at(self, point)
    }
}

/// Shared, lockable hierarchy.
///
/// Cloning is cheap. Listeners run while the lock is held and must not call
/// back into the handle.
#[derive(Clone, Debug)]
pub struct HierarchyHandle {
    inner: Arc<Mutex<WindowHierarchy>>,
}

impl HierarchyHandle {
    pub fn new(hierarchy: WindowHierarchy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(hierarchy)),
        }
    }

    /// Hierarchy sized to a host window at `position` with `size`.
    pub fn for_host(config: CompositorConfig, position: IVec2, size: IVec2) -> Self {
        Self::new(WindowHierarchy::new(config, position, size))
    }

    /// Lock the hierarchy. A panic in a listener does not poison it for good.
    pub fn lock(&self) -> MutexGuard<'_, WindowHierarchy> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SurfacePeer for HierarchyHandle {
    fn create_window(
        &mut self,
        owner: Option<SurfaceId>,
        events: Arc<dyn WindowEvents>,
    ) -> Result<SurfaceId, WindowError> {
        self.lock().create_window(owner, events)
    }

    fn set_view(&mut self, id: SurfaceId, view: Option<&Arc<dyn ViewEvents>>) -> Result<(), WindowError> {
        self.lock().set_view(id, view)
    }

    fn set_bounds(&mut self, id: SurfaceId, request: BoundsRequest) -> Result<bool, WindowError> {
        self.lock().set_bounds(id, request)
    }

    fn begin_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<bool, WindowError> {
        self.lock().begin_frame(id, active)
    }

    fn end_frame(&mut self, id: SurfaceId, active: &ActiveContext) -> Result<(), WindowError> {
        self.lock().end_frame(id, active)
    }

    fn framebuffer_id(&self, id: SurfaceId) -> ObjectId {
        self.lock().framebuffer_id(id)
    }

    fn close(&mut self, id: SurfaceId) -> Result<(), WindowError> {
        self.lock().close(id)
    }

    fn request_focus(&mut self, id: SurfaceId) -> Result<(), WindowError> {
        self.lock().set_focused(id)
    }

    fn focused(&mut self) -> Option<SurfaceId> {
        self.lock().focused()
    }

    fn surface_at(&self, point: IVec2) -> Option<SurfaceId> {
        self.lock().find_surface_at(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoEvents;
    use cohost_render::{ContextConfig, ContextRegistry, HeadlessPlatform, Platform, NO_OBJECT};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::thread;

    /// Records focus changes of every window sharing it, in order.
    struct FocusJournal {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl WindowEvents for FocusJournal {
        fn focus_changed(&self, focused: bool) {
            let change = if focused { "gained" } else { "lost" };
            self.log.lock().unwrap().push(format!("{} {}", self.name, change));
        }
    }

    #[derive(Default)]
    struct SizeLog {
        width: AtomicI32,
        height: AtomicI32,
        x: AtomicI32,
        y: AtomicI32,
    }

    impl ViewEvents for SizeLog {
        fn resized(&self, width: i32, height: i32) {
            self.width.store(width, Ordering::SeqCst);
            self.height.store(height, Ordering::SeqCst);
        }

        fn moved(&self, x: i32, y: i32) {
            self.x.store(x, Ordering::SeqCst);
            self.y.store(y, Ordering::SeqCst);
        }
    }

    /// Drive a toolkit window through the trait only.
    fn frame_once(peer: &mut dyn SurfacePeer, active: &ActiveContext) -> (SurfaceId, ObjectId) {
        let id = peer.create_window(None, Arc::new(NoEvents)).unwrap();
        assert!(peer.begin_frame(id, active).unwrap());
        let fbo = peer.framebuffer_id(id);
        peer.end_frame(id, active).unwrap();
        (id, fbo)
    }

    #[test]
    fn test_peer_drives_hierarchy() {
        let platform = HeadlessPlatform::new();
        let raw = platform.create_root();
        platform.make_current(raw).unwrap();
        let mut registry = ContextRegistry::new(Box::new(platform.clone()), ContextConfig::default());
        let host = registry.wrap_existing(raw, "host").unwrap();
        let active = registry.activate(host).unwrap();

        let mut handle = HierarchyHandle::for_host(
            CompositorConfig::default(),
            IVec2::new(800, 100),
            IVec2::new(800, 600),
        );
        let (id, fbo) = frame_once(&mut handle, &active);
        assert_ne!(fbo, NO_OBJECT);
        assert_eq!(handle.lock().primary(), Some(id));

        handle.close(id).unwrap();
        assert_eq!(handle.framebuffer_id(id), NO_OBJECT);
        assert_eq!(handle.lock().release_closed(&mut registry).unwrap(), 1);
    }

    #[test]
    fn test_primary_view_gets_host_geometry() {
        let mut handle = HierarchyHandle::for_host(
            CompositorConfig::default(),
            IVec2::new(800, 100),
            IVec2::new(800, 600),
        );
        let id = handle.create_window(None, Arc::new(NoEvents)).unwrap();
        let log = Arc::new(SizeLog::default());
        let view: Arc<dyn ViewEvents> = log.clone();
        handle.set_view(id, Some(&view)).unwrap();

        assert_eq!(log.width.load(Ordering::SeqCst), 800);
        assert_eq!(log.height.load(Ordering::SeqCst), 600);
        assert_eq!(log.x.load(Ordering::SeqCst), 800);
        assert_eq!(log.y.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_handle_shared_across_threads() {
        let handle = HierarchyHandle::for_host(CompositorConfig::default(), IVec2::ZERO, IVec2::new(640, 480));
        let primary = {
            let mut h = handle.clone();
            h.create_window(None, Arc::new(NoEvents)).unwrap()
        };

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let mut h = handle.clone();
                thread::spawn(move || h.create_window(Some(primary), Arc::new(NoEvents)).unwrap())
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(handle.lock().len(), 5);
    }

    #[test]
    fn test_focus_requested_through_peer() {
        let mut handle = HierarchyHandle::for_host(
            CompositorConfig::default(),
            IVec2::new(800, 100),
            IVec2::new(800, 600),
        );
        let log = Arc::new(Mutex::new(Vec::new()));
        let journal = |name| -> Arc<dyn WindowEvents> {
            Arc::new(FocusJournal {
                name,
                log: log.clone(),
            })
        };
        let peer: &mut dyn SurfacePeer = &mut handle;
        let primary = peer.create_window(None, journal("primary")).unwrap();
        let menu = peer.create_window(Some(primary), journal("menu")).unwrap();
        peer.set_bounds(menu, BoundsRequest::at(820, 110, 100, 50)).unwrap();
        let view: Arc<dyn ViewEvents> = Arc::new(SizeLog::default());
        peer.set_view(menu, Some(&view)).unwrap();
        assert_eq!(peer.focused(), Some(primary));

        let hit = peer.surface_at(IVec2::new(30, 20)).unwrap();
        assert_eq!(hit, menu);
        peer.request_focus(hit).unwrap();
        assert_eq!(peer.focused(), Some(menu));
        peer.request_focus(primary).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["primary lost", "menu gained", "menu lost", "primary gained"]
        );

        peer.close(menu).unwrap();
        assert!(matches!(
            peer.request_focus(menu),
            Err(WindowError::UnknownSurface(id)) if id == menu
        ));
        assert_eq!(peer.surface_at(IVec2::new(30, 20)), None);
    }
}
