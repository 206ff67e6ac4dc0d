//! cohost Windows - window hierarchy for an embedded toolkit
//!
//! Maps the toolkit's windows onto offscreen surfaces: one primary surface
//! bound to the host's real window, any number of popups composited over it,
//! a focus chain across them, and GL panes that let application code draw
//! raw GL inside the toolkit's scene.

mod error;
mod events;
mod focus;
mod hierarchy;
mod pane;
mod peer;
mod surface;

pub use error::WindowError;
pub use events::{
    HostEvent, HostEventTranslator, InputEvent, NoEvents, SurfaceView, ViewEvents, WindowEvents,
};
pub use focus::FocusChain;
pub use hierarchy::{BoundsRequest, CompositorConfig, WindowHierarchy};
pub use pane::{GlPane, PaneRenderer};
pub use peer::{HierarchyHandle, SurfacePeer};
pub use surface::{Surface, SurfaceId, SurfaceKind, SurfaceState};
