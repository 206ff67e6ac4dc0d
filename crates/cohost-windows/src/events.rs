//! Host Events - notifications flowing between host, hierarchy and toolkit
//!
//! The host reports what happened to its real window as [`HostEvent`]s. The
//! toolkit side listens through [`WindowEvents`] (per window) and
//! [`ViewEvents`] (per attached view). Input is passed through untranslated,
//! using winit's types.

use std::sync::{Arc, Weak};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{ModifiersState, PhysicalKey};

/// Window-level notifications for the toolkit's window object.
///
/// All methods default to doing nothing.
pub trait WindowEvents: Send + Sync {
    fn focus_changed(&self, _focused: bool) {}
    fn resized(&self, _width: i32, _height: i32) {}
    fn moved(&self, _x: i32, _y: i32) {}
    fn closed(&self) {}
}

/// Notifications for the toolkit view (scene) attached to a window.
pub trait ViewEvents: Send + Sync {
    fn resized(&self, _width: i32, _height: i32) {}
    /// Screen position of the window the view lives in
    fn moved(&self, _x: i32, _y: i32) {}
    fn input(&self, _event: &InputEvent) {}
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl WindowEvents for NoEvents {}
impl ViewEvents for NoEvents {}

/// A surface's link to its view.
///
/// Holds the view weakly: a view torn down by the toolkit without telling the
/// hierarchy simply stops being live.
#[derive(Clone)]
pub struct SurfaceView {
    view: Weak<dyn ViewEvents>,
}

impl SurfaceView {
    pub fn new(view: &Arc<dyn ViewEvents>) -> Self {
        Self {
            view: Arc::downgrade(view),
        }
    }

    pub fn get(&self) -> Option<Arc<dyn ViewEvents>> {
        self.view.upgrade()
    }

    pub fn is_live(&self) -> bool {
        self.view.strong_count() > 0
    }
}

impl std::fmt::Debug for SurfaceView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceView")
            .field("live", &self.is_live())
            .finish()
    }
}

/// Input forwarded 1:1 to the primary view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key {
        key: PhysicalKey,
        state: ElementState,
        modifiers: ModifiersState,
        repeat: bool,
    },
    Char(char),
    CursorMoved(PhysicalPosition<f64>),
    MouseButton {
        button: MouseButton,
        state: ElementState,
    },
    Scroll(MouseScrollDelta),
}

/// Something that happened to the host's real window.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Resized(PhysicalSize<u32>),
    Moved(PhysicalPosition<i32>),
    Focused(bool),
    Input(InputEvent),
}

impl HostEvent {
    /// Size as signed pixels, for `Resized`.
    pub fn size(&self) -> Option<(i32, i32)> {
        match self {
            HostEvent::Resized(size) => Some((clamp_i32(size.width), clamp_i32(size.height))),
            _ => None,
        }
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Turns winit window events into [`HostEvent`]s, tracking modifier state.
#[derive(Debug, Default)]
pub struct HostEventTranslator {
    modifiers: ModifiersState,
}

impl HostEventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modifiers(&self) -> ModifiersState {
        self.modifiers
    }

    /// Translate one winit event. Key presses carrying text produce the key
    /// event followed by one `Char` per character.
    pub fn translate(&mut self, event: &WindowEvent) -> Vec<HostEvent> {
        match event {
            WindowEvent::Resized(size) => vec![HostEvent::Resized(*size)],
            WindowEvent::Moved(pos) => vec![HostEvent::Moved(*pos)],
            WindowEvent::Focused(focused) => vec![HostEvent::Focused(*focused)],
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = modifiers.state();
                Vec::new()
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let mut out = vec![HostEvent::Input(InputEvent::Key {
                    key: event.physical_key,
                    state: event.state,
                    modifiers: self.modifiers,
                    repeat: event.repeat,
                })];
                if event.state == ElementState::Pressed {
                    if let Some(text) = event.text.as_deref() {
                        out.extend(text.chars().map(|c| HostEvent::Input(InputEvent::Char(c))));
                    }
                }
                out
            }
            WindowEvent::CursorMoved { position, .. } => {
                vec![HostEvent::Input(InputEvent::CursorMoved(*position))]
            }
            WindowEvent::MouseInput { state, button, .. } => {
                vec![HostEvent::Input(InputEvent::MouseButton {
                    button: *button,
                    state: *state,
                })]
            }
            WindowEvent::MouseWheel { delta, .. } => {
                vec![HostEvent::Input(InputEvent::Scroll(*delta))]
            }
            _ => Vec::new(),
        }
    }
}
