//! Glutin Platform - real shared GL contexts on a hidden window
//!
//! The root context is created together with a hidden winit window and
//! stands in for the host's context. Every shared context uses the same
//! config and is made current against the root window's surface; nobody
//! presents from them, they only render into framebuffers.

use crate::context::{ContextConfig, ContextError, Platform, RawContext};
use crate::gl::Gl;
use crate::glow_backend::GlowGl;
use glutin::config::{Config, ConfigTemplateBuilder, GlConfig};
use glutin::context::{
    ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentGlContext, PossiblyCurrentContext,
    PossiblyCurrentGlContext, Version,
};
use glutin::display::{Display, GetGlDisplay, GlDisplay};
use glutin::surface::{GlSurface, Surface, SurfaceAttributesBuilder, WindowSurface};
use glutin_winit::{DisplayBuilder, GlWindow, GlutinEventLoop};
use raw_window_handle::HasWindowHandle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::rc::Rc;
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::window::Window;

struct GlutinState {
    // Contexts go before the surface and window they were made current on
    contexts: HashMap<RawContext, PossiblyCurrentContext>,
    surface: Surface<WindowSurface>,
    window: Window,
    display: Display,
    config: Config,
    root: RawContext,
    current: Option<RawContext>,
    next_id: u64,
}

impl GlutinState {
    fn context(&self, raw: RawContext) -> Result<&PossiblyCurrentContext, ContextError> {
        self.contexts.get(&raw).ok_or_else(|| ContextError::Platform {
            context: raw,
            message: "no such context".to_string(),
        })
    }

    fn make_current(&mut self, raw: RawContext) -> Result<(), ContextError> {
        self.context(raw)?
            .make_current(&self.surface)
            .map_err(|e| ContextError::Platform {
                context: raw,
                message: e.to_string(),
            })?;
        self.current = Some(raw);
        Ok(())
    }

    /// Put back whatever was current before a temporary switch.
    fn restore_current(&mut self, previous: Option<RawContext>) -> Result<(), ContextError> {
        match previous {
            Some(raw) if self.current != Some(raw) && self.contexts.contains_key(&raw) => {
                self.make_current(raw)
            }
            _ => Ok(()),
        }
    }
}

/// [`Platform`] over glutin. Cheap to clone; clones share the contexts.
#[derive(Clone)]
pub struct GlutinPlatform {
    state: Rc<RefCell<GlutinState>>,
}

impl GlutinPlatform {
    /// Open a hidden window of `size` with a root context, current on return.
    ///
    /// The returned [`RawContext`] plays the host's context.
    pub fn new(
        event_loop: &impl GlutinEventLoop,
        size: PhysicalSize<u32>,
        config: &ContextConfig,
    ) -> Result<(Self, RawContext), ContextError> {
        let attributes = Window::default_attributes()
            .with_title("cohost")
            .with_visible(false)
            .with_inner_size(size);
        let template = ConfigTemplateBuilder::new().with_alpha_size(8);
        let (window, gl_config) = DisplayBuilder::new()
            .with_window_attributes(Some(attributes))
            .build(event_loop, template, |configs| {
                // glutin only calls the picker with at least one config
                configs
                    .reduce(|best, c| if c.num_samples() < best.num_samples() { c } else { best })
                    .expect("glutin offered no GL configs")
            })
            .map_err(|e| ContextError::Setup(e.to_string()))?;
        let window = window.ok_or_else(|| ContextError::Setup("no window was created".to_string()))?;
        let display = gl_config.display();

        let surface_attributes = window
            .build_surface_attributes(SurfaceAttributesBuilder::new())
            .map_err(|e| ContextError::Setup(e.to_string()))?;
        // SAFETY: the window outlives the surface, both live in GlutinState
        let surface = unsafe { display.create_window_surface(&gl_config, &surface_attributes) }
            .map_err(|e| ContextError::Setup(e.to_string()))?;

        let root = RawContext(1);
        let not_current = create_context(&display, &gl_config, &window, config, None)
            .map_err(ContextError::Setup)?;
        let context = not_current
            .make_current(&surface)
            .map_err(|e| ContextError::Setup(e.to_string()))?;
        info!(
            version = %gl_config.display().version_string(),
            samples = gl_config.num_samples(),
            "glutin display ready"
        );

        let mut contexts = HashMap::new();
        contexts.insert(root, context);
        let state = GlutinState {
            contexts,
            surface,
            window,
            display,
            config: gl_config,
            root,
            current: Some(root),
            next_id: 2,
        };
        Ok((
            Self {
                state: Rc::new(RefCell::new(state)),
            },
            root,
        ))
    }

    pub fn window_size(&self) -> PhysicalSize<u32> {
        self.state.borrow().window.inner_size()
    }

    /// Resize the window surface after the host window changed size.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), ContextError> {
        let state = self.state.borrow();
        let (Some(w), Some(h)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
            return Ok(());
        };
        let root = state.context(state.root)?;
        state.surface.resize(root, w, h);
        Ok(())
    }

    /// Present the root window's back buffer.
    pub fn swap_buffers(&self) -> Result<(), ContextError> {
        let state = self.state.borrow();
        let root = state.context(state.root)?;
        state
            .surface
            .swap_buffers(root)
            .map_err(|e| ContextError::Platform {
                context: state.root,
                message: e.to_string(),
            })
    }
}

fn create_context(
    display: &Display,
    config: &Config,
    window: &Window,
    settings: &ContextConfig,
    share_with: Option<&PossiblyCurrentContext>,
) -> Result<glutin::context::NotCurrentContext, String> {
    let handle = window.window_handle().map_err(|e| e.to_string())?.as_raw();
    let mut builder = ContextAttributesBuilder::new();
    if settings.core_profile {
        builder = builder
            .with_profile(GlProfile::Core)
            .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))));
    }
    if let Some(share) = share_with {
        builder = builder.with_sharing(share);
    }
    let attributes = builder.build(Some(handle));
    // SAFETY: the window handle stays valid for the context's lifetime
    unsafe { display.create_context(config, &attributes) }.map_err(|e| e.to_string())
}

impl Platform for GlutinPlatform {
    fn make_current(&self, raw: RawContext) -> Result<(), ContextError> {
        self.state.borrow_mut().make_current(raw)
    }

    fn create_shared(
        &self,
        share_with: RawContext,
        config: &ContextConfig,
    ) -> Result<RawContext, ContextError> {
        let mut state = self.state.borrow_mut();
        let creation = |message: String| ContextError::Creation {
            share_with,
            message,
        };

        let share = state
            .contexts
            .get(&share_with)
            .ok_or_else(|| creation("share context does not exist".to_string()))?;
        let not_current =
            create_context(&state.display, &state.config, &state.window, config, Some(share))
                .map_err(creation)?;

        // A fresh context has to be made current once to become usable
        let previous = state.current;
        let context = not_current
            .make_current(&state.surface)
            .map_err(|e| creation(e.to_string()))?;
        let raw = RawContext(state.next_id);
        state.next_id += 1;
        state.contexts.insert(raw, context);
        state.current = Some(raw);
        state.restore_current(previous)?;
        debug!(%raw, share = %share_with, "created glutin context");
        Ok(raw)
    }

    fn destroy(&self, raw: RawContext) -> Result<(), ContextError> {
        let mut state = self.state.borrow_mut();
        if raw == state.root {
            return Err(ContextError::Platform {
                context: raw,
                message: "the root context belongs to the window".to_string(),
            });
        }
        if state.contexts.remove(&raw).is_none() {
            return Err(ContextError::Platform {
                context: raw,
                message: "no such context".to_string(),
            });
        }
        if state.current == Some(raw) {
            state.current = None;
        }
        Ok(())
    }

    fn load_gl(&self, raw: RawContext) -> Result<Rc<dyn Gl>, ContextError> {
        let mut state = self.state.borrow_mut();
        let previous = state.current;
        if previous != Some(raw) {
            state.make_current(raw)?;
        }
        let display = state.display.clone();
        // SAFETY: `raw` is current and the loader comes from its display
        let gl = unsafe {
            glow::Context::from_loader_function_cstr(|name| display.get_proc_address(name))
        };
        state.restore_current(previous)?;
        Ok(Rc::new(GlowGl::new(gl)))
    }
}

impl std::fmt::Debug for GlutinPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("GlutinPlatform")
            .field("contexts", &state.contexts.len())
            .field("current", &state.current)
            .finish()
    }
}
