//! GL Panes - raw GL rendering embedded in a toolkit scene
//!
//! A pane renders with its own logical context into its own offscreen
//! buffer, then blits the result into whatever target the toolkit has bound,
//! at the pane's bounds. The toolkit's GL state survives the blit.

use crate::error::WindowError;
use crate::hierarchy::CompositorConfig;
use cohost_render::{
    Capability, ContextId, ContextRegistry, Gl, Int4Param, OffscreenSurface, Rect, RenderError,
    StateSnapshot,
};
use tracing::{debug, info};

/// Application callbacks for a pane. Each runs with the pane's context
/// current.
pub trait PaneRenderer: Send {
    /// Called once, before the first frame, with the viewport set to the
    /// pane's size.
    fn init(&mut self, _gl: &dyn Gl) -> anyhow::Result<()> {
        Ok(())
    }

    /// The pane buffer was (re)allocated at a new size.
    fn resize(&mut self, _gl: &dyn Gl, _width: i32, _height: i32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Draw one frame. The pane framebuffer is bound and the viewport covers it.
    fn render(&mut self, gl: &dyn Gl) -> anyhow::Result<()>;
}

/// A pane's context, buffer and callbacks.
pub struct GlPane {
    label: String,
    context: ContextId,
    buffer: Option<OffscreenSurface>,
    renderer: Box<dyn PaneRenderer>,
    initialized: bool,
    flip: bool,
    clear_new_buffers: bool,
    /// Toolkit state around the blit, reused every frame
    snapshot: StateSnapshot,
}

impl GlPane {
    /// Create a pane with a fresh context sharing objects with `share_with`.
    pub fn new(
        registry: &mut ContextRegistry,
        share_with: ContextId,
        label: &str,
        renderer: Box<dyn PaneRenderer>,
        config: &CompositorConfig,
    ) -> Result<Self, WindowError> {
        let context = registry.create_shared_with(share_with, label)?;
        info!(pane = label, context = %context, "pane created");
        Ok(Self {
            label: label.to_string(),
            context,
            buffer: None,
            renderer,
            initialized: false,
            flip: config.flip_panes,
            clear_new_buffers: config.clear_new_buffers,
            snapshot: StateSnapshot::pane(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn buffer(&self) -> Option<&OffscreenSurface> {
        self.buffer.as_ref()
    }

    /// Render the pane and blit it into the framebuffer bound in `target`.
    ///
    /// `bounds` is top-down, relative to the target's viewport. Returns
    /// `Ok(false)` when there was nothing to draw. On return `target` is the
    /// active context, whether or not the pane failed.
    pub fn render_into(
        &mut self,
        registry: &mut ContextRegistry,
        target: ContextId,
        bounds: Rect,
    ) -> Result<bool, WindowError> {
        let [_, _, _, target_height] = registry.activate(target)?.gl().get_integer4(Int4Param::Viewport);

        let drawn = self.draw_offscreen(registry, bounds);

        // Back to the toolkit even if the pane failed
        let (active, shader) = registry.quad_shader(target)?;
        if !drawn? {
            return Ok(false);
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(false);
        };

        let dest = Rect::new(
            bounds.x,
            target_height - bounds.y - bounds.height,
            bounds.width,
            bounds.height,
        );
        let flip = self.flip;
        let label = &self.label;
        self.snapshot.scoped(active.gl(), |gl| {
            gl.set_enabled(Capability::Blend, false);
            buffer
                .render(&active, &shader, dest, flip)
                .map_err(|e| buffer_error(label, "composite", e))
        })?;
        Ok(true)
    }

    /// Everything that happens in the pane's own context.
    fn draw_offscreen(&mut self, registry: &mut ContextRegistry, bounds: Rect) -> Result<bool, WindowError> {
        let active = registry.activate(self.context)?;
        let gl = active.gl();
        let (width, height) = (bounds.width, bounds.height);

        if !self.initialized {
            gl.viewport([0, 0, width, height]);
            self.renderer
                .init(gl)
                .map_err(|e| callback_error(&self.label, "init", e))?;
            // A failed init is tried again next frame
            self.initialized = true;
            debug!(pane = %self.label, "pane initialized");
        }

        if bounds.is_empty() {
            return Ok(false);
        }

        let resized = match self.buffer.as_mut() {
            Some(buffer) => buffer
                .resize(gl, width, height)
                .map_err(|e| buffer_error(&self.label, "resize buffer", e))?,
            None => {
                let buffer = OffscreenSurface::new(&active, width, height, self.clear_new_buffers)
                    .map_err(|e| buffer_error(&self.label, "allocate buffer", e))?;
                self.buffer = Some(buffer);
                true
            }
        };
        if resized {
            self.renderer
                .resize(gl, width, height)
                .map_err(|e| callback_error(&self.label, "resize", e))?;
        }

        let Some(buffer) = self.buffer.as_ref() else {
            return Ok(false);
        };
        let prev = buffer.bind(gl);
        gl.viewport([0, 0, width, height]);
        let rendered = self.renderer.render(gl);
        buffer.unbind(gl, prev);
        rendered.map_err(|e| callback_error(&self.label, "render", e))?;
        Ok(true)
    }

    /// Free the buffer and the pane's context. Leaves no context active if
    /// the pane's was.
    pub fn release(mut self, registry: &mut ContextRegistry) -> Result<(), WindowError> {
        if let Some(buffer) = self.buffer.take() {
            buffer.release(registry)?;
        }
        registry.release(self.context)?;
        info!(pane = %self.label, "pane released");
        Ok(())
    }
}

impl std::fmt::Debug for GlPane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlPane")
            .field("label", &self.label)
            .field("context", &self.context)
            .field("buffer", &self.buffer.as_ref().map(OffscreenSurface::size))
            .field("initialized", &self.initialized)
            .finish()
    }
}

fn callback_error(pane: &str, stage: &'static str, error: anyhow::Error) -> WindowError {
    WindowError::Pane {
        pane: pane.to_string(),
        stage,
        message: format!("{:#}", error),
    }
}

fn buffer_error(pane: &str, stage: &'static str, error: RenderError) -> WindowError {
    WindowError::Pane {
        pane: pane.to_string(),
        stage,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohost_render::{
        ContextConfig, GlEvent, HeadlessPlatform, IntParam, ObjectId, Platform, RawContext,
    };
    use cohost_render::glow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        init: AtomicUsize,
        render: AtomicUsize,
        resizes: Mutex<Vec<(i32, i32)>>,
        init_viewport: Mutex<Option<[i32; 4]>>,
        /// Inits left to fail before one succeeds
        failing_inits: AtomicUsize,
    }

    struct Recorder {
        calls: Arc<Calls>,
        fail_render: bool,
    }

    impl PaneRenderer for Recorder {
        fn init(&mut self, gl: &dyn Gl) -> anyhow::Result<()> {
            self.calls.init.fetch_add(1, Ordering::SeqCst);
            *self.calls.init_viewport.lock().unwrap() = Some(gl.get_integer4(Int4Param::Viewport));
            let failing = &self.calls.failing_inits;
            if failing.load(Ordering::SeqCst) > 0 {
                failing.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("no driver support");
            }
            Ok(())
        }

        fn resize(&mut self, _gl: &dyn Gl, width: i32, height: i32) -> anyhow::Result<()> {
            self.calls.resizes.lock().unwrap().push((width, height));
            Ok(())
        }

        fn render(&mut self, gl: &dyn Gl) -> anyhow::Result<()> {
            self.calls.render.fetch_add(1, Ordering::SeqCst);
            if self.fail_render {
                anyhow::bail!("shader exploded");
            }
            gl.clear_color([1.0, 0.0, 0.0, 1.0]);
            gl.clear(true, false);
            Ok(())
        }
    }

    struct Fixture {
        registry: ContextRegistry,
        platform: HeadlessPlatform,
        toolkit: ContextId,
        target: OffscreenSurface,
    }

    /// Toolkit context with an 800x600 target bound, blend on as the toolkit
    /// likes it.
    fn setup() -> Fixture {
        let platform = HeadlessPlatform::new();
        let raw = platform.create_root();
        platform.make_current(raw).unwrap();
        let mut registry = ContextRegistry::new(Box::new(platform.clone()), ContextConfig::default());
        let host = registry.wrap_existing(raw, "host").unwrap();
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();

        let active = registry.activate(toolkit).unwrap();
        let target = OffscreenSurface::new(&active, 800, 600, true).unwrap();
        let gl = active.gl();
        target.bind(gl);
        gl.viewport([0, 0, 800, 600]);
        gl.set_enabled(Capability::Blend, true);
        gl.blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);

        Fixture {
            registry,
            platform,
            toolkit,
            target,
        }
    }

    fn pane(fx: &mut Fixture, fail_render: bool) -> (GlPane, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let renderer = Recorder {
            calls: calls.clone(),
            fail_render,
        };
        let pane = GlPane::new(
            &mut fx.registry,
            fx.toolkit,
            "scene",
            Box::new(renderer),
            &CompositorConfig::default(),
        )
        .unwrap();
        (pane, calls)
    }

    fn raw_of(fx: &Fixture, id: ContextId) -> RawContext {
        fx.registry.raw(id).unwrap()
    }

    #[test]
    fn test_callbacks_follow_buffer_lifecycle() {
        let mut fx = setup();
        let (mut pane, calls) = pane(&mut fx, false);
        let bounds = Rect::new(10, 20, 200, 100);

        for _ in 0..3 {
            assert!(pane.render_into(&mut fx.registry, fx.toolkit, bounds).unwrap());
        }
        assert_eq!(calls.init.load(Ordering::SeqCst), 1);
        assert_eq!(*calls.init_viewport.lock().unwrap(), Some([0, 0, 200, 100]));
        assert_eq!(calls.render.load(Ordering::SeqCst), 3);
        assert_eq!(*calls.resizes.lock().unwrap(), vec![(200, 100)]);

        pane.render_into(&mut fx.registry, fx.toolkit, Rect::new(10, 20, 300, 100))
            .unwrap();
        assert_eq!(*calls.resizes.lock().unwrap(), vec![(200, 100), (300, 100)]);
        assert_eq!(fx.registry.active(), Some(fx.toolkit));
    }

    #[test]
    fn test_renders_into_own_buffer() {
        let mut fx = setup();
        let (mut pane, _calls) = pane(&mut fx, false);
        pane.render_into(&mut fx.registry, fx.toolkit, Rect::new(10, 20, 200, 100))
            .unwrap();

        let pane_raw = raw_of(&fx, pane.context());
        let pane_fbo = pane.buffer().unwrap().framebuffer();
        let red_clear = fx.platform.events().into_iter().any(|event| {
            matches!(
                event,
                GlEvent::Clear { context, framebuffer, color }
                    if context == pane_raw && framebuffer == pane_fbo && color == [1.0, 0.0, 0.0, 1.0]
            )
        });
        assert!(red_clear);
    }

    #[test]
    fn test_blit_unblended_and_flipped() {
        let mut fx = setup();
        let (mut pane, _calls) = pane(&mut fx, false);
        fx.platform.clear_events();
        pane.render_into(&mut fx.registry, fx.toolkit, Rect::new(10, 20, 200, 100))
            .unwrap();

        let draws = fx.platform.draws();
        assert_eq!(draws.len(), 1);
        let draw = &draws[0];
        assert_eq!(draw.context, raw_of(&fx, fx.toolkit));
        assert_eq!(draw.framebuffer, fx.target.framebuffer());
        assert_eq!(draw.texture, pane.buffer().unwrap().texture());
        assert!(!draw.blend);
        assert_eq!(draw.vec2("viewPos"), Some([10.0, 480.0]));
        assert_eq!(draw.vec2("viewSize"), Some([200.0, 100.0]));
        assert_eq!(draw.vec2("targetSize"), Some([800.0, 600.0]));
        assert_eq!(draw.int("yflip"), Some(1));

        // Toolkit state survives
        let active = fx.registry.activate(fx.toolkit).unwrap();
        let gl = active.gl();
        assert!(gl.is_enabled(Capability::Blend));
        assert_eq!(gl.get_integer(IntParam::BlendSrc) as u32, glow::ONE);
        assert_eq!(gl.get_integer(IntParam::CurrentProgram), 0);
        assert_eq!(gl.get_integer(IntParam::FramebufferBinding) as ObjectId, fx.target.framebuffer());
    }

    #[test]
    fn test_toolkit_state_between_frames_is_kept() {
        let mut fx = setup();
        let (mut pane, _calls) = pane(&mut fx, false);
        let bounds = Rect::new(10, 20, 200, 100);
        pane.render_into(&mut fx.registry, fx.toolkit, bounds).unwrap();

        let active = fx.registry.activate(fx.toolkit).unwrap();
        active.gl().blend_func(glow::SRC_ALPHA, glow::ONE);
        pane.render_into(&mut fx.registry, fx.toolkit, bounds).unwrap();

        let active = fx.registry.activate(fx.toolkit).unwrap();
        let gl = active.gl();
        assert_eq!(gl.get_integer(IntParam::BlendSrc) as u32, glow::SRC_ALPHA);
        assert_eq!(gl.get_integer(IntParam::BlendDst) as u32, glow::ONE);
        assert!(gl.is_enabled(Capability::Blend));
    }

    #[test]
    fn test_empty_bounds_skip_drawing() {
        let mut fx = setup();
        let (mut pane, calls) = pane(&mut fx, false);
        let before = fx.platform.allocations();
        assert!(!pane.render_into(&mut fx.registry, fx.toolkit, Rect::new(0, 0, 0, 50)).unwrap());
        assert_eq!(calls.render.load(Ordering::SeqCst), 0);
        assert!(pane.buffer().is_none());
        assert_eq!(fx.platform.allocations().framebuffers, before.framebuffers);
        assert_eq!(fx.registry.active(), Some(fx.toolkit));
    }

    #[test]
    fn test_render_error_returns_to_toolkit() {
        let mut fx = setup();
        let (mut pane, _calls) = pane(&mut fx, true);
        fx.platform.clear_events();
        let err = pane
            .render_into(&mut fx.registry, fx.toolkit, Rect::new(0, 0, 64, 64))
            .unwrap_err();
        match err {
            WindowError::Pane { pane, stage, message } => {
                assert_eq!(pane, "scene");
                assert_eq!(stage, "render");
                assert!(message.contains("shader exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.registry.active(), Some(fx.toolkit));
        assert!(fx.platform.draws().is_empty());
    }

    #[test]
    fn test_failed_init_retried_next_frame() {
        let mut fx = setup();
        let (mut pane, calls) = pane(&mut fx, false);
        calls.failing_inits.store(1, Ordering::SeqCst);
        let bounds = Rect::new(0, 0, 64, 64);

        let err = pane.render_into(&mut fx.registry, fx.toolkit, bounds).unwrap_err();
        assert!(matches!(err, WindowError::Pane { stage: "init", .. }));
        assert_eq!(calls.render.load(Ordering::SeqCst), 0);
        assert_eq!(fx.registry.active(), Some(fx.toolkit));

        assert!(pane.render_into(&mut fx.registry, fx.toolkit, bounds).unwrap());
        assert_eq!(calls.init.load(Ordering::SeqCst), 2);
        assert_eq!(calls.render.load(Ordering::SeqCst), 1);

        pane.render_into(&mut fx.registry, fx.toolkit, bounds).unwrap();
        assert_eq!(calls.init.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_frees_context_and_buffer() {
        let mut fx = setup();
        let (mut pane, _calls) = pane(&mut fx, false);
        pane.render_into(&mut fx.registry, fx.toolkit, Rect::new(0, 0, 64, 64))
            .unwrap();
        let pane_raw = raw_of(&fx, pane.context());
        let pane_ctx = pane.context();
        let textures = fx.platform.live_textures();

        pane.release(&mut fx.registry).unwrap();
        assert!(!fx.registry.contains(pane_ctx));
        assert!(!fx.platform.is_alive(pane_raw));
        assert_eq!(fx.platform.live_textures(), textures - 1);
    }
}
