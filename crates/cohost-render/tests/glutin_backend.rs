//! Real driver: shared contexts, an offscreen surface drawn from one context
//! and composited from another, all through `GlowGl`.
//!
//! Needs a display. Skips quietly when none can be opened.

use cohost_render::glow;
use cohost_render::{
    Capability, ContextConfig, ContextRegistry, GlutinPlatform, IntParam, ObjectId,
    OffscreenSurface, Rect, StateSnapshot,
};
use winit::dpi::PhysicalSize;
use winit::event_loop::EventLoop;

fn event_loop() -> Option<EventLoop<()>> {
    let mut builder = EventLoop::builder();
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        use winit::platform::x11::EventLoopBuilderExtX11;
        builder.with_any_thread(true);
    }
    builder.build().ok()
}

#[test]
fn test_shared_contexts_on_a_real_driver() {
    let Some(event_loop) = event_loop() else {
        eprintln!("no display, skipping");
        return;
    };
    let config = ContextConfig::default();
    let (platform, root) = match GlutinPlatform::new(&event_loop, PhysicalSize::new(256, 256), &config) {
        Ok(created) => created,
        Err(e) => {
            eprintln!("no GL context ({e}), skipping");
            return;
        }
    };

    let mut registry = ContextRegistry::new(Box::new(platform.clone()), config);
    let host = registry.wrap_existing(root, "host").unwrap();
    let toolkit = registry.create_shared_with(host, "toolkit").unwrap();

    // Draw into a framebuffer owned by the toolkit context
    let active = registry.activate(toolkit).unwrap();
    let surface = OffscreenSurface::new(&active, 64, 32, true).unwrap();
    let gl = active.gl();
    let prev = surface.bind(gl);
    gl.viewport([0, 0, 64, 32]);
    gl.clear_color([0.0, 1.0, 0.0, 1.0]);
    gl.clear(true, false);
    surface.unbind(gl, prev);
    assert_eq!(gl.get_error(), glow::NO_ERROR);
    assert!(registry.info(toolkit).is_some());

    // Composite it from the host context, texture shared across contexts
    let (host_active, shader) = registry.quad_shader(host).unwrap();
    let host_gl = host_active.gl();
    host_gl.bind_framebuffer(0);
    host_gl.viewport([0, 0, 256, 256]);
    let mut snapshot = StateSnapshot::compositing();
    snapshot.scoped(host_gl, |gl| {
        gl.set_enabled(Capability::Blend, true);
        gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        surface
            .render(&host_active, &shader, Rect::new(10, 10, 64, 32), false)
            .unwrap();
    });
    assert_eq!(host_gl.get_error(), glow::NO_ERROR);
    assert!(!host_gl.is_enabled(Capability::Blend));
    assert_eq!(host_gl.get_integer(IntParam::CurrentProgram), 0);
    assert_eq!(host_gl.get_integer(IntParam::FramebufferBinding) as ObjectId, 0);
    platform.swap_buffers().unwrap();

    surface.release(&mut registry).unwrap();
    registry.release(toolkit).unwrap();
    registry.release_owned();
    registry.activate(host).unwrap();
    assert_eq!(registry.len(), 1);
}
