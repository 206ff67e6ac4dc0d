//! cohost-sim: headless walk-through of a hosted toolkit
//!
//! Runs the whole pipeline against the in-memory GL backend: a primary
//! window and two popups drawn by the toolkit, a GL pane inside the primary,
//! a host resize, and teardown. Takes an optional path to a TOML config.
//!
//! Built with the `glutin` feature, `--gl` runs the same frames on real
//! shared contexts behind a hidden window instead.

use anyhow::{Context, Result};
use cohost::{Bridge, BridgeConfig, HostWindow};
use cohost_render::{Gl, HeadlessPlatform, Platform, RawContext, Rect};
use cohost_windows::{
    BoundsRequest, HostEvent, HostEventTranslator, NoEvents, PaneRenderer, SurfaceId,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;

// Use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const FRAMES: usize = 3;

/// Clears the pane to a color that changes every frame.
struct Pulse {
    frame: u32,
}

impl PaneRenderer for Pulse {
    fn init(&mut self, gl: &dyn Gl) -> Result<()> {
        info!(renderer = %gl.get_string(cohost_render::StringParam::Renderer), "pane init");
        Ok(())
    }

    fn resize(&mut self, _gl: &dyn Gl, width: i32, height: i32) -> Result<()> {
        info!(width, height, "pane resized");
        Ok(())
    }

    fn render(&mut self, gl: &dyn Gl) -> Result<()> {
        self.frame += 1;
        let shade = (self.frame % 10) as f32 / 10.0;
        gl.clear_color([shade, 0.2, 0.4, 1.0]);
        gl.clear(true, false);
        Ok(())
    }
}

fn main() -> Result<()> {
    let mut config_path = None;
    let mut real_gl = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--gl" => real_gl = true,
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }
    let config = match config_path {
        Some(path) => BridgeConfig::load(&path)?,
        None => BridgeConfig::default(),
    };
    let level: Level = config
        .log_level
        .parse()
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    info!("cohost-sim starting...");
    info!("Using mimalloc allocator");

    if real_gl {
        return run_glutin(config);
    }

    let platform = HeadlessPlatform::new();
    let host_raw = platform.create_root();
    platform.make_current(host_raw)?;

    let responsive = run(Box::new(platform.clone()), host_raw, config, |_| Ok(()))?;
    let draws = platform.draws();
    info!(draws = draws.len(), allocations = ?platform.allocations(), "draw log");
    info!(
        responsive,
        textures = platform.live_textures(),
        framebuffers = platform.live_framebuffers(),
        "cohost-sim shutting down"
    );
    Ok(())
}

#[cfg(feature = "glutin")]
fn run_glutin(config: BridgeConfig) -> Result<()> {
    use cohost_render::GlutinPlatform;
    use winit::event_loop::EventLoop;

    let event_loop = EventLoop::new().context("failed to open the event loop")?;
    let (platform, host_raw) =
        GlutinPlatform::new(&event_loop, PhysicalSize::new(800, 600), &config.context)?;
    let presenter = platform.clone();
    let responsive = run(Box::new(platform), host_raw, config, move |event| {
        if let Some(HostEvent::Resized(size)) = event {
            presenter.resize(size.width, size.height)?;
        }
        presenter.swap_buffers()?;
        Ok(())
    })?;
    info!(responsive, "cohost-sim shutting down");
    Ok(())
}

#[cfg(not(feature = "glutin"))]
fn run_glutin(_config: BridgeConfig) -> Result<()> {
    anyhow::bail!("--gl needs cohost-sim built with the `glutin` feature")
}

/// Drive the bridge for a few frames. `present` runs after every frame with
/// the host event delivered before it, if any.
fn run<P>(
    platform: Box<dyn Platform>,
    host_raw: RawContext,
    config: BridgeConfig,
    mut present: P,
) -> Result<bool>
where
    P: FnMut(Option<&HostEvent>) -> Result<()>,
{
    let mut bridge = Bridge::start(platform, host_raw, HostWindow::new(800, 100, 800, 600), config)?;
    bridge.set_shutdown_hook(|| {
        info!("toolkit stopping");
        Ok(())
    });

    // The toolkit builds its windows on its own thread
    let hierarchy = bridge.hierarchy();
    let windows = bridge.run_and_wait(move || {
        let mut h = hierarchy.lock();
        let primary = h.create_window(None, Arc::new(NoEvents))?;
        let menu = h.create_window(Some(primary), Arc::new(NoEvents))?;
        let tooltip = h.create_window(Some(primary), Arc::new(NoEvents))?;
        h.set_bounds(menu, BoundsRequest::at(820, 110, 100, 50))?;
        h.set_bounds(tooltip, BoundsRequest::at(900, 500, 60, 30))?;
        Ok(vec![primary, menu, tooltip])
    })?;

    let jobs = bridge.render_jobs();
    let pane = jobs.create_pane("pulse", Box::new(Pulse { frame: 0 }))?;

    let mut translator = HostEventTranslator::new();
    for frame in 0..FRAMES {
        let mut delivered = None;
        if frame == 1 {
            for event in translator.translate(&WindowEvent::Resized(PhysicalSize::new(1024, 768))) {
                bridge.handle_host_event(&event)?;
                delivered = Some(event);
            }
        }
        submit_frame(&bridge, &windows, pane)?;
        let drawn = bridge.render()?;
        present(delivered.as_ref())?;
        info!(frame, surfaces = drawn, "frame composited");
    }

    Ok(bridge.terminate())
}

/// What the toolkit would queue for one frame: clear every window, and draw
/// the pane into the primary.
fn submit_frame(bridge: &Bridge, windows: &[SurfaceId], pane: cohost::PaneId) -> Result<()> {
    let jobs = bridge.render_jobs();
    for (i, &surface) in windows.iter().enumerate() {
        let shade = 0.3 * i as f32;
        jobs.submit(format!("draw {}", surface), move |frame| {
            frame.draw_surface(surface, |gl| {
                gl.clear_color([shade, shade, shade, 1.0]);
                gl.clear(true, false);
                Ok(())
            })?;
            Ok(())
        })?;
    }

    let primary = windows[0];
    jobs.submit("pulse pane", move |frame| {
        let active = frame.activate()?;
        if !frame.hierarchy().begin_frame(primary, &active)? {
            return Ok(());
        }
        let result = frame.render_pane(pane, Rect::new(40, 40, 320, 240));
        let active = frame.activate()?;
        frame.hierarchy().end_frame(primary, &active)?;
        result.map(|_| ())
    })?;
    Ok(())
}
