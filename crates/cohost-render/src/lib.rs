//! cohost Render - shared-context GL compositing
//!
//! Lets several logical GL owners (a host application, an embedded toolkit,
//! application panes) share a few real contexts without stepping on each
//! other's state, and composite offscreen surfaces into one framebuffer.

mod color;
mod context;
mod error;
mod gl;
mod glow_backend;
#[cfg(feature = "glutin")]
mod glutin_platform;
mod headless;
mod offscreen;
mod quad;
mod state;

pub use color::Color;
pub use context::{
    ActiveContext, ContextConfig, ContextError, ContextId, ContextInfo, ContextRegistry,
    Platform, RawContext, SyncMode,
};
pub use error::{number_lines, RenderError};
pub use gl::{
    framebuffer_status_name, BufferTarget, Capability, Float4Param, Gl, Int4Param, IntParam,
    ObjectId, ShaderStage, StringParam, NO_OBJECT, TEXTURE_UNITS,
};
pub use glow_backend::GlowGl;
#[cfg(feature = "glutin")]
pub use glutin_platform::GlutinPlatform;
pub use headless::{
    Allocations, DrawCall, GlEvent, HeadlessGl, HeadlessPlatform, HeadlessSettings, UniformValue,
};
pub use offscreen::{OffscreenSurface, Rect};
pub use quad::{GlslDialect, QuadShader, QuadUniforms, QuadVertex, SurfaceQuad};
pub use state::{StatePart, StateSnapshot, StateValue};

/// Re-exported so callers can name raw GL enums without a direct dependency
pub use glow;
