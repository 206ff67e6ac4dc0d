//! GL Abstraction - the narrow slice of OpenGL the compositor needs
//!
//! Every GL call made by the workspace goes through [`Gl`], so the same
//! compositing code runs against a real driver ([`crate::GlowGl`]) or the
//! in-memory state machine used by tests ([`crate::HeadlessGl`]).
//!
//! Object names are raw `u32`s with `0` meaning "none", the same convention
//! GL itself uses. Raw enum values (blend factors, error codes, active texture
//! units) are the `glow` constants.

use std::fmt;

/// A GL object name. `0` is never a valid object.
pub type ObjectId = u32;

/// The "no object" name.
pub const NO_OBJECT: ObjectId = 0;

/// Number of texture units tracked by the standard state parts.
pub const TEXTURE_UNITS: u32 = 32;

/// Server-side capabilities toggled with enable/disable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Blend,
    ScissorTest,
    DepthTest,
    CullFace,
    StencilTest,
}

impl Capability {
    pub fn raw(self) -> u32 {
        match self {
            Self::Blend => glow::BLEND,
            Self::ScissorTest => glow::SCISSOR_TEST,
            Self::DepthTest => glow::DEPTH_TEST,
            Self::CullFace => glow::CULL_FACE,
            Self::StencilTest => glow::STENCIL_TEST,
        }
    }
}

/// Single-integer state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntParam {
    CurrentProgram,
    /// Returns `TEXTURE0 + unit`
    ActiveTexture,
    /// 2D texture bound to the active unit
    TextureBinding2D,
    VertexArrayBinding,
    ArrayBufferBinding,
    ElementArrayBufferBinding,
    FramebufferBinding,
    BlendSrc,
    BlendDst,
    /// `1` when depth writes are enabled
    DepthWriteMask,
    MajorVersion,
    MinorVersion,
    MaxTextureSize,
}

impl IntParam {
    pub fn raw(self) -> u32 {
        match self {
            Self::CurrentProgram => glow::CURRENT_PROGRAM,
            Self::ActiveTexture => glow::ACTIVE_TEXTURE,
            Self::TextureBinding2D => glow::TEXTURE_BINDING_2D,
            Self::VertexArrayBinding => glow::VERTEX_ARRAY_BINDING,
            Self::ArrayBufferBinding => glow::ARRAY_BUFFER_BINDING,
            Self::ElementArrayBufferBinding => glow::ELEMENT_ARRAY_BUFFER_BINDING,
            Self::FramebufferBinding => glow::FRAMEBUFFER_BINDING,
            Self::BlendSrc => glow::BLEND_SRC_RGB,
            Self::BlendDst => glow::BLEND_DST_RGB,
            Self::DepthWriteMask => glow::DEPTH_WRITEMASK,
            Self::MajorVersion => glow::MAJOR_VERSION,
            Self::MinorVersion => glow::MINOR_VERSION,
            Self::MaxTextureSize => glow::MAX_TEXTURE_SIZE,
        }
    }
}

/// Four-integer state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Int4Param {
    Viewport,
    ScissorBox,
}

impl Int4Param {
    pub fn raw(self) -> u32 {
        match self {
            Self::Viewport => glow::VIEWPORT,
            Self::ScissorBox => glow::SCISSOR_BOX,
        }
    }
}

/// Four-float state queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Float4Param {
    ColorClearValue,
}

impl Float4Param {
    pub fn raw(self) -> u32 {
        match self {
            Self::ColorClearValue => glow::COLOR_CLEAR_VALUE,
        }
    }
}

/// Driver identification strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringParam {
    Vendor,
    Renderer,
    Version,
}

impl StringParam {
    pub fn raw(self) -> u32 {
        match self {
            Self::Vendor => glow::VENDOR,
            Self::Renderer => glow::RENDERER,
            Self::Version => glow::VERSION,
        }
    }
}

/// Buffer binding points used by the quad geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
}

impl BufferTarget {
    pub fn raw(self) -> u32 {
        match self {
            Self::Array => glow::ARRAY_BUFFER,
            Self::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
        }
    }
}

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn raw(self) -> u32 {
        match self {
            Self::Vertex => glow::VERTEX_SHADER,
            Self::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => write!(f, "vertex"),
            Self::Fragment => write!(f, "fragment"),
        }
    }
}

/// Name of a framebuffer completeness status, `None` when complete.
pub fn framebuffer_status_name(status: u32) -> Option<&'static str> {
    match status {
        glow::FRAMEBUFFER_COMPLETE => None,
        glow::FRAMEBUFFER_UNSUPPORTED => Some("FRAMEBUFFER_UNSUPPORTED"),
        glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT => Some("FRAMEBUFFER_INCOMPLETE_ATTACHMENT"),
        glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => {
            Some("FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT")
        }
        glow::FRAMEBUFFER_INCOMPLETE_DRAW_BUFFER => Some("FRAMEBUFFER_INCOMPLETE_DRAW_BUFFER"),
        glow::FRAMEBUFFER_INCOMPLETE_READ_BUFFER => Some("FRAMEBUFFER_INCOMPLETE_READ_BUFFER"),
        glow::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => Some("FRAMEBUFFER_INCOMPLETE_MULTISAMPLE"),
        glow::FRAMEBUFFER_UNDEFINED => Some("FRAMEBUFFER_UNDEFINED"),
        _ => Some("FRAMEBUFFER_STATUS_UNKNOWN"),
    }
}

/// The OpenGL entry points used by the compositor.
///
/// Calls act on whichever real context is current on the calling thread.
/// Implementations must not be shared across threads; make a context current
/// through [`crate::ContextRegistry::activate`] before using its `Gl`.
///
/// Creation calls return `Err` with the driver's message when the driver
/// refuses to hand out a name. All other failures are left in the GL error
/// queue for [`Gl::get_error`], the same way GL reports them.
pub trait Gl {
    // -- state queries --
    fn is_enabled(&self, cap: Capability) -> bool;
    fn get_integer(&self, param: IntParam) -> i32;
    fn get_integer4(&self, param: Int4Param) -> [i32; 4];
    fn get_float4(&self, param: Float4Param) -> [f32; 4];
    fn get_string(&self, param: StringParam) -> String;
    /// Pops the oldest error, `glow::NO_ERROR` when none is pending.
    fn get_error(&self) -> u32;

    // -- fixed-function state --
    fn set_enabled(&self, cap: Capability, enabled: bool);
    fn blend_func(&self, src: u32, dst: u32);
    fn depth_mask(&self, enabled: bool);
    fn clear_color(&self, rgba: [f32; 4]);
    fn clear(&self, color: bool, depth: bool);
    fn viewport(&self, rect: [i32; 4]);
    fn scissor(&self, rect: [i32; 4]);

    // -- bindings --
    fn use_program(&self, program: ObjectId);
    /// Takes the raw enum, `glow::TEXTURE0 + unit`
    fn active_texture(&self, unit: u32);
    fn bind_texture_2d(&self, texture: ObjectId);
    fn bind_vertex_array(&self, vertex_array: ObjectId);
    fn bind_buffer(&self, target: BufferTarget, buffer: ObjectId);
    fn bind_framebuffer(&self, framebuffer: ObjectId);

    // -- textures --
    fn gen_texture(&self) -> Result<ObjectId, String>;
    /// Allocates uninitialised RGBA8 storage for the bound 2D texture.
    fn tex_image_rgba(&self, width: i32, height: i32);
    /// Linear min/mag filtering, clamp-to-edge wrapping on the bound texture.
    fn tex_linear_clamp(&self);
    fn delete_texture(&self, texture: ObjectId);

    // -- framebuffers --
    fn gen_framebuffer(&self) -> Result<ObjectId, String>;
    /// Attaches a texture as color attachment 0 of the bound framebuffer.
    fn framebuffer_color_texture(&self, texture: ObjectId);
    fn framebuffer_status(&self) -> u32;
    fn delete_framebuffer(&self, framebuffer: ObjectId);

    // -- shaders and programs --
    fn create_shader(&self, stage: ShaderStage) -> Result<ObjectId, String>;
    fn compile_shader(&self, shader: ObjectId, source: &str);
    fn shader_compiled(&self, shader: ObjectId) -> bool;
    fn shader_info_log(&self, shader: ObjectId) -> String;
    fn delete_shader(&self, shader: ObjectId);
    fn create_program(&self) -> Result<ObjectId, String>;
    fn attach_shader(&self, program: ObjectId, shader: ObjectId);
    fn bind_attrib_location(&self, program: ObjectId, index: u32, name: &str);
    fn link_program(&self, program: ObjectId);
    fn program_linked(&self, program: ObjectId) -> bool;
    fn program_info_log(&self, program: ObjectId) -> String;
    fn delete_program(&self, program: ObjectId);
    fn uniform_location(&self, program: ObjectId, name: &str) -> Option<u32>;
    /// Uniform uploads target the program in use.
    fn uniform_2f(&self, location: u32, x: f32, y: f32);
    fn uniform_1i(&self, location: u32, value: i32);

    // -- geometry --
    fn gen_vertex_array(&self) -> Result<ObjectId, String>;
    fn delete_vertex_array(&self, vertex_array: ObjectId);
    fn gen_buffer(&self) -> Result<ObjectId, String>;
    /// Uploads static data to the buffer bound at `target`.
    fn buffer_data(&self, target: BufferTarget, data: &[u8]);
    fn delete_buffer(&self, buffer: ObjectId);
    fn enable_vertex_attrib(&self, index: u32);
    fn vertex_attrib_f32(&self, index: u32, size: i32, stride: i32, offset: i32);
    /// Draws `count` indices of `u8` type from the bound element buffer as triangles.
    fn draw_elements_u8(&self, count: i32);

    // -- synchronisation --
    fn flush(&self);
    fn finish(&self);
}
