//! GL State Snapshots - leave-no-trace wrappers around foreign rendering
//!
//! A [`StateSnapshot`] is an ordered list of [`StatePart`]s. `backup` reads
//! every part in declaration order into one fixed-size buffer, `restore`
//! writes them back in exactly the reverse order.
//!
//! The reverse order is load-bearing: some setters disturb other parts. The
//! per-unit texture parts switch the active texture unit, so they must be
//! declared after [`StatePart::active_texture`] so the active unit is restored
//! last. The element buffer binding belongs to the bound vertex array, so
//! [`StatePart::element_array_buffer`] must be declared before
//! [`StatePart::vertex_array`].

use crate::gl::{Capability, Float4Param, Gl, Int4Param, IntParam, BufferTarget};
use bytemuck::Pod;
use std::fmt;
use std::mem;
use tracing::warn;

/// A value that can be stored in a snapshot buffer.
///
/// Values are kept in their plain-old-data form, so a snapshot buffer is
/// just the parts' raw bytes back to back.
pub trait StateValue: Copy + 'static {
    type Raw: Pod;

    fn into_raw(self) -> Self::Raw;
    fn from_raw(raw: Self::Raw) -> Self;
}

macro_rules! pod_state_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl StateValue for $ty {
                type Raw = $ty;

                fn into_raw(self) -> $ty {
                    self
                }

                fn from_raw(raw: $ty) -> Self {
                    raw
                }
            }
        )*
    };
}

pod_state_value!(i32, u32, f32, [i32; 2], [i32; 4], [f32; 4]);

// GL booleans travel as 32-bit words
impl StateValue for bool {
    type Raw = u32;

    fn into_raw(self) -> u32 {
        u32::from(self)
    }

    fn from_raw(raw: u32) -> Self {
        raw != 0
    }
}

type Backup = Box<dyn Fn(&dyn Gl, &mut [u8]) + Send + Sync>;
type Restore = Box<dyn Fn(&dyn Gl, &[u8]) + Send + Sync>;

/// How to read and write one orthogonal piece of GL state.
pub struct StatePart {
    name: String,
    size: usize,
    backup: Backup,
    restore: Restore,
}

impl StatePart {
    /// A typed getter/setter pair.
    ///
    /// Composite parts are values of array type: one getter may batch several
    /// raw queries (`[i32; 2]` for a blend function, `[i32; 4]` for a
    /// viewport) behind a single backup/restore.
    pub fn value<T, G, S>(name: impl Into<String>, get: G, set: S) -> Self
    where
        T: StateValue,
        G: Fn(&dyn Gl) -> T + Send + Sync + 'static,
        S: Fn(&dyn Gl, T) + Send + Sync + 'static,
    {
        let name = name.into();
        let label = name.clone();
        Self {
            name,
            size: mem::size_of::<T::Raw>(),
            backup: Box::new(move |gl, out| {
                out.copy_from_slice(bytemuck::bytes_of(&get(gl).into_raw()));
            }),
            restore: Box::new(move |gl, buf| match bytemuck::try_pod_read_unaligned(buf) {
                Ok(raw) => set(gl, T::from_raw(raw)),
                Err(e) => warn!(part = %label, "skipping restore of malformed value: {}", e),
            }),
        }
    }

    /// An enable/disable capability bit.
    pub fn flag(cap: Capability) -> Self {
        Self::value(
            format!("{:?}", cap),
            move |gl| gl.is_enabled(cap),
            move |gl, enabled| gl.set_enabled(cap, enabled),
        )
    }

    pub fn blend() -> Self {
        Self::flag(Capability::Blend)
    }

    pub fn scissor_test() -> Self {
        Self::flag(Capability::ScissorTest)
    }

    pub fn depth_test() -> Self {
        Self::flag(Capability::DepthTest)
    }

    pub fn cull_face() -> Self {
        Self::flag(Capability::CullFace)
    }

    pub fn blend_func() -> Self {
        Self::value(
            "BlendFunc",
            |gl| {
                [
                    gl.get_integer(IntParam::BlendSrc),
                    gl.get_integer(IntParam::BlendDst),
                ]
            },
            |gl, [src, dst]: [i32; 2]| gl.blend_func(src as u32, dst as u32),
        )
    }

    pub fn shader_program() -> Self {
        Self::value(
            "ShaderProgram",
            |gl| gl.get_integer(IntParam::CurrentProgram),
            |gl, v: i32| gl.use_program(v as u32),
        )
    }

    /// Must be declared before any [`StatePart::texture_2d`] part.
    pub fn active_texture() -> Self {
        Self::value(
            "ActiveTexture",
            |gl| gl.get_integer(IntParam::ActiveTexture),
            |gl, v: i32| gl.active_texture(v as u32),
        )
    }

    /// The 2D texture bound to texture unit `unit`.
    ///
    /// Both directions switch the active unit as a side effect.
    pub fn texture_2d(unit: u32) -> Self {
        Self::value(
            format!("Texture2D[{}]", unit),
            move |gl| {
                gl.active_texture(glow::TEXTURE0 + unit);
                gl.get_integer(IntParam::TextureBinding2D)
            },
            move |gl, v: i32| {
                gl.active_texture(glow::TEXTURE0 + unit);
                gl.bind_texture_2d(v as u32);
            },
        )
    }

    pub fn vertex_array() -> Self {
        Self::value(
            "VertexArray",
            |gl| gl.get_integer(IntParam::VertexArrayBinding),
            |gl, v: i32| gl.bind_vertex_array(v as u32),
        )
    }

    pub fn array_buffer() -> Self {
        Self::value(
            "ArrayBuffer",
            |gl| gl.get_integer(IntParam::ArrayBufferBinding),
            |gl, v: i32| gl.bind_buffer(BufferTarget::Array, v as u32),
        )
    }

    /// Must be declared before [`StatePart::vertex_array`].
    pub fn element_array_buffer() -> Self {
        Self::value(
            "ElementArrayBuffer",
            |gl| gl.get_integer(IntParam::ElementArrayBufferBinding),
            |gl, v: i32| gl.bind_buffer(BufferTarget::ElementArray, v as u32),
        )
    }

    pub fn framebuffer() -> Self {
        Self::value(
            "Framebuffer",
            |gl| gl.get_integer(IntParam::FramebufferBinding),
            |gl, v: i32| gl.bind_framebuffer(v as u32),
        )
    }

    pub fn depth_mask() -> Self {
        Self::value(
            "DepthMask",
            |gl| gl.get_integer(IntParam::DepthWriteMask) != 0,
            |gl, v: bool| gl.depth_mask(v),
        )
    }

    pub fn clear_color() -> Self {
        Self::value(
            "ClearColor",
            |gl| gl.get_float4(Float4Param::ColorClearValue),
            |gl, v: [f32; 4]| gl.clear_color(v),
        )
    }

    pub fn viewport() -> Self {
        Self::value(
            "Viewport",
            |gl| gl.get_integer4(Int4Param::Viewport),
            |gl, v: [i32; 4]| gl.viewport(v),
        )
    }

    pub fn scissor_box() -> Self {
        Self::value(
            "ScissorBox",
            |gl| gl.get_integer4(Int4Param::ScissorBox),
            |gl, v: [i32; 4]| gl.scissor(v),
        )
    }

    /// Part name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Read the current value, encoded.
    pub fn read(&self, gl: &dyn Gl) -> Vec<u8> {
        let mut out = vec![0; self.size];
        (self.backup)(gl, &mut out);
        out
    }

    /// Write an encoded value back.
    pub fn write(&self, gl: &dyn Gl, encoded: &[u8]) {
        (self.restore)(gl, encoded)
    }
}

impl fmt::Debug for StatePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatePart")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

/// An ordered set of state parts with one preallocated buffer.
#[derive(Debug)]
pub struct StateSnapshot {
    parts: Vec<StatePart>,
    /// Byte offset of each part in `buf`
    offsets: Vec<usize>,
    buf: Vec<u8>,
    saved: bool,
}

impl StateSnapshot {
    /// Build a snapshot over `parts`, in backup order.
    pub fn new(parts: Vec<StatePart>) -> Self {
        let mut offsets = Vec::with_capacity(parts.len());
        let mut size = 0;
        for part in &parts {
            offsets.push(size);
            size += part.size;
        }

        Self {
            parts,
            offsets,
            buf: vec![0; size],
            saved: false,
        }
    }

    /// State touched when compositing an offscreen surface onto a target.
    pub fn compositing() -> Self {
        Self::new(vec![
            StatePart::blend(),
            StatePart::blend_func(),
            StatePart::depth_test(),
            StatePart::shader_program(),
            StatePart::active_texture(),
            StatePart::texture_2d(0),
            StatePart::element_array_buffer(),
            StatePart::vertex_array(),
            StatePart::array_buffer(),
            StatePart::viewport(),
        ])
    }

    /// State touched when a pane blits itself into the toolkit's target.
    pub fn pane() -> Self {
        Self::new(vec![
            StatePart::blend(),
            StatePart::blend_func(),
            StatePart::shader_program(),
            StatePart::active_texture(),
            StatePart::texture_2d(0),
            StatePart::vertex_array(),
            StatePart::array_buffer(),
        ])
    }

    /// Total buffer size in bytes.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn parts(&self) -> &[StatePart] {
        &self.parts
    }

    /// Capture every part, in declaration order.
    pub fn backup(&mut self, gl: &dyn Gl) {
        for (part, &offset) in self.parts.iter().zip(&self.offsets) {
            (part.backup)(gl, &mut self.buf[offset..offset + part.size]);
        }
        self.saved = true;
    }

    /// Write every part back, in reverse declaration order.
    ///
    /// Does nothing if `backup` was never called.
    pub fn restore(&self, gl: &dyn Gl) {
        if !self.saved {
            return;
        }
        for (part, &offset) in self.parts.iter().zip(&self.offsets).rev() {
            (part.restore)(gl, &self.buf[offset..offset + part.size]);
        }
    }

    /// Run `f` between a backup and a restore.
    pub fn scoped<R>(&mut self, gl: &dyn Gl, f: impl FnOnce(&dyn Gl) -> R) -> R {
        self.backup(gl);
        let result = f(gl);
        self.restore(gl);
        result
    }
}
