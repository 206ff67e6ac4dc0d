//! Glow Backend - [`Gl`] over a real driver via `glow`
//!
//! A `GlowGl` wraps one loaded `glow::Context`. Like every GL function table
//! it acts on whichever real context is current on the calling thread; the
//! [`crate::ContextRegistry`] makes sure that is the right one.

use crate::gl::{
    BufferTarget, Capability, Float4Param, Gl, Int4Param, IntParam, ObjectId, ShaderStage,
    StringParam, NO_OBJECT,
};
use glow::HasContext;
use std::num::NonZeroU32;

/// GL entry points loaded from the platform's `get_proc_address`.
pub struct GlowGl {
    gl: glow::Context,
}

impl GlowGl {
    pub fn new(gl: glow::Context) -> Self {
        Self { gl }
    }

    /// Load entry points with the platform's loader.
    ///
    /// # Safety
    ///
    /// A real context must be current and `loader` must return valid
    /// function pointers for it.
    pub unsafe fn from_loader<F>(loader: F) -> Self
    where
        F: FnMut(&str) -> *const std::os::raw::c_void,
    {
        Self::new(glow::Context::from_loader_function(loader))
    }

    pub fn inner(&self) -> &glow::Context {
        &self.gl
    }
}

fn nz(id: ObjectId) -> Option<NonZeroU32> {
    NonZeroU32::new(id)
}

fn texture(id: ObjectId) -> Option<glow::NativeTexture> {
    nz(id).map(glow::NativeTexture)
}

fn framebuffer(id: ObjectId) -> Option<glow::NativeFramebuffer> {
    nz(id).map(glow::NativeFramebuffer)
}

fn buffer(id: ObjectId) -> Option<glow::NativeBuffer> {
    nz(id).map(glow::NativeBuffer)
}

fn vertex_array(id: ObjectId) -> Option<glow::NativeVertexArray> {
    nz(id).map(glow::NativeVertexArray)
}

fn program(id: ObjectId) -> Option<glow::NativeProgram> {
    nz(id).map(glow::NativeProgram)
}

fn shader(id: ObjectId) -> Option<glow::NativeShader> {
    nz(id).map(glow::NativeShader)
}

// SAFETY (all blocks below): the registry only hands out a `GlowGl` together
// with its context made current, and every object name passed in was
// created by this share group.
impl Gl for GlowGl {
    fn is_enabled(&self, cap: Capability) -> bool {
        unsafe { self.gl.is_enabled(cap.raw()) }
    }

    fn get_integer(&self, param: IntParam) -> i32 {
        unsafe { self.gl.get_parameter_i32(param.raw()) }
    }

    fn get_integer4(&self, param: Int4Param) -> [i32; 4] {
        let mut out = [0; 4];
        unsafe { self.gl.get_parameter_i32_slice(param.raw(), &mut out) };
        out
    }

    fn get_float4(&self, param: Float4Param) -> [f32; 4] {
        let mut out = [0.0; 4];
        unsafe { self.gl.get_parameter_f32_slice(param.raw(), &mut out) };
        out
    }

    fn get_string(&self, param: StringParam) -> String {
        unsafe { self.gl.get_parameter_string(param.raw()) }
    }

    fn get_error(&self) -> u32 {
        unsafe { self.gl.get_error() }
    }

    fn set_enabled(&self, cap: Capability, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(cap.raw());
            } else {
                self.gl.disable(cap.raw());
            }
        }
    }

    fn blend_func(&self, src: u32, dst: u32) {
        unsafe { self.gl.blend_func(src, dst) }
    }

    fn depth_mask(&self, enabled: bool) {
        unsafe { self.gl.depth_mask(enabled) }
    }

    fn clear_color(&self, [r, g, b, a]: [f32; 4]) {
        unsafe { self.gl.clear_color(r, g, b, a) }
    }

    fn clear(&self, color: bool, depth: bool) {
        let mut mask = 0;
        if color {
            mask |= glow::COLOR_BUFFER_BIT;
        }
        if depth {
            mask |= glow::DEPTH_BUFFER_BIT;
        }
        if mask != 0 {
            unsafe { self.gl.clear(mask) }
        }
    }

    fn viewport(&self, [x, y, w, h]: [i32; 4]) {
        unsafe { self.gl.viewport(x, y, w, h) }
    }

    fn scissor(&self, [x, y, w, h]: [i32; 4]) {
        unsafe { self.gl.scissor(x, y, w, h) }
    }

    fn use_program(&self, id: ObjectId) {
        unsafe { self.gl.use_program(program(id)) }
    }

    fn active_texture(&self, unit: u32) {
        unsafe { self.gl.active_texture(unit) }
    }

    fn bind_texture_2d(&self, id: ObjectId) {
        unsafe { self.gl.bind_texture(glow::TEXTURE_2D, texture(id)) }
    }

    fn bind_vertex_array(&self, id: ObjectId) {
        unsafe { self.gl.bind_vertex_array(vertex_array(id)) }
    }

    fn bind_buffer(&self, target: BufferTarget, id: ObjectId) {
        unsafe { self.gl.bind_buffer(target.raw(), buffer(id)) }
    }

    fn bind_framebuffer(&self, id: ObjectId) {
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer(id)) }
    }

    fn gen_texture(&self) -> Result<ObjectId, String> {
        unsafe { self.gl.create_texture().map(|t| t.0.get()) }
    }

    fn tex_image_rgba(&self, width: i32, height: i32) {
        unsafe {
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                width,
                height,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );
        }
    }

    fn tex_linear_clamp(&self) {
        let params = [
            (glow::TEXTURE_MIN_FILTER, glow::LINEAR),
            (glow::TEXTURE_MAG_FILTER, glow::LINEAR),
            (glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE),
            (glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE),
        ];
        for (name, value) in params {
            unsafe { self.gl.tex_parameter_i32(glow::TEXTURE_2D, name, value as i32) }
        }
    }

    fn delete_texture(&self, id: ObjectId) {
        if let Some(t) = texture(id) {
            unsafe { self.gl.delete_texture(t) }
        }
    }

    fn gen_framebuffer(&self) -> Result<ObjectId, String> {
        unsafe { self.gl.create_framebuffer().map(|f| f.0.get()) }
    }

    fn framebuffer_color_texture(&self, id: ObjectId) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                texture(id),
                0,
            );
        }
    }

    fn framebuffer_status(&self) -> u32 {
        unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) }
    }

    fn delete_framebuffer(&self, id: ObjectId) {
        if let Some(f) = framebuffer(id) {
            unsafe { self.gl.delete_framebuffer(f) }
        }
    }

    fn create_shader(&self, stage: ShaderStage) -> Result<ObjectId, String> {
        unsafe { self.gl.create_shader(stage.raw()).map(|s| s.0.get()) }
    }

    fn compile_shader(&self, id: ObjectId, source: &str) {
        if let Some(s) = shader(id) {
            unsafe {
                self.gl.shader_source(s, source);
                self.gl.compile_shader(s);
            }
        }
    }

    fn shader_compiled(&self, id: ObjectId) -> bool {
        shader(id).is_some_and(|s| unsafe { self.gl.get_shader_compile_status(s) })
    }

    fn shader_info_log(&self, id: ObjectId) -> String {
        shader(id)
            .map(|s| unsafe { self.gl.get_shader_info_log(s) })
            .unwrap_or_default()
    }

    fn delete_shader(&self, id: ObjectId) {
        if let Some(s) = shader(id) {
            unsafe { self.gl.delete_shader(s) }
        }
    }

    fn create_program(&self) -> Result<ObjectId, String> {
        unsafe { self.gl.create_program().map(|p| p.0.get()) }
    }

    fn attach_shader(&self, program_id: ObjectId, shader_id: ObjectId) {
        if let (Some(p), Some(s)) = (program(program_id), shader(shader_id)) {
            unsafe { self.gl.attach_shader(p, s) }
        }
    }

    fn bind_attrib_location(&self, id: ObjectId, index: u32, name: &str) {
        if let Some(p) = program(id) {
            unsafe { self.gl.bind_attrib_location(p, index, name) }
        }
    }

    fn link_program(&self, id: ObjectId) {
        if let Some(p) = program(id) {
            unsafe { self.gl.link_program(p) }
        }
    }

    fn program_linked(&self, id: ObjectId) -> bool {
        program(id).is_some_and(|p| unsafe { self.gl.get_program_link_status(p) })
    }

    fn program_info_log(&self, id: ObjectId) -> String {
        program(id)
            .map(|p| unsafe { self.gl.get_program_info_log(p) })
            .unwrap_or_default()
    }

    fn delete_program(&self, id: ObjectId) {
        if let Some(p) = program(id) {
            unsafe { self.gl.delete_program(p) }
        }
    }

    fn uniform_location(&self, id: ObjectId, name: &str) -> Option<u32> {
        let p = program(id)?;
        unsafe { self.gl.get_uniform_location(p, name) }.map(|loc| loc.0)
    }

    fn uniform_2f(&self, location: u32, x: f32, y: f32) {
        let loc = glow::NativeUniformLocation(location);
        unsafe { self.gl.uniform_2_f32(Some(&loc), x, y) }
    }

    fn uniform_1i(&self, location: u32, value: i32) {
        let loc = glow::NativeUniformLocation(location);
        unsafe { self.gl.uniform_1_i32(Some(&loc), value) }
    }

    fn gen_vertex_array(&self) -> Result<ObjectId, String> {
        unsafe { self.gl.create_vertex_array().map(|v| v.0.get()) }
    }

    fn delete_vertex_array(&self, id: ObjectId) {
        if let Some(v) = vertex_array(id) {
            unsafe { self.gl.delete_vertex_array(v) }
        }
    }

    fn gen_buffer(&self) -> Result<ObjectId, String> {
        unsafe { self.gl.create_buffer().map(|b| b.0.get()) }
    }

    fn buffer_data(&self, target: BufferTarget, data: &[u8]) {
        unsafe {
            self.gl
                .buffer_data_u8_slice(target.raw(), data, glow::STATIC_DRAW)
        }
    }

    fn delete_buffer(&self, id: ObjectId) {
        if let Some(b) = buffer(id) {
            unsafe { self.gl.delete_buffer(b) }
        }
    }

    fn enable_vertex_attrib(&self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) }
    }

    fn vertex_attrib_f32(&self, index: u32, size: i32, stride: i32, offset: i32) {
        unsafe {
            self.gl
                .vertex_attrib_pointer_f32(index, size, glow::FLOAT, false, stride, offset)
        }
    }

    fn draw_elements_u8(&self, count: i32) {
        unsafe {
            self.gl
                .draw_elements(glow::TRIANGLES, count, glow::UNSIGNED_BYTE, 0)
        }
    }

    fn flush(&self) {
        unsafe { self.gl.flush() }
    }

    fn finish(&self) {
        unsafe { self.gl.finish() }
    }
}

impl std::fmt::Debug for GlowGl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowGl").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_names_map_to_none() {
        assert!(texture(NO_OBJECT).is_none());
        assert!(framebuffer(NO_OBJECT).is_none());
        assert_eq!(texture(7).map(|t| t.0.get()), Some(7));
    }
}
