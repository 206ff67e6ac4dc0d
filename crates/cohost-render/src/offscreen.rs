//! Offscreen Surface - texture-backed render target with a compositing draw
//!
//! An [`OffscreenSurface`] is a framebuffer object with one RGBA color
//! texture. Something (the toolkit, a pane callback) draws into it between
//! [`OffscreenSurface::bind`] and [`OffscreenSurface::unbind`], then the
//! surface is drawn into whatever framebuffer is bound with
//! [`OffscreenSurface::render`].
//!
//! The surface only stores object names, so it can be moved across threads
//! with the rest of the window hierarchy; every GL operation takes the
//! current context as a parameter.

use crate::color::Color;
use crate::context::{ActiveContext, ContextError, ContextId, ContextRegistry};
use crate::error::RenderError;
use crate::gl::{framebuffer_status_name, Gl, Int4Param, IntParam, ObjectId, NO_OBJECT};
use crate::quad::{QuadShader, QuadUniforms, SurfaceQuad};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Max errors drained before allocating, in case the queue never empties
const ERROR_DRAIN_LIMIT: usize = 32;

/// Destination rectangle in pixels, relative to the current viewport's
/// origin, bottom-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// A framebuffer + texture pair plus per-context compositing quads.
#[derive(Debug)]
pub struct OffscreenSurface {
    /// Context the buffers were created in
    context: ContextId,
    framebuffer: ObjectId,
    texture: ObjectId,
    width: i32,
    height: i32,
    clear_new_buffers: bool,
    quads: HashMap<ContextId, SurfaceQuad>,
}

impl OffscreenSurface {
    /// Allocate a `width` x `height` surface in the active context.
    ///
    /// Fails with [`RenderError::InvalidSize`] for a surface with no area.
    pub fn new(
        active: &ActiveContext,
        width: i32,
        height: i32,
        clear_new_buffers: bool,
    ) -> Result<Self, RenderError> {
        if width <= 0 || height <= 0 {
            return Err(RenderError::InvalidSize { width, height });
        }

        let gl = active.gl();
        let framebuffer = gl
            .gen_framebuffer()
            .map_err(RenderError::creation("framebuffer"))?;

        let mut surface = Self {
            context: active.id(),
            framebuffer,
            texture: NO_OBJECT,
            width: 0,
            height: 0,
            clear_new_buffers,
            quads: HashMap::new(),
        };

        if let Err(e) = surface.allocate(gl, width, height) {
            gl.delete_framebuffer(framebuffer);
            return Err(e);
        }
        Ok(surface)
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn framebuffer(&self) -> ObjectId {
        self.framebuffer
    }

    pub fn texture(&self) -> ObjectId {
        self.texture
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    /// Reallocate the color texture at a new size.
    ///
    /// Returns `Ok(false)` when nothing was reallocated: the size is
    /// unchanged, or non-positive (the last valid buffer is kept). On error
    /// the previous texture stays attached.
    pub fn resize(&mut self, gl: &dyn Gl, width: i32, height: i32) -> Result<bool, RenderError> {
        if width <= 0 || height <= 0 {
            debug!(width, height, "skipping resize to empty surface");
            return Ok(false);
        }
        if width == self.width && height == self.height {
            return Ok(false);
        }
        self.allocate(gl, width, height)?;
        Ok(true)
    }

    /// Attach a new texture, then drop the old one.
    fn allocate(&mut self, gl: &dyn Gl, width: i32, height: i32) -> Result<(), RenderError> {
        let prev_framebuffer = gl.get_integer(IntParam::FramebufferBinding) as ObjectId;
        let prev_texture = gl.get_integer(IntParam::TextureBinding2D) as ObjectId;

        let result = self.attach_new_texture(gl, width, height);

        gl.bind_texture_2d(prev_texture);
        gl.bind_framebuffer(prev_framebuffer);

        let texture = result?;
        if self.texture != NO_OBJECT {
            gl.delete_texture(self.texture);
        }
        debug!(
            framebuffer = self.framebuffer,
            texture,
            "surface resized {}x{} -> {}x{}",
            self.width,
            self.height,
            width,
            height
        );
        self.texture = texture;
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn attach_new_texture(&self, gl: &dyn Gl, width: i32, height: i32) -> Result<ObjectId, RenderError> {
        let texture = create_texture(gl, width, height)?;

        gl.bind_framebuffer(self.framebuffer);
        gl.framebuffer_color_texture(texture);
        if let Some(status) = framebuffer_status_name(gl.framebuffer_status()) {
            // Put the old texture back so the surface stays usable
            gl.framebuffer_color_texture(self.texture);
            gl.delete_texture(texture);
            return Err(RenderError::FramebufferIncomplete {
                framebuffer: self.framebuffer,
                texture,
                status,
            });
        }

        if self.clear_new_buffers {
            let prev_clear = gl.get_float4(crate::gl::Float4Param::ColorClearValue);
            gl.clear_color(Color::TRANSPARENT.to_array());
            gl.clear(true, false);
            gl.clear_color(prev_clear);
        }
        Ok(texture)
    }

    /// Bind this surface's framebuffer for drawing, returning the framebuffer
    /// that was bound before.
    pub fn bind(&self, gl: &dyn Gl) -> ObjectId {
        let prev = gl.get_integer(IntParam::FramebufferBinding) as ObjectId;
        gl.bind_framebuffer(self.framebuffer);
        prev
    }

    /// Restore the framebuffer returned by [`OffscreenSurface::bind`].
    pub fn unbind(&self, gl: &dyn Gl, prev: ObjectId) {
        gl.bind_framebuffer(prev);
    }

    /// Draw the surface texture into `dest` of the bound framebuffer.
    ///
    /// `yflip` flips the texture vertically. Uses texture unit 0 and leaves
    /// the quad's vertex array and the shader bound; callers that must leave
    /// no trace wrap this in a [`crate::StateSnapshot`].
    pub fn render(
        &mut self,
        active: &ActiveContext,
        shader: &QuadShader,
        dest: Rect,
        yflip: bool,
    ) -> Result<(), RenderError> {
        if dest.is_empty() {
            return Ok(());
        }
        let gl = active.gl();

        let stale = self
            .quads
            .get(&active.id())
            .is_some_and(|quad| !quad.matches_size(self.width, self.height));
        if stale {
            if let Some(old) = self.quads.remove(&active.id()) {
                debug!(context = %active.id(), "rebuilding stale surface quad");
                old.delete(gl);
            }
        }
        if !self.quads.contains_key(&active.id()) {
            let quad = SurfaceQuad::new(gl, self.width, self.height)?;
            self.quads.insert(active.id(), quad);
        }

        let [_, _, target_w, target_h] = gl.get_integer4(Int4Param::Viewport);
        gl.active_texture(glow::TEXTURE0);
        gl.bind_texture_2d(self.texture);
        shader.bind(
            gl,
            &QuadUniforms {
                view_pos: [dest.x as f32, dest.y as f32],
                view_size: [dest.width as f32, dest.height as f32],
                quad_size: [self.width as f32, self.height as f32],
                target_size: [target_w as f32, target_h as f32],
                yflip,
            },
        );
        if let Some(quad) = self.quads.get(&active.id()) {
            quad.draw(gl);
        }
        Ok(())
    }

    /// Contexts holding a compositing quad for this surface.
    pub fn quad_contexts(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.quads.keys().copied()
    }

    /// Free the quad built for `context`. It must be the active context.
    pub fn release_quad(&mut self, active: &ActiveContext) {
        if let Some(quad) = self.quads.remove(&active.id()) {
            quad.delete(active.gl());
        }
    }

    /// Free every quad, then the texture and framebuffer.
    ///
    /// Each quad is deleted in its own context; the buffers are deleted in
    /// the creating context, or in whichever context is active if that one is
    /// gone. Quads whose context was already released died with it.
    pub fn release(mut self, registry: &mut ContextRegistry) -> Result<(), ContextError> {
        let mut contexts: Vec<ContextId> = self.quads.keys().copied().collect();
        contexts.sort();
        for id in contexts {
            if !registry.contains(id) {
                self.quads.remove(&id);
                continue;
            }
            let active = registry.activate(id)?;
            self.release_quad(&active);
        }

        let owner = if registry.contains(self.context) {
            Some(self.context)
        } else {
            registry.active()
        };
        match owner {
            Some(id) => {
                let active = registry.activate(id)?;
                let gl = active.gl();
                gl.delete_texture(self.texture);
                gl.delete_framebuffer(self.framebuffer);
                debug!(framebuffer = self.framebuffer, texture = self.texture, "surface released");
            }
            None => warn!(
                framebuffer = self.framebuffer,
                "no live context to release surface buffers in"
            ),
        }
        Ok(())
    }
}

/// Allocate an RGBA texture, reporting allocation failure with the size.
fn create_texture(gl: &dyn Gl, width: i32, height: i32) -> Result<ObjectId, RenderError> {
    // Stale errors from foreign code must not be blamed on this allocation
    for _ in 0..ERROR_DRAIN_LIMIT {
        if gl.get_error() == glow::NO_ERROR {
            break;
        }
    }

    let texture = gl.gen_texture().map_err(RenderError::creation("texture"))?;
    gl.bind_texture_2d(texture);
    gl.tex_linear_clamp();
    gl.tex_image_rgba(width, height);

    let code = gl.get_error();
    if code != glow::NO_ERROR {
        gl.delete_texture(texture);
        return Err(RenderError::TextureAllocation {
            width,
            height,
            code,
        });
    }
    Ok(texture)
}
