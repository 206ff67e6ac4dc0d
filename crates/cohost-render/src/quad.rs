//! Surface Quad - textured quad and shader used to composite surfaces
//!
//! One [`QuadShader`] is compiled per logical context and shared by every
//! surface drawn from it. Each surface keeps its own [`SurfaceQuad`] per
//! context, since vertex arrays are not shared between real contexts.

use crate::error::{number_lines, RenderError};
use crate::gl::{BufferTarget, Gl, ObjectId, ShaderStage};
use bytemuck::{Pod, Zeroable};
use tracing::debug;

/// Vertex attribute slot of `inPos`
pub const ATTRIB_POSITION: u32 = 0;
/// Vertex attribute slot of `inTexCoord`
pub const ATTRIB_TEX_COORD: u32 = 1;

const VERTEX_SOURCE: &str = include_str!("shaders/quad.vert");
const FRAGMENT_SOURCE: &str = include_str!("shaders/quad.frag");

const INDICES: [u8; 6] = [0, 1, 2, 0, 2, 3];

/// GLSL flavour the quad shader is compiled as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GlslDialect {
    /// `#version 120`, compatibility contexts
    #[default]
    Legacy,
    /// `#version 150`, core profile contexts
    Core,
}

impl GlslDialect {
    fn prelude(self, stage: ShaderStage) -> &'static str {
        match (self, stage) {
            (Self::Legacy, _) => "#version 120\n",
            (Self::Core, ShaderStage::Vertex) => {
                "#version 150\n#define attribute in\n#define varying out\n"
            }
            (Self::Core, ShaderStage::Fragment) => concat!(
                "#version 150\n#define varying in\n#define texture2D texture\n",
                "out vec4 fragColor;\n#define gl_FragColor fragColor\n"
            ),
        }
    }
}

/// A vertex of the compositing quad
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    /// Surface pixels
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

impl QuadVertex {
    const STRIDE: i32 = std::mem::size_of::<QuadVertex>() as i32;
    const TEX_COORD_OFFSET: i32 = std::mem::size_of::<[f32; 2]>() as i32;

    /// Corners of a `width` x `height` quad, counter-clockwise from the origin.
    pub fn corners(width: f32, height: f32) -> [QuadVertex; 4] {
        [
            QuadVertex { position: [0.0, 0.0], tex_coord: [0.0, 0.0] },
            QuadVertex { position: [width, 0.0], tex_coord: [1.0, 0.0] },
            QuadVertex { position: [width, height], tex_coord: [1.0, 1.0] },
            QuadVertex { position: [0.0, height], tex_coord: [0.0, 1.0] },
        ]
    }
}

/// Uniform values for one composite draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadUniforms {
    /// Destination origin in target pixels, bottom-up
    pub view_pos: [f32; 2],
    pub view_size: [f32; 2],
    /// Size the quad geometry was built at
    pub quad_size: [f32; 2],
    /// Size of the current viewport
    pub target_size: [f32; 2],
    pub yflip: bool,
}

/// Linked compositing program and its uniform locations.
#[derive(Debug, Clone, Copy)]
pub struct QuadShader {
    program: ObjectId,
    view_pos: Option<u32>,
    view_size: Option<u32>,
    quad_size: Option<u32>,
    target_size: Option<u32>,
    yflip: Option<u32>,
    texture: Option<u32>,
}

impl QuadShader {
    /// Compile and link the built-in quad shader.
    pub fn compile(gl: &dyn Gl, dialect: GlslDialect) -> Result<Self, RenderError> {
        Self::compile_sources(gl, dialect, VERTEX_SOURCE, FRAGMENT_SOURCE)
    }

    /// Compile and link a quad shader from custom sources using the same
    /// attribute and uniform names.
    pub fn compile_sources(
        gl: &dyn Gl,
        dialect: GlslDialect,
        vertex: &str,
        fragment: &str,
    ) -> Result<Self, RenderError> {
        let vs = compile_stage(gl, dialect, ShaderStage::Vertex, vertex)?;
        let fs = match compile_stage(gl, dialect, ShaderStage::Fragment, fragment) {
            Ok(fs) => fs,
            Err(e) => {
                gl.delete_shader(vs);
                return Err(e);
            }
        };

        let program = match gl.create_program() {
            Ok(program) => program,
            Err(message) => {
                gl.delete_shader(vs);
                gl.delete_shader(fs);
                return Err(RenderError::creation("program")(message));
            }
        };
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.bind_attrib_location(program, ATTRIB_POSITION, "inPos");
        gl.bind_attrib_location(program, ATTRIB_TEX_COORD, "inTexCoord");
        gl.link_program(program);

        // The program keeps the stages alive once linked
        gl.delete_shader(vs);
        gl.delete_shader(fs);

        if !gl.program_linked(program) {
            let log = gl.program_info_log(program);
            gl.delete_program(program);
            return Err(RenderError::ProgramLink { log });
        }

        debug!(program, "quad shader linked");

        Ok(Self {
            program,
            view_pos: gl.uniform_location(program, "viewPos"),
            view_size: gl.uniform_location(program, "viewSize"),
            quad_size: gl.uniform_location(program, "quadSize"),
            target_size: gl.uniform_location(program, "targetSize"),
            yflip: gl.uniform_location(program, "yflip"),
            texture: gl.uniform_location(program, "tex"),
        })
    }

    pub fn program(&self) -> ObjectId {
        self.program
    }

    /// Use the program and upload `uniforms`. The sampler reads unit 0.
    pub fn bind(&self, gl: &dyn Gl, uniforms: &QuadUniforms) {
        gl.use_program(self.program);
        let vec2 = |loc: Option<u32>, [x, y]: [f32; 2]| {
            if let Some(loc) = loc {
                gl.uniform_2f(loc, x, y);
            }
        };
        vec2(self.view_pos, uniforms.view_pos);
        vec2(self.view_size, uniforms.view_size);
        vec2(self.quad_size, uniforms.quad_size);
        vec2(self.target_size, uniforms.target_size);
        if let Some(loc) = self.yflip {
            gl.uniform_1i(loc, i32::from(uniforms.yflip));
        }
        if let Some(loc) = self.texture {
            gl.uniform_1i(loc, 0);
        }
    }

    pub fn delete(&self, gl: &dyn Gl) {
        gl.delete_program(self.program);
    }
}

fn compile_stage(
    gl: &dyn Gl,
    dialect: GlslDialect,
    stage: ShaderStage,
    body: &str,
) -> Result<ObjectId, RenderError> {
    let source = format!("{}{}", dialect.prelude(stage), body);
    let shader = gl
        .create_shader(stage)
        .map_err(RenderError::creation("shader"))?;
    gl.compile_shader(shader, &source);
    if !gl.shader_compiled(shader) {
        let log = gl.shader_info_log(shader);
        gl.delete_shader(shader);
        return Err(RenderError::ShaderCompile {
            stage,
            log,
            numbered_source: number_lines(&source),
        });
    }
    Ok(shader)
}

/// Per-context geometry for one surface.
///
/// Geometry encodes the surface size, so a quad is rebuilt whenever the
/// surface it draws changes size.
#[derive(Debug)]
pub struct SurfaceQuad {
    vertex_array: ObjectId,
    vertex_buffer: ObjectId,
    index_buffer: ObjectId,
    width: i32,
    height: i32,
}

impl SurfaceQuad {
    /// Build the geometry in the current context. Leaves the new vertex array
    /// and buffers bound.
    pub fn new(gl: &dyn Gl, width: i32, height: i32) -> Result<Self, RenderError> {
        let vertex_array = gl
            .gen_vertex_array()
            .map_err(RenderError::creation("vertex array"))?;
        let mut quad = Self {
            vertex_array,
            vertex_buffer: 0,
            index_buffer: 0,
            width,
            height,
        };

        let buffers = gl
            .gen_buffer()
            .and_then(|vbo| gl.gen_buffer().map(|ebo| (vbo, ebo)));
        match buffers {
            Ok((vbo, ebo)) => {
                quad.vertex_buffer = vbo;
                quad.index_buffer = ebo;
            }
            Err(message) => {
                quad.delete(gl);
                return Err(RenderError::creation("buffer")(message));
            }
        }

        gl.bind_vertex_array(quad.vertex_array);

        let vertices = QuadVertex::corners(width as f32, height as f32);
        gl.bind_buffer(BufferTarget::Array, quad.vertex_buffer);
        gl.buffer_data(BufferTarget::Array, bytemuck::cast_slice(&vertices));
        gl.enable_vertex_attrib(ATTRIB_POSITION);
        gl.vertex_attrib_f32(ATTRIB_POSITION, 2, QuadVertex::STRIDE, 0);
        gl.enable_vertex_attrib(ATTRIB_TEX_COORD);
        gl.vertex_attrib_f32(
            ATTRIB_TEX_COORD,
            2,
            QuadVertex::STRIDE,
            QuadVertex::TEX_COORD_OFFSET,
        );

        gl.bind_buffer(BufferTarget::ElementArray, quad.index_buffer);
        gl.buffer_data(BufferTarget::ElementArray, &INDICES);

        debug!(width, height, vao = quad.vertex_array, "surface quad built");
        Ok(quad)
    }

    pub fn matches_size(&self, width: i32, height: i32) -> bool {
        self.width == width && self.height == height
    }

    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    /// Draw with whatever program and texture are bound.
    pub fn draw(&self, gl: &dyn Gl) {
        gl.bind_vertex_array(self.vertex_array);
        gl.draw_elements_u8(INDICES.len() as i32);
    }

    /// Free the geometry. The shader is left alone.
    pub fn delete(&self, gl: &dyn Gl) {
        if self.index_buffer != 0 {
            gl.delete_buffer(self.index_buffer);
        }
        if self.vertex_buffer != 0 {
            gl.delete_buffer(self.vertex_buffer);
        }
        gl.delete_vertex_array(self.vertex_array);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessGl;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(QuadVertex::STRIDE, 16);
        assert_eq!(QuadVertex::TEX_COORD_OFFSET, 8);
        let corners = QuadVertex::corners(100.0, 50.0);
        assert_eq!(corners[2].position, [100.0, 50.0]);
        assert_eq!(corners[2].tex_coord, [1.0, 1.0]);
    }

    #[test]
    fn test_shader_compiles_and_finds_uniforms() {
        let gl = HeadlessGl::standalone();
        let shader = QuadShader::compile(&gl, GlslDialect::Legacy).unwrap();
        assert!(shader.view_pos.is_some());
        assert!(shader.target_size.is_some());
        assert!(shader.yflip.is_some());
        assert!(shader.texture.is_some());
    }

    #[test]
    fn test_compile_error_has_numbered_source() {
        let gl = HeadlessGl::standalone();
        let err = QuadShader::compile_sources(
            &gl,
            GlslDialect::Legacy,
            VERTEX_SOURCE,
            "uniform sampler2D tex;\n",
        )
        .unwrap_err();
        match err {
            RenderError::ShaderCompile {
                stage,
                numbered_source,
                ..
            } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(numbered_source.starts_with("   1: #version 120"));
                assert!(numbered_source.contains("   2: uniform sampler2D tex;"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_core_dialect_prelude() {
        let vs = GlslDialect::Core.prelude(ShaderStage::Vertex);
        assert!(vs.starts_with("#version 150"));
        assert!(GlslDialect::Core
            .prelude(ShaderStage::Fragment)
            .contains("fragColor"));
    }

    #[test]
    fn test_deleting_quad_keeps_shader() {
        let (gl, platform, _) = HeadlessGl::standalone_with_platform();
        let shader = QuadShader::compile(&gl, GlslDialect::Legacy).unwrap();
        let quad = SurfaceQuad::new(&gl, 10, 10).unwrap();
        quad.delete(&gl);
        assert_eq!(platform.live_programs(), 1);
        assert!(gl.program_linked(shader.program()));
    }
}
