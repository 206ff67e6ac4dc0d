//! Headless GL - an in-memory OpenGL state machine
//!
//! [`HeadlessPlatform`] hands out fake contexts grouped into share groups.
//! Objects (textures, framebuffers, buffers, shaders, programs) live in the
//! share group; vertex arrays and all binding state live in the context.
//! Calls made through a [`HeadlessGl`] act on whichever context is current,
//! exactly like a real driver, so a missing `make_current` shows up as state
//! landing in the wrong context.
//!
//! Everything observable is recorded for tests: draw calls with their
//! uniforms and target, clears, flush/finish boundaries, allocation counters
//! and the number of `make_current` calls.

use crate::context::{ContextConfig, ContextError, Platform, RawContext};
use crate::gl::{
    BufferTarget, Capability, Float4Param, Gl, Int4Param, IntParam, ObjectId, ShaderStage,
    StringParam, NO_OBJECT, TEXTURE_UNITS,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Value last uploaded to a uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Vec2([f32; 2]),
    Int(i32),
}

/// Everything a draw call saw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub context: RawContext,
    pub framebuffer: ObjectId,
    pub viewport: [i32; 4],
    pub blend: bool,
    pub blend_func: (u32, u32),
    pub depth_test: bool,
    pub program: ObjectId,
    pub vertex_array: ObjectId,
    /// Texture bound to the active unit
    pub texture: ObjectId,
    pub count: i32,
    pub uniforms: HashMap<String, UniformValue>,
}

impl DrawCall {
    pub fn vec2(&self, name: &str) -> Option<[f32; 2]> {
        match self.uniforms.get(name) {
            Some(UniformValue::Vec2(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        match self.uniforms.get(name) {
            Some(UniformValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Recorded side effects, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum GlEvent {
    Clear {
        context: RawContext,
        framebuffer: ObjectId,
        color: [f32; 4],
    },
    Draw(DrawCall),
    Flush(RawContext),
    Finish(RawContext),
}

/// Cumulative allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Allocations {
    pub textures: usize,
    /// Successful `tex_image` storage allocations
    pub texture_storage: usize,
    pub framebuffers: usize,
    pub buffers: usize,
    pub vertex_arrays: usize,
    pub shaders: usize,
    pub programs: usize,
}

/// What the fake driver reports about itself.
#[derive(Debug, Clone)]
pub struct HeadlessSettings {
    pub max_texture_size: i32,
    pub vendor: String,
    pub renderer: String,
    pub major: i32,
    pub minor: i32,
}

impl Default for HeadlessSettings {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            vendor: "cohost".to_string(),
            renderer: "headless".to_string(),
            major: 3,
            minor: 2,
        }
    }
}

#[derive(Debug, Default)]
struct Texture {
    width: i32,
    height: i32,
}

#[derive(Debug)]
struct Shader {
    stage: ShaderStage,
    source: String,
    compiled: bool,
    log: String,
}

#[derive(Debug, Default)]
struct Program {
    shaders: Vec<ObjectId>,
    linked: bool,
    log: String,
    attribs: HashMap<String, u32>,
    /// Uniform names declared by the linked shaders
    declared: HashSet<String>,
    /// Location index -> name, assigned on lookup
    locations: Vec<String>,
    values: HashMap<u32, UniformValue>,
}

/// Objects shared by every context in a share group.
#[derive(Debug, Default)]
struct Namespace {
    textures: HashMap<ObjectId, Texture>,
    /// Framebuffer -> color attachment
    framebuffers: HashMap<ObjectId, ObjectId>,
    buffers: HashMap<ObjectId, usize>,
    shaders: HashMap<ObjectId, Shader>,
    programs: HashMap<ObjectId, Program>,
}

#[derive(Debug, Default)]
struct VertexArray {
    element_buffer: ObjectId,
    attribs: HashSet<u32>,
}

/// Per-context binding state.
#[derive(Debug)]
struct ContextState {
    group: usize,
    enabled: HashSet<Capability>,
    blend_func: (u32, u32),
    depth_mask: bool,
    clear_color: [f32; 4],
    viewport: [i32; 4],
    scissor: [i32; 4],
    program: ObjectId,
    active_unit: u32,
    textures: [ObjectId; TEXTURE_UNITS as usize],
    vertex_arrays: HashMap<ObjectId, VertexArray>,
    vertex_array: ObjectId,
    array_buffer: ObjectId,
    framebuffer: ObjectId,
    errors: VecDeque<u32>,
}

impl ContextState {
    fn new(group: usize) -> Self {
        let mut vertex_arrays = HashMap::new();
        vertex_arrays.insert(NO_OBJECT, VertexArray::default());
        Self {
            group,
            enabled: HashSet::new(),
            blend_func: (glow::ONE, glow::ZERO),
            depth_mask: true,
            clear_color: [0.0; 4],
            viewport: [0, 0, 0, 0],
            scissor: [0, 0, 0, 0],
            program: NO_OBJECT,
            active_unit: 0,
            textures: [NO_OBJECT; TEXTURE_UNITS as usize],
            vertex_arrays,
            vertex_array: NO_OBJECT,
            array_buffer: NO_OBJECT,
            framebuffer: NO_OBJECT,
            errors: VecDeque::new(),
        }
    }

    fn error(&mut self, code: u32) {
        trace!("headless GL error 0x{:04X}", code);
        self.errors.push_back(code);
    }

    fn bound_texture(&self) -> ObjectId {
        self.textures[self.active_unit as usize]
    }

    fn element_buffer(&self) -> ObjectId {
        self.vertex_arrays
            .get(&self.vertex_array)
            .map_or(NO_OBJECT, |vao| vao.element_buffer)
    }
}

#[derive(Debug, Default)]
struct Recorder {
    settings: HeadlessSettings,
    next_id: u32,
    current: Option<RawContext>,
    make_current_calls: usize,
    orphan_calls: usize,
    events: Vec<GlEvent>,
    allocations: Allocations,
    fail_next_texture: bool,
    fail_next_context: bool,
}

impl Recorder {
    fn next_id(&mut self) -> ObjectId {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
struct PlatformState {
    next_raw: u64,
    groups: Vec<Namespace>,
    contexts: HashMap<RawContext, ContextState>,
    rec: Recorder,
}

impl PlatformState {
    fn new_context(&mut self, group: usize) -> RawContext {
        self.next_raw += 1;
        let raw = RawContext(self.next_raw);
        self.contexts.insert(raw, ContextState::new(group));
        raw
    }
}

fn lock(state: &Mutex<PlatformState>) -> MutexGuard<'_, PlatformState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fake windowing system that owns headless contexts.
#[derive(Debug, Clone, Default)]
pub struct HeadlessPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: HeadlessSettings) -> Self {
        let platform = Self::default();
        lock(&platform.state).rec.settings = settings;
        platform
    }

    /// Create a context in a fresh share group, standing in for a context
    /// that some other library already made.
    pub fn create_root(&self) -> RawContext {
        let mut state = lock(&self.state);
        state.groups.push(Namespace::default());
        let group = state.groups.len() - 1;
        state.new_context(group)
    }

    /// The context current on the (single) fake thread.
    pub fn current(&self) -> Option<RawContext> {
        lock(&self.state).rec.current
    }

    pub fn make_current_calls(&self) -> usize {
        lock(&self.state).rec.make_current_calls
    }

    /// GL calls made while no context was current.
    pub fn orphan_calls(&self) -> usize {
        lock(&self.state).rec.orphan_calls
    }

    pub fn context_count(&self) -> usize {
        lock(&self.state).contexts.len()
    }

    pub fn is_alive(&self, raw: RawContext) -> bool {
        lock(&self.state).contexts.contains_key(&raw)
    }

    pub fn events(&self) -> Vec<GlEvent> {
        lock(&self.state).rec.events.clone()
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        lock(&self.state)
            .rec
            .events
            .iter()
            .filter_map(|e| match e {
                GlEvent::Draw(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_events(&self) {
        lock(&self.state).rec.events.clear();
    }

    pub fn allocations(&self) -> Allocations {
        lock(&self.state).rec.allocations
    }

    pub fn live_textures(&self) -> usize {
        lock(&self.state).groups.iter().map(|g| g.textures.len()).sum()
    }

    pub fn live_framebuffers(&self) -> usize {
        lock(&self.state).groups.iter().map(|g| g.framebuffers.len()).sum()
    }

    pub fn live_programs(&self) -> usize {
        lock(&self.state).groups.iter().map(|g| g.programs.len()).sum()
    }

    /// Storage size of a texture in any share group.
    pub fn texture_size(&self, texture: ObjectId) -> Option<(i32, i32)> {
        lock(&self.state)
            .groups
            .iter()
            .find_map(|g| g.textures.get(&texture))
            .map(|t| (t.width, t.height))
    }

    /// The next texture storage allocation reports `OUT_OF_MEMORY`.
    pub fn fail_next_texture_allocation(&self) {
        lock(&self.state).rec.fail_next_texture = true;
    }

    /// The next `create_shared` call fails.
    pub fn fail_next_context_creation(&self) {
        lock(&self.state).rec.fail_next_context = true;
    }

    /// Errors pending on a context, without popping them.
    pub fn pending_errors(&self, raw: RawContext) -> Vec<u32> {
        lock(&self.state)
            .contexts
            .get(&raw)
            .map(|c| c.errors.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Platform for HeadlessPlatform {
    fn make_current(&self, raw: RawContext) -> Result<(), ContextError> {
        let mut state = lock(&self.state);
        if !state.contexts.contains_key(&raw) {
            return Err(ContextError::Platform {
                context: raw,
                message: "no such context".to_string(),
            });
        }
        state.rec.current = Some(raw);
        state.rec.make_current_calls += 1;
        Ok(())
    }

    fn create_shared(
        &self,
        share_with: RawContext,
        _config: &ContextConfig,
    ) -> Result<RawContext, ContextError> {
        let mut state = lock(&self.state);
        if std::mem::take(&mut state.rec.fail_next_context) {
            return Err(ContextError::Creation {
                share_with,
                message: "injected failure".to_string(),
            });
        }
        let group = match state.contexts.get(&share_with) {
            Some(ctx) => ctx.group,
            None => {
                return Err(ContextError::Creation {
                    share_with,
                    message: "share context does not exist".to_string(),
                })
            }
        };
        Ok(state.new_context(group))
    }

    fn destroy(&self, raw: RawContext) -> Result<(), ContextError> {
        let mut state = lock(&self.state);
        if state.contexts.remove(&raw).is_none() {
            return Err(ContextError::Platform {
                context: raw,
                message: "no such context".to_string(),
            });
        }
        if state.rec.current == Some(raw) {
            state.rec.current = None;
        }
        Ok(())
    }

    fn load_gl(&self, raw: RawContext) -> Result<Rc<dyn Gl>, ContextError> {
        if !self.is_alive(raw) {
            return Err(ContextError::Platform {
                context: raw,
                message: "no such context".to_string(),
            });
        }
        Ok(Rc::new(HeadlessGl {
            state: self.state.clone(),
        }))
    }
}

/// GL entry points acting on the platform's current headless context.
#[derive(Debug, Clone)]
pub struct HeadlessGl {
    state: Arc<Mutex<PlatformState>>,
}

impl HeadlessGl {
    /// A single context, already current. Handy for unit tests that don't
    /// care about contexts.
    pub fn standalone() -> Self {
        Self::standalone_with_platform().0
    }

    /// Like [`HeadlessGl::standalone`], also returning the platform for probing.
    pub fn standalone_with_platform() -> (Self, HeadlessPlatform, RawContext) {
        let platform = HeadlessPlatform::new();
        let raw = platform.create_root();
        {
            let mut state = lock(&platform.state);
            state.rec.current = Some(raw);
        }
        let gl = Self {
            state: platform.state.clone(),
        };
        (gl, platform, raw)
    }

    /// Run `f` against the current context, or return the default when none is.
    fn with<R: Default>(
        &self,
        f: impl FnOnce(&mut ContextState, &mut Namespace, &mut Recorder, RawContext) -> R,
    ) -> R {
        self.try_with(f).unwrap_or_default()
    }

    fn try_with<R>(
        &self,
        f: impl FnOnce(&mut ContextState, &mut Namespace, &mut Recorder, RawContext) -> R,
    ) -> Option<R> {
        let mut guard = lock(&self.state);
        let PlatformState {
            groups,
            contexts,
            rec,
            ..
        } = &mut *guard;
        let Some(raw) = rec.current else {
            rec.orphan_calls += 1;
            return None;
        };
        let ctx = contexts.get_mut(&raw)?;
        let ns = &mut groups[ctx.group];
        Some(f(ctx, ns, rec, raw))
    }

    fn create(
        &self,
        f: impl FnOnce(&mut ContextState, &mut Namespace, &mut Recorder) -> ObjectId,
    ) -> Result<ObjectId, String> {
        self.try_with(|ctx, ns, rec, _| f(ctx, ns, rec))
            .ok_or_else(|| "no current context".to_string())
    }
}

impl Gl for HeadlessGl {
    fn is_enabled(&self, cap: Capability) -> bool {
        self.with(|ctx, _, _, _| ctx.enabled.contains(&cap))
    }

    fn get_integer(&self, param: IntParam) -> i32 {
        self.with(|ctx, _, rec, _| match param {
            IntParam::CurrentProgram => ctx.program as i32,
            IntParam::ActiveTexture => (glow::TEXTURE0 + ctx.active_unit) as i32,
            IntParam::TextureBinding2D => ctx.bound_texture() as i32,
            IntParam::VertexArrayBinding => ctx.vertex_array as i32,
            IntParam::ArrayBufferBinding => ctx.array_buffer as i32,
            IntParam::ElementArrayBufferBinding => ctx.element_buffer() as i32,
            IntParam::FramebufferBinding => ctx.framebuffer as i32,
            IntParam::BlendSrc => ctx.blend_func.0 as i32,
            IntParam::BlendDst => ctx.blend_func.1 as i32,
            IntParam::DepthWriteMask => i32::from(ctx.depth_mask),
            IntParam::MajorVersion => rec.settings.major,
            IntParam::MinorVersion => rec.settings.minor,
            IntParam::MaxTextureSize => rec.settings.max_texture_size,
        })
    }

    fn get_integer4(&self, param: Int4Param) -> [i32; 4] {
        self.with(|ctx, _, _, _| match param {
            Int4Param::Viewport => ctx.viewport,
            Int4Param::ScissorBox => ctx.scissor,
        })
    }

    fn get_float4(&self, param: Float4Param) -> [f32; 4] {
        self.with(|ctx, _, _, _| match param {
            Float4Param::ColorClearValue => ctx.clear_color,
        })
    }

    fn get_string(&self, param: StringParam) -> String {
        self.with(|_, _, rec, _| match param {
            StringParam::Vendor => rec.settings.vendor.clone(),
            StringParam::Renderer => rec.settings.renderer.clone(),
            StringParam::Version => {
                format!("{}.{} headless", rec.settings.major, rec.settings.minor)
            }
        })
    }

    fn get_error(&self) -> u32 {
        self.with(|ctx, _, _, _| ctx.errors.pop_front().unwrap_or(glow::NO_ERROR))
    }

    fn set_enabled(&self, cap: Capability, enabled: bool) {
        self.with(|ctx, _, _, _| {
            if enabled {
                ctx.enabled.insert(cap);
            } else {
                ctx.enabled.remove(&cap);
            }
        })
    }

    fn blend_func(&self, src: u32, dst: u32) {
        self.with(|ctx, _, _, _| ctx.blend_func = (src, dst))
    }

    fn depth_mask(&self, enabled: bool) {
        self.with(|ctx, _, _, _| ctx.depth_mask = enabled)
    }

    fn clear_color(&self, rgba: [f32; 4]) {
        self.with(|ctx, _, _, _| ctx.clear_color = rgba)
    }

    fn clear(&self, color: bool, _depth: bool) {
        self.with(|ctx, _, rec, raw| {
            if color {
                rec.events.push(GlEvent::Clear {
                    context: raw,
                    framebuffer: ctx.framebuffer,
                    color: ctx.clear_color,
                });
            }
        })
    }

    fn viewport(&self, rect: [i32; 4]) {
        self.with(|ctx, _, _, _| ctx.viewport = rect)
    }

    fn scissor(&self, rect: [i32; 4]) {
        self.with(|ctx, _, _, _| ctx.scissor = rect)
    }

    fn use_program(&self, program: ObjectId) {
        self.with(|ctx, ns, _, _| match ns.programs.get(&program) {
            _ if program == NO_OBJECT => ctx.program = NO_OBJECT,
            None => ctx.error(glow::INVALID_VALUE),
            Some(p) if !p.linked => ctx.error(glow::INVALID_OPERATION),
            Some(_) => ctx.program = program,
        })
    }

    fn active_texture(&self, unit: u32) {
        self.with(|ctx, _, _, _| {
            match unit.checked_sub(glow::TEXTURE0) {
                Some(index) if index < TEXTURE_UNITS => ctx.active_unit = index,
                _ => ctx.error(glow::INVALID_ENUM),
            }
        })
    }

    fn bind_texture_2d(&self, texture: ObjectId) {
        self.with(|ctx, ns, _, _| {
            if texture != NO_OBJECT && !ns.textures.contains_key(&texture) {
                ctx.error(glow::INVALID_OPERATION);
                return;
            }
            let unit = ctx.active_unit as usize;
            ctx.textures[unit] = texture;
        })
    }

    fn bind_vertex_array(&self, vertex_array: ObjectId) {
        self.with(|ctx, _, _, _| {
            if ctx.vertex_arrays.contains_key(&vertex_array) {
                ctx.vertex_array = vertex_array;
            } else {
                ctx.error(glow::INVALID_OPERATION);
            }
        })
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: ObjectId) {
        self.with(|ctx, ns, _, _| {
            if buffer != NO_OBJECT && !ns.buffers.contains_key(&buffer) {
                ctx.error(glow::INVALID_OPERATION);
                return;
            }
            match target {
                BufferTarget::Array => ctx.array_buffer = buffer,
                BufferTarget::ElementArray => {
                    let vao = ctx.vertex_array;
                    if let Some(vao) = ctx.vertex_arrays.get_mut(&vao) {
                        vao.element_buffer = buffer;
                    }
                }
            }
        })
    }

    fn bind_framebuffer(&self, framebuffer: ObjectId) {
        self.with(|ctx, ns, _, _| {
            if framebuffer != NO_OBJECT && !ns.framebuffers.contains_key(&framebuffer) {
                ctx.error(glow::INVALID_OPERATION);
                return;
            }
            ctx.framebuffer = framebuffer;
        })
    }

    fn gen_texture(&self) -> Result<ObjectId, String> {
        self.create(|_, ns, rec| {
            let id = rec.next_id();
            ns.textures.insert(id, Texture::default());
            rec.allocations.textures += 1;
            id
        })
    }

    fn tex_image_rgba(&self, width: i32, height: i32) {
        self.with(|ctx, ns, rec, _| {
            let bound = ctx.bound_texture();
            let max = rec.settings.max_texture_size;
            let Some(texture) = ns.textures.get_mut(&bound) else {
                ctx.error(glow::INVALID_OPERATION);
                return;
            };
            if width < 0 || height < 0 || width > max || height > max {
                ctx.error(glow::INVALID_VALUE);
            } else if std::mem::take(&mut rec.fail_next_texture) {
                ctx.error(glow::OUT_OF_MEMORY);
            } else {
                texture.width = width;
                texture.height = height;
                rec.allocations.texture_storage += 1;
            }
        })
    }

    fn tex_linear_clamp(&self) {
        self.with(|ctx, _, _, _| {
            if ctx.bound_texture() == NO_OBJECT {
                ctx.error(glow::INVALID_OPERATION);
            }
        })
    }

    fn delete_texture(&self, texture: ObjectId) {
        self.with(|ctx, ns, _, _| {
            if ns.textures.remove(&texture).is_some() {
                for bound in ctx.textures.iter_mut().filter(|t| **t == texture) {
                    *bound = NO_OBJECT;
                }
            }
        })
    }

    fn gen_framebuffer(&self) -> Result<ObjectId, String> {
        self.create(|_, ns, rec| {
            let id = rec.next_id();
            ns.framebuffers.insert(id, NO_OBJECT);
            rec.allocations.framebuffers += 1;
            id
        })
    }

    fn framebuffer_color_texture(&self, texture: ObjectId) {
        self.with(|ctx, ns, _, _| {
            if texture != NO_OBJECT && !ns.textures.contains_key(&texture) {
                ctx.error(glow::INVALID_OPERATION);
                return;
            }
            match ns.framebuffers.get_mut(&ctx.framebuffer) {
                Some(attachment) => *attachment = texture,
                None => ctx.error(glow::INVALID_OPERATION),
            }
        })
    }

    fn framebuffer_status(&self) -> u32 {
        self.with(|ctx, ns, _, _| {
            if ctx.framebuffer == NO_OBJECT {
                return glow::FRAMEBUFFER_COMPLETE;
            }
            match ns.framebuffers.get(&ctx.framebuffer) {
                None => glow::FRAMEBUFFER_UNDEFINED,
                Some(&NO_OBJECT) => glow::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT,
                Some(texture) => match ns.textures.get(texture) {
                    Some(t) if t.width > 0 && t.height > 0 => glow::FRAMEBUFFER_COMPLETE,
                    _ => glow::FRAMEBUFFER_INCOMPLETE_ATTACHMENT,
                },
            }
        })
    }

    fn delete_framebuffer(&self, framebuffer: ObjectId) {
        self.with(|ctx, ns, _, _| {
            ns.framebuffers.remove(&framebuffer);
            if ctx.framebuffer == framebuffer {
                ctx.framebuffer = NO_OBJECT;
            }
        })
    }

    fn create_shader(&self, stage: ShaderStage) -> Result<ObjectId, String> {
        self.create(|_, ns, rec| {
            let id = rec.next_id();
            ns.shaders.insert(
                id,
                Shader {
                    stage,
                    source: String::new(),
                    compiled: false,
                    log: String::new(),
                },
            );
            rec.allocations.shaders += 1;
            id
        })
    }

    fn compile_shader(&self, shader: ObjectId, source: &str) {
        self.with(|ctx, ns, _, _| {
            let Some(s) = ns.shaders.get_mut(&shader) else {
                ctx.error(glow::INVALID_VALUE);
                return;
            };
            s.source = source.to_string();
            s.compiled = source.contains("void main");
            s.log = if s.compiled {
                String::new()
            } else {
                "0:1(1): error: missing entry point `main`".to_string()
            };
        })
    }

    fn shader_compiled(&self, shader: ObjectId) -> bool {
        self.with(|_, ns, _, _| ns.shaders.get(&shader).is_some_and(|s| s.compiled))
    }

    fn shader_info_log(&self, shader: ObjectId) -> String {
        self.with(|_, ns, _, _| {
            ns.shaders
                .get(&shader)
                .map(|s| s.log.clone())
                .unwrap_or_default()
        })
    }

    fn delete_shader(&self, shader: ObjectId) {
        self.with(|_, ns, _, _| {
            ns.shaders.remove(&shader);
        })
    }

    fn create_program(&self) -> Result<ObjectId, String> {
        self.create(|_, ns, rec| {
            let id = rec.next_id();
            ns.programs.insert(id, Program::default());
            rec.allocations.programs += 1;
            id
        })
    }

    fn attach_shader(&self, program: ObjectId, shader: ObjectId) {
        self.with(|ctx, ns, _, _| {
            match (ns.programs.get_mut(&program), ns.shaders.contains_key(&shader)) {
                (Some(p), true) => p.shaders.push(shader),
                _ => ctx.error(glow::INVALID_VALUE),
            }
        })
    }

    fn bind_attrib_location(&self, program: ObjectId, index: u32, name: &str) {
        self.with(|ctx, ns, _, _| match ns.programs.get_mut(&program) {
            Some(p) => {
                p.attribs.insert(name.to_string(), index);
            }
            None => ctx.error(glow::INVALID_VALUE),
        })
    }

    fn link_program(&self, program: ObjectId) {
        self.with(|ctx, ns, _, _| {
            let Namespace {
                shaders, programs, ..
            } = ns;
            let Some(p) = programs.get_mut(&program) else {
                ctx.error(glow::INVALID_VALUE);
                return;
            };
            let attached: Vec<&Shader> = p.shaders.iter().filter_map(|s| shaders.get(s)).collect();
            let has_stage = |stage| attached.iter().any(|s| s.stage == stage && s.compiled);

            p.locations.clear();
            p.values.clear();
            p.declared.clear();
            if !has_stage(ShaderStage::Vertex) || !has_stage(ShaderStage::Fragment) {
                p.linked = false;
                p.log = "error: program needs a compiled vertex and fragment shader".to_string();
                return;
            }
            for shader in &attached {
                for line in shader.source.lines() {
                    let line = line.trim();
                    if let Some(decl) = line.strip_prefix("uniform ") {
                        if let Some(name) = decl.trim_end_matches(';').split_whitespace().last() {
                            p.declared.insert(name.to_string());
                        }
                    }
                }
            }
            p.linked = true;
            p.log.clear();
        })
    }

    fn program_linked(&self, program: ObjectId) -> bool {
        self.with(|_, ns, _, _| ns.programs.get(&program).is_some_and(|p| p.linked))
    }

    fn program_info_log(&self, program: ObjectId) -> String {
        self.with(|_, ns, _, _| {
            ns.programs
                .get(&program)
                .map(|p| p.log.clone())
                .unwrap_or_default()
        })
    }

    fn delete_program(&self, program: ObjectId) {
        self.with(|_, ns, _, _| {
            ns.programs.remove(&program);
        })
    }

    fn uniform_location(&self, program: ObjectId, name: &str) -> Option<u32> {
        self.try_with(|_, ns, _, _| {
            let p = ns.programs.get_mut(&program)?;
            if !p.linked || !p.declared.contains(name) {
                return None;
            }
            if let Some(index) = p.locations.iter().position(|n| n == name) {
                return Some(index as u32);
            }
            p.locations.push(name.to_string());
            Some((p.locations.len() - 1) as u32)
        })
        .flatten()
    }

    fn uniform_2f(&self, location: u32, x: f32, y: f32) {
        self.with(|ctx, ns, _, _| match ns.programs.get_mut(&ctx.program) {
            Some(p) if (location as usize) < p.locations.len() => {
                p.values.insert(location, UniformValue::Vec2([x, y]));
            }
            _ => ctx.error(glow::INVALID_OPERATION),
        })
    }

    fn uniform_1i(&self, location: u32, value: i32) {
        self.with(|ctx, ns, _, _| match ns.programs.get_mut(&ctx.program) {
            Some(p) if (location as usize) < p.locations.len() => {
                p.values.insert(location, UniformValue::Int(value));
            }
            _ => ctx.error(glow::INVALID_OPERATION),
        })
    }

    fn gen_vertex_array(&self) -> Result<ObjectId, String> {
        self.create(|ctx, _, rec| {
            let id = rec.next_id();
            ctx.vertex_arrays.insert(id, VertexArray::default());
            rec.allocations.vertex_arrays += 1;
            id
        })
    }

    fn delete_vertex_array(&self, vertex_array: ObjectId) {
        self.with(|ctx, _, _, _| {
            if vertex_array == NO_OBJECT {
                return;
            }
            ctx.vertex_arrays.remove(&vertex_array);
            if ctx.vertex_array == vertex_array {
                ctx.vertex_array = NO_OBJECT;
            }
        })
    }

    fn gen_buffer(&self) -> Result<ObjectId, String> {
        self.create(|_, ns, rec| {
            let id = rec.next_id();
            ns.buffers.insert(id, 0);
            rec.allocations.buffers += 1;
            id
        })
    }

    fn buffer_data(&self, target: BufferTarget, data: &[u8]) {
        self.with(|ctx, ns, _, _| {
            let bound = match target {
                BufferTarget::Array => ctx.array_buffer,
                BufferTarget::ElementArray => ctx.element_buffer(),
            };
            match ns.buffers.get_mut(&bound) {
                Some(len) => *len = data.len(),
                None => ctx.error(glow::INVALID_OPERATION),
            }
        })
    }

    fn delete_buffer(&self, buffer: ObjectId) {
        self.with(|ctx, ns, _, _| {
            ns.buffers.remove(&buffer);
            if ctx.array_buffer == buffer {
                ctx.array_buffer = NO_OBJECT;
            }
            for vao in ctx.vertex_arrays.values_mut() {
                if vao.element_buffer == buffer {
                    vao.element_buffer = NO_OBJECT;
                }
            }
        })
    }

    fn enable_vertex_attrib(&self, index: u32) {
        self.with(|ctx, _, _, _| {
            let vao = ctx.vertex_array;
            if let Some(vao) = ctx.vertex_arrays.get_mut(&vao) {
                vao.attribs.insert(index);
            }
        })
    }

    fn vertex_attrib_f32(&self, _index: u32, _size: i32, _stride: i32, _offset: i32) {
        self.with(|ctx, _, _, _| {
            if ctx.array_buffer == NO_OBJECT {
                ctx.error(glow::INVALID_OPERATION);
            }
        })
    }

    fn draw_elements_u8(&self, count: i32) {
        self.with(|ctx, ns, rec, raw| {
            let Some(program) = ns.programs.get(&ctx.program) else {
                ctx.error(glow::INVALID_OPERATION);
                return;
            };
            if ctx.element_buffer() == NO_OBJECT {
                ctx.error(glow::INVALID_OPERATION);
                return;
            }
            let uniforms = program
                .values
                .iter()
                .map(|(loc, value)| (program.locations[*loc as usize].clone(), *value))
                .collect();
            rec.events.push(GlEvent::Draw(DrawCall {
                context: raw,
                framebuffer: ctx.framebuffer,
                viewport: ctx.viewport,
                blend: ctx.enabled.contains(&Capability::Blend),
                blend_func: ctx.blend_func,
                depth_test: ctx.enabled.contains(&Capability::DepthTest),
                program: ctx.program,
                vertex_array: ctx.vertex_array,
                texture: ctx.bound_texture(),
                count,
                uniforms,
            }));
        })
    }

    fn flush(&self) {
        self.with(|_, _, rec, raw| rec.events.push(GlEvent::Flush(raw)))
    }

    fn finish(&self) {
        self.with(|_, _, rec, raw| rec.events.push(GlEvent::Finish(raw)))
    }
}
