//! Context Registry - logical GL contexts over a few real ones
//!
//! The registry is the only place that changes which real context is current.
//! Every logical owner (host, toolkit, panes) gets a [`ContextId`] and calls
//! [`ContextRegistry::activate`] before touching GL. Activation is skipped when
//! the context is already current, and a flush boundary is inserted on the
//! outgoing context before switching so its writes become visible to the
//! incoming one.

use crate::error::RenderError;
use crate::gl::{Gl, IntParam, StringParam};
use crate::quad::{GlslDialect, QuadShader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Handle of a real context, as understood by the [`Platform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RawContext(pub u64);

impl fmt::Display for RawContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "raw:{:#x}", self.0)
    }
}

/// Handle of a logical context owned by a [`ContextRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u32);

impl ContextId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Context registry errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unknown context {0}")]
    Unknown(ContextId),

    #[error("platform error on {context}: {message}")]
    Platform { context: RawContext, message: String },

    #[error("failed to create a context sharing with {share_with}: {message}")]
    Creation {
        share_with: RawContext,
        message: String,
    },

    #[error("windowing setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Work inserted on the outgoing context before switching real contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Nothing; only safe on drivers that order cross-context writes
    None,
    Flush,
    #[default]
    Finish,
}

/// Context creation and switching settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Flush boundary before switching away from a context
    pub sync: SyncMode,
    /// Ask the platform for core profile contexts
    pub core_profile: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            sync: SyncMode::Finish,
            core_profile: false,
        }
    }
}

impl ContextConfig {
    fn dialect(&self) -> GlslDialect {
        if self.core_profile {
            GlslDialect::Core
        } else {
            GlslDialect::Legacy
        }
    }
}

/// The windowing layer that owns real contexts.
///
/// Implementations wrap whatever the host uses (EGL, GLX, WGL, a window
/// library). All calls happen on the render thread.
pub trait Platform {
    /// Make `raw` current on the calling thread.
    fn make_current(&self, raw: RawContext) -> Result<(), ContextError>;

    /// Create a hidden real context sharing objects with `share_with`.
    fn create_shared(
        &self,
        share_with: RawContext,
        config: &ContextConfig,
    ) -> Result<RawContext, ContextError>;

    /// Destroy a real context created by [`Platform::create_shared`].
    fn destroy(&self, raw: RawContext) -> Result<(), ContextError>;

    /// GL entry points for `raw`.
    fn load_gl(&self, raw: RawContext) -> Result<Rc<dyn Gl>, ContextError>;
}

/// Driver information, queried once on first activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub major: i32,
    pub minor: i32,
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub max_texture_size: i32,
}

impl ContextInfo {
    fn query(gl: &dyn Gl) -> Self {
        Self {
            major: gl.get_integer(IntParam::MajorVersion),
            minor: gl.get_integer(IntParam::MinorVersion),
            vendor: gl.get_string(StringParam::Vendor),
            renderer: gl.get_string(StringParam::Renderer),
            version: gl.get_string(StringParam::Version),
            max_texture_size: gl.get_integer(IntParam::MaxTextureSize),
        }
    }
}

/// Proof that a logical context is current, with its GL entry points.
///
/// Only valid until the next call to [`ContextRegistry::activate`] with a
/// different context.
#[derive(Clone)]
pub struct ActiveContext {
    id: ContextId,
    gl: Rc<dyn Gl>,
}

impl ActiveContext {
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn gl(&self) -> &dyn Gl {
        &*self.gl
    }
}

impl fmt::Debug for ActiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveContext").field("id", &self.id).finish()
    }
}

struct Entry {
    raw: RawContext,
    /// Created by this registry, destroyed on release
    owned: bool,
    label: String,
    gl: Rc<dyn Gl>,
    info: Option<ContextInfo>,
    quad_shader: Option<QuadShader>,
}

/// Owner of every logical context.
pub struct ContextRegistry {
    platform: Box<dyn Platform>,
    config: ContextConfig,
    contexts: BTreeMap<ContextId, Entry>,
    next_id: u32,
    active: Option<ContextId>,
}

impl ContextRegistry {
    pub fn new(platform: Box<dyn Platform>, config: ContextConfig) -> Self {
        Self {
            platform,
            config,
            contexts: BTreeMap::new(),
            next_id: 1,
            active: None,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn insert(&mut self, raw: RawContext, owned: bool, label: &str) -> Result<ContextId, ContextError> {
        let gl = self.platform.load_gl(raw)?;
        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.contexts.insert(
            id,
            Entry {
                raw,
                owned,
                label: label.to_string(),
                gl,
                info: None,
                quad_shader: None,
            },
        );
        Ok(id)
    }

    /// Wrap a real context that is already current and owned by someone else.
    ///
    /// The wrapped context is never destroyed by the registry.
    pub fn wrap_existing(&mut self, raw: RawContext, label: &str) -> Result<ContextId, ContextError> {
        let id = self.insert(raw, false, label)?;
        // It's current by contract, so the first activate() needs no switch
        self.active = Some(id);
        info!(context = %id, %raw, label, "wrapped existing context");
        Ok(id)
    }

    /// Create a hidden real context sharing objects with `share`.
    pub fn create_shared_with(&mut self, share: ContextId, label: &str) -> Result<ContextId, ContextError> {
        let share_raw = self.entry(share)?.raw;
        let raw = self.platform.create_shared(share_raw, &self.config)?;
        match self.insert(raw, true, label) {
            Ok(id) => {
                info!(context = %id, %raw, share = %share, label, "created shared context");
                Ok(id)
            }
            Err(e) => {
                if let Err(destroy) = self.platform.destroy(raw) {
                    warn!(%raw, "failed to destroy half-built context: {}", destroy);
                }
                Err(e)
            }
        }
    }

    fn entry(&self, id: ContextId) -> Result<&Entry, ContextError> {
        self.contexts.get(&id).ok_or(ContextError::Unknown(id))
    }

    /// Make `id` current, unless it already is.
    pub fn activate(&mut self, id: ContextId) -> Result<ActiveContext, ContextError> {
        let entry = self.contexts.get(&id).ok_or(ContextError::Unknown(id))?;
        let raw = entry.raw;

        if self.active != Some(id) {
            if let Some(prev) = self.active.and_then(|prev| self.contexts.get(&prev)) {
                sync_boundary(&*prev.gl, self.config.sync);
            }
            self.platform.make_current(raw)?;
            trace!(context = %id, %raw, "activated");
            self.active = Some(id);
        }

        let entry = self
            .contexts
            .get_mut(&id)
            .ok_or(ContextError::Unknown(id))?;
        if entry.info.is_none() {
            let info = ContextInfo::query(&*entry.gl);
            info!(
                context = %id,
                label = %entry.label,
                "GL {}.{} on {} ({}), max texture {}",
                info.major, info.minor, info.renderer, info.vendor, info.max_texture_size
            );
            entry.info = Some(info);
        }

        Ok(ActiveContext {
            id,
            gl: entry.gl.clone(),
        })
    }

    /// Insert the flush boundary on the active context without switching.
    pub fn sync_active(&self) {
        if let Some(entry) = self.active.and_then(|id| self.contexts.get(&id)) {
            sync_boundary(&*entry.gl, self.config.sync);
        }
    }

    pub fn active(&self) -> Option<ContextId> {
        self.active
    }

    pub fn info(&self, id: ContextId) -> Option<&ContextInfo> {
        self.contexts.get(&id).and_then(|e| e.info.as_ref())
    }

    pub fn raw(&self, id: ContextId) -> Option<RawContext> {
        self.contexts.get(&id).map(|e| e.raw)
    }

    pub fn label(&self, id: ContextId) -> Option<&str> {
        self.contexts.get(&id).map(|e| e.label.as_str())
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Activate `id` and return its quad shader, compiling it on first use.
    pub fn quad_shader(&mut self, id: ContextId) -> Result<(ActiveContext, QuadShader), ContextError> {
        let active = self.activate(id)?;
        let dialect = self.config.dialect();
        let entry = self
            .contexts
            .get_mut(&id)
            .ok_or(ContextError::Unknown(id))?;
        let shader = match entry.quad_shader {
            Some(shader) => shader,
            None => {
                let shader = QuadShader::compile(active.gl(), dialect)?;
                entry.quad_shader = Some(shader);
                shader
            }
        };
        Ok((active, shader))
    }

    /// Forget `id`, destroying its real context if the registry created it.
    ///
    /// The quad shader is deleted with the context. Releasing the wrapped host
    /// context only drops the registry's handle.
    pub fn release(&mut self, id: ContextId) -> Result<(), ContextError> {
        let entry = self.entry(id)?;
        if let Some(shader) = entry.quad_shader {
            let active = self.activate(id)?;
            shader.delete(active.gl());
        }

        let entry = self.contexts.remove(&id).ok_or(ContextError::Unknown(id))?;
        if self.active == Some(id) {
            if entry.owned {
                sync_boundary(&*entry.gl, self.config.sync);
            }
            self.active = None;
        }
        if entry.owned {
            self.platform.destroy(entry.raw)?;
            info!(context = %id, raw = %entry.raw, label = %entry.label, "released context");
        } else {
            debug!(context = %id, "dropped wrapped context");
        }
        Ok(())
    }

    /// Release every owned context, newest first. Failures are logged and
    /// don't stop the sweep. Wrapped contexts are kept.
    pub fn release_owned(&mut self) {
        let owned: Vec<ContextId> = self
            .contexts
            .iter()
            .rev()
            .filter(|(_, e)| e.owned)
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            if let Err(e) = self.release(id) {
                warn!(context = %id, "failed to release context: {}", e);
            }
        }
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .field("active", &self.active)
            .finish()
    }
}

fn sync_boundary(gl: &dyn Gl, mode: SyncMode) {
    match mode {
        SyncMode::None => {}
        SyncMode::Flush => gl.flush(),
        SyncMode::Finish => gl.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{GlEvent, HeadlessPlatform};

    fn setup(config: ContextConfig) -> (ContextRegistry, HeadlessPlatform, ContextId) {
        let platform = HeadlessPlatform::new();
        let host = platform.create_root();
        platform.make_current(host).unwrap();
        let mut registry = ContextRegistry::new(Box::new(platform.clone()), config);
        let host_id = registry.wrap_existing(host, "host").unwrap();
        (registry, platform, host_id)
    }

    #[test]
    fn test_activation_is_idempotent() {
        let (mut registry, platform, host) = setup(ContextConfig::default());
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        let before = platform.make_current_calls();

        registry.activate(toolkit).unwrap();
        registry.activate(toolkit).unwrap();
        registry.activate(toolkit).unwrap();
        assert_eq!(platform.make_current_calls(), before + 1);
        assert_eq!(registry.active(), Some(toolkit));

        // host was current when wrapped
        registry.activate(host).unwrap();
        registry.activate(host).unwrap();
        assert_eq!(platform.make_current_calls(), before + 2);
    }

    #[test]
    fn test_wrapped_host_needs_no_switch() {
        let (mut registry, platform, host) = setup(ContextConfig::default());
        let before = platform.make_current_calls();
        registry.activate(host).unwrap();
        assert_eq!(platform.make_current_calls(), before);
    }

    #[test]
    fn test_flush_boundary_before_switch() {
        let (mut registry, platform, host) = setup(ContextConfig::default());
        let host_raw = registry.raw(host).unwrap();
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        platform.clear_events();

        registry.activate(toolkit).unwrap();
        assert_eq!(platform.events(), vec![GlEvent::Finish(host_raw)]);

        let toolkit_raw = registry.raw(toolkit).unwrap();
        registry.activate(host).unwrap();
        assert_eq!(
            platform.events(),
            vec![GlEvent::Finish(host_raw), GlEvent::Finish(toolkit_raw)]
        );
    }

    #[test]
    fn test_sync_mode_flush_and_none() {
        let (mut registry, platform, host) = setup(ContextConfig {
            sync: SyncMode::Flush,
            ..Default::default()
        });
        let host_raw = registry.raw(host).unwrap();
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        platform.clear_events();
        registry.activate(toolkit).unwrap();
        assert_eq!(platform.events(), vec![GlEvent::Flush(host_raw)]);

        let (mut registry, platform, host) = setup(ContextConfig {
            sync: SyncMode::None,
            ..Default::default()
        });
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        platform.clear_events();
        registry.activate(toolkit).unwrap();
        assert!(platform.events().is_empty());
    }

    #[test]
    fn test_info_cached_on_first_activation() {
        let (mut registry, _platform, host) = setup(ContextConfig::default());
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        assert!(registry.info(toolkit).is_none());
        registry.activate(toolkit).unwrap();
        let info = registry.info(toolkit).unwrap();
        assert_eq!((info.major, info.minor), (3, 2));
        assert_eq!(info.renderer, "headless");
        assert_eq!(info.max_texture_size, 8192);
    }

    #[test]
    fn test_unknown_context() {
        let (mut registry, _platform, host) = setup(ContextConfig::default());
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        registry.release(toolkit).unwrap();
        assert!(matches!(
            registry.activate(toolkit),
            Err(ContextError::Unknown(id)) if id == toolkit
        ));
        assert!(registry.create_shared_with(toolkit, "pane").is_err());
    }

    #[test]
    fn test_release_destroys_only_owned_contexts() {
        let (mut registry, platform, host) = setup(ContextConfig::default());
        let host_raw = registry.raw(host).unwrap();
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();
        let toolkit_raw = registry.raw(toolkit).unwrap();
        assert_eq!(platform.context_count(), 2);

        registry.activate(toolkit).unwrap();
        registry.release(toolkit).unwrap();
        assert!(!platform.is_alive(toolkit_raw));
        assert_eq!(registry.active(), None);

        registry.release(host).unwrap();
        assert!(platform.is_alive(host_raw));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_owned_keeps_host() {
        let (mut registry, platform, host) = setup(ContextConfig::default());
        registry.create_shared_with(host, "toolkit").unwrap();
        registry.create_shared_with(host, "pane").unwrap();
        registry.release_owned();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(host));
        assert_eq!(platform.context_count(), 1);
    }

    #[test]
    fn test_creation_failure_propagates() {
        let (mut registry, platform, host) = setup(ContextConfig::default());
        platform.fail_next_context_creation();
        assert!(matches!(
            registry.create_shared_with(host, "toolkit"),
            Err(ContextError::Creation { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_quad_shader_compiled_once_per_context() {
        let (mut registry, platform, host) = setup(ContextConfig::default());
        let toolkit = registry.create_shared_with(host, "toolkit").unwrap();

        let (_, first) = registry.quad_shader(toolkit).unwrap();
        let (_, second) = registry.quad_shader(toolkit).unwrap();
        assert_eq!(first.program(), second.program());
        assert_eq!(platform.allocations().programs, 1);

        let (active, _) = registry.quad_shader(host).unwrap();
        assert_eq!(active.id(), host);
        assert_eq!(platform.allocations().programs, 2);

        registry.release(toolkit).unwrap();
        assert_eq!(platform.live_programs(), 1);
    }
}
