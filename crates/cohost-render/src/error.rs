//! Render errors

use crate::gl::ShaderStage;
use thiserror::Error;

/// Resource errors raised while building render targets and shaders.
///
/// Every variant carries enough context to diagnose the failure without a
/// debugger: the requested size, the GL status, or the compiler log together
/// with the line-numbered source.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid surface size: {width}x{height}")]
    InvalidSize { width: i32, height: i32 },

    #[error("failed to allocate {width}x{height} RGBA texture (GL error 0x{code:04X})")]
    TextureAllocation { width: i32, height: i32, code: u32 },

    #[error("framebuffer {framebuffer} incomplete with texture {texture}: {status}")]
    FramebufferIncomplete {
        framebuffer: u32,
        texture: u32,
        status: &'static str,
    },

    #[error("{stage} shader did not compile\n\nCOMPILER LOG:\n{log}\nSOURCE:\n{numbered_source}")]
    ShaderCompile {
        stage: ShaderStage,
        log: String,
        /// Source with 1-based line numbers
        numbered_source: String,
    },

    #[error("shader program did not link:\n{log}")]
    ProgramLink { log: String },

    #[error("failed to create GL {kind}: {message}")]
    ObjectCreation { kind: &'static str, message: String },
}

impl RenderError {
    pub(crate) fn creation(kind: &'static str) -> impl FnOnce(String) -> Self {
        move |message| Self::ObjectCreation { kind, message }
    }
}

/// Prefix every line of `source` with its 1-based line number.
pub fn number_lines(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + source.len() / 8);
    for (i, line) in source.lines().enumerate() {
        out.push_str(&format!("{:4}: {}\n", i + 1, line));
    }
    out
}
