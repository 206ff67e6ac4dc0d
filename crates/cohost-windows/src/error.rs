//! Window hierarchy errors.

use crate::surface::SurfaceId;
use cohost_render::{ContextError, RenderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindowError {
    /// A second top-level window was requested while one is bound to the host.
    #[error("a primary surface already exists ({0}); only one window can be bound to the host")]
    SecondPrimary(SurfaceId),

    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),

    #[error("no primary surface")]
    NoPrimary,

    /// A steady-state GL failure, tagged with what was being done to which surface.
    #[error("{operation} failed for {surface}: {source}")]
    Render {
        surface: SurfaceId,
        operation: &'static str,
        #[source]
        source: RenderError,
    },

    #[error("pane '{pane}' {stage} failed: {message}")]
    Pane {
        pane: String,
        stage: &'static str,
        message: String,
    },

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl WindowError {
    pub(crate) fn render(
        surface: SurfaceId,
        operation: &'static str,
    ) -> impl FnOnce(RenderError) -> WindowError {
        move |source| WindowError::Render {
            surface,
            operation,
            source,
        }
    }
}
