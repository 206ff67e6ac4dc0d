//! Focus Chain - one focused surface, falling back to the primary.

use crate::surface::{Surface, SurfaceId};
use tracing::debug;

/// Tracks which surface has keyboard focus.
///
/// The primary surface starts focused, silently. Every change notifies the
/// old surface (lost) before the new one (gained).
#[derive(Debug, Default)]
pub struct FocusChain {
    focused: Option<SurfaceId>,
}

impl FocusChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start out focused on `primary` without notifying anyone.
    pub(crate) fn reset(&mut self, primary: Option<SurfaceId>) {
        self.focused = primary;
    }

    /// Move focus to `target`. No-op when it already has focus.
    pub fn set_focused(&mut self, target: SurfaceId, surfaces: &[Surface]) {
        if self.focused == Some(target) {
            return;
        }
        if let Some(old) = self.focused.and_then(|id| find(surfaces, id)) {
            old.events.focus_changed(false);
        }
        self.focused = Some(target);
        if let Some(new) = find(surfaces, target) {
            new.events.focus_changed(true);
        }
        debug!(surface = %target, "focus moved");
    }

    /// The focused surface, checked on every read: a surface that is gone or
    /// whose view died hands focus back to the primary.
    pub fn focused(&mut self, primary: Option<SurfaceId>, surfaces: &[Surface]) -> Option<SurfaceId> {
        let current = self.focused?;
        if Some(current) == primary {
            return Some(current);
        }
        let live = find(surfaces, current).is_some_and(Surface::has_live_view);
        if !live {
            match primary {
                Some(primary) => {
                    debug!(surface = %current, "focused surface has no live view, falling back to primary");
                    self.set_focused(primary, surfaces);
                }
                None => self.focused = None,
            }
        }
        self.focused
    }

    /// Focus as last set, without the liveness check.
    pub fn peek(&self) -> Option<SurfaceId> {
        self.focused
    }
}

fn find(surfaces: &[Surface], id: SurfaceId) -> Option<&Surface> {
    surfaces.iter().find(|s| s.id == id)
}
