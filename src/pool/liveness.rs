// ABOUTME: Liveness/reconnect policy deciding whether a pooled session may be reused
//
// A handle is stale when its liveness flag was cleared, its transport reports
// closed, or it sat unused past the idle timeout. The reaper normally removes
// idle handles first; this check covers the window between sweeps.

use std::time::Duration;

use super::connector::RemoteSession;
use super::session::SessionHandle;

/// Verdict for a pooled handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Safe to hand out
    Live,
    /// Flag cleared or transport broken
    Dead,
    /// Unused for longer than the idle timeout
    IdleExpired {
        /// How long the handle has been idle
        idle: Duration,
    },
}

impl Liveness {
    /// Whether the handle may be reused
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }

    /// Short label for logs and metrics
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Dead => "dead",
            Self::IdleExpired { .. } => "idle",
        }
    }
}

/// Assess a handle without performing network I/O
pub fn assess<S: RemoteSession>(handle: &SessionHandle<S>, idle_timeout: Duration) -> Liveness {
    if !handle.is_marked_live() || !handle.session().is_alive() {
        return Liveness::Dead;
    }

    let idle = handle.idle_duration();
    if idle > idle_timeout {
        return Liveness::IdleExpired { idle };
    }

    Liveness::Live
}
