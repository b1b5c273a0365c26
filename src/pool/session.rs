// ABOUTME: Session handle wrapping one live remote session plus usage metadata
//
// Tracks creation time, last-use time (lock-free, nanos since creation), the
// liveness flag flipped by executors on transport death, and the per-session
// execution lock used by the serialized execution policy.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::connector::RemoteSession;

// === Session ID ===

/// Unique identifier for a pooled session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new unique session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === Session Handle ===

/// High bit of `SessionHandle::borrows`; the low bits count leases
const RETIRED: u64 = 1 << 63;

/// A pooled session with liveness and usage tracking
pub struct SessionHandle<S> {
    id: SessionId,
    session: S,
    created_at: Instant,
    /// Last use, as nanos since `created_at`
    last_used_nanos: AtomicU64,
    live: AtomicBool,
    /// Outstanding leases, plus `RETIRED` once the pool lets go
    borrows: AtomicU64,
    checkouts: AtomicU64,
    exec_lock: Arc<Mutex<()>>,
}

impl<S: RemoteSession> SessionHandle<S> {
    /// Wrap a freshly connected session
    pub fn new(session: S) -> Self {
        Self {
            id: SessionId::new(),
            session,
            created_at: Instant::now(),
            last_used_nanos: AtomicU64::new(0),
            live: AtomicBool::new(true),
            borrows: AtomicU64::new(0),
            checkouts: AtomicU64::new(0),
            exec_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Session identifier
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Borrow the underlying session
    pub const fn session(&self) -> &S {
        &self.session
    }

    /// When the session was established
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Update last-use timestamp
    pub fn touch(&self) {
        #[allow(clippy::cast_possible_truncation)]
        let nanos = self.created_at.elapsed().as_nanos() as u64;
        self.last_used_nanos.fetch_max(nanos, Ordering::AcqRel);
    }

    /// Record a checkout and touch
    pub(crate) fn checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Number of times this handle was handed out
    pub fn checkouts(&self) -> u64 {
        self.checkouts.load(Ordering::Relaxed)
    }

    /// Time since last use
    pub fn idle_duration(&self) -> Duration {
        let last_used = Duration::from_nanos(self.last_used_nanos.load(Ordering::Acquire));
        self.created_at.elapsed().saturating_sub(last_used)
    }

    /// Check if the handle has been idle longer than timeout
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.idle_duration() > timeout
    }

    /// Liveness flag as last set by the pool or an executor
    pub fn is_marked_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Flag the handle as dead; the next liveness check replaces it
    pub fn mark_dead(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Mark the handle as removed from the pool; it is never handed out again.
    ///
    /// Returns true if no lease is outstanding, in which case the caller must
    /// close the session. Otherwise the last lease returned closes it.
    pub(crate) fn retire(&self) -> bool {
        self.live.store(false, Ordering::Release);
        self.borrows.fetch_or(RETIRED, Ordering::AcqRel) == 0
    }

    /// Whether the pool has let go of this handle
    pub fn is_retired(&self) -> bool {
        self.borrows.load(Ordering::Acquire) & RETIRED != 0
    }

    /// Record an outstanding lease
    pub(crate) fn lend(&self) {
        self.borrows.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a returned lease.
    ///
    /// Returns true if this was the last lease of a retired handle; the caller
    /// must close the session.
    pub(crate) fn give_back(&self) -> bool {
        self.borrows.fetch_sub(1, Ordering::AcqRel) == RETIRED | 1
    }

    /// Acquire the per-session execution lock (serialized policy)
    pub(crate) async fn lock_execution(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.exec_lock).lock_owned().await
    }
}

impl<S> std::fmt::Debug for SessionHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("live", &self.live.load(Ordering::Relaxed))
            .field("checkouts", &self.checkouts.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
