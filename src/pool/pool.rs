// ABOUTME: Remote session pool: one reusable session per host with admission control
// ABOUTME: Per-host gates serialize connects, LRU bounds capacity, a reaper retires idle sessions

//! Session Pool Management
//!
//! The `SessionPool` owns one pooled session per `HostIdentity` and provides:
//! - At most one connect attempt in flight per host (per-host admission gates)
//! - Independent progress for distinct hosts (no global lock across connects)
//! - Transparent replacement of stale sessions
//! - LRU capacity eviction and a lazily started idle reaper
//! - Global admission control for concurrent callers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SessionPool                           │
//! │  ┌──────────────────┐                                        │
//! │  │ AdmissionLimiter │  bounds in-flight callers              │
//! │  └──────────────────┘                                        │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Mutex<PoolState>  (structural guard, never held        │  │
//! │  │                    across an await)                    │  │
//! │  │   Directory: host -> Arc<SessionHandle>                │  │
//! │  │              host -> AdmissionGate                     │  │
//! │  │              LRU access order                          │  │
//! │  │   reaper:    Option<JoinHandle>                        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let pool = SessionPool::new(PoolConfig::default())?;
//!
//! let listing = pool
//!     .with_session(&host, &connector, |session| async move {
//!         ops::list(&session, "/var/log").await
//!     })
//!     .await?;
//!
//! pool.shutdown().await?;
//! ```

use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backpressure::{AdmissionLimiter, BackpressureError};
use super::config::{ExecutionPolicy, PoolConfig};
use super::connector::{ConnectError, Connector, RemoteSession};
use super::directory::{Directory, RetireReason, Retired};
use super::gate::{AdmissionGate, GatePass};
use super::identity::HostIdentity;
use super::liveness;
use super::metrics::{MetricsSnapshot, PoolMetrics};
use super::reaper::{self, SweepReport};
use super::session::{SessionHandle, SessionId};

// === Pool Errors ===

/// Errors that can occur during pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// Connector failed or timed out; never retried inside the pool
    #[error("Failed to connect to {host}: {source}")]
    Connect {
        /// Host that could not be reached
        host: HostIdentity,
        /// Underlying connect failure
        source: ConnectError,
    },

    /// Caller waited too long for admission
    #[error("Request timed out after {0:?} waiting for admission")]
    RequestTimeout(Duration),

    /// Pool has been shut down
    #[error("Pool is shut down")]
    ShutDown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

impl From<BackpressureError> for PoolError {
    fn from(err: BackpressureError) -> Self {
        match err {
            BackpressureError::RequestTimeout { elapsed } => Self::RequestTimeout(elapsed),
            BackpressureError::Closed => Self::ShutDown,
        }
    }
}

impl PoolError {
    /// Whether this is a connect failure (host unreachable, auth, timeout)
    pub const fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

// === Session Info ===

/// Information about a resident session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Host the session belongs to
    pub host: HostIdentity,
    /// Session identifier
    pub session_id: SessionId,
    /// Time since the session was established
    pub age: Duration,
    /// Time since last checkout or return
    pub idle: Duration,
    /// Number of checkouts served
    pub checkouts: u64,
    /// Current liveness verdict
    pub live: bool,
}

// === Shared State ===

pub(crate) struct PoolState<S> {
    pub(crate) directory: Directory<S>,
    pub(crate) reaper: Option<JoinHandle<()>>,
}

pub(crate) struct Shared<S> {
    config: PoolConfig,
    state: Mutex<PoolState<S>>,
    metrics: PoolMetrics,
    shutdown: AtomicBool,
}

impl<S: RemoteSession> Shared<S> {
    fn state(&self) -> MutexGuard<'_, PoolState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn release(&self, host: &HostIdentity, handle: Option<&Arc<SessionHandle<S>>>) -> bool {
        self.state().directory.touch(host, handle)
    }

    /// One sweep of idle and dead sessions.
    ///
    /// With `from_reaper`, an empty directory (or shutdown) stops the reaper
    /// under the same guard that insertions check before starting a new one.
    pub(crate) async fn sweep(&self, from_reaper: bool) -> SweepReport {
        let (retired, remaining, reaper_stopped) = {
            let mut state = self.state();
            let retired = state.directory.sweep(self.config.idle_timeout);
            let remaining = state.directory.len();
            self.metrics.set_resident(remaining);

            let stop = from_reaper && (remaining == 0 || self.is_shut_down());
            if stop {
                state.reaper = None;
            }
            (retired, remaining, stop)
        };

        let reaped = retired.len();
        self.metrics.reaped(reaped as u64);
        self.close_retired(retired).await;

        SweepReport {
            reaped,
            remaining,
            reaper_stopped,
        }
    }

    /// Close retired handles; failures are logged per entry and never abort the loop
    async fn close_retired(&self, retired: Vec<Retired<S>>) {
        for Retired {
            host,
            handle,
            reason,
        } in retired
        {
            if !handle.retire() {
                // The last lease to drop closes it
                debug!(host = %host, session = %handle.id(), ?reason, "Retired session still borrowed");
                continue;
            }

            match handle.session().close().await {
                Ok(()) => debug!(host = %host, session = %handle.id(), ?reason, "Closed retired session"),
                Err(e) => {
                    self.metrics.close_failed();
                    warn!(host = %host, session = %handle.id(), ?reason, error = %e, "Failed to close retired session");
                }
            }
        }
    }
}

impl<S> Drop for Shared<S> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(reaper) = state.reaper.take() {
            reaper.abort();
        }
    }
}

// === Held Gate ===

/// A host's gate plus (once entered) its pass.
///
/// Dropping it releases the pass and retires the gate if the host ended up with
/// no entry and no other caller; this also runs when the acquiring future is
/// cancelled mid-connect.
struct HeldGate<'a, S: RemoteSession> {
    shared: &'a Shared<S>,
    host: &'a HostIdentity,
    gate: Option<AdmissionGate>,
    pass: Option<GatePass>,
}

impl<'a, S: RemoteSession> HeldGate<'a, S> {
    const fn new(shared: &'a Shared<S>, host: &'a HostIdentity, gate: AdmissionGate) -> Self {
        Self {
            shared,
            host,
            gate: Some(gate),
            pass: None,
        }
    }

    async fn enter(&mut self) {
        if let Some(gate) = &self.gate {
            self.pass = Some(gate.enter().await);
        }
    }
}

impl<S: RemoteSession> Drop for HeldGate<'_, S> {
    fn drop(&mut self) {
        self.pass.take();
        self.gate.take();
        self.shared.state().directory.retire_gate_if_unused(self.host);
    }
}

// === Session Lease ===

/// Scoped borrow of a pooled session.
///
/// Dropping the lease returns it to the pool (touch-on-return) on every exit
/// path, including cancellation of the borrowing future. If the pool retired
/// the session meanwhile, the last lease returned closes it.
pub struct SessionLease<S: RemoteSession> {
    host: HostIdentity,
    handle: Arc<SessionHandle<S>>,
    pool: Weak<Shared<S>>,
    exec_guard: Option<OwnedMutexGuard<()>>,
    serialized: bool,
}

impl<S: RemoteSession> SessionLease<S> {
    /// Host this lease belongs to
    pub const fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Identifier of the borrowed session
    pub fn session_id(&self) -> SessionId {
        self.handle.id()
    }

    /// Borrow the underlying session
    pub fn session(&self) -> &S {
        self.handle.session()
    }

    /// Flag the session dead (transport failure); the next acquire replaces it
    pub fn mark_dead(&self) {
        self.handle.mark_dead();
    }

    /// Whether the session's execution lock is held for this lease's scope
    pub const fn is_serialized(&self) -> bool {
        self.serialized
    }

    /// A second lease on the same session, held by `with_session` for the
    /// whole body so the return happens when the body completes
    fn share(&self) -> Self {
        self.handle.lend();
        Self {
            host: self.host.clone(),
            handle: Arc::clone(&self.handle),
            pool: Weak::clone(&self.pool),
            exec_guard: None,
            serialized: false,
        }
    }
}

impl<S: RemoteSession> Deref for SessionLease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.handle.session()
    }
}

impl<S: RemoteSession> std::fmt::Debug for SessionLease<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("host", &self.host)
            .field("session", &self.handle.id())
            .field("serialized", &self.serialized)
            .finish()
    }
}

impl<S: RemoteSession> Drop for SessionLease<S> {
    fn drop(&mut self) {
        self.exec_guard.take();

        if let Some(shared) = self.pool.upgrade() {
            shared.release(&self.host, Some(&self.handle));
        }

        if self.handle.give_back() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let handle = Arc::clone(&self.handle);
                let host = self.host.clone();
                runtime.spawn(async move {
                    if let Err(e) = handle.session().close().await {
                        warn!(host = %host, session = %handle.id(), error = %e, "Failed to close retired session");
                    }
                });
            }
        }
    }
}

// === Session Pool ===

/// Main entry point for remote session pooling
///
/// Cloning is cheap; clones share the same sessions, limiter and reaper.
pub struct SessionPool<S: RemoteSession> {
    shared: Arc<Shared<S>>,
    limiter: AdmissionLimiter,
}

impl<S: RemoteSession> Clone for SessionPool<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            limiter: self.limiter.clone(),
        }
    }
}

impl<S: RemoteSession> std::fmt::Debug for SessionPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.shared.config)
            .field("resident", &self.len())
            .field("in_flight", &self.limiter.in_flight())
            .field("shut_down", &self.shared.is_shut_down())
            .finish()
    }
}

impl<S: RemoteSession> SessionPool<S> {
    /// Create a new, empty pool
    ///
    /// No background task runs until the first session is inserted.
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;

        let limiter = AdmissionLimiter::new(config.max_concurrent_requests, config.request_timeout);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                directory: Directory::new(config.max_pool_size),
                reaper: None,
            }),
            config,
            metrics: PoolMetrics::new(),
            shutdown: AtomicBool::new(false),
        });

        Ok(Self { shared, limiter })
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Run `body` with a borrowed session for `host`.
    ///
    /// Acquires an admission permit, then a session, applies the execution
    /// policy and runs the body. The permit, the execution lock and the return
    /// of the session are held until the body's future completes, whether or
    /// not that future keeps its lease, and are released on every exit path.
    /// Errors from `body` are returned unchanged; pool errors are converted
    /// with `From<PoolError>`.
    pub async fn with_session<C, F, Fut, T, E>(
        &self,
        host: &HostIdentity,
        connector: &C,
        body: F,
    ) -> Result<T, E>
    where
        C: Connector<Session = S>,
        F: FnOnce(SessionLease<S>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError>,
    {
        let permit = self.limiter.acquire().await.map_err(PoolError::from)?;
        if permit.waited() > Duration::from_secs(1) {
            debug!(host = %host, waited_ms = %permit.waited().as_millis(), "Admitted after queueing");
        }

        let mut lease = self.acquire(host, connector).await?;
        let mut scope = lease.share();
        if self.shared.config.execution_policy == ExecutionPolicy::Serialized {
            scope.exec_guard = Some(lease.handle.lock_execution().await);
            lease.serialized = true;
        }

        let result = body(lease).await;
        drop(scope);
        drop(permit);
        result
    }

    /// Check out the session for `host`, connecting if it is absent or stale.
    ///
    /// Concurrent calls for one host perform at most one connect; calls for
    /// different hosts never wait on each other's connects.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The pool has been shut down
    /// - The connector fails or exceeds `connect_timeout`
    pub async fn acquire<C>(&self, host: &HostIdentity, connector: &C) -> PoolResult<SessionLease<S>>
    where
        C: Connector<Session = S>,
    {
        if self.shared.is_shut_down() {
            return Err(PoolError::ShutDown);
        }

        let gate = self.shared.state().directory.gate(host);
        let mut held = HeldGate::new(&self.shared, host, gate);
        held.enter().await;

        // Fast path: reuse a live session without any network I/O
        let stale = {
            let mut state = self.shared.state();
            match state.directory.get(host) {
                Some(handle) => {
                    let verdict = liveness::assess(&handle, self.shared.config.idle_timeout);
                    if verdict.is_live() {
                        state.directory.checkout(host, &handle);
                        // Lent under the guard so eviction cannot close it first
                        let lease = self.lease(host, handle);
                        drop(state);
                        self.shared.metrics.reused();
                        debug!(host = %host, session = %lease.session_id(), "Reusing pooled session");
                        return Ok(lease);
                    }

                    state.directory.remove_if_same(host, &handle);
                    self.shared.metrics.set_resident(state.directory.len());
                    Some(Retired {
                        host: host.clone(),
                        handle,
                        reason: RetireReason::Stale(verdict),
                    })
                }
                None => None,
            }
        };

        if let Some(retired) = stale {
            self.shared.metrics.stale_replaced();
            warn!(
                host = %host,
                session = %retired.handle.id(),
                reason = ?retired.reason,
                "Replacing stale session"
            );
            self.shared.close_retired(vec![retired]).await;
        }

        // Slow path: connect while holding only this host's gate
        let started = Instant::now();
        let connect_timeout = self.shared.config.connect_timeout;
        let session = match tokio::time::timeout(connect_timeout, connector.connect(host)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(self.connect_failed(host, e)),
            Err(_) => return Err(self.connect_failed(host, ConnectError::Timeout(connect_timeout))),
        };

        let handle = Arc::new(SessionHandle::new(session));
        let admitted = {
            let mut state = self.shared.state();
            if self.shared.is_shut_down() {
                None
            } else {
                let retired = state.directory.insert(host.clone(), Arc::clone(&handle));
                let lease = self.lease(host, Arc::clone(&handle));
                self.shared.metrics.set_resident(state.directory.len());
                if state.reaper.is_none() {
                    state.reaper = Some(reaper::spawn(
                        Arc::downgrade(&self.shared),
                        self.shared.config.reaper_period(),
                    ));
                }
                Some((retired, lease))
            }
        };
        drop(held);

        let Some((retired, lease)) = admitted else {
            if let Err(e) = handle.session().close().await {
                warn!(host = %host, error = %e, "Failed to close session opened during shutdown");
            }
            return Err(PoolError::ShutDown);
        };

        self.shared.metrics.connect_succeeded();
        info!(
            host = %host,
            session = %handle.id(),
            elapsed_ms = %started.elapsed().as_millis(),
            "Connected new session"
        );

        let evicted = retired
            .iter()
            .filter(|r| r.reason == RetireReason::Evicted)
            .count();
        if evicted > 0 {
            self.shared.metrics.evicted(evicted as u64);
            info!(count = evicted, max = self.shared.config.max_pool_size, "Evicted least recently used sessions");
        }
        self.shared.close_retired(retired).await;

        Ok(lease)
    }

    /// Touch the host's session on return (no close)
    ///
    /// Returns false if no session is resident for `host`.
    pub fn release(&self, host: &HostIdentity) -> bool {
        self.shared.release(host, None)
    }

    /// Run one reaper sweep immediately
    pub async fn sweep_now(&self) -> SweepReport {
        self.shared.sweep(false).await
    }

    /// Shutdown the pool
    ///
    /// Stops the reaper, rejects waiting and future callers, and closes every
    /// resident session.
    ///
    /// # Errors
    ///
    /// Returns error if the pool was already shut down.
    pub async fn shutdown(&self) -> PoolResult<()> {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }

        self.limiter.close();

        let retired = {
            let mut state = self.shared.state();
            if let Some(reaper) = state.reaper.take() {
                reaper.abort();
            }
            let retired = state.directory.drain();
            self.shared.metrics.set_resident(0);
            retired
        };

        info!(session_count = retired.len(), "Shutting down session pool");
        self.shared.close_retired(retired).await;
        info!("Session pool shutdown complete");
        Ok(())
    }

    /// Number of resident sessions
    pub fn len(&self) -> usize {
        self.shared.state().directory.len()
    }

    /// Whether no sessions are resident
    pub fn is_empty(&self) -> bool {
        self.shared.state().directory.is_empty()
    }

    /// Whether a session is resident for `host`
    pub fn contains(&self, host: &HostIdentity) -> bool {
        self.shared.state().directory.contains(host)
    }

    /// Resident hosts, least recently used first
    pub fn hosts(&self) -> Vec<HostIdentity> {
        self.shared.state().directory.hosts()
    }

    /// Number of per-host admission gates currently allocated
    pub fn gate_count(&self) -> usize {
        self.shared.state().directory.gate_count()
    }

    /// Information about all resident sessions, least recently used first
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let state = self.shared.state();
        let idle_timeout = self.shared.config.idle_timeout;
        state
            .directory
            .hosts()
            .into_iter()
            .filter_map(|host| {
                let handle = state.directory.get(&host)?;
                Some(SessionInfo {
                    session_id: handle.id(),
                    age: handle.created_at().elapsed(),
                    idle: handle.idle_duration(),
                    checkouts: handle.checkouts(),
                    live: liveness::assess(&handle, idle_timeout).is_live(),
                    host,
                })
            })
            .collect()
    }

    /// Pool metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Callers currently admitted by the limiter
    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    /// Whether the idle reaper task is running
    pub fn is_reaper_running(&self) -> bool {
        self.shared.state().reaper.is_some()
    }

    /// Whether `shutdown()` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }

    fn lease(&self, host: &HostIdentity, handle: Arc<SessionHandle<S>>) -> SessionLease<S> {
        handle.lend();
        SessionLease {
            host: host.clone(),
            handle,
            pool: Arc::downgrade(&self.shared),
            exec_guard: None,
            serialized: false,
        }
    }

    fn connect_failed(&self, host: &HostIdentity, err: ConnectError) -> PoolError {
        self.shared
            .metrics
            .connect_failed(matches!(err, ConnectError::Timeout(_)));
        error!(host = %host, error = %err, "Failed to connect");

        PoolError::Connect {
            host: host.clone(),
            source: err,
        }
    }
}
