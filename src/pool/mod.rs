// ABOUTME: Remote session pooling with per-host admission and global backpressure
//
// This module keeps one reusable remote session per host identity so repeated
// inspection calls against the same host skip the connect and authenticate cost.
//
// Key components:
// - identity: HostIdentity, the pooling key (address, port, principal)
// - connector: Connector / RemoteSession seams implemented by transports
// - gate: per-host admission gates (one connect in flight per host)
// - directory: host -> session mapping, access order, LRU eviction
// - liveness: reuse-or-replace decision without network I/O
// - backpressure: global admission limiter for concurrent callers
// - reaper: background task retiring idle sessions
// - pool: SessionPool combining all components

pub mod backpressure;
pub mod config;
pub mod connector;
pub mod directory;
pub mod gate;
pub mod identity;
pub mod liveness;
pub mod metrics;
#[allow(clippy::module_inception)]
pub mod pool;
pub mod reaper;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenient access
pub use config::{ExecutionPolicy, PoolConfig};
pub use connector::{ConnectError, Connector, RemoteSession};
pub use identity::{HostIdentity, DEFAULT_SSH_PORT};
pub use metrics::MetricsSnapshot;
pub use pool::{PoolError, PoolResult, SessionInfo, SessionLease, SessionPool};
pub use reaper::SweepReport;
pub use session::SessionId;
