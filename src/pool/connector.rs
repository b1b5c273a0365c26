// ABOUTME: Connector and RemoteSession traits consumed by the session pool
//
// The pool never speaks SSH itself. A Connector establishes a session for a
// HostIdentity and the resulting RemoteSession reports transport liveness and
// knows how to close itself.

use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;

use super::identity::HostIdentity;

/// Errors returned when a session cannot be established
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Connection establishment exceeded the configured connect timeout
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// Socket-level failure (DNS, refused, reset)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// SSH protocol handshake failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Server host key did not verify against known hosts
    #[error("Host key verification failed: {0}")]
    HostKey(String),

    /// Server rejected every authentication method offered
    #[error("Authentication failed for {principal}: {reason}")]
    Auth {
        /// Principal that failed to authenticate
        principal: String,
        /// Human-readable reason
        reason: String,
    },

    /// Connector refused to connect (policy, unknown host, test doubles)
    #[error("Connection rejected: {0}")]
    Rejected(String),
}

/// A live remote session owned by the pool
pub trait RemoteSession: Send + Sync + 'static {
    /// Whether the underlying transport still looks usable.
    ///
    /// Must not perform network I/O; it is called on the checkout fast path.
    fn is_alive(&self) -> bool;

    /// Close the session. Errors are logged by the pool and otherwise ignored.
    fn close(&self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Establishes remote sessions for host identities
pub trait Connector: Send + Sync {
    /// Session type produced by this connector
    type Session: RemoteSession;

    /// Attempt to establish a live session to `host`.
    ///
    /// The returned future may be dropped at any time (timeout or caller
    /// cancellation); implementations must not leave a half-open session behind.
    fn connect(
        &self,
        host: &HostIdentity,
    ) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;
}
