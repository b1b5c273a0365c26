// ABOUTME: Inspector facade resolving targets and running remote operations through the pool
//
// Every operation: resolve target -> with_session -> executor. Transport failures
// retire the borrowed session; command failures are returned as-is.

use std::future::Future;
use thiserror::Error;
use tracing::warn;

use crate::config::{AppConfig, HostDirectory, HostError, ResolvedHost};
use crate::pool::{
    Connector, MetricsSnapshot, PoolConfig, PoolError, RemoteSession, SessionLease, SessionPool,
};
use crate::ssh::ops::{self, ExecOutput, RemoteEntry, RemoteOperationError, RemoteRead, RemoteStat};
use crate::ssh::Ssh2Connector;

/// Errors surfaced by inspection operations
#[derive(Debug, Error)]
pub enum InspectError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Remote(#[from] RemoteOperationError),
}

impl InspectError {
    /// Short category label for output
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Host(_) => "host",
            Self::Pool(PoolError::Connect { .. }) => "connect",
            Self::Pool(PoolError::RequestTimeout(_)) => "timeout",
            Self::Pool(_) => "pool",
            Self::Remote(_) => "remote",
        }
    }
}

/// Retire the lease's session if `result` failed at the transport level
pub fn check_transport<T, S: RemoteSession>(
    lease: &SessionLease<S>,
    result: Result<T, RemoteOperationError>,
) -> Result<T, InspectError> {
    if let Err(err) = &result {
        if err.is_transport() {
            warn!(
                host = %lease.host(),
                session = %lease.session_id(),
                error = %err,
                "Transport failure; retiring session"
            );
            lease.mark_dead();
        }
    }
    result.map_err(InspectError::from)
}

/// Remote inspection over pooled sessions
pub struct Inspector<C: Connector = Ssh2Connector> {
    hosts: HostDirectory,
    connector: C,
    pool: SessionPool<C::Session>,
    max_read_bytes: u64,
}

impl Inspector<Ssh2Connector> {
    /// Build the SSH connector, host directory and pool from configuration
    pub fn new(config: &AppConfig) -> Result<Self, InspectError> {
        let hosts = HostDirectory::from_config(config);
        let connector = Ssh2Connector::new(
            config.ssh.clone(),
            hosts.clone(),
            config.pool.connect_timeout,
        );
        let mut inspector = Self::with_connector(hosts, connector, config.pool.clone())?;
        inspector.max_read_bytes = config.ssh.max_read_bytes;
        Ok(inspector)
    }

    /// Stat `path` on `target`
    pub async fn stat(&self, target: &str, path: &str) -> Result<RemoteStat, InspectError> {
        self.run(target, |lease| async move {
            let result = ops::stat(&lease, path).await;
            check_transport(&lease, result)
        })
        .await
    }

    /// Read up to the configured byte cap from `path` on `target`
    pub async fn read(&self, target: &str, path: &str) -> Result<RemoteRead, InspectError> {
        self.read_bounded(target, path, self.max_read_bytes).await
    }

    /// Read up to `max_bytes` from `path` on `target`
    pub async fn read_bounded(
        &self,
        target: &str,
        path: &str,
        max_bytes: u64,
    ) -> Result<RemoteRead, InspectError> {
        self.run(target, |lease| async move {
            let result = ops::read(&lease, path, max_bytes).await;
            check_transport(&lease, result)
        })
        .await
    }

    /// List `path` on `target`
    pub async fn list(&self, target: &str, path: &str) -> Result<Vec<RemoteEntry>, InspectError> {
        self.run(target, |lease| async move {
            let result = ops::list(&lease, path).await;
            check_transport(&lease, result)
        })
        .await
    }

    /// Execute `program args...` on `target`
    pub async fn execute(
        &self,
        target: &str,
        program: &str,
        args: &[String],
    ) -> Result<ExecOutput, InspectError> {
        self.run(target, |lease| async move {
            let result = ops::execute(&lease, program, args).await;
            check_transport(&lease, result)
        })
        .await
    }
}

impl<C: Connector> Inspector<C> {
    /// Assemble an inspector from parts
    pub fn with_connector(
        hosts: HostDirectory,
        connector: C,
        pool_config: PoolConfig,
    ) -> Result<Self, InspectError> {
        Ok(Self {
            hosts,
            connector,
            pool: SessionPool::new(pool_config)?,
            max_read_bytes: crate::ssh::DEFAULT_MAX_READ_BYTES,
        })
    }

    /// Resolve a target without connecting
    pub fn resolve(&self, target: &str) -> Result<ResolvedHost, InspectError> {
        Ok(self.hosts.resolve(target)?)
    }

    /// Run `body` with a pooled session for `target`
    pub async fn run<T, F, Fut>(&self, target: &str, body: F) -> Result<T, InspectError>
    where
        F: FnOnce(SessionLease<C::Session>) -> Fut,
        Fut: Future<Output = Result<T, InspectError>>,
    {
        let resolved = self.hosts.resolve(target)?;
        self.pool
            .with_session(&resolved.identity, &self.connector, body)
            .await
    }

    /// The underlying pool
    pub const fn pool(&self) -> &SessionPool<C::Session> {
        &self.pool
    }

    /// Configured host aliases
    pub const fn hosts(&self) -> &HostDirectory {
        &self.hosts
    }

    /// Pool metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.pool.metrics()
    }

    /// Close every pooled session
    pub async fn shutdown(&self) -> Result<(), InspectError> {
        Ok(self.pool.shutdown().await?)
    }
}
