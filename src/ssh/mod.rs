// ABOUTME: ssh2-backed Connector producing pooled SSH sessions
//
// libssh2 is blocking, so every connect, close and operation runs inside
// tokio::task::spawn_blocking. TCP and libssh2 timeouts both equal the pool's
// connect timeout, so a connect the pool has already given up on still
// terminates on its own.

use serde::{Deserialize, Serialize};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{AuthMethod, HostDirectory};
use crate::pool::config::duration_secs;
use crate::pool::{ConnectError, Connector, HostIdentity, RemoteSession};

pub mod ops;

/// Default cap for `read` (1 MiB)
pub const DEFAULT_MAX_READ_BYTES: u64 = 1024 * 1024;

/// `[ssh]` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// User for targets without an explicit or per-host user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_user: Option<String>,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts_file: Option<PathBuf>,

    /// Reject hosts missing from known_hosts
    pub strict_host_key_checking: bool,

    /// Interval between SSH keepalive messages
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// libssh2 timeout for blocking calls after authentication
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,

    /// Maximum bytes returned by `read`
    pub max_read_bytes: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            default_user: None,
            known_hosts_file: None,
            strict_host_key_checking: true,
            keepalive_interval: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(30),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
        }
    }
}

impl SshSettings {
    /// known_hosts path with `~` expanded
    pub fn known_hosts_path(&self) -> Option<PathBuf> {
        match &self.known_hosts_file {
            Some(path) => Some(expand_home(path)),
            None => dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn millis_u32(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

// === SSH Session ===

/// One authenticated libssh2 session
///
/// `ssh2::Session` is internally synchronized and cheap to clone, so blocking
/// operations take their own clone into `spawn_blocking`. Operations that
/// switch the session to non-blocking mode hold `io` exclusively.
pub struct SshSession {
    raw: ssh2::Session,
    host: HostIdentity,
    broken: Arc<AtomicBool>,
    io: Arc<RwLock<()>>,
}

impl SshSession {
    fn new(raw: ssh2::Session, host: HostIdentity) -> Self {
        Self {
            raw,
            host,
            broken: Arc::new(AtomicBool::new(false)),
            io: Arc::new(RwLock::new(())),
        }
    }

    /// Host this session is connected to
    pub const fn host(&self) -> &HostIdentity {
        &self.host
    }

    /// Flag the transport as broken; the pool replaces the session on next use
    pub fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            warn!(host = %self.host, "SSH transport marked broken");
        }
    }

    pub(crate) fn raw(&self) -> ssh2::Session {
        self.raw.clone()
    }

    pub(crate) fn io_lock(&self) -> Arc<RwLock<()>> {
        Arc::clone(&self.io)
    }
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .field("broken", &self.broken.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RemoteSession for SshSession {
    fn is_alive(&self) -> bool {
        !self.broken.load(Ordering::SeqCst)
    }

    async fn close(&self) -> io::Result<()> {
        let raw = self.raw();
        let host = self.host.clone();
        self.broken.store(true, Ordering::SeqCst);

        tokio::task::spawn_blocking(move || {
            raw.disconnect(None, "rinspect: session retired", None)
                .map_err(io::Error::from)?;
            debug!(host = %host, "SSH session disconnected");
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    }
}

// === Connector ===

/// Opens SSH sessions for the pool
#[derive(Debug, Clone)]
pub struct Ssh2Connector {
    settings: SshSettings,
    hosts: HostDirectory,
    connect_timeout: Duration,
}

impl Ssh2Connector {
    /// Create a connector; `connect_timeout` should match the pool's
    pub const fn new(settings: SshSettings, hosts: HostDirectory, connect_timeout: Duration) -> Self {
        Self {
            settings,
            hosts,
            connect_timeout,
        }
    }

    /// SSH settings in use
    pub const fn settings(&self) -> &SshSettings {
        &self.settings
    }
}

impl Connector for Ssh2Connector {
    type Session = SshSession;

    async fn connect(&self, host: &HostIdentity) -> Result<SshSession, ConnectError> {
        let plan = ConnectPlan {
            host: host.clone(),
            auth: self.hosts.auth_for(host),
            known_hosts: self.settings.known_hosts_path(),
            strict: self.settings.strict_host_key_checking,
            keepalive: self.settings.keepalive_interval,
            connect_timeout: self.connect_timeout,
            operation_timeout: self.settings.operation_timeout,
        };

        tokio::task::spawn_blocking(move || plan.establish())
            .await
            .map_err(|e| ConnectError::Io(io::Error::other(e)))?
    }
}

/// Everything the blocking connect needs, owned so it can outlive the caller
struct ConnectPlan {
    host: HostIdentity,
    auth: AuthMethod,
    known_hosts: Option<PathBuf>,
    strict: bool,
    keepalive: Duration,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl ConnectPlan {
    fn establish(self) -> Result<SshSession, ConnectError> {
        let tcp = self.open_tcp()?;
        tcp.set_read_timeout(Some(self.connect_timeout))?;
        tcp.set_write_timeout(Some(self.connect_timeout))?;
        let socket = tcp.try_clone()?;

        let mut session = ssh2::Session::new().map_err(|e| ConnectError::Handshake(e.to_string()))?;
        session.set_timeout(millis_u32(self.connect_timeout));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;

        self.verify_host_key(&session)?;
        self.authenticate(&session)?;

        let keepalive_secs = u32::try_from(self.keepalive.as_secs()).unwrap_or(u32::MAX).max(1);
        session.set_keepalive(true, keepalive_secs);
        session.set_timeout(millis_u32(self.operation_timeout));

        // From here on libssh2's operation timeout governs blocking calls
        socket.set_read_timeout(None)?;
        socket.set_write_timeout(None)?;

        debug!(host = %self.host, "SSH session established");
        Ok(SshSession::new(session, self.host))
    }

    fn open_tcp(&self) -> Result<TcpStream, ConnectError> {
        let addrs = self.host.socket_addr().to_socket_addrs()?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(ConnectError::Timeout(self.connect_timeout))
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(ConnectError::Io(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", self.host.address),
            )
        })))
    }

    fn verify_host_key(&self, session: &ssh2::Session) -> Result<(), ConnectError> {
        let (key, _) = session
            .host_key()
            .ok_or_else(|| ConnectError::HostKey("server presented no host key".to_string()))?;

        let mut known = session
            .known_hosts()
            .map_err(|e| ConnectError::HostKey(e.to_string()))?;

        match self.known_hosts.as_deref().filter(|p| p.exists()) {
            Some(path) => {
                known
                    .read_file(path, ssh2::KnownHostFileKind::OpenSSH)
                    .map_err(|e| ConnectError::HostKey(format!("{}: {e}", path.display())))?;
            }
            None if self.strict => {
                return Err(ConnectError::HostKey("known_hosts file not found".to_string()));
            }
            None => {}
        }

        match known.check_port(&self.host.address, self.host.port, key) {
            ssh2::CheckResult::Match => Ok(()),
            ssh2::CheckResult::Mismatch => Err(ConnectError::HostKey(format!(
                "host key for {} does not match known_hosts",
                self.host.socket_addr()
            ))),
            ssh2::CheckResult::NotFound if !self.strict => {
                warn!(host = %self.host, "Host not in known_hosts; accepting (strict checking disabled)");
                Ok(())
            }
            ssh2::CheckResult::NotFound => Err(ConnectError::HostKey(format!(
                "{} not found in known_hosts",
                self.host.socket_addr()
            ))),
            ssh2::CheckResult::Failure => {
                Err(ConnectError::HostKey("known_hosts lookup failed".to_string()))
            }
        }
    }

    fn authenticate(&self, session: &ssh2::Session) -> Result<(), ConnectError> {
        let principal = &self.host.principal;
        let auth_err = |reason: String| ConnectError::Auth {
            principal: principal.clone(),
            reason,
        };

        match &self.auth {
            AuthMethod::Agent => session
                .userauth_agent(principal)
                .map_err(|e| auth_err(format!("agent: {e}")))?,
            AuthMethod::KeyFile { path } => session
                .userauth_pubkey_file(principal, None, &expand_home(path), None)
                .map_err(|e| auth_err(format!("{}: {e}", path.display())))?,
        }

        if !session.authenticated() {
            return Err(auth_err("server did not accept credentials".to_string()));
        }
        Ok(())
    }
}
