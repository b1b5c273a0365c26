// ABOUTME: Remote inspection executors (stat, read, list, execute) over a borrowed SSH session
//
// Executors never close or retire the session they borrow. A transport-level
// failure flags the session broken so the pool replaces it on next acquire;
// command-level failures (missing file, non-zero exit) leave it untouched.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;
use std::io::{self, Read};
use std::path::Path;
use std::sync::PoisonError;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::SshSession;

/// libssh2 error codes we distinguish
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_CHANNEL_FAILURE: i32 = -21;
const LIBSSH2_ERROR_CHANNEL_REQUEST_DENIED: i32 = -22;

/// Sleep between polls while draining exec output
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// SFTP status codes we distinguish
const SSH_FX_NO_SUCH_FILE: i32 = 2;
const SSH_FX_PERMISSION_DENIED: i32 = 3;
const SSH_FX_NO_SUCH_PATH: i32 = 10;

// === Errors ===

/// Failure of a remote operation
#[derive(Debug, Error)]
pub enum RemoteOperationError {
    #[error("{path}: no such file or directory")]
    NotFound { path: String },

    #[error("{path}: permission denied")]
    PermissionDenied { path: String },

    #[error("SFTP error on {path} (code {code}): {message}")]
    Sftp { path: String, code: i32, message: String },

    #[error("Channel request refused: {0}")]
    Channel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Remote operation timed out")]
    Timeout,

    #[error("SSH transport error: {0}")]
    Transport(String),

    #[error("Remote operation task failed: {0}")]
    Task(String),
}

impl RemoteOperationError {
    /// Whether the session itself is unusable (socket-level failure)
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    fn from_ssh(err: &ssh2::Error, path: &str) -> Self {
        let message = err.message().to_string();
        match err.code() {
            ssh2::ErrorCode::SFTP(SSH_FX_NO_SUCH_FILE | SSH_FX_NO_SUCH_PATH) => Self::NotFound {
                path: path.to_string(),
            },
            ssh2::ErrorCode::SFTP(SSH_FX_PERMISSION_DENIED) => Self::PermissionDenied {
                path: path.to_string(),
            },
            ssh2::ErrorCode::SFTP(code) => Self::Sftp {
                path: path.to_string(),
                code,
                message,
            },
            ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT) => Self::Timeout,
            ssh2::ErrorCode::Session(
                LIBSSH2_ERROR_CHANNEL_FAILURE | LIBSSH2_ERROR_CHANNEL_REQUEST_DENIED,
            ) => Self::Channel(message),
            ssh2::ErrorCode::Session(_) => Self::Transport(message),
        }
    }

    fn from_io(err: &io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_string(),
            },
            _ => Self::Transport(err.to_string()),
        }
    }
}

// === Results ===

/// Kind of a remote filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl RemoteKind {
    /// Classify from POSIX mode bits
    pub const fn from_mode(mode: Option<u32>) -> Self {
        const S_IFMT: u32 = 0o170_000;
        match mode {
            Some(mode) => match mode & S_IFMT {
                0o100_000 => Self::File,
                0o040_000 => Self::Directory,
                0o120_000 => Self::Symlink,
                _ => Self::Other,
            },
            None => Self::Other,
        }
    }

    /// Single-character marker used in listings
    pub const fn marker(self) -> char {
        match self {
            Self::File => '-',
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::Other => '?',
        }
    }
}

/// Result of `stat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteStat {
    pub path: String,
    pub kind: RemoteKind,
    pub size: Option<u64>,
    /// Permission bits only (`mode & 0o7777`)
    pub permissions: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteStat {
    fn from_file_stat(path: String, stat: &ssh2::FileStat) -> Self {
        Self {
            path,
            kind: RemoteKind::from_mode(stat.perm),
            size: stat.size,
            permissions: stat.perm.map(|mode| mode & 0o7777),
            uid: stat.uid,
            gid: stat.gid,
            modified: stat
                .mtime
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }

    /// Permissions as `0644`-style octal
    pub fn permissions_octal(&self) -> Option<String> {
        self.permissions.map(|bits| format!("{bits:04o}"))
    }
}

/// Result of `read`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRead {
    pub path: String,
    pub bytes: Vec<u8>,
    /// Whether the file is longer than the returned bytes
    pub truncated: bool,
}

impl RemoteRead {
    /// Content decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// One directory entry returned by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: RemoteKind,
    pub size: Option<u64>,
}

/// Result of `execute`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with status 0
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

// === Executors ===

/// Stat a remote path (follows symlinks)
pub async fn stat(session: &SshSession, path: &str) -> Result<RemoteStat, RemoteOperationError> {
    let path = validate_path(path)?;
    run_blocking(session, Access::Shared, move |raw| {
        let sftp = raw.sftp().map_err(|e| RemoteOperationError::from_ssh(&e, &path))?;
        let stat = sftp
            .stat(Path::new(&path))
            .map_err(|e| RemoteOperationError::from_ssh(&e, &path))?;
        Ok(RemoteStat::from_file_stat(path, &stat))
    })
    .await
}

/// Read up to `max_bytes` from the start of a remote file
pub async fn read(
    session: &SshSession,
    path: &str,
    max_bytes: u64,
) -> Result<RemoteRead, RemoteOperationError> {
    let path = validate_path(path)?;
    run_blocking(session, Access::Shared, move |raw| {
        let sftp = raw.sftp().map_err(|e| RemoteOperationError::from_ssh(&e, &path))?;
        let file = sftp
            .open(Path::new(&path))
            .map_err(|e| RemoteOperationError::from_ssh(&e, &path))?;

        let mut bytes = Vec::new();
        file.take(max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| RemoteOperationError::from_io(&e, &path))?;

        let truncated = truncate_to(&mut bytes, max_bytes);
        Ok(RemoteRead {
            path,
            bytes,
            truncated,
        })
    })
    .await
}

/// List a remote directory, sorted by name
pub async fn list(session: &SshSession, path: &str) -> Result<Vec<RemoteEntry>, RemoteOperationError> {
    let path = validate_path(path)?;
    run_blocking(session, Access::Shared, move |raw| {
        let sftp = raw.sftp().map_err(|e| RemoteOperationError::from_ssh(&e, &path))?;
        let listing = sftp
            .readdir(Path::new(&path))
            .map_err(|e| RemoteOperationError::from_ssh(&e, &path))?;

        let mut entries: Vec<RemoteEntry> = listing
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_string_lossy().into_owned();
                (name != "." && name != "..").then(|| RemoteEntry {
                    name,
                    kind: RemoteKind::from_mode(stat.perm),
                    size: stat.size,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    })
    .await
}

/// Run `program args...` through the remote shell with every word quoted
pub async fn execute(
    session: &SshSession,
    program: &str,
    args: &[String],
) -> Result<ExecOutput, RemoteOperationError> {
    let command = build_command(program, args)?;
    run_blocking(session, Access::Exclusive, move |raw| {
        let mut channel = raw
            .channel_session()
            .map_err(|e| RemoteOperationError::from_ssh(&e, &command))?;
        channel
            .exec(&command)
            .map_err(|e| RemoteOperationError::from_ssh(&e, &command))?;

        // Both streams share one channel window, so they are drained together
        let timeout = match raw.timeout() {
            0 => None,
            millis => Some(Duration::from_millis(u64::from(millis))),
        };
        raw.set_blocking(false);
        let drained = drain_streams(
            &mut channel.stream(0),
            &mut channel.stderr(),
            || channel.eof(),
            timeout,
        );
        raw.set_blocking(true);
        let (stdout, stderr) = drained.map_err(|e| RemoteOperationError::from_io(&e, &command))?;

        channel
            .wait_close()
            .map_err(|e| RemoteOperationError::from_ssh(&e, &command))?;
        let exit_code = channel
            .exit_status()
            .map_err(|e| RemoteOperationError::from_ssh(&e, &command))?;

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    })
    .await
}

/// Read stdout and stderr until `finished` reports EOF with nothing left.
///
/// The readers must be non-blocking; `WouldBlock` means no data yet.
fn drain_streams<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    finished: impl Fn() -> bool,
    timeout: Option<Duration>,
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    let started = Instant::now();
    let mut out = Vec::new();
    let mut err = Vec::new();
    let mut buf = [0_u8; 16 * 1024];

    loop {
        let progressed = read_available(stdout, &mut buf, &mut out)?
            | read_available(stderr, &mut buf, &mut err)?;
        if progressed {
            continue;
        }
        if finished() {
            return Ok((out, err));
        }
        if timeout.is_some_and(|t| started.elapsed() > t) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "command output timed out"));
        }
        std::thread::sleep(DRAIN_POLL_INTERVAL);
    }
}

/// One non-blocking read; returns whether any bytes arrived
fn read_available(reader: &mut impl Read, buf: &mut [u8], sink: &mut Vec<u8>) -> io::Result<bool> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

/// How an operation uses the session's blocking mode
#[derive(Debug, Clone, Copy)]
enum Access {
    /// Plain blocking calls; may overlap with other shared operations
    Shared,
    /// Switches the session to non-blocking mode while it runs
    Exclusive,
}

/// Run blocking libssh2 work for one operation and flag transport failures
async fn run_blocking<T, F>(session: &SshSession, access: Access, op: F) -> Result<T, RemoteOperationError>
where
    T: Send + 'static,
    F: FnOnce(&ssh2::Session) -> Result<T, RemoteOperationError> + Send + 'static,
{
    let raw = session.raw();
    let io = session.io_lock();
    let result = tokio::task::spawn_blocking(move || match access {
        Access::Shared => {
            let _io = io.read().unwrap_or_else(PoisonError::into_inner);
            op(&raw)
        }
        Access::Exclusive => {
            let _io = io.write().unwrap_or_else(PoisonError::into_inner);
            op(&raw)
        }
    })
    .await
    .map_err(|e| RemoteOperationError::Task(e.to_string()))?;

    if let Err(err) = &result {
        if err.is_transport() {
            session.mark_broken();
        }
    }
    result
}

fn validate_path(path: &str) -> Result<String, RemoteOperationError> {
    if path.is_empty() {
        return Err(RemoteOperationError::InvalidRequest("empty path".to_string()));
    }
    if path.contains('\0') {
        return Err(RemoteOperationError::InvalidRequest(
            "path contains a NUL byte".to_string(),
        ));
    }
    Ok(path.to_string())
}

fn build_command(program: &str, args: &[String]) -> Result<String, RemoteOperationError> {
    if program.trim().is_empty() {
        return Err(RemoteOperationError::InvalidRequest("empty program".to_string()));
    }
    if std::iter::once(program).chain(args.iter().map(String::as_str)).any(|w| w.contains('\0')) {
        return Err(RemoteOperationError::InvalidRequest(
            "command contains a NUL byte".to_string(),
        ));
    }

    let words: Vec<Cow<'_, str>> = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(|word| shell_escape::unix::escape(Cow::Borrowed(word)))
        .collect();
    Ok(words.join(" "))
}

/// Cut `bytes` to `max`; returns whether anything was cut
fn truncate_to(bytes: &mut Vec<u8>, max: u64) -> bool {
    let max = usize::try_from(max).unwrap_or(usize::MAX);
    if bytes.len() > max {
        bytes.truncate(max);
        true
    } else {
        false
    }
}
