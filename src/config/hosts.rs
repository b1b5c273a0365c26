// ABOUTME: Host directory resolving aliases and [user@]host[:port] targets to identities
//
// Aliases come from `[hosts.<alias>]` tables in the config file. Anything that is
// not an alias is parsed as a literal target. Authentication settings are
// recovered from the pooling key so the connector only ever sees a HostIdentity.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use thiserror::Error;

use crate::pool::{HostIdentity, DEFAULT_SSH_PORT};

/// One `[hosts.<alias>]` table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// Hostname or IP address
    pub address: String,

    /// SSH port (default: 22)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Login user (default: ssh.default_user, then $USER)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Private key used instead of the SSH agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

/// How the connector authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Keys offered by the running SSH agent
    Agent,
    /// Private key file on disk
    KeyFile {
        /// Path to the private key
        path: PathBuf,
    },
}

/// A target resolved to its pooling key and auth settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    /// Alias the target matched, if any
    pub alias: Option<String>,
    /// Pooling key
    pub identity: HostIdentity,
    /// Authentication method
    pub auth: AuthMethod,
}

/// Errors resolving a host target
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("Empty host target")]
    EmptyTarget,

    #[error("Missing host in target '{0}'")]
    MissingHost(String),

    #[error("Empty user in target '{0}'")]
    EmptyUser(String),

    #[error("Invalid port '{port}' in target '{target}'")]
    InvalidPort { target: String, port: String },

    #[error("Unterminated IPv6 address in target '{0}'")]
    UnterminatedIpv6(String),

    #[error("No user for '{0}': set ssh.default_user, a per-host user, or $USER")]
    NoUser(String),
}

/// Literal target split into its parts
#[derive(Debug, PartialEq, Eq)]
struct TargetParts<'a> {
    user: Option<&'a str>,
    host: &'a str,
    port: Option<u16>,
}

/// Resolves CLI targets against configured aliases
#[derive(Debug, Clone, Default)]
pub struct HostDirectory {
    hosts: BTreeMap<String, HostEntry>,
    default_user: Option<String>,
    key_files: HashMap<HostIdentity, PathBuf>,
}

impl HostDirectory {
    /// Build a directory from alias tables and the fallback user.
    ///
    /// When two aliases resolve to the same identity with different key files,
    /// the alias that sorts first wins.
    pub fn new(hosts: BTreeMap<String, HostEntry>, default_user: Option<String>) -> Self {
        let mut directory = Self {
            hosts,
            default_user: default_user.filter(|u| !u.is_empty()),
            key_files: HashMap::new(),
        };

        let mut key_files = HashMap::new();
        for (alias, entry) in &directory.hosts {
            let Some(path) = &entry.identity_file else {
                continue;
            };
            if let Ok(identity) = directory.identity_for_entry(alias, entry, None) {
                key_files.entry(identity).or_insert_with(|| path.clone());
            }
        }
        directory.key_files = key_files;
        directory
    }

    /// Build from loaded configuration, falling back to `$USER`
    pub fn from_config(config: &super::AppConfig) -> Self {
        let default_user = config
            .ssh
            .default_user
            .clone()
            .or_else(|| std::env::var("USER").ok());
        Self::new(config.hosts.clone(), default_user)
    }

    /// Resolve an alias, `user@alias`, or literal `[user@]host[:port]`
    pub fn resolve(&self, target: &str) -> Result<ResolvedHost, HostError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(HostError::EmptyTarget);
        }

        if let Some(entry) = self.hosts.get(target) {
            return self.resolve_alias(target, entry, None);
        }

        let parts = parse_target(target)?;
        if parts.port.is_none() {
            if let Some(entry) = self.hosts.get(parts.host) {
                return self.resolve_alias(parts.host, entry, parts.user);
            }
        }

        let user = self.pick_user(parts.user, None, target)?;
        let identity = HostIdentity::new(parts.host, parts.port.unwrap_or(DEFAULT_SSH_PORT), user);
        Ok(ResolvedHost {
            alias: None,
            auth: self.auth_for(&identity),
            identity,
        })
    }

    /// Authentication settings for a pooling key
    pub fn auth_for(&self, identity: &HostIdentity) -> AuthMethod {
        self.key_files
            .get(identity)
            .map_or(AuthMethod::Agent, |path| AuthMethod::KeyFile { path: path.clone() })
    }

    /// Configured aliases in name order
    pub fn aliases(&self) -> impl Iterator<Item = (&String, &HostEntry)> {
        self.hosts.iter()
    }

    /// Number of configured aliases
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether no aliases are configured
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn resolve_alias(
        &self,
        alias: &str,
        entry: &HostEntry,
        user_override: Option<&str>,
    ) -> Result<ResolvedHost, HostError> {
        let identity = self.identity_for_entry(alias, entry, user_override)?;
        Ok(ResolvedHost {
            alias: Some(alias.to_string()),
            auth: self.auth_for(&identity),
            identity,
        })
    }

    fn identity_for_entry(
        &self,
        alias: &str,
        entry: &HostEntry,
        user_override: Option<&str>,
    ) -> Result<HostIdentity, HostError> {
        let address = entry.address.trim();
        if address.is_empty() {
            return Err(HostError::MissingHost(alias.to_string()));
        }
        let user = self.pick_user(user_override, entry.user.as_deref(), alias)?;
        Ok(HostIdentity::new(
            address.trim_start_matches('[').trim_end_matches(']'),
            entry.port.unwrap_or(DEFAULT_SSH_PORT),
            user,
        ))
    }

    fn pick_user(
        &self,
        explicit: Option<&str>,
        configured: Option<&str>,
        target: &str,
    ) -> Result<String, HostError> {
        explicit
            .or(configured)
            .or(self.default_user.as_deref())
            .map(str::to_string)
            .ok_or_else(|| HostError::NoUser(target.to_string()))
    }
}

fn parse_target(target: &str) -> Result<TargetParts<'_>, HostError> {
    let (user, rest) = match target.rsplit_once('@') {
        Some((user, _)) if user.is_empty() => return Err(HostError::EmptyUser(target.to_string())),
        Some((user, rest)) => (Some(user), rest),
        None => (None, target),
    };

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| HostError::UnterminatedIpv6(target.to_string()))?;
        match after {
            "" => (host, None),
            _ => match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => {
                    return Err(HostError::InvalidPort {
                        target: target.to_string(),
                        port: after.to_string(),
                    })
                }
            },
        }
    } else if rest.matches(':').count() == 1 {
        let (host, port) = rest.split_once(':').unwrap_or((rest, ""));
        (host, Some(port))
    } else {
        // Bare IPv6 literal or plain hostname
        (rest, None)
    };

    if host.is_empty() {
        return Err(HostError::MissingHost(target.to_string()));
    }

    let port = port
        .map(|raw| {
            raw.parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| HostError::InvalidPort {
                    target: target.to_string(),
                    port: raw.to_string(),
                })
        })
        .transpose()?;

    Ok(TargetParts { user, host, port })
}
