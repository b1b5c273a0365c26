// ABOUTME: Host identity used as the pooling key for remote sessions
//
// A HostIdentity names one remote endpoint plus the principal used to log in.
// Two identities compare equal only when address, port and principal all match,
// so aliases resolving to the same endpoint share one pooled session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Unique key identifying a pooled remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostIdentity {
    /// Hostname or IP address (IPv6 without brackets)
    pub address: String,
    /// TCP port of the SSH server
    pub port: u16,
    /// Login principal (remote user name)
    pub principal: String,
}

impl HostIdentity {
    /// Create a new host identity
    pub fn new(address: impl Into<String>, port: u16, principal: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            principal: principal.into(),
        }
    }

    /// `host:port` form suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl fmt::Display for HostIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.principal, self.socket_addr())
    }
}
