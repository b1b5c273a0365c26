// ABOUTME: Configuration for the remote session pool
//
// Defines PoolConfig with all tunable parameters for the pool:
// - Idle timeout (drives the reaper period and stale detection)
// - Capacity bound for resident sessions
// - Global admission limit for concurrent callers
// - Connect and request timeouts
// - Execution policy for bodies sharing one session

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::pool::{PoolError, PoolResult};

/// How bodies that borrow the same pooled session are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPolicy {
    /// Bodies run concurrently over the shared session
    Concurrent,
    /// Bodies on the same session run one at a time (per-host throughput ceiling)
    #[default]
    Serialized,
}

/// Configuration for the session pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Sessions unused for longer than this are retired
    #[serde(with = "duration_secs", alias = "idleTimeoutSeconds")]
    pub idle_timeout: Duration,

    /// Maximum number of resident sessions before LRU eviction
    #[serde(alias = "maxPoolSize")]
    pub max_pool_size: usize,

    /// Maximum number of in-flight callers across all hosts
    #[serde(alias = "maxConcurrentRequests")]
    pub max_concurrent_requests: usize,

    /// Upper bound on one connection establishment
    #[serde(with = "duration_secs", alias = "connectTimeoutSeconds")]
    pub connect_timeout: Duration,

    /// How long a caller may wait for admission (None = wait indefinitely)
    #[serde(
        with = "option_duration_secs",
        alias = "requestTimeoutSeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_timeout: Option<Duration>,

    /// Scheduling of bodies sharing one session
    #[serde(alias = "executionPolicy")]
    pub execution_policy: ExecutionPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            max_pool_size: 100,
            max_concurrent_requests: 100,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            execution_policy: ExecutionPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Reject configurations the pool cannot honor
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size == 0 {
            return Err(PoolError::InvalidConfig(
                "max_pool_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(PoolError::InvalidConfig(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PoolError::InvalidConfig(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Period of the idle reaper: half the idle timeout, never zero
    pub fn reaper_period(&self) -> Duration {
        (self.idle_timeout / 2).max(Duration::from_millis(1))
    }
}

/// Serde helper for Duration as seconds (u64)
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for Option<Duration> as seconds (u64)
mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
