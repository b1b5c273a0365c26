// ABOUTME: Global admission limiter bounding concurrent in-flight callers
//
// Pure backpressure: callers beyond capacity suspend on a fair semaphore until a
// permit frees. A request-level timeout turns starvation into RequestTimeout;
// closing the limiter (pool shutdown) wakes every waiter with Closed.

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// === Backpressure Error Types ===

/// Errors returned when the limiter does not admit a caller
#[derive(Debug, Clone, Error)]
pub enum BackpressureError {
    /// Caller waited longer than the request timeout for a permit
    #[error("Request timeout after {elapsed:?}")]
    RequestTimeout {
        /// How long the request waited
        elapsed: Duration,
    },

    /// Limiter was closed while (or before) waiting
    #[error("Admission limiter closed")]
    Closed,
}

// === Admission Permit ===

/// One admitted caller; the permit returns to the pool on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    waited: Duration,
}

impl AdmissionPermit {
    /// Time spent queued before admission
    pub const fn waited(&self) -> Duration {
        self.waited
    }
}

// === Admission Limiter ===

/// Fixed-capacity permit pool shared by all callers
#[derive(Debug, Clone)]
pub struct AdmissionLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    request_timeout: Option<Duration>,
}

impl AdmissionLimiter {
    /// Create a limiter admitting at most `capacity` concurrent callers
    ///
    /// # Arguments
    /// * `capacity` - Maximum in-flight callers (clamped to at least 1)
    /// * `request_timeout` - Maximum wait for a permit (None = wait indefinitely)
    #[must_use]
    pub fn new(capacity: usize, request_timeout: Option<Duration>) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            request_timeout,
        }
    }

    /// Wait for admission
    ///
    /// Dropping the returned future before it resolves leaves no permit behind.
    pub async fn acquire(&self) -> Result<AdmissionPermit, BackpressureError> {
        let started = Instant::now();
        let acquire = Arc::clone(&self.semaphore).acquire_owned();

        let permit = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire)
                .await
                .map_err(|_| BackpressureError::RequestTimeout {
                    elapsed: started.elapsed(),
                })?,
            None => acquire.await,
        }
        .map_err(|_| BackpressureError::Closed)?;

        Ok(AdmissionPermit {
            _permit: permit,
            waited: started.elapsed(),
        })
    }

    /// Try to get a permit without waiting
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit {
                _permit: permit,
                waited: Duration::ZERO,
            })
    }

    /// Maximum concurrent callers
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Callers currently admitted
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Reject current waiters and every future acquire
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether the limiter has been closed
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}
