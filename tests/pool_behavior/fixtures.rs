// ABOUTME: Shared test fixtures for session pool behavioral tests
//
// Provides:
// - MockConnector: in-memory Connector with latency, per-host failure,
//   attempt counting and per-host concurrent-connect tracking
// - MockSession: RemoteSession whose liveness and close state tests can observe
// - host(): HostIdentity shorthand
// - pool_config(): small, fast PoolConfig

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rinspect::pool::{ConnectError, Connector, ExecutionPolicy, HostIdentity, PoolConfig, RemoteSession};

pub fn host(name: &str) -> HostIdentity {
    HostIdentity::new(name, 22, "tester")
}

pub fn pool_config() -> PoolConfig {
    PoolConfig {
        idle_timeout: Duration::from_secs(60),
        max_pool_size: 16,
        max_concurrent_requests: 64,
        connect_timeout: Duration::from_secs(5),
        request_timeout: None,
        execution_policy: ExecutionPolicy::Concurrent,
    }
}

/// Session double
#[derive(Debug)]
pub struct MockSession {
    pub serial: usize,
    pub host: HostIdentity,
    alive: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MockSession {
    /// Break the transport; the next liveness check sees it dead
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl RemoteSession for MockSession {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Record {
    serial: usize,
    host: HostIdentity,
    alive: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct ConnectTracking {
    in_flight: HashMap<HostIdentity, usize>,
    peak_per_host: HashMap<HostIdentity, usize>,
    peak_total: usize,
}

/// Connector double
#[derive(Default)]
pub struct MockConnector {
    latency: Duration,
    failing: HashSet<HostIdentity>,
    attempts: AtomicUsize,
    hold: AtomicBool,
    tracking: Mutex<ConnectTracking>,
    records: Mutex<Vec<Record>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn failing_for(mut self, host: HostIdentity) -> Self {
        self.failing.insert(host);
        self
    }

    /// Make connects wait (beyond latency) until `release_hold` is called
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release_hold(&self) {
        self.hold.store(false, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Most simultaneous connects ever observed for `host`
    pub fn peak_connects_for(&self, host: &HostIdentity) -> usize {
        self.tracking
            .lock()
            .unwrap()
            .peak_per_host
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    /// Most simultaneous connects ever observed across all hosts
    pub fn peak_connects_total(&self) -> usize {
        self.tracking.lock().unwrap().peak_total
    }

    pub fn is_closed(&self, serial: usize) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.serial == serial && r.closed.load(Ordering::SeqCst))
    }

    pub fn closed_count(&self) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn kill_all(&self, host: &HostIdentity) {
        for record in self.records.lock().unwrap().iter() {
            if &record.host == host {
                record.alive.store(false, Ordering::SeqCst);
            }
        }
    }

    fn enter(&self, host: &HostIdentity) {
        let mut tracking = self.tracking.lock().unwrap();
        let current = {
            let count = tracking.in_flight.entry(host.clone()).or_default();
            *count += 1;
            *count
        };
        let peak = tracking.peak_per_host.entry(host.clone()).or_default();
        *peak = (*peak).max(current);
        let total: usize = tracking.in_flight.values().sum();
        tracking.peak_total = tracking.peak_total.max(total);
    }

    fn leave(&self, host: &HostIdentity) {
        let mut tracking = self.tracking.lock().unwrap();
        if let Some(count) = tracking.in_flight.get_mut(host) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Decrements the in-flight count even if the connect future is dropped
struct InFlight<'a> {
    connector: &'a MockConnector,
    host: &'a HostIdentity,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.connector.leave(self.host);
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, host: &HostIdentity) -> Result<MockSession, ConnectError> {
        let serial = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.enter(host);
        let _in_flight = InFlight {
            connector: self,
            host,
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        while self.hold.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        if self.failing.contains(host) {
            return Err(ConnectError::Rejected(format!("{host} refused the connection")));
        }

        let session = MockSession {
            serial,
            host: host.clone(),
            alive: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.records.lock().unwrap().push(Record {
            serial,
            host: host.clone(),
            alive: Arc::clone(&session.alive),
            closed: Arc::clone(&session.closed),
        });
        Ok(session)
    }
}
