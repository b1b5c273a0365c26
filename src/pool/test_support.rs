// ABOUTME: In-memory Connector and RemoteSession doubles for pool unit tests

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::connector::{ConnectError, Connector, RemoteSession};
use super::identity::HostIdentity;

pub fn host(name: &str) -> HostIdentity {
    HostIdentity::new(name, 22, "tester")
}

/// Session double whose transport state is shared with its connector
pub struct FakeSession {
    pub serial: usize,
    pub alive: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
    pub fail_close: bool,
}

impl FakeSession {
    pub fn new(serial: usize) -> Self {
        Self {
            serial,
            alive: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicBool::new(false)),
            fail_close: false,
        }
    }
}

impl RemoteSession for FakeSession {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "close failed"));
        }
        Ok(())
    }
}

struct Created {
    serial: usize,
    host: HostIdentity,
    alive: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// Connector double with attempt counting, latency and per-host failure
#[derive(Default)]
pub struct FakeConnector {
    attempts: AtomicUsize,
    latency: Duration,
    failing: HashSet<HostIdentity>,
    fail_close: bool,
    created: Mutex<Vec<Created>>,
}

impl FakeConnector {
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

    pub const fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn is_closed(&self, serial: usize) -> bool {
        self.created
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.serial == serial && c.closed.load(Ordering::SeqCst))
    }

    /// Break the transport of every session created for `host`
    pub fn kill(&self, host: &HostIdentity) {
        for created in self.created.lock().unwrap().iter() {
            if &created.host == host {
                created.alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, host: &HostIdentity) -> Result<FakeSession, ConnectError> {
        let serial = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.contains(host) {
            return Err(ConnectError::Rejected(format!("{host} is unreachable")));
        }

        let mut session = FakeSession::new(serial);
        session.fail_close = self.fail_close;
        self.created.lock().unwrap().push(Created {
            serial,
            host: host.clone(),
            alive: Arc::clone(&session.alive),
            closed: Arc::clone(&session.closed),
        });
        Ok(session)
    }
}
