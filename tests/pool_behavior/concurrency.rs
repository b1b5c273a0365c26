// ABOUTME: Behavioral tests for concurrent access to the session pool
// Verifies per-host connect serialization, cross-host parallelism and admission limits

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rinspect::pool::{ExecutionPolicy, PoolConfig, PoolError, SessionPool};

use crate::fixtures::{host, pool_config, MockConnector, MockSession};

/// Tracks how many bodies run at once
#[derive(Default)]
struct Overlap {
    current: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

impl Overlap {
    fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Many simultaneous callers for one host share a single connect
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_for_one_host_connect_once() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = Arc::new(MockConnector::with_latency(Duration::from_millis(50)));
    let target = host("db-1");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        let target = target.clone();
        tasks.push(tokio::spawn(async move {
            let lease = pool.acquire(&target, connector.as_ref()).await.unwrap();
            lease.session_id()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }

    assert_eq!(connector.attempts(), 1, "Only one connect should run for the host");
    assert_eq!(connector.peak_connects_for(&target), 1);
    assert!(ids.iter().all(|id| *id == ids[0]), "All callers should share the session");
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.gate_count(), 1, "One gate lives alongside the resident entry");
    assert_eq!(pool.metrics().reuses, 15);
}

/// Connects to different hosts overlap instead of queueing behind each other
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_hosts_connect_in_parallel() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = Arc::new(MockConnector::with_latency(Duration::from_millis(100)));

    let started = Instant::now();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        tasks.push(tokio::spawn(async move {
            let target = host(&format!("web-{i}"));
            pool.acquire(&target, connector.as_ref()).await.map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    let elapsed = started.elapsed();

    assert_eq!(connector.attempts(), 8);
    assert!(connector.peak_connects_total() > 1, "Connects should overlap");
    assert!(
        elapsed < Duration::from_millis(400),
        "8 parallel connects took {elapsed:?}, expected well under 8x latency"
    );
    assert_eq!(pool.len(), 8);
}

/// No more bodies run than max_concurrent_requests allows
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_limit_bounds_running_bodies() {
    let config = PoolConfig {
        max_concurrent_requests: 2,
        ..pool_config()
    };
    let pool: SessionPool<MockSession> = SessionPool::new(config).unwrap();
    let connector = Arc::new(MockConnector::new());
    let overlap = Arc::new(Overlap::default());

    let mut tasks = Vec::new();
    for i in 0..3 {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        let overlap = Arc::clone(&overlap);
        tasks.push(tokio::spawn(async move {
            let target = host(&format!("app-{i}"));
            pool.with_session(&target, connector.as_ref(), |_lease| async move {
                overlap.enter();
                tokio::time::sleep(Duration::from_millis(150)).await;
                overlap.leave();
                Ok::<_, PoolError>(())
            })
            .await
        }));
    }

    // Mid-flight, only two bodies have been admitted
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(overlap.started.load(Ordering::SeqCst), 2);
    assert_eq!(pool.in_flight(), 2);

    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(overlap.started.load(Ordering::SeqCst), 3);
    assert_eq!(overlap.peak.load(Ordering::SeqCst), 2);
    assert_eq!(pool.in_flight(), 0, "Every permit should be returned");
}

/// A caller waiting for admission can give up without leaking a permit
#[tokio::test]
async fn test_cancelled_while_waiting_for_admission() {
    let config = PoolConfig {
        max_concurrent_requests: 1,
        ..pool_config()
    };
    let pool: SessionPool<MockSession> = SessionPool::new(config).unwrap();
    let connector = Arc::new(MockConnector::new());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        tokio::spawn(async move {
            pool.with_session(&host("a"), connector.as_ref(), |_lease| async move {
                let _ = release_rx.await;
                Ok::<_, PoolError>(())
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.in_flight(), 1);

    let queued = host("b");
    let waiter = pool.with_session(&queued, connector.as_ref(), |_lease| async move {
        Ok::<_, PoolError>(())
    });
    let abandoned = tokio::time::timeout(Duration::from_millis(50), waiter).await;
    assert!(abandoned.is_err(), "Waiter should still be queued");

    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();
    assert_eq!(pool.in_flight(), 0);

    // Capacity is fully available again
    pool.with_session(&host("b"), connector.as_ref(), |_lease| async move {
        Ok::<_, PoolError>(())
    })
    .await
    .unwrap();
    assert_eq!(pool.in_flight(), 0);
}

/// A caller cancelled while queued behind a host's connect leaves no residue
#[tokio::test]
async fn test_cancelled_while_waiting_on_host_gate() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = Arc::new(MockConnector::new());
    let target = host("slow");
    connector.hold();

    let first = {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        let target = target.clone();
        tokio::spawn(async move { pool.acquire(&target, connector.as_ref()).await.map(|l| l.session_id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = tokio::time::timeout(Duration::from_millis(30), pool.acquire(&target, connector.as_ref())).await;
    assert!(second.is_err(), "Second caller should be waiting on the gate");

    connector.release_hold();
    first.await.unwrap().unwrap();

    assert_eq!(connector.attempts(), 1);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool.gate_count(), 1, "Abandoned waiter must not leave an extra gate");
}

/// Serialized policy runs bodies for one host one at a time
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serialized_policy_prevents_overlap() {
    let config = PoolConfig {
        execution_policy: ExecutionPolicy::Serialized,
        ..pool_config()
    };
    let peak = run_overlapping_bodies(config).await;
    assert_eq!(peak, 1, "Serialized bodies must not overlap");
}

/// Concurrent policy lets bodies for one host overlap on the shared session
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_policy_allows_overlap() {
    let config = PoolConfig {
        execution_policy: ExecutionPolicy::Concurrent,
        ..pool_config()
    };
    let peak = run_overlapping_bodies(config).await;
    assert!(peak > 1, "Concurrent bodies should overlap, peak was {peak}");
}

async fn run_overlapping_bodies(config: PoolConfig) -> usize {
    let pool: SessionPool<MockSession> = SessionPool::new(config).unwrap();
    let connector = Arc::new(MockConnector::new());
    let overlap = Arc::new(Overlap::default());
    let target = host("shared");

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        let overlap = Arc::clone(&overlap);
        let target = target.clone();
        tasks.push(tokio::spawn(async move {
            pool.with_session(&target, connector.as_ref(), |_lease| async move {
                overlap.enter();
                tokio::time::sleep(Duration::from_millis(40)).await;
                overlap.leave();
                Ok::<_, PoolError>(())
            })
            .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(connector.attempts(), 1);
    overlap.peak.load(Ordering::SeqCst)
}

/// The resident count never exceeds max_pool_size, even under contention
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_holds_under_concurrency() {
    let config = PoolConfig {
        max_pool_size: 3,
        ..pool_config()
    };
    let pool: SessionPool<MockSession> = SessionPool::new(config).unwrap();
    let connector = Arc::new(MockConnector::with_latency(Duration::from_millis(5)));

    let mut tasks = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        tasks.push(tokio::spawn(async move {
            let target = host(&format!("node-{}", i % 10));
            let lease = pool.acquire(&target, connector.as_ref()).await.unwrap();
            assert!(pool.len() <= 3);
            drop(lease);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(pool.len() <= 3);
    assert!(pool.metrics().evictions >= 7);
}
