// ABOUTME: Behavioral tests for session lifecycle: reaping, replacement, shutdown and timeouts

use std::sync::Arc;
use std::time::Duration;

use rinspect::pool::{ConnectError, PoolConfig, PoolError, SessionPool};

use crate::fixtures::{host, pool_config, MockConnector, MockSession};

fn short_idle_config() -> PoolConfig {
    PoolConfig {
        idle_timeout: Duration::from_millis(100),
        ..pool_config()
    }
}

/// Idle sessions are closed within one reaper cycle and the reaper stops once empty
#[tokio::test]
async fn test_idle_session_reaped_and_reaper_stops() {
    let pool: SessionPool<MockSession> = SessionPool::new(short_idle_config()).unwrap();
    let connector = MockConnector::new();
    let target = host("idle");

    assert!(!pool.is_reaper_running(), "No reaper before the first session");

    let serial = pool.acquire(&target, &connector).await.unwrap().serial;
    assert!(pool.is_reaper_running());

    // idle_timeout plus one reaper period (idle / 2), with slack
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(pool.is_empty(), "Idle session should have been reaped");
    assert!(connector.is_closed(serial));
    assert!(!pool.is_reaper_running(), "Reaper should stop on an empty pool");
    assert_eq!(pool.metrics().reaped, 1);
}

/// Inserting after the reaper stopped starts a new one
#[tokio::test]
async fn test_reaper_restarts_on_insert() {
    let pool: SessionPool<MockSession> = SessionPool::new(short_idle_config()).unwrap();
    let connector = MockConnector::new();

    drop(pool.acquire(&host("first"), &connector).await.unwrap());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!pool.is_reaper_running());

    drop(pool.acquire(&host("second"), &connector).await.unwrap());
    assert!(pool.is_reaper_running(), "Reaper should restart for the new session");
    assert_eq!(pool.len(), 1);
}

/// Active use keeps a session from being reaped
#[tokio::test]
async fn test_recently_used_session_survives_sweep() {
    let pool: SessionPool<MockSession> = SessionPool::new(short_idle_config()).unwrap();
    let connector = MockConnector::new();
    let target = host("busy");

    for _ in 0..6 {
        drop(pool.acquire(&target, &connector).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    assert!(pool.contains(&target));
    assert_eq!(connector.attempts(), 1);
}

/// A manual sweep retires only expired sessions
#[tokio::test]
async fn test_sweep_now_reports_counts() {
    let pool: SessionPool<MockSession> = SessionPool::new(short_idle_config()).unwrap();
    let connector = MockConnector::new();

    drop(pool.acquire(&host("old"), &connector).await.unwrap());
    tokio::time::sleep(Duration::from_millis(120)).await;
    drop(pool.acquire(&host("fresh"), &connector).await.unwrap());

    // The background reaper may have beaten us to "old"
    let report = pool.sweep_now().await;
    assert!(report.reaped <= 1);
    assert_eq!(report.remaining, 1);
    assert!(!report.reaper_stopped, "Manual sweeps never stop the reaper");
    assert!(pool.contains(&host("fresh")));
    assert!(!pool.contains(&host("old")));
    assert_eq!(pool.metrics().reaped, 1);
}

/// A session whose transport broke is replaced on the next acquire
#[tokio::test]
async fn test_broken_session_replaced() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = MockConnector::new();
    let target = host("flaky");

    let first = pool.acquire(&target, &connector).await.unwrap();
    let first_serial = first.serial;
    first.kill();
    drop(first);

    let second = pool.acquire(&target, &connector).await.unwrap();
    assert_ne!(second.serial, first_serial);
    assert!(connector.is_closed(first_serial));
    assert_eq!(connector.attempts(), 2);
    assert_eq!(pool.metrics().stale_replaced, 1);
}

/// A session marked dead by a caller is replaced rather than reused
#[tokio::test]
async fn test_marked_dead_session_replaced() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = MockConnector::new();
    let target = host("drop");

    let lease = pool.acquire(&target, &connector).await.unwrap();
    let first_id = lease.session_id();
    lease.mark_dead();
    drop(lease);

    let lease = pool.acquire(&target, &connector).await.unwrap();
    assert_ne!(lease.session_id(), first_id);
}

/// Replacing one host's session leaves other hosts alone
#[tokio::test]
async fn test_replacement_is_per_host() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = MockConnector::new();

    let steady = pool.acquire(&host("steady"), &connector).await.unwrap().session_id();
    drop(pool.acquire(&host("flaky"), &connector).await.unwrap());
    connector.kill_all(&host("flaky"));
    drop(pool.acquire(&host("flaky"), &connector).await.unwrap());

    assert_eq!(pool.acquire(&host("steady"), &connector).await.unwrap().session_id(), steady);
    assert_eq!(connector.attempts(), 3);
}

/// A connect that outlives connect_timeout fails with a timeout and leaves no entry
#[tokio::test]
async fn test_connect_timeout() {
    let config = PoolConfig {
        connect_timeout: Duration::from_millis(50),
        ..pool_config()
    };
    let pool: SessionPool<MockSession> = SessionPool::new(config).unwrap();
    let connector = MockConnector::with_latency(Duration::from_secs(5));
    let target = host("blackhole");

    let err = pool.acquire(&target, &connector).await.unwrap_err();

    match err {
        PoolError::Connect { host: failed, source } => {
            assert_eq!(failed, target);
            assert!(matches!(source, ConnectError::Timeout(_)));
        }
        other => panic!("Expected connect timeout, got {other:?}"),
    }
    assert!(!pool.contains(&target));
    assert_eq!(pool.gate_count(), 0);
    assert_eq!(pool.metrics().connect_timeouts, 1);
}

/// Admission waits are bounded by request_timeout when configured
#[tokio::test]
async fn test_request_timeout_rejects_queued_caller() {
    let config = PoolConfig {
        max_concurrent_requests: 1,
        request_timeout: Some(Duration::from_millis(50)),
        ..pool_config()
    };
    let pool: SessionPool<MockSession> = SessionPool::new(config).unwrap();
    let connector = Arc::new(MockConnector::new());

    let holder = {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        tokio::spawn(async move {
            pool.with_session(&host("a"), connector.as_ref(), |_lease| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, PoolError>(())
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = pool
        .with_session(&host("b"), connector.as_ref(), |_lease| async { Ok::<_, PoolError>(()) })
        .await;
    assert!(matches!(result, Err(PoolError::RequestTimeout(_))));

    holder.await.unwrap().unwrap();
}

/// Shutdown closes everything, stops the reaper and rejects later callers
#[tokio::test]
async fn test_shutdown() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = MockConnector::new();

    for name in ["a", "b", "c"] {
        drop(pool.acquire(&host(name), &connector).await.unwrap());
    }
    assert!(pool.is_reaper_running());

    pool.shutdown().await.unwrap();

    assert!(pool.is_shut_down());
    assert!(pool.is_empty());
    assert!(!pool.is_reaper_running());
    assert_eq!(connector.closed_count(), 3);
    assert!(matches!(
        pool.acquire(&host("a"), &connector).await,
        Err(PoolError::ShutDown)
    ));
    assert!(matches!(pool.shutdown().await, Err(PoolError::ShutDown)));
}

/// Callers queued for admission are released with an error on shutdown
#[tokio::test]
async fn test_shutdown_releases_queued_callers() {
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
    let queued = {
        let pool = pool.clone();
        let connector = Arc::clone(&connector);
        tokio::spawn(async move {
            pool.with_session(&host("b"), connector.as_ref(), |_lease| async {
                Ok::<_, PoolError>(())
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.shutdown().await.unwrap();

    assert!(matches!(queued.await.unwrap(), Err(PoolError::ShutDown)));
    release_tx.send(()).unwrap();
    holder.await.unwrap().unwrap();

    // The session borrowed during shutdown is closed once returned
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.closed_count(), 1);
}

/// Per-session info reflects checkouts
#[tokio::test]
async fn test_session_info() {
    let pool: SessionPool<MockSession> = SessionPool::new(pool_config()).unwrap();
    let connector = MockConnector::new();
    let target = host("info");

    for _ in 0..3 {
        drop(pool.acquire(&target, &connector).await.unwrap());
    }

    let sessions = pool.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].host, target);
    assert_eq!(sessions[0].checkouts, 3);
    assert!(sessions[0].live);
}
