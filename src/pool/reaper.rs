// ABOUTME: Background idle reaper retiring sessions unused past the idle timeout
//
// Runs only while the pool holds at least one session. It is started by the
// first insertion into an empty pool, stops itself when a sweep leaves the
// directory empty, and holds only a weak reference so a dropped pool ends it.
//
// ┌─────────────┐   sleep(period)   ┌────────────┐   empty?   ┌──────────┐
// │ insert into │ ────────────────▶ │   sweep    │ ─────────▶ │   stop   │
// │ empty pool  │ ◀──────────────── │ dead/idle  │            └──────────┘
// └─────────────┘     non-empty     └────────────┘

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connector::RemoteSession;
use super::pool::Shared;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions retired by this sweep
    pub reaped: usize,
    /// Sessions still resident afterwards
    pub remaining: usize,
    /// Whether the reaper stopped itself after this sweep
    pub reaper_stopped: bool,
}

/// Spawn the reaper loop for a pool
pub(crate) fn spawn<S: RemoteSession>(pool: Weak<Shared<S>>, period: Duration) -> JoinHandle<()> {
    info!(period_ms = %period.as_millis(), "Idle reaper started");
    tokio::spawn(reap_loop(pool, period))
}

async fn reap_loop<S: RemoteSession>(pool: Weak<Shared<S>>, period: Duration) {
    loop {
        tokio::time::sleep(period).await;

        let Some(shared) = pool.upgrade() else {
            debug!("Pool dropped; idle reaper exiting");
            break;
        };

        let report = shared.sweep(true).await;
        if report.reaped > 0 {
            info!(
                reaped = report.reaped,
                remaining = report.remaining,
                "Reaped idle sessions"
            );
        }

        if report.reaper_stopped {
            info!("Pool empty; idle reaper stopped");
            break;
        }
    }
}
