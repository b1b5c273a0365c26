// ABOUTME: Pool directory mapping host identities to session handles
// ABOUTME: Owns the access-order record, per-host gates and LRU capacity eviction
//
// Everything here is synchronous and runs under the pool's structural guard.
// Callers close the handles returned from insert/sweep/drain after releasing the
// guard; the guard is never held across an await.

use lru::LruCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::connector::RemoteSession;
use super::gate::AdmissionGate;
use super::identity::HostIdentity;
use super::liveness::{self, Liveness};
use super::session::SessionHandle;

/// Why a handle left the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// Pushed out by the capacity evictor (least recently used)
    Evicted,
    /// Replaced by a newer session for the same host
    Replaced,
    /// Found stale by the liveness policy
    Stale(Liveness),
    /// Pool shutdown
    Shutdown,
}

/// A handle removed from the directory that still needs closing
pub struct Retired<S> {
    pub host: HostIdentity,
    pub handle: Arc<SessionHandle<S>>,
    pub reason: RetireReason,
}

/// Mapping from host identity to pooled session plus access order
pub struct Directory<S> {
    entries: HashMap<HostIdentity, Arc<SessionHandle<S>>>,
    gates: HashMap<HostIdentity, AdmissionGate>,
    /// Least recently used first; capacity is enforced by `insert`, not the cache
    order: LruCache<HostIdentity, ()>,
    max_size: usize,
}

impl<S: RemoteSession> Directory<S> {
    /// Create an empty directory bounded to `max_size` resident sessions
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            gates: HashMap::new(),
            order: LruCache::unbounded(),
            max_size: max_size.max(1),
        }
    }

    /// Get the host's admission gate, creating it lazily
    pub fn gate(&mut self, host: &HostIdentity) -> AdmissionGate {
        self.gates.entry(host.clone()).or_default().clone()
    }

    /// Current handle for a host, if any
    pub fn get(&self, host: &HostIdentity) -> Option<Arc<SessionHandle<S>>> {
        self.entries.get(host).cloned()
    }

    /// Record a checkout of `handle`: touch it and mark the host most recently used.
    ///
    /// Returns false if the directory no longer holds this exact handle.
    pub fn checkout(&mut self, host: &HostIdentity, handle: &Arc<SessionHandle<S>>) -> bool {
        if !self.holds(host, handle) {
            return false;
        }
        handle.checkout();
        self.order.promote(host);
        true
    }

    /// Touch-on-return. With `handle` given, only touches if it is still current.
    pub fn touch(&mut self, host: &HostIdentity, handle: Option<&Arc<SessionHandle<S>>>) -> bool {
        let current = match (self.entries.get(host), handle) {
            (Some(current), Some(returned)) if Arc::ptr_eq(current, returned) => current,
            (Some(current), None) => current,
            _ => return false,
        };
        current.touch();
        self.order.promote(host);
        true
    }

    /// Insert or replace the host's handle, then evict least recently used
    /// entries until the directory is within capacity.
    ///
    /// The inserted host is most recently used and therefore never evicted.
    pub fn insert(&mut self, host: HostIdentity, handle: Arc<SessionHandle<S>>) -> Vec<Retired<S>> {
        let mut retired = Vec::new();

        handle.checkout();
        if let Some(previous) = self.entries.insert(host.clone(), handle) {
            retired.push(Retired {
                host: host.clone(),
                handle: previous,
                reason: RetireReason::Replaced,
            });
        }
        self.order.put(host.clone(), ());
        self.gates.entry(host.clone()).or_default();

        while self.entries.len() > self.max_size {
            let Some((victim, ())) = self.order.pop_lru() else {
                break;
            };
            if victim == host {
                // Unreachable with max_size >= 1; keep the invariant anyway
                self.order.put(victim, ());
                break;
            }
            if let Some(handle) = self.entries.remove(&victim) {
                debug!(host = %victim, session = %handle.id(), "Evicting least recently used session");
                self.retire_gate_if_unused(&victim);
                retired.push(Retired {
                    host: victim,
                    handle,
                    reason: RetireReason::Evicted,
                });
            }
        }

        retired
    }

    /// Remove the host's entry only if it is still `handle`
    pub fn remove_if_same(&mut self, host: &HostIdentity, handle: &Arc<SessionHandle<S>>) -> bool {
        if !self.holds(host, handle) {
            return false;
        }
        self.entries.remove(host);
        self.order.pop(host);
        self.retire_gate_if_unused(host);
        true
    }

    /// Drop the host's gate when it has no entry and nobody holds or awaits it
    pub fn retire_gate_if_unused(&mut self, host: &HostIdentity) {
        if self.entries.contains_key(host) {
            return;
        }
        if self.gates.get(host).is_some_and(AdmissionGate::is_unused) {
            self.gates.remove(host);
        }
    }

    /// Remove every entry that is dead or idle past `idle_timeout`
    pub fn sweep(&mut self, idle_timeout: Duration) -> Vec<Retired<S>> {
        let stale: Vec<(HostIdentity, Liveness)> = self
            .entries
            .iter()
            .filter_map(|(host, handle)| {
                let verdict = liveness::assess(handle, idle_timeout);
                (!verdict.is_live()).then(|| (host.clone(), verdict))
            })
            .collect();

        let mut retired = Vec::with_capacity(stale.len());
        for (host, verdict) in stale {
            if let Some(handle) = self.entries.remove(&host) {
                self.order.pop(&host);
                self.retire_gate_if_unused(&host);
                retired.push(Retired {
                    host,
                    handle,
                    reason: RetireReason::Stale(verdict),
                });
            }
        }
        retired
    }

    /// Remove every entry (shutdown)
    pub fn drain(&mut self) -> Vec<Retired<S>> {
        self.order.clear();
        let retired: Vec<Retired<S>> = self
            .entries
            .drain()
            .map(|(host, handle)| Retired {
                host,
                handle,
                reason: RetireReason::Shutdown,
            })
            .collect();
        self.gates.retain(|_, gate| !gate.is_unused());
        retired
    }

    /// Number of resident sessions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no sessions are resident
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a session is resident for `host`
    pub fn contains(&self, host: &HostIdentity) -> bool {
        self.entries.contains_key(host)
    }

    /// Resident hosts, least recently used first
    pub fn hosts(&self) -> Vec<HostIdentity> {
        let mut hosts: Vec<HostIdentity> = self.order.iter().map(|(host, ())| host.clone()).collect();
        hosts.reverse();
        hosts
    }

    /// Iterate resident entries (unordered)
    pub fn iter(&self) -> impl Iterator<Item = (&HostIdentity, &Arc<SessionHandle<S>>)> {
        self.entries.iter()
    }

    /// Number of live admission gates
    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    fn holds(&self, host: &HostIdentity, handle: &Arc<SessionHandle<S>>) -> bool {
        self.entries.get(host).is_some_and(|current| Arc::ptr_eq(current, handle))
    }
}
