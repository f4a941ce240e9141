//! Probe correlation. Routes each inbound pong to the probes waiting on it.
//!
//! A probe registers one bounded queue under every address it pings, before
//! the first ping leaves. The receive loop looks the pong's source address
//! up here and pushes into each waiting queue. Probes never share a queue,
//! so overlapping probes cannot consume each other's pongs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use pingu_core::PeerAddr;

/// Identifies one in-flight probe.
pub type ProbeId = u64;

#[derive(Debug)]
struct Waiter {
    probe: ProbeId,
    tx: mpsc::Sender<PeerAddr>,
}

/// Address → waiting probes.
#[derive(Debug, Clone, Default)]
pub struct PendingProbes {
    waiters: Arc<DashMap<PeerAddr, Vec<Waiter>>>,
    next_id: Arc<AtomicU64>,
}

impl PendingProbes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe over `targets`. Pongs from any target are delivered to
    /// the returned receiver until the guard is dropped.
    pub fn register(
        &self,
        targets: &HashSet<PeerAddr>,
        capacity: usize,
    ) -> (ProbeGuard, mpsc::Receiver<PeerAddr>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let probe = self.next_id.fetch_add(1, Ordering::Relaxed);

        for addr in targets {
            self.waiters.entry(*addr).or_default().push(Waiter {
                probe,
                tx: tx.clone(),
            });
        }

        let guard = ProbeGuard {
            pending: self.clone(),
            probe,
            targets: targets.iter().copied().collect(),
        };
        (guard, rx)
    }

    /// Queues waiting on `addr`. Empty if no probe is interested.
    pub fn senders_for(&self, addr: &PeerAddr) -> Vec<mpsc::Sender<PeerAddr>> {
        self.waiters
            .get(addr)
            .map(|w| w.iter().map(|w| w.tx.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of addresses with at least one waiting probe.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    fn deregister(&self, probe: ProbeId, targets: &[PeerAddr]) {
        for addr in targets {
            if let Some(mut entry) = self.waiters.get_mut(addr) {
                entry.retain(|w| w.probe != probe);
            }
            self.waiters.remove_if(addr, |_, waiters| waiters.is_empty());
        }
    }
}

/// Removes a probe's queues from the correlation table when dropped,
/// whether the probe finished, timed out, or was cancelled mid-await.
#[derive(Debug)]
pub struct ProbeGuard {
    pending: PendingProbes,
    probe: ProbeId,
    targets: Vec<PeerAddr>,
}

impl ProbeGuard {
    pub fn id(&self) -> ProbeId {
        self.probe
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.pending.deregister(self.probe, &self.targets);
    }
}
