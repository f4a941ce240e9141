//! Peer registry and health table: which peers we watch and how they fared.
//!
//! Both maps live in one `PeerTable` behind a single lock so that a reader
//! never sees a health entry for a peer that is no longer registered.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pingu_core::PeerAddr;

/// Registry plus last-known health of each registered peer.
#[derive(Debug, Default)]
pub struct PeerTable {
    registered: HashSet<PeerAddr>,
    health: HashMap<PeerAddr, bool>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to the broadcast set. Returns false if it was already there,
    /// in which case its health entry is left alone.
    pub fn register(&mut self, addr: PeerAddr) -> bool {
        self.registered.insert(addr)
    }

    /// Drop a peer and its health entry together.
    pub fn unregister(&mut self, addr: &PeerAddr) -> bool {
        self.health.remove(addr);
        self.registered.remove(addr)
    }

    pub fn is_registered(&self, addr: &PeerAddr) -> bool {
        self.registered.contains(addr)
    }

    /// Registered peers, ordered.
    pub fn peers(&self) -> BTreeSet<PeerAddr> {
        self.registered.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Write probe results, skipping any peer unregistered while the probe ran.
    /// Returns how many entries were written.
    pub fn commit(&mut self, results: &HashMap<PeerAddr, bool>) -> usize {
        let mut written = 0;
        for (addr, alive) in results {
            if self.registered.contains(addr) {
                self.health.insert(*addr, *alive);
                written += 1;
            }
        }
        written
    }

    /// Last known status. Unknown and unregistered peers read as not alive.
    pub fn is_alive(&self, addr: &PeerAddr) -> bool {
        self.health.get(addr).copied().unwrap_or(false)
    }

    /// Copy of the health table.
    pub fn health(&self) -> HashMap<PeerAddr, bool> {
        self.health.clone()
    }

    pub fn clear_health(&mut self) {
        self.health.clear();
    }
}

/// The peer table, shared between the engine facade and the broadcast task.
///
/// The lock is held only for map reads and writes, never across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedPeerTable(Arc<Mutex<PeerTable>>);

impl SharedPeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the table. A panic while holding the lock cannot leave the maps
    /// half-written (every mutation is a single map call), so poisoning is
    /// ignored.
    pub fn lock(&self) -> MutexGuard<'_, PeerTable> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
