//! Probe engine: ping a set of peers and wait, up to a deadline, for pongs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use pingu_core::wire::{self, PacketKind, WireError};
use pingu_core::PeerAddr;
use pingu_services::PendingProbes;

/// Result of one probe.
#[derive(Debug, Default)]
pub struct ProbeOutcome {
    /// Every target, true if its pong arrived before the deadline.
    pub alive: HashMap<PeerAddr, bool>,
    /// Targets whose ping never left this host.
    pub send_failures: HashMap<PeerAddr, std::io::Error>,
}

impl ProbeOutcome {
    pub fn is_alive(&self, addr: &PeerAddr) -> bool {
        self.alive.get(addr).copied().unwrap_or(false)
    }
}

/// Sends pings over the engine's socket and collects pongs through the
/// correlation table. Cheap to clone; the broadcast task holds its own copy.
#[derive(Clone)]
pub(crate) struct Prober {
    socket: Arc<UdpSocket>,
    pending: PendingProbes,
    ipv6_socket: bool,
    queue_capacity: usize,
    verbose: bool,
}

impl Prober {
    pub fn new(
        socket: Arc<UdpSocket>,
        pending: PendingProbes,
        queue_capacity: usize,
        verbose: bool,
    ) -> Self {
        let ipv6_socket = socket.local_addr().map(|a| a.is_ipv6()).unwrap_or(false);
        Self {
            socket,
            pending,
            ipv6_socket,
            queue_capacity,
            verbose,
        }
    }

    /// Ping every target once and wait up to `timeout` for their pongs.
    ///
    /// Returns early once every target that was successfully pinged has
    /// answered. Duplicate targets are collapsed.
    pub async fn probe(
        &self,
        targets: impl IntoIterator<Item = PeerAddr>,
        timeout: Duration,
    ) -> Result<ProbeOutcome, WireError> {
        let targets: HashSet<PeerAddr> = targets.into_iter().collect();
        let mut outcome = ProbeOutcome {
            alive: targets.iter().map(|a| (*a, false)).collect(),
            send_failures: HashMap::new(),
        };
        if targets.is_empty() || timeout.is_zero() {
            return Ok(outcome);
        }

        let ping = wire::encode(PacketKind::Ping)?;

        // Register before the first send so a fast pong is never missed.
        let (guard, mut pongs) = self.pending.register(&targets, self.queue_capacity);
        let mut outstanding = targets.clone();

        for addr in &targets {
            if let Err(e) = self.socket.send_to(&ping, addr.for_socket(self.ipv6_socket)).await {
                if self.verbose {
                    tracing::warn!(peer = %addr, error = %e, "ping send failed");
                }
                outstanding.remove(addr);
                outcome.send_failures.insert(*addr, e);
            }
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        while !outstanding.is_empty() {
            tokio::select! {
                _ = &mut deadline => break,

                pong = pongs.recv() => match pong {
                    Some(from) => {
                        if outstanding.remove(&from) {
                            outcome.alive.insert(from, true);
                        }
                    }
                    // The guard keeps a sender registered; closed means torn down.
                    None => break,
                },
            }
        }

        if self.verbose {
            tracing::debug!(
                probe = guard.id(),
                targets = targets.len(),
                answered = targets.len() - outstanding.len() - outcome.send_failures.len(),
                "probe finished"
            );
        }
        drop(guard);

        Ok(outcome)
    }
}
