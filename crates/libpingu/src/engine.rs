//! The engine: one UDP socket, its receive loop, the peer table and the
//! broadcast scheduler, behind the public operations callers use.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use pingu_core::config::DEFAULT_BIND_ADDR;
use pingu_core::{EngineConfig, PeerAddr};
use pingu_services::{PendingProbes, SharedPeerTable};

use crate::broadcast::{self as scheduler, BroadcastHandle, SchedulerState};
use crate::error::{parse_addr, EngineError};
use crate::listener::ReceiveLoop;
use crate::probe::Prober;

/// Where a node listens when the caller has no preference.
pub const DEFAULT_ADDRESS: &str = DEFAULT_BIND_ADDR;

/// A peer liveness engine bound to one UDP socket.
///
/// Nothing is read from the socket until [`Engine::start`]. Dropping the
/// engine stops it.
pub struct Engine {
    socket: Arc<UdpSocket>,
    config: EngineConfig,
    peers: SharedPeerTable,
    pending: PendingProbes,
    prober: Prober,
    lifecycle: Mutex<Lifecycle>,
    scheduler: Mutex<Option<BroadcastHandle>>,
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Engine {
    /// Bind a UDP socket on `addr` (`ip:port`).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: &str, config: EngineConfig) -> Result<Self, EngineError> {
        let bind_err = |source: io::Error| EngineError::Bind {
            addr: addr.to_string(),
            source,
        };
        let local: SocketAddr = addr
            .parse()
            .map_err(|e| bind_err(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let socket = open_socket(local).map_err(bind_err)?;
        let socket = Arc::new(socket);
        let config = config.normalized();
        let pending = PendingProbes::new();
        let prober = Prober::new(
            socket.clone(),
            pending.clone(),
            config.recv_buffer_size,
            config.verbose,
        );

        if config.verbose {
            tracing::info!(addr = ?socket.local_addr().ok(), "engine bound");
        }

        Ok(Self {
            socket,
            config,
            peers: SharedPeerTable::default(),
            pending,
            prober,
            lifecycle: Mutex::new(Lifecycle::default()),
            scheduler: Mutex::new(None),
        })
    }

    /// Spawn the receive loop. No-op while already running.
    pub fn start(&self) {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.shutdown.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let receive_loop = ReceiveLoop::new(
            self.socket.clone(),
            self.pending.clone(),
            &self.config,
            shutdown_rx,
        );
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.task = Some(tokio::spawn(receive_loop.run()));
    }

    /// Stop the receive loop and any broadcast scheduler, and clear the
    /// health table. The socket stays bound; `start` may be called again.
    pub fn stop(&self) {
        let was_running = {
            let mut lifecycle = self.lock_lifecycle();
            match lifecycle.shutdown.take() {
                Some(tx) => {
                    let _ = tx.send(());
                    true
                }
                None => false,
            }
        };

        if let Some(handle) = self.lock_scheduler().as_ref() {
            handle.cancel();
        }
        self.peers.lock().clear_health();

        if was_running && self.config.verbose {
            tracing::info!("engine stopped");
        }
    }

    /// Stop, wait for the receive loop to exit, and release the socket.
    pub async fn close(self) {
        self.stop();
        let task = self.lock_lifecycle().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "receive loop ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_lifecycle().shutdown.is_some()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    /// Add `addr` to the broadcast set. Idempotent.
    pub fn register(&self, addr: &str) -> Result<PeerAddr, EngineError> {
        let addr = parse_addr(addr)?;
        self.register_addr(addr);
        Ok(addr)
    }

    pub fn register_addr(&self, addr: PeerAddr) {
        if self.peers.lock().register(addr) && self.config.verbose {
            tracing::debug!(peer = %addr, "peer registered");
        }
    }

    /// Remove `addr` from the broadcast set and forget its health.
    pub fn unregister(&self, addr: &str) -> Result<PeerAddr, EngineError> {
        let addr = parse_addr(addr)?;
        self.unregister_addr(addr);
        Ok(addr)
    }

    pub fn unregister_addr(&self, addr: PeerAddr) {
        if self.peers.lock().unregister(&addr) && self.config.verbose {
            tracing::debug!(peer = %addr, "peer unregistered");
        }
    }

    pub fn peers(&self) -> BTreeSet<PeerAddr> {
        self.peers.lock().peers()
    }

    pub fn is_registered(&self, addr: &PeerAddr) -> bool {
        self.peers.lock().is_registered(addr)
    }

    /// Snapshot of the health table.
    pub fn health_table(&self) -> HashMap<PeerAddr, bool> {
        self.peers.lock().health()
    }

    /// Last recorded health of `addr`; false when unknown.
    pub fn is_alive(&self, addr: &PeerAddr) -> bool {
        self.peers.lock().is_alive(addr)
    }

    // ── Probing ──────────────────────────────────────────────────────────────

    /// Ping `addr` once and wait up to `timeout` for its pong.
    pub async fn ping_pong(&self, addr: &str, timeout: Duration) -> Result<(), EngineError> {
        let addr = parse_addr(addr)?;
        self.ping_pong_addr(addr, timeout).await
    }

    pub async fn ping_pong_addr(
        &self,
        addr: PeerAddr,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let mut outcome = self.prober.probe([addr], timeout).await?;
        if let Some(source) = outcome.send_failures.remove(&addr) {
            return Err(EngineError::SendFailure { addr, source });
        }
        if outcome.is_alive(&addr) {
            Ok(())
        } else {
            Err(EngineError::PingPongTimeout { addr, timeout })
        }
    }

    /// Ping every address in `addrs` and report which answered within
    /// `timeout`. Addresses need not be registered; nothing is recorded.
    pub async fn probe(
        &self,
        addrs: impl IntoIterator<Item = PeerAddr>,
        timeout: Duration,
    ) -> Result<HashMap<PeerAddr, bool>, EngineError> {
        let outcome = self.prober.probe(addrs, timeout).await?;
        Ok(outcome.alive)
    }

    // ── Broadcast ────────────────────────────────────────────────────────────

    /// Probe every registered peer each `period`, waiting `timeout` per
    /// cycle (zero means the default). Returns the running scheduler's handle
    /// if one is already active.
    pub fn broadcast_with_ticker(&self, period: Duration, timeout: Duration) -> BroadcastHandle {
        let mut slot = self.lock_scheduler();
        if let Some(handle) = slot.as_ref() {
            if handle.is_running() {
                return handle.clone();
            }
        }

        let handle = scheduler::spawn(
            self.prober.clone(),
            self.peers.clone(),
            period,
            timeout,
            self.config.verbose,
        );
        *slot = Some(handle.clone());
        handle
    }

    pub fn broadcast_state(&self) -> SchedulerState {
        self.lock_scheduler()
            .as_ref()
            .map_or(SchedulerState::Idle, BroadcastHandle::state)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_scheduler(&self) -> MutexGuard<'_, Option<BroadcastHandle>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("running", &self.is_running())
            .field("peers", &self.peers.lock().len())
            .finish()
    }
}

/// Open a non-blocking UDP socket on `addr`. IPv6 sockets are dual-stack so
/// IPv4 peers stay reachable.
fn open_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}
