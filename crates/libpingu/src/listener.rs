//! Receive loop. Reads every inbound datagram and dispatches it.
//!
//! Pings are answered unconditionally. Pongs are routed to the probes
//! waiting on their source address. Each datagram is handled in its own
//! task so a slow send never holds up the next read; a semaphore caps how
//! many of those tasks run at once.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, Semaphore};

use pingu_core::wire::{self, Packet, PacketKind};
use pingu_core::{EngineConfig, OverflowPolicy, PeerAddr};
use pingu_services::PendingProbes;

pub(crate) struct ReceiveLoop {
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    dispatch_limit: Arc<Semaphore>,
    read_buf_size: usize,
    verbose: bool,
    shutdown: broadcast::Receiver<()>,
}

impl ReceiveLoop {
    pub fn new(
        socket: Arc<UdpSocket>,
        pending: PendingProbes,
        config: &EngineConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket: socket.clone(),
            dispatcher: Dispatcher {
                socket,
                pending,
                max_packet_size: config.max_packet_size,
                overflow: config.overflow,
                verbose: config.verbose,
            },
            dispatch_limit: Arc::new(Semaphore::new(
                config.max_inflight_dispatch.min(Semaphore::MAX_PERMITS),
            )),
            // One spare byte so an oversized datagram is seen as oversized
            // rather than silently truncated to a valid-looking packet.
            read_buf_size: config.max_packet_size + 1,
            verbose: config.verbose,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut buf = vec![0u8; self.read_buf_size];

        if self.verbose {
            tracing::info!(
                addr = ?self.socket.local_addr().ok(),
                "receive loop starting"
            );
        }

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    if self.verbose {
                        tracing::info!("receive loop shutting down");
                    }
                    return;
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            if self.verbose {
                                tracing::warn!(error = %e, "recv_from failed");
                            }
                            continue;
                        }
                    };
                    if len == 0 {
                        continue;
                    }

                    let permit = match self.dispatch_limit.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            if self.verbose {
                                tracing::warn!(%from, "dispatch limit reached, dropping datagram");
                            }
                            continue;
                        }
                    };

                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher.handle(datagram, from).await;
                        drop(permit);
                    });
                }
            }
        }
    }
}

/// Per-datagram handling, run inside a spawned task.
#[derive(Clone)]
struct Dispatcher {
    socket: Arc<UdpSocket>,
    pending: PendingProbes,
    max_packet_size: usize,
    overflow: OverflowPolicy,
    verbose: bool,
}

impl Dispatcher {
    async fn handle(&self, datagram: Bytes, observed: SocketAddr) {
        let from = PeerAddr::from(observed);
        let packet = match wire::decode_with_limit(&datagram, self.max_packet_size) {
            Ok(p) => p.with_sender(from),
            Err(e) => {
                if self.verbose {
                    tracing::debug!(%from, error = %e, "dropping invalid datagram");
                }
                return;
            }
        };

        tracing::trace!(%from, kind = %packet.kind(), "datagram received");

        match packet.kind() {
            // Reply to the address exactly as observed; the canonical form may
            // belong to the other family than this socket.
            PacketKind::Ping => self.answer(observed).await,
            PacketKind::Pong => self.route(from).await,
        }
    }

    async fn answer(&self, to: SocketAddr) {
        let pong = match Packet::pong().encode() {
            Ok(b) => b,
            Err(e) => {
                if self.verbose {
                    tracing::error!(error = %e, "failed to encode pong");
                }
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&pong, to).await {
            if self.verbose {
                tracing::warn!(peer = %to, error = %e, "pong send failed");
            }
        }
    }

    async fn route(&self, from: PeerAddr) {
        let waiting = self.pending.senders_for(&from);
        if waiting.is_empty() {
            tracing::trace!(%from, "pong with no waiting probe, ignoring");
            return;
        }

        for tx in waiting {
            match self.overflow {
                // Err means the probe already finished; nothing to deliver to.
                OverflowPolicy::Block => {
                    let _ = tx.send(from).await;
                }
                OverflowPolicy::Drop => {
                    if let Err(TrySendError::Full(_)) = tx.try_send(from) {
                        if self.verbose {
                            tracing::warn!(%from, "hand-off queue full, dropping pong");
                        }
                    }
                }
            }
        }
    }
}
