//! Receive loop — verify, record, acknowledge, deliver.
//!
//! One loop serves every peer sending to the bound socket. Each peer gets
//! its own [`ReceiveWindow`] in the connection table. Per datagram:
//!   decode → verify checksum → record in window → ack → deliver in order.
//! Malformed frames and corrupted blocks are dropped without an ack, so
//! the sender's retransmission timer recovers them. Peers silent for longer
//! than the idle timeout are pruned from the table.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use ferry_core::wire::{self, MAX_DATAGRAM};
use ferry_core::{Frame, IntegrityChecker, Seq};

use crate::receive_window::{ReceiveWindow, DEFAULT_RECEIVE_WINDOW};

/// Default time after which a silent peer's window is dropped.
pub const DEFAULT_PEER_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-peer receive state — shared across tasks.
pub type ConnectionTable = Arc<DashMap<SocketAddr, ReceiveWindow>>;

/// Create a new empty connection table.
pub fn new_connection_table() -> ConnectionTable {
    Arc::new(DashMap::new())
}

/// A payload released in order to the application.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub peer: SocketAddr,
    pub sequence: Seq,
    pub payload: Bytes,
}

pub struct Receiver {
    socket: Arc<UdpSocket>,
    checker: IntegrityChecker,
    initial_sequence: Seq,
    window_limit: u32,
    idle_timeout: Duration,
    connections: ConnectionTable,
    delivered_tx: mpsc::Sender<Delivery>,
    shutdown: broadcast::Receiver<()>,
}

impl Receiver {
    pub fn new(
        socket: Arc<UdpSocket>,
        checker: IntegrityChecker,
        initial_sequence: Seq,
        connections: ConnectionTable,
        delivered_tx: mpsc::Sender<Delivery>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            checker,
            initial_sequence,
            window_limit: DEFAULT_RECEIVE_WINDOW,
            idle_timeout: DEFAULT_PEER_IDLE_TIMEOUT,
            connections,
            delivered_tx,
            shutdown,
        }
    }

    /// How far past its base each peer's window buffers.
    pub fn with_window_limit(mut self, limit: u32) -> Self {
        self.window_limit = limit;
        self
    }

    /// Forget peers that have sent nothing for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        let sweep_every = (self.idle_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(5));
        let mut sweep = tokio::time::interval(sweep_every);

        loop {
            let received = tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("receive loop shutting down");
                    return Ok(());
                }
                _ = sweep.tick() => None,
                r = self.socket.recv_from(&mut buf) => Some(r),
            };
            let (len, peer) = match received {
                None => {
                    self.prune_idle();
                    continue;
                }
                Some(Ok(r)) => r,
                Some(Err(e)) => {
                    // Port-unreachable from a departed sender lands here.
                    tracing::debug!(error = %e, "recv_from failed");
                    continue;
                }
            };

            let block = match wire::decode(&buf[..len]) {
                Ok(Frame::Data(block)) => block,
                Ok(Frame::Ack(notice)) => {
                    tracing::trace!(%peer, sequence = %notice.sequence, "ack on receive socket, ignoring");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(%peer, error = %e, len, "malformed frame, discarding");
                    continue;
                }
            };

            if let Err(e) = self.checker.verify(&block) {
                tracing::warn!(
                    %peer,
                    sequence = %e.sequence,
                    expected = e.expected,
                    computed = e.computed,
                    "corrupted block, discarding"
                );
                continue;
            }

            let sequence = block.sequence();
            // Guard dropped before any await.
            let recorded = {
                let mut window = self
                    .connections
                    .entry(peer)
                    .or_insert_with(|| ReceiveWindow::with_limit(self.initial_sequence, self.window_limit));
                window.record(block)
            };

            if recorded.beyond_window {
                tracing::debug!(%peer, sequence = %sequence, "block beyond receive window, not buffered");
            }

            tracing::debug!(
                %peer,
                sequence = %sequence,
                cumulative_ack = ?recorded.notice.cumulative_ack.map(|s| s.to_string()),
                delivered = recorded.delivered.len(),
                duplicate = recorded.duplicate,
                "block received"
            );

            let ack = wire::encode(&Frame::Ack(recorded.notice)).context("failed to encode ack")?;
            if let Err(e) = self.socket.send_to(&ack, peer).await {
                // A lost ack is recovered by the sender's resend.
                tracing::warn!(%peer, error = %e, "failed to send ack");
            }

            for (sequence, payload) in recorded.delivered {
                let delivery = Delivery {
                    peer,
                    sequence,
                    payload,
                };
                // A stalled consumer must not hide a shutdown.
                tokio::select! {
                    _ = self.shutdown.recv() => {
                        tracing::info!("receive loop shutting down with deliveries pending");
                        return Ok(());
                    }
                    r = self.delivered_tx.send(delivery) => {
                        if r.is_err() {
                            bail!("delivery receiver dropped, terminating receive loop");
                        }
                    }
                }
            }
        }
    }

    fn prune_idle(&self) {
        let before = self.connections.len();
        let idle_timeout = self.idle_timeout;
        self.connections
            .retain(|_, window| window.last_seen().elapsed() < idle_timeout);
        let pruned = before.saturating_sub(self.connections.len());
        if pruned > 0 {
            tracing::info!(pruned, remaining = self.connections.len(), "idle peers pruned");
        }
    }
}
