//! Send side — sequence, seal, register, transmit, and recover.
//!
//! [`Sender::start`] spawns two loops next to the caller:
//!   ack loop        — applies cumulative acks from the peer to the tracker
//!   retransmit loop — resends expired blocks every `scan_interval`, and
//!                     fails the connection once a block runs out of retries
//!
//! A failure or [`Sender::cancel`] stops both loops and drains the
//! in-flight set. Callers learn about it from [`Sender::wait_idle`] or the
//! next [`Sender::send`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch, Mutex};

use ferry_core::config::TransportConfig;
use ferry_core::wire::{self, MAX_DATAGRAM};
use ferry_core::{Block, Frame, IntegrityChecker, Seq, MAX_BLOCK_PAYLOAD};

use crate::error::TransportError;
use crate::tracker::{DeliveryTracker, RetransmitPolicy};

/// Terminal state of a sender, kept so every waiter sees the same outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Exhausted { sequence: Seq, attempts: u32 },
    Cancelled,
}

impl From<Failure> for TransportError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Exhausted { sequence, attempts } => {
                TransportError::RetransmitExhausted { sequence, attempts }
            }
            Failure::Cancelled => TransportError::Cancelled,
        }
    }
}

/// State shared between the sender handle and its loops.
struct Link {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    tracker: DeliveryTracker,
    next_seq: Mutex<Seq>,
    failure: watch::Sender<Option<Failure>>,
    shutdown: broadcast::Sender<()>,
}

impl Link {
    async fn transmit(&self, block: &Block) -> Result<(), TransportError> {
        let bytes = wire::encode(&Frame::Data(block.clone()))?;
        self.socket.send_to(&bytes, self.peer).await?;
        Ok(())
    }

    /// Record the first failure, stop the loops, and drop what is in flight.
    ///
    /// The failure is stored before the drain but waiters are only notified
    /// after it, so anyone woken by the failure finds the set empty.
    async fn fail(&self, failure: Failure) {
        let mut first = false;
        self.failure.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(failure);
                first = true;
            }
            false
        });
        if first {
            let _ = self.shutdown.send(());
            // Serialized with send(), which re-checks the failure under this lock.
            let _next = self.next_seq.lock().await;
            let drained = self.tracker.drain().await;
            self.failure.send_modify(|_| {});
            tracing::info!(peer = %self.peer, ?failure, drained, "sender stopped");
        }
    }
}

/// Reliable sender for one peer.
pub struct Sender {
    link: Arc<Link>,
    checker: IntegrityChecker,
}

impl Sender {
    /// Spawn the ack and retransmit loops and return the handle.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        config: &TransportConfig,
    ) -> Result<Self, TransportError> {
        let initial = Seq::new(config.initial_sequence)?;
        let (failure, _) = watch::channel(None);
        let (shutdown, _) = broadcast::channel(1);

        let link = Arc::new(Link {
            socket,
            peer,
            tracker: DeliveryTracker::new(initial),
            next_seq: Mutex::new(initial),
            failure,
            shutdown,
        });

        tokio::spawn(ack_loop(link.clone(), link.shutdown.subscribe()));
        tokio::spawn(retransmit_loop(
            link.clone(),
            RetransmitPolicy::from(config),
            config.scan_interval(),
            link.shutdown.subscribe(),
        ));

        tracing::info!(
            %peer,
            initial_sequence = %initial,
            checksum = %config.checksum,
            max_retries = config.max_retries,
            "sender started"
        );

        Ok(Self {
            link,
            checker: IntegrityChecker::new(config.checksum),
        })
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.link.tracker
    }

    pub fn peer(&self) -> SocketAddr {
        self.link.peer
    }

    /// Send one payload as the next block. Returns its sequence number.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<Seq, TransportError> {
        let payload = payload.into();
        if payload.len() > MAX_BLOCK_PAYLOAD {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }
        let block = {
            // Held across register so the ack loop never sees a next_seq
            // ahead of what the tracker knows about.
            let mut next = self.link.next_seq.lock().await;
            self.check_failed()?;
            let block = self.checker.seal(*next, payload);
            self.link.tracker.register(block.clone()).await?;
            *next = next.next();
            block
        };

        self.link.transmit(&block).await?;
        tracing::debug!(peer = %self.link.peer, sequence = %block.sequence(), len = block.len(), "block sent");
        Ok(block.sequence())
    }

    /// Segment `data` and send every piece. Returns the number of blocks.
    pub async fn send_all(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut count = 0;
        for piece in data.chunks(MAX_BLOCK_PAYLOAD) {
            self.send(Bytes::copy_from_slice(piece)).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Resolve once nothing is in flight, or with the fatal error that
    /// stopped the sender.
    pub async fn wait_idle(&self) -> Result<(), TransportError> {
        let mut in_flight = self.link.tracker.watch_in_flight();
        let mut failure = self.link.failure.subscribe();
        loop {
            if let Some(f) = *failure.borrow_and_update() {
                return Err(f.into());
            }
            if *in_flight.borrow_and_update() == 0 {
                return Ok(());
            }
            let closed = tokio::select! {
                r = in_flight.changed() => r.is_err(),
                r = failure.changed() => r.is_err(),
            };
            if closed {
                return Err(TransportError::Cancelled);
            }
        }
    }

    /// Like [`Sender::wait_idle`], bounded by `limit`.
    pub async fn wait_idle_timeout(&self, limit: Duration) -> Result<bool, TransportError> {
        match tokio::time::timeout(limit, self.wait_idle()).await {
            Ok(r) => r.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    /// Stop both loops and discard everything in flight.
    pub async fn cancel(&self) {
        self.link.fail(Failure::Cancelled).await;
    }

    fn check_failed(&self) -> Result<(), TransportError> {
        match *self.link.failure.borrow() {
            Some(f) => Err(f.into()),
            None => Ok(()),
        }
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        let _ = self.link.shutdown.send(());
    }
}

async fn ack_loop(link: Arc<Link>, mut shutdown: broadcast::Receiver<()>) {
    let mut buf = vec![0u8; MAX_DATAGRAM + 1];

    loop {
        let received = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(peer = %link.peer, "ack loop shutting down");
                return;
            }
            r = link.socket.recv_from(&mut buf) => r,
        };

        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                // ICMP port-unreachable surfaces here on some platforms; the
                // retransmit loop decides when the peer is gone.
                tracing::debug!(peer = %link.peer, error = %e, "recv_from failed");
                continue;
            }
        };
        if from != link.peer {
            tracing::trace!(%from, "datagram from unexpected peer, ignoring");
            continue;
        }

        let notice = match wire::decode(&buf[..len]) {
            Ok(Frame::Ack(notice)) => notice,
            Ok(Frame::Data(block)) => {
                tracing::trace!(sequence = %block.sequence(), "data frame on send socket, ignoring");
                continue;
            }
            Err(e) => {
                tracing::warn!(peer = %link.peer, error = %e, "malformed ack, discarding");
                continue;
            }
        };

        let Some(ack) = notice.cumulative_ack else {
            tracing::trace!(sequence = %notice.sequence, "ack without cumulative value");
            continue;
        };
        let next = *link.next_seq.lock().await;
        if !ack.precedes(next) {
            tracing::debug!(cumulative_ack = %ack, next_sequence = %next, "ack beyond sent data, ignoring");
            continue;
        }
        let retired = link.tracker.acknowledge_up_to(ack).await;
        tracing::trace!(
            sequence = %notice.sequence,
            cumulative_ack = %ack,
            retired = retired.len(),
            "ack applied"
        );
    }
}

async fn retransmit_loop(
    link: Arc<Link>,
    policy: RetransmitPolicy,
    scan_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(scan_interval);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(peer = %link.peer, "retransmit loop shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        match link.tracker.take_expired(&policy).await {
            Ok(blocks) => {
                for block in blocks {
                    if let Err(e) = link.transmit(&block).await {
                        tracing::warn!(sequence = %block.sequence(), error = %e, "retransmission failed");
                        continue;
                    }
                    tracing::debug!(peer = %link.peer, sequence = %block.sequence(), "block retransmitted");
                }
            }
            Err(TransportError::RetransmitExhausted { sequence, attempts }) => {
                tracing::error!(
                    peer = %link.peer,
                    sequence = %sequence,
                    attempts,
                    "retransmissions exhausted, failing connection"
                );
                link.fail(Failure::Exhausted { sequence, attempts }).await;
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "retransmission scan failed");
            }
        }
    }
}
