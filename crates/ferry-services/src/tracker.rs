//! Delivery tracking — the sender's set of blocks awaiting acknowledgment.
//!
//! [`InFlightSet`] is the plain state machine: one entry per sent block,
//! keyed by sequence number, retired by cumulative acknowledgment and
//! resent when its deadline passes. [`DeliveryTracker`] wraps it in a
//! single async mutex so register, ack computation and retirement are
//! linearized for a connection.
//!
//! ```text
//!   base (oldest unacked)
//!    │
//!  ──┼─────────────────────────────▶ seq space
//!    │ <── in flight ──▶
//!  ack ≤ base-1 : stale, ignored
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use ferry_core::config::TransportConfig;
use ferry_core::{cumulative_ack, Block, Seq};

use crate::error::TransportError;

/// A block that has been sent and not yet acknowledged.
#[derive(Debug, Clone)]
pub struct InFlightEntry {
    pub block: Block,
    /// When this logical transmission was registered.
    pub first_sent_at: Instant,
    /// Most recent (re)send; the retransmission deadline counts from here.
    pub last_sent_at: Instant,
    pub retransmit_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("sequence {sequence} was already acknowledged (base is {base})")]
    AlreadyAcknowledged { sequence: Seq, base: Seq },
}

/// Timeout and retry bounds for resending.
///
/// The timeout doubles with every resend of an entry, capped at `max_rto`.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitPolicy {
    pub initial_rto: Duration,
    pub max_rto: Duration,
    pub max_retries: u32,
}

impl RetransmitPolicy {
    pub fn rto(&self, retransmit_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retransmit_count).unwrap_or(u32::MAX);
        self.initial_rto
            .checked_mul(factor)
            .unwrap_or(self.max_rto)
            .min(self.max_rto)
    }
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for RetransmitPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            initial_rto: config.initial_rto(),
            max_rto: config.max_rto(),
            max_retries: config.max_retries,
        }
    }
}

/// Sequence number → in-flight block, for one connection.
#[derive(Debug)]
pub struct InFlightSet {
    /// Oldest sequence number not yet covered by a cumulative ack.
    base: Seq,
    last_ack: Option<Seq>,
    entries: HashMap<Seq, InFlightEntry>,
}

impl InFlightSet {
    pub fn new(base: Seq) -> Self {
        Self {
            base,
            last_ack: None,
            entries: HashMap::new(),
        }
    }

    pub fn base(&self) -> Seq {
        self.base
    }

    pub fn last_ack(&self) -> Option<Seq> {
        self.last_ack
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, sequence: Seq) -> bool {
        self.entries.contains_key(&sequence)
    }

    pub fn get(&self, sequence: Seq) -> Option<&InFlightEntry> {
        self.entries.get(&sequence)
    }

    /// In-flight sequence numbers, oldest first.
    pub fn sequences(&self) -> Vec<Seq> {
        let mut seqs: Vec<Seq> = self.entries.keys().copied().collect();
        seqs.sort_by_key(|s| s.offset_from(self.base));
        seqs
    }

    /// Insert or overwrite the entry for `block`'s sequence number.
    ///
    /// Overwriting starts a fresh logical transmission: both timestamps
    /// move to `now` and the retry count resets.
    pub fn register(&mut self, block: Block, now: Instant) -> Result<(), TrackerError> {
        let sequence = block.sequence();
        if !sequence.is_at_or_after(self.base) {
            return Err(TrackerError::AlreadyAcknowledged {
                sequence,
                base: self.base,
            });
        }
        self.entries.insert(
            sequence,
            InFlightEntry {
                block,
                first_sent_at: now,
                last_sent_at: now,
                retransmit_count: 0,
            },
        );
        Ok(())
    }

    /// Cumulative ack of `observed`, measured from this set's base.
    pub fn compute_cumulative_ack<I>(&self, observed: I) -> Option<Seq>
    where
        I: IntoIterator<Item = Seq>,
    {
        cumulative_ack(self.base, observed)
    }

    /// Retire every entry at or before `ack`, oldest first.
    ///
    /// Sequence numbers without an entry are skipped, not treated as an
    /// error. An ack behind the base is stale and retires nothing.
    pub fn acknowledge_up_to(&mut self, ack: Seq) -> Vec<Seq> {
        if !ack.is_at_or_after(self.base) {
            return Vec::new();
        }
        let span = ack.offset_from(self.base);
        let base = self.base;

        let mut retired: Vec<Seq> = self
            .entries
            .keys()
            .copied()
            .filter(|seq| seq.offset_from(base) <= span)
            .collect();
        retired.sort_by_key(|s| s.offset_from(base));
        for seq in &retired {
            self.entries.remove(seq);
        }

        self.base = ack.next();
        self.last_ack = Some(ack);
        retired
    }

    /// Collect blocks whose deadline has passed and mark them resent.
    ///
    /// Fails with [`TransportError::RetransmitExhausted`] when an expired
    /// entry has already used up `max_retries` resends.
    pub fn take_expired(
        &mut self,
        now: Instant,
        policy: &RetransmitPolicy,
    ) -> Result<Vec<Block>, TransportError> {
        let mut resend = Vec::new();
        for seq in self.sequences() {
            let Some(entry) = self.entries.get_mut(&seq) else {
                continue;
            };
            let deadline = entry.last_sent_at + policy.rto(entry.retransmit_count);
            if now < deadline {
                continue;
            }
            if entry.retransmit_count >= policy.max_retries {
                return Err(TransportError::RetransmitExhausted {
                    sequence: seq,
                    attempts: entry.retransmit_count + 1,
                });
            }
            entry.retransmit_count += 1;
            entry.last_sent_at = now;
            resend.push(entry.block.clone());
        }
        Ok(resend)
    }

    /// Discard every entry. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}

/// Shared, lock-guarded [`InFlightSet`] for one connection.
///
/// Clones share the same set. The current entry count is published on a
/// watch channel while the lock is still held, so observers never see a
/// stale count overwrite a newer one.
#[derive(Clone)]
pub struct DeliveryTracker {
    inner: Arc<Mutex<InFlightSet>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl DeliveryTracker {
    pub fn new(base: Seq) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(InFlightSet::new(base))),
            in_flight: Arc::new(in_flight),
        }
    }

    /// Receiver that sees the entry count after every change.
    pub fn watch_in_flight(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    pub async fn register(&self, block: Block) -> Result<(), TrackerError> {
        let mut set = self.inner.lock().await;
        let sequence = block.sequence();
        set.register(block, Instant::now())?;
        self.in_flight.send_replace(set.len());
        tracing::trace!(sequence = %sequence, in_flight = set.len(), "block registered");
        Ok(())
    }

    pub async fn compute_cumulative_ack(&self, observed: &[Seq]) -> Option<Seq> {
        let set = self.inner.lock().await;
        set.compute_cumulative_ack(observed.iter().copied())
    }

    pub async fn acknowledge_up_to(&self, ack: Seq) -> Vec<Seq> {
        let mut set = self.inner.lock().await;
        let retired = set.acknowledge_up_to(ack);
        self.in_flight.send_replace(set.len());
        if !retired.is_empty() {
            tracing::debug!(
                cumulative_ack = %ack,
                retired = retired.len(),
                in_flight = set.len(),
                "blocks acknowledged"
            );
        }
        retired
    }

    pub async fn take_expired(&self, policy: &RetransmitPolicy) -> Result<Vec<Block>, TransportError> {
        let mut set = self.inner.lock().await;
        set.take_expired(Instant::now(), policy)
    }

    pub async fn drain(&self) -> usize {
        let mut set = self.inner.lock().await;
        let n = set.drain();
        self.in_flight.send_replace(0);
        n
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn base(&self) -> Seq {
        self.inner.lock().await.base()
    }

    pub async fn sequences(&self) -> Vec<Seq> {
        self.inner.lock().await.sequences()
    }
}
