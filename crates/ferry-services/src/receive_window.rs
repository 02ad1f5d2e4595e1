//! Receive window — per-peer reassembly on the receiving side.
//!
//! Verified blocks are recorded by sequence number. After each block the
//! window recomputes the cumulative ack from its base, releases the now
//! contiguous payloads in order and moves the base past them. Blocks that
//! arrive beyond a gap wait here until the gap fills, as long as they are
//! within `limit` of the base; anything further out is acked but not kept.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::time::Instant;

use ferry_core::{cumulative_ack, AckNotice, Block, Seq};

/// What recording one block produced.
#[derive(Debug)]
pub struct Recorded {
    /// Ack to send back. Duplicates get one too.
    pub notice: AckNotice,
    /// Payloads released in sequence order, each exactly once.
    pub delivered: Vec<(Seq, Bytes)>,
    /// The block was already held or already acknowledged.
    pub duplicate: bool,
    /// The block was too far past the base to buffer and was dropped.
    pub beyond_window: bool,
}

/// Default distance past the base a window buffers.
pub const DEFAULT_RECEIVE_WINDOW: u32 = 4_096;

#[derive(Debug)]
pub struct ReceiveWindow {
    base: Seq,
    last_ack: Option<Seq>,
    pending: HashMap<Seq, Bytes>,
    limit: u32,
    last_seen: Instant,
}

impl ReceiveWindow {
    pub fn new(base: Seq) -> Self {
        Self::with_limit(base, DEFAULT_RECEIVE_WINDOW)
    }

    /// Window that buffers sequence numbers in `[base, base + limit)` only.
    pub fn with_limit(base: Seq, limit: u32) -> Self {
        Self {
            base,
            last_ack: None,
            pending: HashMap::new(),
            limit: limit.max(1),
            last_seen: Instant::now(),
        }
    }

    /// When the last block was recorded.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn base(&self) -> Seq {
        self.base
    }

    pub fn last_ack(&self) -> Option<Seq> {
        self.last_ack
    }

    /// Blocks held beyond a gap.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Record a block that already passed integrity verification.
    pub fn record(&mut self, block: Block) -> Recorded {
        let sequence = block.sequence();
        self.last_seen = Instant::now();

        // Behind the base: delivered earlier. Re-ack so the sender can retire it.
        if !sequence.is_at_or_after(self.base) {
            return Recorded {
                notice: self.notice(sequence),
                delivered: Vec::new(),
                duplicate: true,
                beyond_window: false,
            };
        }

        if sequence.offset_from(self.base) >= self.limit {
            return Recorded {
                notice: self.notice(sequence),
                delivered: Vec::new(),
                duplicate: false,
                beyond_window: true,
            };
        }

        let duplicate = self.pending.contains_key(&sequence);
        if !duplicate {
            self.pending.insert(sequence, block.payload().clone());
        }

        let mut delivered = Vec::new();
        if let Some(ack) = cumulative_ack(self.base, self.pending.keys().copied()) {
            let mut seq = self.base;
            loop {
                if let Some(payload) = self.pending.remove(&seq) {
                    delivered.push((seq, payload));
                }
                if seq == ack {
                    break;
                }
                seq = seq.next();
            }
            self.base = ack.next();
            self.last_ack = Some(ack);
        }

        Recorded {
            notice: self.notice(sequence),
            delivered,
            duplicate,
            beyond_window: false,
        }
    }

    fn notice(&self, sequence: Seq) -> AckNotice {
        AckNotice {
            sequence,
            cumulative_ack: self.last_ack,
        }
    }
}
