//! Block — the unit of sequenced payload moved by the transport.

use bytes::Bytes;

use crate::seq::Seq;

/// Largest payload carried by a single block.
///
/// Hex encoding doubles the payload on the wire, so 16 KiB keeps a data
/// frame well under the 65 507 byte UDP limit.
pub const MAX_BLOCK_PAYLOAD: usize = 16 * 1024;

/// A sequenced payload with the checksum its sender attached.
///
/// Fields are private: a block never changes after construction. Use
/// [`crate::integrity::IntegrityChecker::seal`] on the sending side and
/// [`Block::from_parts`] when decoding what a peer claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    sequence: Seq,
    payload: Bytes,
    checksum: u64,
}

impl Block {
    pub fn from_parts(sequence: Seq, payload: impl Into<Bytes>, checksum: u64) -> Self {
        Self {
            sequence,
            payload: payload.into(),
            checksum,
        }
    }

    pub fn sequence(&self) -> Seq {
        self.sequence
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
