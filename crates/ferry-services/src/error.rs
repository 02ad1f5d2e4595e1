//! Transport errors surfaced to callers of the send side.
//!
//! Corruption never shows up here: a block that fails its checksum is
//! dropped by the receiver and recovered by retransmission. Only running
//! out of retries ends a connection.

use ferry_core::{Seq, SeqError, WireError};

use crate::tracker::TrackerError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("block {sequence} unacknowledged after {attempts} transmissions, giving up")]
    RetransmitExhausted { sequence: Seq, attempts: u32 },
    #[error("transfer cancelled")]
    Cancelled,
    #[error("payload of {0} bytes exceeds the block limit")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Sequence(#[from] SeqError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True for errors that end the connection for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RetransmitExhausted { .. } | Self::Cancelled | Self::Io(_))
    }
}
