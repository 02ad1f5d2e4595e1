//! Integrity checking — per-block checksums.
//!
//! The sender seals every block with a checksum over its payload; the
//! receiver recomputes it and discards any block whose claim does not match.
//! A mismatch is never fatal: the block is treated as if it never arrived
//! and the sender's retransmission timer recovers it.
//!
//! Two algorithms are available:
//!   bytesum — sum of the payload byte values. Cheap, but blind to
//!             transpositions and compensating errors.
//!   blake3  — first 8 bytes of the BLAKE3 digest, little endian.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::seq::Seq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    ByteSum,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn compute(self, payload: &[u8]) -> u64 {
        match self {
            Self::ByteSum => payload
                .iter()
                .fold(0u64, |acc, b| acc.wrapping_add(u64::from(*b))),
            Self::Blake3 => {
                let digest = blake3::hash(payload);
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest.as_bytes()[..8]);
                u64::from_le_bytes(prefix)
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ByteSum => "bytesum",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bytesum" => Ok(Self::ByteSum),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!("unknown checksum algorithm: {other}")),
        }
    }
}

/// Payload did not match its claimed checksum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("corrupted block {sequence}: expected checksum {expected}, computed {computed}")]
pub struct ChecksumError {
    pub sequence: Seq,
    pub expected: u64,
    pub computed: u64,
}

/// Seals outgoing blocks and verifies incoming ones.
///
/// Stateless apart from the algorithm, so a single checker can be shared
/// freely between tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityChecker {
    algorithm: ChecksumAlgorithm,
}

impl IntegrityChecker {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Build a block carrying the checksum of `payload`.
    pub fn seal(&self, sequence: Seq, payload: impl Into<bytes::Bytes>) -> Block {
        let payload = payload.into();
        let checksum = self.algorithm.compute(&payload);
        Block::from_parts(sequence, payload, checksum)
    }

    pub fn verify(&self, block: &Block) -> Result<(), ChecksumError> {
        let computed = self.algorithm.compute(block.payload());
        if computed == block.checksum() {
            Ok(())
        } else {
            Err(ChecksumError {
                sequence: block.sequence(),
                expected: block.checksum(),
                computed,
            })
        }
    }
}
