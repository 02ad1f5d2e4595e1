//! ferry-core — sequence space, blocks, integrity checks, and wire format.
//! All other Ferry crates depend on this one.

pub mod ack;
pub mod block;
pub mod config;
pub mod integrity;
pub mod seq;
pub mod wire;

pub use ack::cumulative_ack;
pub use block::{Block, MAX_BLOCK_PAYLOAD};
pub use integrity::{ChecksumAlgorithm, ChecksumError, IntegrityChecker};
pub use seq::{Seq, SeqError};
pub use wire::{AckNotice, Frame, WireError};
