//! Ferry wire format — one JSON frame per datagram.
//!
//! Data:  {"type":"data","sequence":"0000003","checksum":198,"data":"414243"}
//! Ack:   {"type":"ack","sequence":"0000003","cumulative_ack":"0000002"}
//!
//! Sequence numbers travel as fixed-width decimal strings and are parsed
//! into [`Seq`] during decoding; nothing past this module ever compares
//! them as text. Payloads are hex-encoded. `cumulative_ack` is null until
//! the receiver holds the base of the stream.

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::seq::Seq;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Acknowledgment notice, sent by the receiver for every data frame it
/// accepts or re-sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckNotice {
    /// The block that triggered this notice.
    pub sequence: Seq,
    /// Everything up to and including this value has arrived.
    pub cumulative_ack: Option<Seq>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Block),
    Ack(AckNotice),
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("frame of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawFrame {
    Data {
        sequence: Seq,
        checksum: u64,
        data: String,
    },
    Ack {
        sequence: Seq,
        cumulative_ack: Option<Seq>,
    },
}

impl Frame {
    pub fn sequence(&self) -> Seq {
        match self {
            Frame::Data(block) => block.sequence(),
            Frame::Ack(notice) => notice.sequence,
        }
    }
}

pub fn encode(frame: &Frame) -> Result<Vec<u8>, WireError> {
    let raw = match frame {
        Frame::Data(block) => RawFrame::Data {
            sequence: block.sequence(),
            checksum: block.checksum(),
            data: hex::encode(block.payload()),
        },
        Frame::Ack(notice) => RawFrame::Ack {
            sequence: notice.sequence,
            cumulative_ack: notice.cumulative_ack,
        },
    };
    let bytes = serde_json::to_vec(&raw)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(WireError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Frame, WireError> {
    let frame = match serde_json::from_slice::<RawFrame>(bytes)? {
        RawFrame::Data {
            sequence,
            checksum,
            data,
        } => Frame::Data(Block::from_parts(sequence, hex::decode(data)?, checksum)),
        RawFrame::Ack {
            sequence,
            cumulative_ack,
        } => Frame::Ack(AckNotice {
            sequence,
            cumulative_ack,
        }),
    };
    Ok(frame)
}
