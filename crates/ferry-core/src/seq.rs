//! Sequence space — fixed-width decimal sequence numbers.
//!
//! On the wire a sequence number is a zero-padded decimal string of exactly
//! `SEQ_WIDTH` digits ("0000011"). Inside the crate it is an integer in
//! `0..SEQ_MODULUS`, and all arithmetic wraps modulo `SEQ_MODULUS`.
//!
//! Ordering is serial-number arithmetic over a half space: `a` precedes `b`
//! when walking forward from `a` reaches `b` in fewer than `SEQ_HALF` steps.
//! Two numbers further apart than that are not comparable in a meaningful
//! way, which is never the case for a live transfer. `Seq` deliberately does
//! not implement `Ord`: sorting raw values would break across the wrap.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of decimal digits in a wire sequence number.
pub const SEQ_WIDTH: usize = 7;

/// Size of the sequence space (10^SEQ_WIDTH).
pub const SEQ_MODULUS: u32 = 10_000_000;

/// Half of the sequence space. Offsets below this are "ahead".
pub const SEQ_HALF: u32 = SEQ_MODULUS / 2;

/// A sequence number in `0..SEQ_MODULUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Seq(u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeqError {
    #[error("sequence {0:?} is not 7 decimal digits")]
    Malformed(String),
    #[error("sequence {0} is outside the 7-digit space")]
    OutOfRange(u32),
}

impl Seq {
    pub const ZERO: Seq = Seq(0);

    /// Build from a raw integer. Fails if the value does not fit the space.
    pub fn new(value: u32) -> Result<Self, SeqError> {
        if value < SEQ_MODULUS {
            Ok(Seq(value))
        } else {
            Err(SeqError::OutOfRange(value))
        }
    }

    /// Parse the fixed-width wire form. Exactly `SEQ_WIDTH` ASCII digits.
    pub fn parse(text: &str) -> Result<Self, SeqError> {
        if text.len() != SEQ_WIDTH || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SeqError::Malformed(text.to_string()));
        }
        let value = text
            .parse::<u32>()
            .map_err(|_| SeqError::Malformed(text.to_string()))?;
        Seq::new(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Seq {
        self.wrapping_add(1)
    }

    pub fn prev(self) -> Seq {
        Seq((self.0 + SEQ_MODULUS - 1) % SEQ_MODULUS)
    }

    pub fn wrapping_add(self, n: u32) -> Seq {
        Seq(((self.0 as u64 + n as u64) % SEQ_MODULUS as u64) as u32)
    }

    /// Forward distance from `base` to `self`, modulo the space.
    pub fn offset_from(self, base: Seq) -> u32 {
        (self.0 + SEQ_MODULUS - base.0) % SEQ_MODULUS
    }

    /// True when `self` comes strictly before `other`.
    pub fn precedes(self, other: Seq) -> bool {
        let d = other.offset_from(self);
        d != 0 && d < SEQ_HALF
    }

    /// True when `self` comes strictly after `other`.
    pub fn follows(self, other: Seq) -> bool {
        other.precedes(self)
    }

    /// True when `self` is at or after `base` within the forward half space.
    pub fn is_at_or_after(self, base: Seq) -> bool {
        self.offset_from(base) < SEQ_HALF
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = SEQ_WIDTH)
    }
}

impl FromStr for Seq {
    type Err = SeqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Seq::parse(s)
    }
}

impl TryFrom<u32> for Seq {
    type Error = SeqError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Seq::new(value)
    }
}

impl Serialize for Seq {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Seq {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Seq::parse(&text).map_err(serde::de::Error::custom)
    }
}
