//! Cumulative acknowledgment.
//!
//! Given the base (oldest unacknowledged sequence number) and the sequence
//! numbers observed so far, the cumulative ack is the last number of the
//! unbroken run starting at the base. Anything past the first gap stays
//! unacknowledged even if it already arrived.

use crate::seq::{Seq, SEQ_HALF};

/// Compute the cumulative ack for `observed`, relative to `base`.
///
/// Input order does not matter and duplicates count once. Values behind
/// the base were acknowledged earlier and are ignored. Returns `None` when
/// `base` itself has not been observed.
pub fn cumulative_ack<I>(base: Seq, observed: I) -> Option<Seq>
where
    I: IntoIterator<Item = Seq>,
{
    let mut offsets: Vec<u32> = observed
        .into_iter()
        .map(|seq| seq.offset_from(base))
        .filter(|offset| *offset < SEQ_HALF)
        .collect();
    offsets.sort_unstable();
    offsets.dedup();

    let run = contiguous_prefix(&offsets);
    if run == 0 {
        None
    } else {
        Some(base.wrapping_add(run as u32 - 1))
    }
}

/// Length of the prefix where `sorted[i] == i`.
///
/// `sorted` is strictly increasing, so once `sorted[i] != i` it stays that
/// way for every later index, and a binary search finds the first gap.
fn contiguous_prefix(sorted: &[u32]) -> usize {
    let (mut lo, mut hi) = (0usize, sorted.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if sorted[mid] as usize == mid {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
