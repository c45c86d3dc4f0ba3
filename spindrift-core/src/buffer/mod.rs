//! Sparse ring buffering for an unbounded logical byte stream.
//!
//! This module provides the fixed-capacity circular store that backs a
//! streaming session: a sliding window addressed by absolute offsets, with
//! explicit bookkeeping of which ranges inside the window are populated and
//! which are still holes. It knows nothing about segments or networking;
//! the download coordination layer drives it.

pub use self::holes::{Hole, HoleList};
pub use self::ring::{ReadSpan, RingBuffer, WriteSpan};
pub use self::stats::BufferStats;

mod holes;
mod ring;
mod stats;

/// Error types for random-access buffer operations.
///
/// Cursor-moving operations (`commit`, `consume`, `seek`) report refusal
/// through their return value instead; a refused call indicates a caller bug
/// and leaves the buffer untouched.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The range leaves the retained window entirely.
    #[error(
        "range {offset}+{len} outside retained window [{window_beg}, {window_end})"
    )]
    OutOfRange {
        /// Requested starting offset.
        offset: u64,
        /// Requested length in bytes.
        len: usize,
        /// Oldest retained offset.
        window_beg: u64,
        /// One past the newest retained offset.
        window_end: u64,
    },

    /// The range is inside the window but covers at least one hole.
    #[error("range {offset}+{len} covers unpopulated bytes")]
    NotResident {
        /// Requested starting offset.
        offset: u64,
        /// Requested length in bytes.
        len: usize,
    },
}
