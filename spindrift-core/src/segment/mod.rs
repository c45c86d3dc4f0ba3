//! Segment bookkeeping and download coordination.
//!
//! A stream arrives as ordered segments whose byte lengths may be unknown
//! until the transport has fetched them. This module keeps the cumulative
//! segment-to-offset map, the per-segment length state machine and the
//! coordinator that drives a [`SegmentSource`] to fill the ring buffer.

pub mod coordinator;
pub mod http;
#[cfg(feature = "simulation")]
pub mod simulation;
pub mod source;

pub use coordinator::{SegmentCoordinator, StreamError};
pub use http::{HttpSegment, HttpSegmentSource};
#[cfg(feature = "simulation")]
pub use simulation::{SimulatedSegment, SimulatedSource, SourceEvent};
pub use source::{OpenInfo, OpenRequest, SegmentSource, SourceError};

/// Length state of one segment.
///
/// Progression: `Unknown` until an open completes; then `Known` when the
/// transport or playlist metadata advertises a length, or `Unadvertised`
/// when it does not. An `Unadvertised` segment becomes `Guessed` once its
/// stream ends, the inferred length being everything received up to that
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLength {
    /// No open has completed for this segment yet.
    Unknown,
    /// An open completed but the transport advertised no length.
    Unadvertised,
    /// Authoritative length from transport headers or playlist metadata.
    Known(u64),
    /// Length inferred from an end-of-stream signal with no authoritative
    /// length available. Indistinguishable from `Known` for offset math.
    Guessed(u64),
}

impl SegmentLength {
    /// The usable byte length, whether authoritative or inferred.
    pub fn known(&self) -> Option<u64> {
        match self {
            SegmentLength::Known(n) | SegmentLength::Guessed(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether the length was inferred rather than advertised.
    pub fn is_guessed(&self) -> bool {
        matches!(self, SegmentLength::Guessed(_))
    }
}

/// One row of the cumulative segment map.
#[derive(Debug, Clone, Copy)]
pub struct SegmentEntry {
    /// Absolute stream offset of the segment's first byte.
    pub beg: u64,
    /// Length state.
    pub length: SegmentLength,
    /// Failed transfer attempts recorded against this segment.
    pub attempts: u32,
}

/// Cumulative map from segment indices to absolute stream offsets.
///
/// Entries are appended as lengths become known; the last entry is
/// open-ended while its length is unresolved, covering every offset beyond
/// its start.
#[derive(Debug, Clone)]
pub struct SegmentTable {
    entries: Vec<SegmentEntry>,
}

impl Default for SegmentTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentTable {
    /// Creates a table with segment 0 starting at offset 0.
    pub fn new() -> Self {
        Self {
            entries: vec![SegmentEntry {
                beg: 0,
                length: SegmentLength::Unknown,
                attempts: 0,
            }],
        }
    }

    /// Number of discovered segments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; segment 0 exists from creation.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Index of the youngest discovered segment.
    pub fn last_index(&self) -> u64 {
        (self.entries.len() - 1) as u64
    }

    /// Absolute start offset of `segment`, if it has been discovered.
    pub fn beg(&self, segment: u64) -> Option<u64> {
        self.entries.get(segment as usize).map(|e| e.beg)
    }

    /// Length state of `segment`; undiscovered segments are `Unknown`.
    pub fn length(&self, segment: u64) -> SegmentLength {
        self.entries
            .get(segment as usize)
            .map_or(SegmentLength::Unknown, |e| e.length)
    }

    /// One past the last byte of `segment` in absolute offsets, or
    /// `u64::MAX` while the length is unresolved.
    pub fn end_of(&self, segment: u64) -> u64 {
        match self.entries.get(segment as usize) {
            Some(e) => e.length.known().map_or(u64::MAX, |n| e.beg + n),
            None => u64::MAX,
        }
    }

    /// Maps an absolute offset to `(segment, segment_beg)`, discovering new
    /// entries along the way while preceding lengths are known. The last
    /// entry claims everything beyond it while its length is unresolved.
    pub fn locate(&mut self, abs: u64) -> (u64, u64) {
        loop {
            let last = *self.entries.last().expect("table is never empty");
            match last.length.known() {
                Some(n) if abs >= last.beg + n => {
                    self.entries.push(SegmentEntry {
                        beg: last.beg + n,
                        length: SegmentLength::Unknown,
                        attempts: 0,
                    });
                }
                _ => break,
            }
        }
        let idx = self.entries.partition_point(|e| e.beg <= abs) - 1;
        (idx as u64, self.entries[idx].beg)
    }

    /// Records an authoritative length. Ignored once a length is already
    /// known; cumulative offsets of later entries must not shift.
    pub fn set_valid(&mut self, segment: u64, length: u64) -> bool {
        match self.entries.get_mut(segment as usize) {
            Some(e) if e.length.known().is_none() => {
                e.length = SegmentLength::Known(length);
                true
            }
            _ => false,
        }
    }

    /// Marks that an open completed without an advertised length.
    pub fn set_unadvertised(&mut self, segment: u64) {
        if let Some(e) = self.entries.get_mut(segment as usize) {
            if matches!(e.length, SegmentLength::Unknown) {
                e.length = SegmentLength::Unadvertised;
            }
        }
    }

    /// Records a length inferred from an end-of-stream signal. Ignored once
    /// a length is already known.
    pub fn set_guess(&mut self, segment: u64, length: u64) -> bool {
        match self.entries.get_mut(segment as usize) {
            Some(e) if e.length.known().is_none() => {
                e.length = SegmentLength::Guessed(length);
                true
            }
            _ => false,
        }
    }

    /// Increments and returns the failed-attempt counter for `segment`.
    pub fn bump_attempts(&mut self, segment: u64) -> u32 {
        match self.entries.get_mut(segment as usize) {
            Some(e) => {
                e.attempts += 1;
                e.attempts
            }
            None => 0,
        }
    }

    /// Failed transfer attempts recorded against `segment`.
    pub fn attempts(&self, segment: u64) -> u32 {
        self.entries.get(segment as usize).map_or(0, |e| e.attempts)
    }
}
