//! Fixed-capacity sparse ring buffer over an unbounded logical stream.
//!
//! The buffer stores a sliding window of a byte stream addressed by absolute
//! monotonic offsets. Within the retained window it tracks which ranges are
//! populated and which are holes, so consumers can seek into already
//! downloaded territory for free while the producer keeps filling gaps.
//! Physical placement is the pure mapping `offset % capacity`; any window no
//! larger than the capacity maps injectively, so no base-pointer bookkeeping
//! is needed.

use tracing::{debug, warn};

use super::holes::{Hole, HoleList};
use super::stats::BufferStats;
use super::BufferError;

/// Read-only view of buffered bytes, split in two when the physical window
/// wraps past the end of the backing storage.
#[derive(Debug)]
pub struct ReadSpan<'a> {
    /// Bytes up to the physical wrap point.
    pub first: &'a [u8],
    /// Bytes after the wrap point, empty when the view does not wrap.
    pub second: &'a [u8],
}

impl ReadSpan<'_> {
    /// Total number of viewable bytes.
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// Whether the view holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    /// Copies as many bytes as fit into `out`, returning the count.
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let a = self.first.len().min(out.len());
        out[..a].copy_from_slice(&self.first[..a]);
        let b = self.second.len().min(out.len() - a);
        out[a..a + b].copy_from_slice(&self.second[..b]);
        a + b
    }

    /// Collects the view into a contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.len());
        v.extend_from_slice(self.first);
        v.extend_from_slice(self.second);
        v
    }
}

/// Writable counterpart of [`ReadSpan`], handed out by [`RingBuffer::prepare`].
#[derive(Debug)]
pub struct WriteSpan<'a> {
    /// Writable bytes up to the physical wrap point.
    pub first: &'a mut [u8],
    /// Writable bytes after the wrap point.
    pub second: &'a mut [u8],
}

impl WriteSpan<'_> {
    /// Total number of writable bytes.
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// Whether no bytes can be written.
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    /// Copies as many bytes of `src` as fit, returning the count to pass to
    /// [`RingBuffer::commit`].
    pub fn fill_from(&mut self, src: &[u8]) -> usize {
        let a = self.first.len().min(src.len());
        self.first[..a].copy_from_slice(&src[..a]);
        let b = self.second.len().min(src.len() - a);
        self.second[..b].copy_from_slice(&src[a..a + b]);
        a + b
    }
}

/// Fixed-capacity circular byte store keyed by absolute stream offsets.
///
/// Cursor discipline: `read <= write` always, with `[read, write)` fully
/// populated and immediately readable. Behind `read` lies retained history
/// with abandoned gaps recorded in the history chain; at and ahead of `write`
/// lie gaps the producer still has to fill, recorded in the frontier chain.
/// The history chain always starts with a `[0, data_beg)` hole and the
/// frontier chain always ends with a `[data_end, u64::MAX)` hole, so the
/// window bounds are derived rather than stored.
#[derive(Debug)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    capacity: u64,
    read: u64,
    write: u64,
    /// Gaps behind `read`, first hole pinned at offset 0.
    read_holes: HoleList,
    /// Gaps at or ahead of `write`, last hole ending at `u64::MAX`.
    write_holes: HoleList,
    stats: BufferStats,
}

impl RingBuffer {
    /// Creates a buffer of `capacity` bytes with both cursors at offset 0.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            capacity: capacity as u64,
            read: 0,
            write: 0,
            read_holes: HoleList::from_hole(Hole::new(0, 0)),
            write_holes: HoleList::from_hole(Hole::new(0, u64::MAX)),
            stats: BufferStats::default(),
        }
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Consumer cursor: next offset a sequential read returns.
    pub fn read_offset(&self) -> u64 {
        self.read
    }

    /// Producer cursor: next offset a sequential write fills.
    pub fn write_offset(&self) -> u64 {
        self.write
    }

    /// Readable bytes between the cursors.
    pub fn buffered(&self) -> u64 {
        self.write - self.read
    }

    /// Whether committing any further byte would overrun the consumer.
    pub fn is_full(&self) -> bool {
        self.buffered() >= self.capacity
    }

    /// Oldest offset about which the window still knows anything.
    pub fn data_beg(&self) -> u64 {
        self.read_holes.first().map_or(0, |h| h.end)
    }

    /// One past the newest offset about which the window knows anything.
    pub fn data_end(&self) -> u64 {
        self.write_holes.last().map_or(self.write, |h| h.beg)
    }

    /// Holes behind the consumer cursor, history terminator included.
    pub fn read_holes(&self) -> &[Hole] {
        self.read_holes.as_slice()
    }

    /// Holes at or ahead of the producer cursor, frontier terminator included.
    pub fn write_holes(&self) -> &[Hole] {
        self.write_holes.as_slice()
    }

    /// Counters accumulated since creation.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// First producer-side hole with bytes at or after `from`. The frontier
    /// terminator guarantees there always is one.
    pub fn next_write_hole(&self, from: u64) -> Hole {
        self.write_holes
            .hole_at_or_after(from)
            .unwrap_or_else(|| Hole::new(self.data_end(), u64::MAX))
    }

    /// Splits the producer-side hole containing `at` in two, so that a
    /// shorter-than-expected transfer and its successor each get their own
    /// gap. The frontier terminator is never split.
    pub fn split_write_hole(&mut self, at: u64) -> bool {
        match self.write_holes.hole_at_or_after(at) {
            Some(h) if h.contains(at) && h.beg < at && h.end != u64::MAX => {
                self.write_holes.split_at(at)
            }
            _ => false,
        }
    }

    /// Returns a writable view at the producer cursor, bounded by free
    /// capacity, the current gap and `max`. A populated run left over from a
    /// backward seek is skipped for free first; its bytes are never refetched.
    pub fn prepare(&mut self, max: usize) -> WriteSpan<'_> {
        self.align_write();
        let hole_end = self.write_holes.first().map_or(self.write, |h| h.end);
        let hole_room = hole_end.saturating_sub(self.write);
        let cap_room = (self.read + self.capacity).saturating_sub(self.write);
        let avail = (max as u64).min(hole_room).min(cap_room) as usize;

        let phys = (self.write % self.capacity) as usize;
        let first_len = avail.min(self.capacity as usize - phys);
        let second_len = avail - first_len;
        let (lo, hi) = self.storage.split_at_mut(phys);
        WriteSpan {
            first: &mut hi[..first_len],
            second: &mut lo[..second_len],
        }
    }

    /// Advances the producer cursor over `n` freshly written bytes.
    ///
    /// Refuses and leaves all state unchanged when the advance would cross
    /// `read + capacity` or the end of the current gap; both indicate a
    /// caller that ignored the bounds of the span it was handed.
    pub fn commit(&mut self, n: usize) -> bool {
        if n == 0 {
            return true;
        }
        let n = n as u64;
        let Some(first) = self.write_holes.first() else {
            return false;
        };
        let boundary = if self.write < first.beg {
            first.beg
        } else {
            first.end
        };
        if self.write + n > boundary || self.write + n > self.read + self.capacity {
            warn!(
                write = self.write,
                n, boundary, "commit refused: would cross hole or capacity bound"
            );
            return false;
        }
        self.write += n;
        if self.write > first.beg {
            self.write_holes.advance_first(self.write);
        }
        self.align_write();
        self.trim_history(self.write.saturating_sub(self.capacity));
        self.stats.record_commit(n, self.buffered());
        true
    }

    /// Returns a read-only view of up to `max` readable bytes at the
    /// consumer cursor.
    pub fn data(&self, max: usize) -> ReadSpan<'_> {
        let avail = self.buffered().min(max as u64) as usize;
        self.span_at(self.read, avail)
    }

    /// Advances the consumer cursor over `n` read bytes. Refuses when the
    /// advance would pass the producer cursor.
    pub fn consume(&mut self, n: usize) -> bool {
        let n = n as u64;
        if self.read + n > self.write {
            warn!(
                read = self.read,
                write = self.write,
                n,
                "consume refused: would pass producer cursor"
            );
            return false;
        }
        self.read += n;
        self.stats.bytes_consumed += n;
        true
    }

    /// Moves the consumer cursor to an arbitrary absolute offset, retaining
    /// as much already-downloaded data as the window allows.
    ///
    /// Returns whether the producer cursor moved; callers use this to decide
    /// whether the transport must restart at a new position. Three regimes:
    ///
    /// 1. Out of retained reach entirely: hard reset, the window collapses
    ///    to `[target, target)` and both chains are replaced by fresh
    ///    terminators.
    /// 2. Backward into retained territory: gaps between the target and the
    ///    receding producer cursor are re-linked from the history chain into
    ///    the frontier chain; populated runs in between stay reusable.
    /// 3. Forward past the producer cursor: gaps being jumped over are
    ///    re-linked into the history chain (skipped, not read); the frontier
    ///    terminator is split when the target lies beyond it.
    pub fn seek(&mut self, target: u64) -> bool {
        if target == self.read {
            return false;
        }
        let data_beg = self.data_beg();
        let data_end = self.data_end();
        if target.saturating_add(self.capacity) <= data_beg
            || data_end.saturating_add(self.capacity) <= target
        {
            let moved = self.write != target;
            debug!(target, data_beg, data_end, "seek out of reach, hard reset");
            self.reset_to(target);
            return moved;
        }
        if target < self.read {
            self.seek_back(target)
        } else {
            self.seek_forward(target)
        }
    }

    /// Collapses the window to `[offset, offset)`, discarding all holes and
    /// laying down fresh chain terminators.
    pub fn reset_to(&mut self, offset: u64) {
        self.read = offset;
        self.write = offset;
        self.read_holes = HoleList::from_hole(Hole::new(0, offset));
        self.write_holes = HoleList::from_hole(Hole::new(offset, u64::MAX));
        self.stats.seeks_reset += 1;
    }

    /// Whether `[offset, offset + len)` lies inside the window with every
    /// byte populated.
    pub fn is_resident(&self, offset: u64, len: usize) -> bool {
        let end = offset + len as u64;
        offset >= self.data_beg()
            && end <= self.data_end()
            && !self.read_holes.intersects(offset, end)
            && !self.write_holes.intersects(offset, end)
    }

    /// Random-access read of `len` bytes at an absolute offset.
    ///
    /// # Errors
    ///
    /// - `BufferError::OutOfRange` - range leaves the retained window
    /// - `BufferError::NotResident` - range covers a hole
    pub fn read_at(&self, offset: u64, len: usize) -> Result<ReadSpan<'_>, BufferError> {
        let end = offset + len as u64;
        if len as u64 > self.capacity || offset < self.data_beg() || end > self.data_end() {
            return Err(BufferError::OutOfRange {
                offset,
                len,
                window_beg: self.data_beg(),
                window_end: self.data_end(),
            });
        }
        if self.read_holes.intersects(offset, end) || self.write_holes.intersects(offset, end) {
            return Err(BufferError::NotResident { offset, len });
        }
        Ok(self.span_at(offset, len))
    }

    /// Random-access write at an absolute offset within the retained window.
    /// Any holes the range covers become populated; the cursors stay put.
    ///
    /// # Errors
    ///
    /// - `BufferError::OutOfRange` - range leaves the retained window
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), BufferError> {
        if data.is_empty() {
            return Ok(());
        }
        let end = offset + data.len() as u64;
        if data.len() as u64 > self.capacity || offset < self.data_beg() || end > self.data_end() {
            return Err(BufferError::OutOfRange {
                offset,
                len: data.len(),
                window_beg: self.data_beg(),
                window_end: self.data_end(),
            });
        }
        self.copy_in(offset, data);
        self.read_holes.fill(offset, end);
        self.write_holes.fill(offset, end);
        Ok(())
    }

    /// Skips the producer cursor over a populated run left between gaps, so
    /// it always parks at the start of the next hole.
    fn align_write(&mut self) {
        if let Some(h) = self.write_holes.first() {
            if self.write < h.beg {
                self.write = h.beg;
            }
        }
    }

    fn seek_back(&mut self, target: u64) -> bool {
        let old_write = self.write;
        let relinked = self.read_holes.split_off_from(target);
        if self.read_holes.is_empty() {
            // target == 0: restore a degenerate history terminator
            self.read_holes.insert_raw(0, Hole::new(0, 0));
        }
        self.read = target;
        // a degenerate history terminator may have been detached; only real
        // gaps pull the producer cursor back
        let relinked: Vec<Hole> = relinked.into_iter().filter(|h| !h.is_empty()).collect();
        if let Some(first) = relinked.first().copied() {
            self.write = first.beg;
            for h in relinked {
                self.write_holes.insert(h);
            }
        }
        // window slid backwards: forget what no longer fits ahead
        let limit = self.data_beg().saturating_add(self.capacity);
        if self.data_end() > limit {
            self.write_holes.clip_future(limit);
        }
        self.stats.seeks_backward += 1;
        debug!(
            target,
            write = self.write,
            moved = self.write != old_write,
            "backward seek"
        );
        self.write != old_write
    }

    fn seek_forward(&mut self, target: u64) -> bool {
        if target <= self.write {
            // pure cursor move inside the populated region
            self.read = target;
            self.stats.seeks_forward += 1;
            return false;
        }
        let old_write = self.write;
        let skipped = self.write_holes.split_off_below(target);
        for h in skipped {
            self.read_holes.insert(h);
        }
        self.read = target;
        self.write = target;
        self.align_write();
        self.trim_history(self.data_end().saturating_sub(self.capacity));
        self.stats.seeks_forward += 1;
        debug!(
            target,
            write = self.write,
            "forward seek past producer cursor"
        );
        self.write != old_write
    }

    fn trim_history(&mut self, new_beg: u64) {
        if new_beg == 0 || new_beg <= self.data_beg() {
            return;
        }
        self.read_holes.trim_history(new_beg);
    }

    fn span_at(&self, offset: u64, len: usize) -> ReadSpan<'_> {
        let phys = (offset % self.capacity) as usize;
        let first_len = len.min(self.capacity as usize - phys);
        ReadSpan {
            first: &self.storage[phys..phys + first_len],
            second: &self.storage[..len - first_len],
        }
    }

    fn copy_in(&mut self, offset: u64, data: &[u8]) {
        let phys = (offset % self.capacity) as usize;
        let first_len = data.len().min(self.capacity as usize - phys);
        self.storage[phys..phys + first_len].copy_from_slice(&data[..first_len]);
        self.storage[..data.len() - first_len].copy_from_slice(&data[first_len..]);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn fill_bytes(ring: &mut RingBuffer, data: &[u8]) -> usize {
        let mut span = ring.prepare(data.len());
        let n = span.fill_from(data);
        assert!(ring.commit(n));
        n
    }

    fn pattern(offset: u64, len: usize) -> Vec<u8> {
        (0..len).map(|i| (offset as usize + i) as u8).collect()
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let ring = RingBuffer::new(1024);
        assert_eq!(ring.buffered(), 0);
        assert_eq!(ring.data_beg(), 0);
        assert_eq!(ring.data_end(), 0);
        assert_eq!(ring.write_holes(), &[Hole::new(0, u64::MAX)]);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut ring = RingBuffer::new(1024);
        let data = pattern(0, 300);
        assert_eq!(fill_bytes(&mut ring, &data), 300);
        assert_eq!(ring.buffered(), 300);

        let view = ring.data(usize::MAX);
        assert_eq!(view.to_vec(), data);
        assert!(ring.consume(300));
        assert_eq!(ring.buffered(), 0);
    }

    #[test]
    fn test_wraparound_split_spans() {
        let mut ring = RingBuffer::new(100);
        fill_bytes(&mut ring, &pattern(0, 90));
        assert!(ring.consume(90));
        // next write crosses the physical wrap point
        let data = pattern(90, 20);
        fill_bytes(&mut ring, &data);
        let view = ring.data(usize::MAX);
        assert_eq!(view.first.len(), 10);
        assert_eq!(view.second.len(), 10);
        assert_eq!(view.to_vec(), data);
    }

    #[test]
    fn test_commit_refuses_past_capacity() {
        let mut ring = RingBuffer::new(100);
        let mut span = ring.prepare(200);
        assert_eq!(span.len(), 100);
        let n = span.fill_from(&[1u8; 200]);
        assert_eq!(n, 100);
        assert!(ring.commit(n));
        assert!(ring.is_full());
        assert!(!ring.commit(1));
        assert_eq!(ring.write_offset(), 100);
    }

    #[test]
    fn test_consume_refuses_past_write() {
        let mut ring = RingBuffer::new(100);
        fill_bytes(&mut ring, &[7u8; 10]);
        assert!(!ring.consume(11));
        assert_eq!(ring.read_offset(), 0);
        assert!(ring.consume(10));
    }

    #[test]
    fn test_window_slides_over_history() {
        let mut ring = RingBuffer::new(100);
        for chunk in 0..5 {
            fill_bytes(&mut ring, &pattern(chunk * 50, 50));
            assert!(ring.consume(50));
        }
        // 250 bytes went through; only the last window's worth is retained
        assert_eq!(ring.write_offset(), 250);
        assert_eq!(ring.data_beg(), 150);
        assert!(ring.is_resident(150, 100));
        assert!(!ring.is_resident(149, 1));
    }

    #[test]
    fn test_seek_to_read_offset_is_noop() {
        let mut ring = RingBuffer::new(100);
        fill_bytes(&mut ring, &[1u8; 40]);
        let holes_before = ring.write_holes().to_vec();
        assert!(!ring.seek(0));
        assert_eq!(ring.write_holes(), &holes_before[..]);
    }

    #[test]
    fn test_seek_forward_within_buffered_data() {
        let mut ring = RingBuffer::new(100);
        fill_bytes(&mut ring, &pattern(0, 60));
        assert!(!ring.seek(40));
        assert_eq!(ring.read_offset(), 40);
        assert_eq!(ring.write_offset(), 60);
        assert_eq!(ring.data(usize::MAX).to_vec(), pattern(40, 20));
    }

    #[test]
    fn test_seek_forward_past_write_abandons_gap() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 100));
        assert!(ring.seek(300));
        assert_eq!(ring.read_offset(), 300);
        assert_eq!(ring.write_offset(), 300);
        // the skipped range is now an abandoned gap behind the consumer
        assert!(ring.read_holes().contains(&Hole::new(100, 300)));
        assert_eq!(ring.write_holes(), &[Hole::new(300, u64::MAX)]);
        // the data before the gap is still resident
        assert!(ring.is_resident(0, 100));
        assert!(!ring.is_resident(100, 10));
    }

    #[test]
    fn test_seek_back_into_buffered_data_keeps_producer() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 200));
        assert!(ring.consume(150));
        // all of [0, 200) is still populated: no producer restart needed
        assert!(!ring.seek(50));
        assert_eq!(ring.read_offset(), 50);
        assert_eq!(ring.write_offset(), 200);
        assert_eq!(ring.data(usize::MAX).to_vec(), pattern(50, 150));
    }

    #[test]
    fn test_seek_back_over_abandoned_gap_relinks_holes() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 100));
        // jump ahead, leaving [100, 300) unfetched
        assert!(ring.seek(300));
        fill_bytes(&mut ring, &pattern(300, 50));
        // back to the start: the gap must reappear ahead of the producer
        assert!(ring.seek(0));
        assert_eq!(ring.read_offset(), 0);
        assert_eq!(ring.write_offset(), 100);
        assert!(ring.write_holes().contains(&Hole::new(100, 300)));
        // populated runs on both sides of the gap survived
        assert!(ring.is_resident(0, 100));
        assert!(ring.is_resident(300, 50));
        assert!(!ring.is_resident(100, 200));
        // refilling resumes exactly at the relinked gap
        let span = ring.prepare(usize::MAX);
        assert_eq!(span.len(), 200);
    }

    #[test]
    fn test_seek_back_before_retained_window() {
        let mut ring = RingBuffer::new(100);
        // push history out: window becomes [100, 200)
        for chunk in 0..2 {
            fill_bytes(&mut ring, &pattern(chunk * 100, 100));
            assert!(ring.consume(100));
        }
        assert_eq!(ring.data_beg(), 100);
        // 60 is before data_beg but within capacity reach
        assert!(ring.seek(60));
        assert_eq!(ring.read_offset(), 60);
        assert_eq!(ring.write_offset(), 60);
        // the stretch up to the old window edge is a fresh gap
        assert!(ring.write_holes().contains(&Hole::new(60, 100)));
        // the future was clipped to keep the window within capacity
        assert!(ring.data_end() <= 160);
    }

    #[test]
    fn test_hard_reset_forward() {
        let mut ring = RingBuffer::new(4096);
        ring.reset_to(10000);
        fill_bytes(&mut ring, &pattern(10000, 4000));
        // far beyond reach: must collapse, not walk
        assert!(ring.seek(100000));
        assert_eq!(ring.read_offset(), 100000);
        assert_eq!(ring.write_offset(), 100000);
        assert_eq!(ring.write_holes(), &[Hole::new(100000, u64::MAX)]);
        assert_eq!(ring.read_holes(), &[Hole::new(0, 100000)]);
    }

    #[test]
    fn test_hard_reset_backward_to_zero() {
        let mut ring = RingBuffer::new(4096);
        ring.reset_to(10000);
        fill_bytes(&mut ring, &pattern(10000, 4000));
        // window is [10000, 14000), capacity 4096: offset 0 is out of reach
        assert!(ring.seek(0));
        assert_eq!(ring.read_offset(), 0);
        assert_eq!(ring.write_offset(), 0);
        assert_eq!(ring.write_holes(), &[Hole::new(0, u64::MAX)]);
        assert_eq!(ring.read_holes(), &[Hole::new(0, 0)]);
    }

    #[test]
    fn test_refill_after_forward_and_back_seek_round_trips() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 100));
        ring.seek(400);
        fill_bytes(&mut ring, &pattern(400, 100));
        ring.seek(100);
        // refill the relinked gap and verify bytes land at the right offsets
        let refill = pattern(100, 300);
        assert_eq!(fill_bytes(&mut ring, &refill), 300);
        // producer skipped over the populated [400, 500) run
        assert_eq!(ring.write_offset(), 500);
        assert_eq!(ring.read_at(100, 300).unwrap().to_vec(), refill);
        assert_eq!(ring.read_at(400, 100).unwrap().to_vec(), pattern(400, 100));
    }

    #[test]
    fn test_read_at_classifies_errors() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 100));
        ring.seek(300);
        assert!(matches!(
            ring.read_at(150, 10),
            Err(BufferError::NotResident { .. })
        ));
        // beyond the frontier is outside the window, not merely unpopulated
        assert!(matches!(
            ring.read_at(300, 10),
            Err(BufferError::OutOfRange { .. })
        ));
        assert!(matches!(
            ring.read_at(5000, 10),
            Err(BufferError::OutOfRange { .. })
        ));
        assert_eq!(ring.read_at(10, 20).unwrap().to_vec(), pattern(10, 20));
    }

    #[test]
    fn test_write_at_fills_holes() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 100));
        ring.seek(300);
        // patch part of the abandoned gap directly
        let patch = pattern(150, 50);
        ring.write_at(150, &patch).unwrap();
        assert!(ring.is_resident(150, 50));
        assert_eq!(ring.read_at(150, 50).unwrap().to_vec(), patch);
        assert!(!ring.is_resident(100, 50));
    }

    #[test]
    fn test_split_write_hole() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 100));
        ring.seek(400);
        fill_bytes(&mut ring, &pattern(400, 50));
        ring.seek(100);
        assert!(ring.write_holes().contains(&Hole::new(100, 400)));
        assert!(ring.split_write_hole(250));
        assert!(ring.write_holes().contains(&Hole::new(100, 250)));
        assert!(ring.write_holes().contains(&Hole::new(250, 400)));
        // the frontier terminator is never split
        assert!(!ring.split_write_hole(5000));
    }

    #[test]
    fn test_prepare_bounded_by_split_hole() {
        let mut ring = RingBuffer::new(1000);
        fill_bytes(&mut ring, &pattern(0, 100));
        ring.seek(400);
        fill_bytes(&mut ring, &pattern(400, 50));
        ring.seek(100);
        ring.split_write_hole(250);
        let span = ring.prepare(usize::MAX);
        assert_eq!(span.len(), 150);
        drop(span);
        // committing across the split boundary is refused
        assert!(!ring.commit(200));
        assert!(ring.commit(150));
        assert_eq!(ring.write_offset(), 250);
    }

    proptest! {
        /// Cursor ordering holds under arbitrary interleavings of producing,
        /// consuming and seeking.
        #[test]
        fn prop_cursor_invariants(ops in prop::collection::vec((0u8..4, 0u64..3000), 1..60)) {
            let mut ring = RingBuffer::new(512);
            for (kind, arg) in ops {
                match kind {
                    0 => {
                        let mut span = ring.prepare((arg % 600) as usize);
                        let n = span.len();
                        for b in span.first.iter_mut() { *b = 0xAB; }
                        for b in span.second.iter_mut() { *b = 0xAB; }
                        prop_assert!(ring.commit(n));
                    }
                    1 => {
                        let n = (arg % 600).min(ring.buffered()) as usize;
                        prop_assert!(ring.consume(n));
                    }
                    2 => { ring.seek(arg); }
                    _ => { ring.data((arg % 600) as usize); }
                }
                prop_assert!(ring.read_offset() <= ring.write_offset());
                prop_assert!(ring.write_offset() - ring.read_offset() <= ring.capacity());
                prop_assert!(ring.data_beg() <= ring.read_offset());
                prop_assert!(ring.write_offset() <= ring.data_end());
                prop_assert!(ring.data_end() - ring.data_beg() <= ring.capacity());
            }
        }
    }
}
