//! Segment-aware download coordination over the sparse ring buffer.
//!
//! The coordinator presents the buffer as a sequence of segments, each
//! independently openable against a [`SegmentSource`]. It translates
//! segment-relative positions to absolute stream offsets through the
//! cumulative segment table, keeps several segment opens in flight to hide
//! per-segment setup latency, infers lengths the transport never advertises,
//! and owns the retry/timeout policy for a flaky network.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferError, ReadSpan, RingBuffer};
use crate::config::{FetchConfig, SpindriftConfig};
use crate::segment::source::{OpenInfo, OpenRequest, SegmentSource, SourceError};
use crate::segment::{SegmentLength, SegmentTable};

/// Errors surfaced by streaming operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Data is not available yet; the caller should retry later. Not a
    /// failure, and no progress has been lost.
    #[error("data not available yet")]
    WouldBlock,

    /// The consumer reached the end of the current segment.
    #[error("end of segment (length guessed: {length_was_guessed})")]
    EndOfSegment {
        /// Whether the segment's length was inferred from an end-of-stream
        /// signal rather than advertised.
        length_was_guessed: bool,
    },

    /// Every segment the source can enumerate has been consumed.
    #[error("no more segments")]
    NoMoreSegments,

    /// The position is outside the retained window or the known-valid range.
    #[error("position {offset} outside the addressable range")]
    OutOfRange {
        /// Offending offset.
        offset: u64,
    },

    /// The source made no progress within the configured deadline. Subject
    /// to the same retry ceiling as transport faults.
    #[error("source made no progress for {waited:?}")]
    TimedOut {
        /// How long the coordinator waited before giving up.
        waited: Duration,
    },

    /// The session was cancelled or closed.
    #[error("session aborted")]
    Aborted,

    /// The window is full; the consumer must discard bytes before more can
    /// be produced.
    #[error("no buffer space, consume before producing more")]
    NoBufferSpace,

    /// A segment exhausted its retry budget; the fault is sticky until
    /// explicitly cleared.
    #[error("segment {segment} failed permanently after {attempts} attempts")]
    Fatal {
        /// Segment that exhausted its attempts.
        segment: u64,
        /// Attempts spent before giving up.
        attempts: u32,
    },

    /// A transport fault that could not be classified and retried.
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// Sticky failure state; short-circuits every operation until cleared.
#[derive(Debug, Clone, Copy)]
enum Fault {
    Aborted,
    Exhausted { segment: u64, attempts: u32 },
}

impl Fault {
    fn to_error(self) -> StreamError {
        match self {
            Fault::Aborted => StreamError::Aborted,
            Fault::Exhausted { segment, attempts } => StreamError::Fatal { segment, attempts },
        }
    }
}

/// Outcome of one step of the pull loop.
enum Pulled {
    /// Bytes were committed into the buffer.
    Bytes(u64),
    /// Bookkeeping progressed (an open completed, a range finished, a retry
    /// reset the pipeline); pull again.
    State,
    /// Nothing further can be scheduled because of the active seek bound.
    Bounded,
    /// Nothing further exists: the source enumerated no segment covering
    /// the next gap.
    Exhausted,
}

/// An open issued to the source and not yet activated.
#[derive(Debug, Clone, Copy)]
struct PendingOpen {
    segment: u64,
    seg_beg: u64,
    abs_end: Option<u64>,
}

/// The transfer currently being drained into the buffer.
#[derive(Debug, Clone, Copy)]
struct ActiveRange {
    segment: u64,
    seg_beg: u64,
    abs_end: Option<u64>,
}

/// Drives a [`SegmentSource`] to keep the ring buffer filled ahead of the
/// consumer.
///
/// Single logical flow of control: every method runs to completion on the
/// caller's task, suspending only at the source boundary. The coordinator
/// exclusively owns the buffer and the segment table.
pub struct SegmentCoordinator<S: SegmentSource> {
    ring: RingBuffer,
    source: S,
    table: SegmentTable,
    fetch: FetchConfig,
    prepare_size: usize,

    /// Segment the consumer is positioned in.
    current: u64,
    /// Opens issued to the source, eldest first.
    pending: VecDeque<PendingOpen>,
    /// The transfer currently filling the buffer.
    active: Option<ActiveRange>,
    /// Absolute offset where the next open will start.
    lookahead: u64,
    /// Absolute bound past which no opens are scheduled, from the active
    /// seek. Used when only a bounded head of data is wanted.
    end_hint: Option<u64>,
    /// The source reported that no segment covers the next gap.
    no_more: bool,
    /// When the source first reported would-block without progress since.
    blocked_since: Option<Instant>,
    fault: Option<Fault>,
}

impl<S: SegmentSource> SegmentCoordinator<S> {
    /// Creates a coordinator with a buffer sized from `config`.
    pub fn new(config: &SpindriftConfig, source: S) -> Self {
        Self {
            ring: RingBuffer::new(config.buffer.capacity),
            source,
            table: SegmentTable::new(),
            fetch: config.fetch.clone(),
            prepare_size: config.buffer.prepare_size,
            current: 0,
            pending: VecDeque::new(),
            active: None,
            lookahead: 0,
            end_hint: None,
            no_more: false,
            blocked_since: None,
            fault: None,
        }
    }

    /// Segment the consumer is currently positioned in.
    pub fn current_segment(&self) -> u64 {
        self.current
    }

    /// Absolute stream offset of the consumer cursor.
    pub fn position(&self) -> u64 {
        self.ring.read_offset()
    }

    /// Consumer position as `(segment, offset_within_segment)`.
    pub fn segment_position(&self) -> (u64, u64) {
        let beg = self.table.beg(self.current).unwrap_or(0);
        (self.current, self.ring.read_offset() - beg)
    }

    /// Bytes immediately readable without touching the source, bounded by
    /// the current segment's known end.
    pub fn readable(&self) -> u64 {
        let end = self.table.end_of(self.current);
        self.ring
            .write_offset()
            .min(end)
            .saturating_sub(self.ring.read_offset())
    }

    /// Read-only view of up to `max` readable bytes of the current segment.
    pub fn data(&self, max: usize) -> ReadSpan<'_> {
        let capped = self.readable().min(max as u64) as usize;
        self.ring.data(capped)
    }

    /// The ring buffer, for window inspection.
    pub fn buffer(&self) -> &RingBuffer {
        &self.ring
    }

    /// The transport, for inspection.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Failed transfer attempts recorded against `segment`.
    pub fn attempts(&self, segment: u64) -> u32 {
        self.table.attempts(segment)
    }

    /// Length state of `segment`.
    pub fn segment_length(&self, segment: u64) -> SegmentLength {
        self.table.length(segment)
    }

    /// Total stream length, when the source advertises every segment length
    /// out of band.
    pub fn total_length(&self) -> Option<u64> {
        let mut total = 0u64;
        let mut segment = 0u64;
        while self.source.contains(segment) {
            total += self.source.known_length(segment)?;
            segment += 1;
        }
        Some(total)
    }

    /// Maps an absolute stream offset to `(segment, offset_within_segment)`,
    /// consulting source metadata for undiscovered lengths.
    pub fn locate_absolute(&mut self, abs: u64) -> Option<(u64, u64)> {
        self.resolve_segment_at(abs)
            .map(|(segment, beg)| (segment, abs - beg))
    }

    /// Moves the consumer to a segment-relative position.
    ///
    /// Returns whether the producer cursor moved, in which case all
    /// outstanding opens were cancelled and fresh ones scheduled. With
    /// `end_hint` set, no transfer is scheduled past `segment_beg + hint`;
    /// use it when only a bounded head of data is wanted, e.g. container
    /// header probing.
    ///
    /// # Errors
    ///
    /// - `StreamError::OutOfRange` - the segment is unknown to the source,
    ///   its cumulative offset cannot be computed yet, or `offset` exceeds
    ///   its known length
    pub async fn seek(
        &mut self,
        segment: u64,
        offset: u64,
        end_hint: Option<u64>,
    ) -> Result<bool, StreamError> {
        self.check_fault()?;
        if !self.source.contains(segment) {
            return Err(StreamError::OutOfRange { offset });
        }
        let Some(seg_beg) = self.resolve_offset(segment) else {
            return Err(StreamError::OutOfRange { offset });
        };
        if let Some(n) = self.table.length(segment).known() {
            if offset > n {
                return Err(StreamError::OutOfRange { offset });
            }
        }
        let abs = seg_beg + offset;
        self.end_hint = end_hint.map(|h| seg_beg.saturating_add(h));
        let moved = self.ring.seek(abs);
        self.current = segment;
        if moved {
            debug!(segment, offset, abs, "seek moved the producer cursor");
            self.reissue_pipeline().await;
            self.ensure_requests().await?;
        }
        Ok(moved)
    }

    /// Grows the readable region of the current segment to at least `amount`
    /// bytes (or the segment end, whichever comes first) and returns how
    /// many bytes are readable now.
    ///
    /// # Errors
    ///
    /// - `StreamError::WouldBlock` - nothing readable yet, retry later
    /// - `StreamError::EndOfSegment` - the segment is fully consumed
    /// - `StreamError::NoMoreSegments` - the stream is exhausted
    /// - `StreamError::NoBufferSpace` - nothing readable and the window is
    ///   full of not-yet-consumed data of earlier positions
    /// - `StreamError::TimedOut` / `StreamError::Fatal` - retry machinery
    pub async fn prepare(&mut self, amount: usize) -> Result<u64, StreamError> {
        self.check_fault()?;
        loop {
            let readable = self.readable();
            if readable >= amount as u64 {
                return Ok(readable);
            }
            let seg_end = self.table.end_of(self.current);
            if seg_end != u64::MAX && self.ring.write_offset() >= seg_end {
                return if readable > 0 {
                    Ok(readable)
                } else {
                    Err(StreamError::EndOfSegment {
                        length_was_guessed: self.table.length(self.current).is_guessed(),
                    })
                };
            }
            match self.pull_once().await {
                Ok(Pulled::Bytes(_)) | Ok(Pulled::State) => continue,
                Ok(Pulled::Bounded) => return Ok(readable),
                Ok(Pulled::Exhausted) => {
                    return if readable > 0 {
                        Ok(readable)
                    } else {
                        Err(StreamError::NoMoreSegments)
                    };
                }
                Err(StreamError::WouldBlock) | Err(StreamError::NoBufferSpace) if readable > 0 => {
                    return Ok(readable);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns a view of `len` bytes at a segment-relative offset, pulling
    /// from the source first when the tail is not resident yet. The consumer
    /// cursor does not move.
    ///
    /// # Errors
    ///
    /// - `StreamError::OutOfRange` - past the segment's known end, or the
    ///   range fell out of the retained window
    /// - `StreamError::WouldBlock` - the bytes legitimately cannot be
    ///   resident yet (transfer still underway)
    pub async fn peek(&mut self, offset: u64, len: usize) -> Result<ReadSpan<'_>, StreamError> {
        self.check_fault()?;
        let seg_beg = self.table.beg(self.current).unwrap_or(0);
        if let Some(n) = self.table.length(self.current).known() {
            if offset + len as u64 > n {
                return Err(StreamError::OutOfRange {
                    offset: offset + len as u64,
                });
            }
        }
        let abs = seg_beg + offset;
        let end = abs + len as u64;
        if !self.ring.is_resident(abs, len) {
            if end <= self.ring.read_offset() || abs < self.ring.data_beg() {
                return Err(StreamError::OutOfRange { offset });
            }
            self.prepare_to(end).await?;
        }
        match self.ring.read_at(abs, len) {
            Ok(span) => Ok(span),
            Err(BufferError::NotResident { .. }) | Err(BufferError::OutOfRange { .. }) => {
                Err(StreamError::OutOfRange { offset })
            }
        }
    }

    /// Discards `n` readable bytes of the current segment.
    ///
    /// # Errors
    ///
    /// - `StreamError::OutOfRange` - more than is currently readable
    pub fn discard(&mut self, n: u64) -> Result<(), StreamError> {
        self.check_fault()?;
        if n > self.readable() {
            return Err(StreamError::OutOfRange {
                offset: self.ring.read_offset() + n,
            });
        }
        self.ring.consume(n as usize);
        Ok(())
    }

    /// Discards up to a segment-relative offset, which must not be behind
    /// the consumer cursor.
    pub fn discard_to(&mut self, offset: u64) -> Result<(), StreamError> {
        self.check_fault()?;
        let seg_beg = self.table.beg(self.current).unwrap_or(0);
        let abs = seg_beg + offset;
        let read = self.ring.read_offset();
        if abs < read {
            return Err(StreamError::OutOfRange { offset });
        }
        self.discard(abs - read)
    }

    /// Finishes the current segment and advances to the next one.
    ///
    /// A still-unresolved length is finalized as a guess from everything
    /// received so far. Unconsumed bytes of the segment are dropped; if part
    /// of the segment was never fetched, the consumer cursor jumps over it
    /// and the producer pipeline is restarted at the next segment.
    pub async fn finish_segment(&mut self) -> Result<(), StreamError> {
        self.check_fault()?;
        let segment = self.current;
        let seg_beg = self.table.beg(segment).unwrap_or(0);
        let end = match self.table.length(segment).known() {
            Some(n) => seg_beg + n,
            None => {
                let guessed = self.ring.write_offset() - seg_beg;
                self.table.set_guess(segment, guessed);
                debug!(segment, guessed, "finalized segment length by guess");
                seg_beg + guessed
            }
        };
        if end <= self.ring.write_offset() {
            let read = self.ring.read_offset();
            self.ring.consume((end - read) as usize);
        } else {
            // part of the segment was never fetched; skip it
            if self.ring.seek(end) {
                self.reissue_pipeline().await;
                self.ensure_requests().await?;
            }
        }
        // make the next segment's entry addressable
        let _ = self.table.locate(end);
        self.current = segment + 1;
        Ok(())
    }

    /// Cancels every outstanding transfer and marks the session aborted.
    /// In-flight completions observe the abort and short-circuit.
    pub async fn cancel(&mut self) {
        self.source.cancel_all().await;
        self.pending.clear();
        self.active = None;
        self.fault = Some(Fault::Aborted);
        debug!("outstanding transfers cancelled");
    }

    /// Cancels everything and clears the buffer. The terminal state; all
    /// later operations fail with `Aborted` until the fault is cleared.
    pub async fn close(&mut self) {
        self.source.cancel_all().await;
        self.pending.clear();
        self.active = None;
        let at = self.ring.read_offset();
        self.ring.reset_to(at);
        self.fault = Some(Fault::Aborted);
        info!("coordinator closed");
    }

    /// Clears the sticky fault state so operations may be attempted again.
    pub fn clear_fault(&mut self) {
        self.fault = None;
    }

    fn check_fault(&self) -> Result<(), StreamError> {
        match self.fault {
            Some(f) => Err(f.to_error()),
            None => Ok(()),
        }
    }

    fn note_progress(&mut self) {
        self.blocked_since = None;
    }

    fn in_flight(&self) -> usize {
        self.pending.len() + usize::from(self.active.is_some())
    }

    /// Pulls from the source until the producer cursor reaches `target`.
    pub(crate) async fn prepare_to(&mut self, target: u64) -> Result<(), StreamError> {
        while self.ring.write_offset() < target {
            match self.pull_once().await? {
                Pulled::Bytes(_) | Pulled::State => {}
                Pulled::Bounded => return Err(StreamError::WouldBlock),
                Pulled::Exhausted => return Err(StreamError::OutOfRange { offset: target }),
            }
        }
        Ok(())
    }

    /// One step of the pull loop: schedule opens, activate the eldest, or
    /// drain the active transfer into the buffer.
    async fn pull_once(&mut self) -> Result<Pulled, StreamError> {
        if self.ring.is_full() {
            return Err(StreamError::NoBufferSpace);
        }
        if !self.ensure_requests().await? {
            return Ok(Pulled::State);
        }
        if self.active.is_none() {
            if self.pending.is_empty() {
                return Ok(if self.no_more {
                    Pulled::Exhausted
                } else {
                    Pulled::Bounded
                });
            }
            match self.source.activate().await {
                Ok(info) => {
                    let open = self.pending.pop_front().expect("pending open");
                    self.note_progress();
                    self.apply_open_info(open, info);
                    return Ok(Pulled::State);
                }
                Err(e) => {
                    let segment = self
                        .pending
                        .front()
                        .map(|p| p.segment)
                        .unwrap_or(self.current);
                    self.classify(e, segment).await?;
                    return Ok(Pulled::State);
                }
            }
        }
        let mut span = self.ring.prepare(self.prepare_size);
        if span.is_empty() {
            drop(span);
            return Err(StreamError::NoBufferSpace);
        }
        let result = self.source.read(&mut span).await;
        drop(span);
        match result {
            Ok(0) => {
                self.finish_active_range().await?;
                Ok(Pulled::State)
            }
            Ok(n) => {
                if !self.ring.commit(n) {
                    error!(n, "transport returned more bytes than the prepared span");
                    return Err(StreamError::Source(SourceError::Rejected {
                        reason: "read overran the prepared span".into(),
                    }));
                }
                self.note_progress();
                Ok(Pulled::Bytes(n as u64))
            }
            Err(e) => {
                let segment = self
                    .active
                    .as_ref()
                    .map(|a| a.segment)
                    .unwrap_or(self.current);
                self.classify(e, segment).await?;
                Ok(Pulled::State)
            }
        }
    }

    /// Keeps up to `pipeline_depth` opens outstanding, walking the gap chain
    /// forward and crossing segment boundaries as lengths allow. Returns
    /// false when an open failed and was classified, so the caller re-enters
    /// the loop with a reset pipeline.
    async fn ensure_requests(&mut self) -> Result<bool, StreamError> {
        while self.in_flight() < self.fetch.pipeline_depth && !self.no_more {
            let hole = self.ring.next_write_hole(self.lookahead);
            let req_beg = hole.beg.max(self.lookahead);
            if let Some(hint) = self.end_hint {
                if req_beg >= hint {
                    break;
                }
            }
            let Some((segment, seg_beg)) = self.resolve_segment_at(req_beg) else {
                self.no_more = true;
                debug!(at = req_beg, "no segment covers the next gap");
                break;
            };
            let seg_end = self.table.end_of(segment);
            let req_end = hole.end.min(seg_end);
            let bounded = req_end != u64::MAX;
            if bounded && req_end < hole.end {
                // the segment is shorter than the gap it fills: give the
                // tail its own hole so the next transfer starts exactly at
                // the boundary
                self.ring.split_write_hole(req_end);
            }
            let request = OpenRequest {
                segment,
                offset: req_beg - seg_beg,
                end: bounded.then(|| req_end - seg_beg),
            };
            debug!(
                segment,
                abs_beg = req_beg,
                abs_end = ?bounded.then_some(req_end),
                "scheduling segment open"
            );
            if let Err(e) = self.source.open(request).await {
                self.classify(e, segment).await?;
                return Ok(false);
            }
            self.pending.push_back(PendingOpen {
                segment,
                seg_beg,
                abs_end: bounded.then_some(req_end),
            });
            if bounded {
                self.lookahead = req_end;
            } else {
                // open-ended: nothing can be scheduled past an unknown end
                self.lookahead = req_beg;
                break;
            }
        }
        Ok(true)
    }

    /// Applies what the transport learned when an open completed, and makes
    /// it the active transfer.
    fn apply_open_info(&mut self, open: PendingOpen, info: OpenInfo) {
        let segment = open.segment;
        match info.total_length {
            Some(n) if self.table.length(segment).known().is_none() => {
                self.table.set_valid(segment, n);
                debug!(segment, length = n, "segment length learned at open");
                if open.abs_end.is_none() {
                    // the open-ended transfer is now bounded; free the
                    // pipeline to schedule past it
                    let end_abs = open.seg_beg + n;
                    self.ring.split_write_hole(end_abs);
                    self.lookahead = self.lookahead.max(end_abs);
                }
            }
            Some(n) => {
                if self.table.length(segment).known() != Some(n) {
                    warn!(
                        segment,
                        advertised = n,
                        "transport length disagrees with metadata, keeping metadata"
                    );
                }
            }
            None => self.table.set_unadvertised(segment),
        }
        self.active = Some(ActiveRange {
            segment,
            seg_beg: open.seg_beg,
            abs_end: open.abs_end,
        });
    }

    /// Handles the active transfer reporting end of its range.
    async fn finish_active_range(&mut self) -> Result<(), StreamError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let segment = active.segment;
        let received_end = self.ring.write_offset();
        let known = self.table.length(segment).known();
        let expected_end = match (active.abs_end, known) {
            (Some(e), Some(n)) => e.min(active.seg_beg + n),
            (Some(e), None) => e,
            (None, Some(n)) => active.seg_beg + n,
            (None, None) => received_end,
        };
        if received_end < expected_end {
            warn!(
                segment,
                received_end, expected_end, "transfer ended short of its range"
            );
            self.classify(
                SourceError::Network {
                    reason: "transfer truncated".into(),
                },
                segment,
            )
            .await?;
            return Ok(());
        }
        if known.is_none() && active.abs_end.is_none() {
            // end of stream with no authoritative length: the canonical
            // no-content-length case. The early end is taken as the true
            // segment end.
            let guessed = received_end - active.seg_beg;
            self.table.set_guess(segment, guessed);
            self.lookahead = self.lookahead.max(received_end);
            debug!(segment, guessed, "segment length inferred from end of stream");
        }
        if let Err(e) = self.source.close().await {
            debug!(segment, error = %e, "close after completed range failed");
        }
        self.note_progress();
        Ok(())
    }

    /// Classifies a source error per the transport's own taxonomy and runs
    /// the matching policy: propagate would-block, escalate a stale block to
    /// a timeout, or restart the transfer against the retry ceiling.
    async fn classify(&mut self, err: SourceError, segment: u64) -> Result<(), StreamError> {
        if self.source.continuable(&err) {
            let since = *self.blocked_since.get_or_insert_with(Instant::now);
            let waited = since.elapsed();
            if waited >= self.fetch.read_timeout {
                self.blocked_since = None;
                warn!(segment, ?waited, "source blocked past deadline");
                self.retry(segment).await?;
                return Err(StreamError::TimedOut { waited });
            }
            return Err(StreamError::WouldBlock);
        }
        if self.source.recoverable(&err) {
            warn!(segment, error = %err, "recoverable transport fault");
            return self.retry(segment).await;
        }
        warn!(segment, error = %err, "transport fault handed to source policy");
        self.source.on_error(&err).await;
        self.retry(segment).await
    }

    /// Restarts the pipeline from the producer cursor, charging one attempt
    /// against `segment`. Exhausting the budget sets the sticky fault.
    async fn retry(&mut self, segment: u64) -> Result<(), StreamError> {
        let attempts = self.table.bump_attempts(segment);
        if attempts >= self.fetch.max_attempts {
            error!(segment, attempts, "segment failed permanently");
            self.fault = Some(Fault::Exhausted { segment, attempts });
            return Err(StreamError::Fatal { segment, attempts });
        }
        debug!(segment, attempts, "restarting segment transfer");
        self.reissue_pipeline().await;
        if !self.fetch.retry_delay.is_zero() {
            tokio::time::sleep(self.fetch.retry_delay).await;
        }
        Ok(())
    }

    /// Drops every outstanding open and repositions scheduling at the
    /// producer cursor.
    async fn reissue_pipeline(&mut self) {
        self.source.cancel_all().await;
        self.pending.clear();
        self.active = None;
        self.no_more = false;
        self.lookahead = self.ring.write_offset();
        self.note_progress();
    }

    /// Resolves which segment covers an absolute offset, consulting source
    /// metadata for lengths the table has not learned yet. `None` when no
    /// enumerable segment covers the offset.
    fn resolve_segment_at(&mut self, abs: u64) -> Option<(u64, u64)> {
        loop {
            let (segment, seg_beg) = self.table.locate(abs);
            if matches!(self.table.length(segment), SegmentLength::Unknown) {
                if let Some(n) = self.source.known_length(segment) {
                    self.table.set_valid(segment, n);
                    if abs >= seg_beg + n {
                        // actually lands in a later segment
                        continue;
                    }
                }
            }
            if !self.source.contains(segment) {
                return None;
            }
            return Some((segment, seg_beg));
        }
    }

    /// Cumulative start offset of `segment`, resolvable only while every
    /// preceding length is known or advertised.
    fn resolve_offset(&mut self, segment: u64) -> Option<u64> {
        loop {
            if let Some(beg) = self.table.beg(segment) {
                return Some(beg);
            }
            let last = self.table.last_index();
            let length = match self.table.length(last) {
                SegmentLength::Known(n) | SegmentLength::Guessed(n) => n,
                SegmentLength::Unknown => match self.source.known_length(last) {
                    Some(n) => {
                        self.table.set_valid(last, n);
                        n
                    }
                    None => return None,
                },
                // an open completed without a length; the cumulative offset
                // stays unknowable until its stream ends
                SegmentLength::Unadvertised => return None,
            };
            let beg = self.table.beg(last).expect("last entry exists");
            let _ = self.table.locate(beg + length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WriteSpan;
    use crate::config::BufferConfig;
    use async_trait::async_trait;

    /// Scripted per-segment behavior for the mock transport.
    #[derive(Debug, Clone, Default)]
    struct ScriptSegment {
        data: Vec<u8>,
        /// Advertise the data length when the open completes.
        advertise: bool,
        /// Playlist-style metadata length.
        meta: Option<u64>,
        /// Activations to fail with a network fault before succeeding.
        fail_opens: u32,
        /// Reads to fail with a network fault before succeeding.
        fail_reads: u32,
        /// Reads to answer with would-block before delivering data.
        block_reads: u32,
    }

    #[derive(Debug, Clone, Copy)]
    struct MockActive {
        segment: usize,
        pos: u64,
        end: Option<u64>,
    }

    /// In-order mock transport in the style of the real sources.
    struct ScriptSource {
        segments: Vec<ScriptSegment>,
        queue: VecDeque<OpenRequest>,
        active: Option<MockActive>,
        opens: Vec<OpenRequest>,
        peak_outstanding: usize,
        chunk: usize,
    }

    impl ScriptSource {
        fn new(segments: Vec<ScriptSegment>) -> Self {
            Self {
                segments,
                queue: VecDeque::new(),
                active: None,
                opens: Vec::new(),
                peak_outstanding: 0,
                chunk: 32,
            }
        }
    }

    #[async_trait]
    impl SegmentSource for ScriptSource {
        async fn open(&mut self, request: OpenRequest) -> Result<(), SourceError> {
            self.opens.push(request);
            self.queue.push_back(request);
            let outstanding = self.queue.len() + usize::from(self.active.is_some());
            self.peak_outstanding = self.peak_outstanding.max(outstanding);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.active.is_some()
        }

        async fn activate(&mut self) -> Result<OpenInfo, SourceError> {
            let request = *self.queue.front().ok_or(SourceError::Closed)?;
            let script = &mut self.segments[request.segment as usize];
            if script.fail_opens > 0 {
                script.fail_opens -= 1;
                return Err(SourceError::Network {
                    reason: "open failed".into(),
                });
            }
            self.queue.pop_front();
            let total = script.advertise.then(|| script.data.len() as u64);
            self.active = Some(MockActive {
                segment: request.segment as usize,
                pos: request.offset,
                end: request.end,
            });
            Ok(OpenInfo {
                total_length: total,
            })
        }

        async fn read(&mut self, buf: &mut WriteSpan<'_>) -> Result<usize, SourceError> {
            let active = self.active.as_mut().ok_or(SourceError::Closed)?;
            let script = &mut self.segments[active.segment];
            if script.block_reads > 0 {
                script.block_reads -= 1;
                return Err(SourceError::WouldBlock);
            }
            if script.fail_reads > 0 {
                script.fail_reads -= 1;
                return Err(SourceError::Network {
                    reason: "connection reset".into(),
                });
            }
            let end = active
                .end
                .unwrap_or(script.data.len() as u64)
                .min(script.data.len() as u64);
            if active.pos >= end {
                return Ok(0);
            }
            let take = ((end - active.pos) as usize).min(self.chunk);
            let n = buf.fill_from(&script.data[active.pos as usize..active.pos as usize + take]);
            active.pos += n as u64;
            Ok(n)
        }

        async fn close(&mut self) -> Result<(), SourceError> {
            self.active = None;
            Ok(())
        }

        async fn cancel_all(&mut self) {
            self.active = None;
            self.queue.clear();
        }

        fn contains(&self, segment: u64) -> bool {
            (segment as usize) < self.segments.len()
        }

        fn known_length(&self, segment: u64) -> Option<u64> {
            self.segments.get(segment as usize).and_then(|s| s.meta)
        }
    }

    fn pattern(seed: u64, len: usize) -> Vec<u8> {
        (0..len).map(|i| (seed as usize + i) as u8).collect()
    }

    fn test_config(capacity: usize, depth: usize) -> SpindriftConfig {
        SpindriftConfig {
            buffer: BufferConfig {
                capacity,
                prepare_size: 1024,
            },
            fetch: FetchConfig {
                pipeline_depth: depth,
                max_attempts: 3,
                read_timeout: Duration::from_secs(5),
                retry_delay: Duration::ZERO,
            },
        }
    }

    fn advertised(data: Vec<u8>) -> ScriptSegment {
        ScriptSegment {
            data,
            advertise: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_prepare_reads_segment_sequentially() {
        let data = pattern(0, 100);
        let source = ScriptSource::new(vec![advertised(data.clone())]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);

        let readable = coordinator.prepare(100).await.unwrap();
        assert_eq!(readable, 100);
        assert_eq!(coordinator.data(100).to_vec(), data);
        assert_eq!(
            coordinator.segment_length(0),
            SegmentLength::Known(100)
        );
    }

    #[tokio::test]
    async fn test_stream_crosses_segment_boundary() {
        let source = ScriptSource::new(vec![
            advertised(pattern(0, 100)),
            advertised(pattern(7, 50)),
        ]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);

        assert_eq!(coordinator.prepare(100).await.unwrap(), 100);
        coordinator.discard(100).unwrap();
        let err = coordinator.prepare(1).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::EndOfSegment {
                length_was_guessed: false
            }
        ));

        coordinator.finish_segment().await.unwrap();
        assert_eq!(coordinator.current_segment(), 1);
        assert_eq!(coordinator.prepare(50).await.unwrap(), 50);
        assert_eq!(coordinator.data(50).to_vec(), pattern(7, 50));

        coordinator.discard(50).unwrap();
        assert!(matches!(
            coordinator.prepare(1).await.unwrap_err(),
            StreamError::EndOfSegment { .. }
        ));
        coordinator.finish_segment().await.unwrap();
        assert!(matches!(
            coordinator.prepare(1).await.unwrap_err(),
            StreamError::NoMoreSegments
        ));
    }

    #[tokio::test]
    async fn test_pipelining_never_exceeds_depth() {
        let mut segments = Vec::new();
        for i in 0..4u64 {
            let mut s = advertised(pattern(i, 40));
            s.meta = Some(40);
            segments.push(s);
        }
        let source = ScriptSource::new(segments);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);

        for i in 0..4u64 {
            let readable = coordinator.prepare(40).await.unwrap();
            assert_eq!(readable, 40);
            assert_eq!(coordinator.data(40).to_vec(), pattern(i, 40));
            coordinator.discard(40).unwrap();
            coordinator.finish_segment().await.unwrap();
        }
        assert_eq!(coordinator.source().opens.len(), 4);
        assert!(coordinator.source().peak_outstanding <= 2);
    }

    #[tokio::test]
    async fn test_unknown_length_becomes_guess_at_end_of_stream() {
        // no advertised length anywhere: the early end is taken as truth
        let seg0 = ScriptSegment {
            data: pattern(0, 4096),
            ..Default::default()
        };
        let seg1 = ScriptSegment {
            data: pattern(3, 100),
            ..Default::default()
        };
        let source = ScriptSource::new(vec![seg0, seg1]);
        let mut coordinator = SegmentCoordinator::new(&test_config(8192, 2), source);

        let readable = coordinator.prepare(8192).await.unwrap();
        assert_eq!(readable, 4096);
        assert_eq!(
            coordinator.segment_length(0),
            SegmentLength::Guessed(4096)
        );

        coordinator.discard(4096).unwrap();
        coordinator.finish_segment().await.unwrap();
        assert_eq!(coordinator.current_segment(), 1);
        assert_eq!(coordinator.position(), 4096);
        assert_eq!(coordinator.segment_position(), (1, 0));

        // the guessed boundary is where segment 1 starts
        assert_eq!(coordinator.prepare(100).await.unwrap(), 100);
        assert_eq!(coordinator.data(100).to_vec(), pattern(3, 100));
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_fatal_and_sticky() {
        let mut seg = advertised(pattern(0, 100));
        seg.fail_reads = 100;
        let source = ScriptSource::new(vec![seg]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);

        let err = coordinator.prepare(10).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Fatal {
                segment: 0,
                attempts: 3
            }
        ));
        // exactly max_attempts transfers were started
        assert_eq!(coordinator.source().opens.len(), 3);

        // the fault is sticky across every operation until cleared
        assert!(matches!(
            coordinator.prepare(10).await.unwrap_err(),
            StreamError::Fatal { .. }
        ));
        assert!(matches!(
            coordinator.seek(0, 0, None).await.unwrap_err(),
            StreamError::Fatal { .. }
        ));
        coordinator.clear_fault();
        assert!(matches!(
            coordinator.prepare(10).await.unwrap_err(),
            StreamError::Fatal { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_would_block_escalates_to_timeout() {
        let mut seg = advertised(pattern(0, 100));
        seg.block_reads = 1000;
        let source = ScriptSource::new(vec![seg]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);

        assert!(matches!(
            coordinator.prepare(10).await.unwrap_err(),
            StreamError::WouldBlock
        ));
        tokio::time::advance(Duration::from_secs(6)).await;
        let err = coordinator.prepare(10).await.unwrap_err();
        assert!(matches!(err, StreamError::TimedOut { .. }));
        assert_eq!(coordinator.attempts(0), 1);
    }

    #[tokio::test]
    async fn test_seek_within_buffered_data_keeps_pipeline() {
        let source = ScriptSource::new(vec![advertised(pattern(0, 100))]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);
        coordinator.prepare(100).await.unwrap();
        let opens_before = coordinator.source().opens.len();

        let moved = coordinator.seek(0, 20, None).await.unwrap();
        assert!(!moved);
        assert_eq!(coordinator.position(), 20);
        assert_eq!(coordinator.source().opens.len(), opens_before);
        assert_eq!(coordinator.data(80).to_vec(), pattern(20, 80));
    }

    #[tokio::test]
    async fn test_seek_into_unfetched_territory_reissues_requests() {
        let mut seg0 = advertised(pattern(0, 100));
        seg0.meta = Some(100);
        let mut seg1 = advertised(pattern(9, 50));
        seg1.meta = Some(50);
        let source = ScriptSource::new(vec![seg0, seg1]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 1), source);

        let moved = coordinator.seek(1, 10, None).await.unwrap();
        assert!(moved);
        assert_eq!(coordinator.current_segment(), 1);
        let last = *coordinator.source().opens.last().unwrap();
        assert_eq!(last.segment, 1);
        assert_eq!(last.offset, 10);
        assert_eq!(coordinator.prepare(40).await.unwrap(), 40);
        assert_eq!(coordinator.data(40).to_vec(), pattern(9 + 10, 40));
    }

    #[tokio::test]
    async fn test_peek_pulls_missing_tail_without_consuming() {
        let source = ScriptSource::new(vec![advertised(pattern(0, 100))]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);

        let view = coordinator.peek(10, 20).await.unwrap();
        assert_eq!(view.to_vec(), pattern(10, 20));
        assert_eq!(coordinator.position(), 0);

        // past the known end
        assert!(matches!(
            coordinator.peek(90, 20).await.unwrap_err(),
            StreamError::OutOfRange { .. }
        ));
    }

    #[tokio::test]
    async fn test_end_hint_bounds_scheduling() {
        let mut segments = Vec::new();
        for i in 0..3u64 {
            let mut s = advertised(pattern(i, 50));
            s.meta = Some(50);
            segments.push(s);
        }
        let source = ScriptSource::new(segments);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 3), source);

        coordinator.seek(0, 0, Some(60)).await.unwrap();
        coordinator.prepare(50).await.unwrap();
        // opens cover [0, 50) and [50, 100); nothing is scheduled past the
        // hint at 60
        assert_eq!(coordinator.source().opens.len(), 2);
    }

    #[tokio::test]
    async fn test_truncated_transfer_with_authoritative_length_retries() {
        let seg = ScriptSegment {
            data: pattern(0, 60),
            meta: Some(100),
            ..Default::default()
        };
        let source = ScriptSource::new(vec![seg]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);

        let err = coordinator.prepare(100).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Fatal {
                segment: 0,
                attempts: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_discard_to_moves_within_segment() {
        let source = ScriptSource::new(vec![advertised(pattern(0, 100))]);
        let mut coordinator = SegmentCoordinator::new(&test_config(4096, 2), source);
        coordinator.prepare(100).await.unwrap();

        coordinator.discard_to(30).unwrap();
        assert_eq!(coordinator.segment_position(), (0, 30));
        // backwards is refused
        assert!(matches!(
            coordinator.discard_to(10).unwrap_err(),
            StreamError::OutOfRange { .. }
        ));
    }
}
