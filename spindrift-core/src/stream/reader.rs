//! Flat byte-stream adaptor over the segment coordinator.

use std::io::SeekFrom;

use tracing::trace;

use crate::segment::coordinator::{SegmentCoordinator, StreamError};
use crate::segment::source::SegmentSource;

/// Presents the coordinator's segmented window as a single random-accessible
/// byte stream.
///
/// Segment boundaries are crossed transparently on read; positions are flat
/// stream offsets. "Not enough data yet" surfaces as
/// [`StreamError::WouldBlock`], a retry signal, never a hard failure.
/// Not for concurrent use; the session layer serializes access.
pub struct StreamReader<S: SegmentSource> {
    coordinator: SegmentCoordinator<S>,
}

impl<S: SegmentSource> StreamReader<S> {
    /// Wraps a coordinator.
    pub fn new(coordinator: SegmentCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// The underlying coordinator.
    pub fn coordinator(&self) -> &SegmentCoordinator<S> {
        &self.coordinator
    }

    /// Mutable access to the underlying coordinator, e.g. for segment-aware
    /// seeks or header peeks.
    pub fn coordinator_mut(&mut self) -> &mut SegmentCoordinator<S> {
        &mut self.coordinator
    }

    /// Unwraps into the coordinator.
    pub fn into_inner(self) -> SegmentCoordinator<S> {
        self.coordinator
    }

    /// Current flat stream position.
    pub fn position(&self) -> u64 {
        self.coordinator.position()
    }

    /// Pulls up to `out.len()` bytes at the current position, advancing it.
    ///
    /// Returns `Ok(0)` at the clean end of the stream.
    ///
    /// # Errors
    ///
    /// - `StreamError::WouldBlock` - nothing readable yet; retry later
    /// - anything else the coordinator's pull loop surfaces
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize, StreamError> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            if self.coordinator.readable() == 0 {
                match self.coordinator.prepare(out.len()).await {
                    Ok(0) => return Err(StreamError::WouldBlock),
                    Ok(_) => {}
                    Err(StreamError::EndOfSegment { .. }) => {
                        self.coordinator.finish_segment().await?;
                        continue;
                    }
                    Err(StreamError::NoMoreSegments) => return Ok(0),
                    Err(e) => return Err(e),
                }
            }
            let span = self.coordinator.data(out.len());
            let n = span.copy_to(out);
            drop(span);
            self.coordinator.discard(n as u64)?;
            return Ok(n);
        }
    }

    /// Moves the stream position.
    ///
    /// `SeekFrom::End` requires the source to advertise every segment
    /// length out of band.
    ///
    /// # Errors
    ///
    /// - `StreamError::OutOfRange` - the target cannot be mapped to a
    ///   segment, or the arithmetic leaves the addressable range
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        let abs = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => self
                .position()
                .checked_add_signed(delta)
                .ok_or(StreamError::OutOfRange { offset: 0 })?,
            SeekFrom::End(delta) => {
                let total = self
                    .coordinator
                    .total_length()
                    .ok_or(StreamError::OutOfRange { offset: 0 })?;
                total
                    .checked_add_signed(delta)
                    .ok_or(StreamError::OutOfRange { offset: total })?
            }
        };
        let (segment, offset) = self
            .coordinator
            .locate_absolute(abs)
            .ok_or(StreamError::OutOfRange { offset: abs })?;
        self.coordinator.seek(segment, offset, None).await?;
        trace!(abs, segment, offset, "stream seek");
        Ok(abs)
    }
}
