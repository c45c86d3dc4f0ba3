//! Transport boundary for segment acquisition.
//!
//! The coordinator never talks to a network directly; it drives an
//! implementation of [`SegmentSource`] through open/activate/read/close.
//! Implementations may start a transfer the moment `open` is called and let
//! it proceed while earlier transfers are still being drained, which is what
//! hides per-segment setup latency. Opens complete strictly in the order
//! they were issued.

use async_trait::async_trait;
use thiserror::Error;

use crate::buffer::WriteSpan;

/// A request to transfer part of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    /// Index of the segment to open.
    pub segment: u64,
    /// First byte to transfer, relative to the segment start.
    pub offset: u64,
    /// One past the last byte to transfer, relative to the segment start.
    /// `None` requests everything the segment has past `offset`.
    pub end: Option<u64>,
}

/// What the transport learned when an open completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenInfo {
    /// Authoritative total length of the opened segment when the transport
    /// knows it; for HTTP that is Content-Length or the Content-Range total.
    pub total_length: Option<u64>,
}

/// Error types for transport operations.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No data available right now; calling again later may succeed
    /// without losing progress.
    #[error("no data available yet")]
    WouldBlock,

    /// The requested segment does not exist on the transport.
    #[error("segment {segment} not found")]
    NotFound {
        /// Index of the missing segment.
        segment: u64,
    },

    /// A transient network fault; retrying the transfer from scratch may
    /// succeed.
    #[error("network fault: {reason}")]
    Network {
        /// Transport-specific description of the fault.
        reason: String,
    },

    /// Transport-level I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote end refused the request (bad status, protocol violation).
    #[error("request rejected: {reason}")]
    Rejected {
        /// Transport-specific description of the refusal.
        reason: String,
    },

    /// The source was closed or cancelled underneath the caller.
    #[error("source closed")]
    Closed,
}

/// A transport capable of delivering segment byte ranges.
///
/// One transfer is *active* for reading at a time; further opens queue up
/// behind it and complete in issue order. The coordinator closes transfers
/// in the same order it opened them.
#[async_trait]
pub trait SegmentSource: Send {
    /// Initiates a transfer for `request`. Implementations should start the
    /// transfer immediately rather than waiting for activation, so queued
    /// transfers overlap with the drain of the active one.
    async fn open(&mut self, request: OpenRequest) -> Result<(), SourceError>;

    /// Whether a transfer is currently active for reading.
    fn is_open(&self) -> bool;

    /// Waits for the eldest outstanding open to complete and makes it the
    /// active transfer. After a continuable error the open must remain
    /// queued; after anything else the caller cancels or reissues.
    async fn activate(&mut self) -> Result<OpenInfo, SourceError>;

    /// Reads bytes of the active transfer into `buf`, returning how many
    /// were written. `Ok(0)` means the opened range is exhausted.
    async fn read(&mut self, buf: &mut WriteSpan<'_>) -> Result<usize, SourceError>;

    /// Closes the active transfer.
    async fn close(&mut self) -> Result<(), SourceError>;

    /// Cancels the active transfer and every queued open. In-flight work
    /// must not deliver bytes afterwards.
    async fn cancel_all(&mut self);

    /// Whether the transport can enumerate `segment` at all.
    fn contains(&self, segment: u64) -> bool;

    /// Authoritative segment length from out-of-band metadata (playlist,
    /// manifest), if any. Consulted before a transfer is opened.
    fn known_length(&self, segment: u64) -> Option<u64>;

    /// Whether `err` means "try again later, no progress lost".
    fn continuable(&self, err: &SourceError) -> bool {
        matches!(err, SourceError::WouldBlock)
    }

    /// Whether `err` is transient enough that restarting the transfer is
    /// worthwhile.
    fn recoverable(&self, err: &SourceError) -> bool {
        matches!(err, SourceError::Network { .. } | SourceError::Io(_))
    }

    /// Policy hook for faults that are neither continuable nor recoverable.
    /// Runs before the shared retry machinery; a transport may pause here,
    /// e.g. to back off after a not-found from an origin that is still
    /// publishing.
    async fn on_error(&mut self, _err: &SourceError) {}
}
