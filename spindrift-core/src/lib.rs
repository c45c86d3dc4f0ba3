//! Spindrift Core - buffering core of a segmented-media streaming client
//!
//! This crate absorbs network-delivered byte ranges of a media stream that
//! arrives in discrete, independently-fetched segments and exposes them to a
//! container demultiplexer as one random-accessible byte stream, while the
//! transport keeps fetching ahead of the consumer. The two central pieces
//! are the sparse [`buffer::RingBuffer`] (fixed-capacity window with hole
//! bookkeeping and arbitrary seeks) and the [`segment::SegmentCoordinator`]
//! (pipelined segment acquisition with retry, timeout and length-guessing
//! policy) driving any [`segment::SegmentSource`] transport.

pub mod buffer;
pub mod config;
pub mod segment;
pub mod stream;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use buffer::{BufferError, BufferStats, Hole, ReadSpan, RingBuffer, WriteSpan};
pub use config::SpindriftConfig;
pub use segment::{
    HttpSegment, HttpSegmentSource, OpenInfo, OpenRequest, SegmentCoordinator, SegmentLength,
    SegmentSource, SourceError, StreamError,
};
pub use stream::StreamReader;

/// Core errors that can bubble up from any Spindrift subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SpindriftError {
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpindriftError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SpindriftError::Stream(e) => match e {
                StreamError::WouldBlock | StreamError::NoBufferSpace => {
                    "Buffering, try again shortly".to_string()
                }
                StreamError::TimedOut { .. } => "The stream stopped responding".to_string(),
                StreamError::Fatal { segment, .. } => {
                    format!("Part {segment} of the stream could not be fetched")
                }
                StreamError::NoMoreSegments => "End of stream".to_string(),
                _ => "Streaming error occurred".to_string(),
            },
            SpindriftError::Buffer(_) => "Buffering error occurred".to_string(),
            SpindriftError::Source(_) => "Network error occurred".to_string(),
            SpindriftError::Configuration { reason } => {
                format!("Configuration error: {reason}")
            }
            SpindriftError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Whether retrying the same operation later can succeed without any
    /// intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SpindriftError::Stream(StreamError::WouldBlock)
                | SpindriftError::Stream(StreamError::NoBufferSpace)
                | SpindriftError::Stream(StreamError::TimedOut { .. })
                | SpindriftError::Source(SourceError::WouldBlock)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpindriftError>;
