//! Deterministic scripted transport for exercising the coordinator.
//!
//! Segments are byte vectors with scripted misbehavior: opens that fail,
//! reads that fault or block, lengths withheld from the open handshake.
//! Chunk sizes vary with a seeded generator so transfer interleavings are
//! irregular but reproducible. Every transport call is appended to a shared
//! event log that tests can keep a handle to after the source moves into
//! the coordinator.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use super::source::{OpenInfo, OpenRequest, SegmentSource, SourceError};
use crate::buffer::WriteSpan;

/// Scripted behavior of one simulated segment.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSegment {
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Advertise the payload length when the open completes.
    pub advertise_length: bool,
    /// Playlist-style metadata length, available before any open.
    pub meta_length: Option<u64>,
    /// Activations to fail with a network fault before succeeding.
    pub fail_opens: u32,
    /// Reads to fail with a network fault before succeeding.
    pub fail_reads: u32,
    /// Reads to answer with would-block before delivering data.
    pub block_reads: u32,
}

impl SimulatedSegment {
    /// A well-behaved segment that advertises its length at open.
    pub fn advertised(data: Vec<u8>) -> Self {
        Self {
            data,
            advertise_length: true,
            ..Default::default()
        }
    }

    /// A segment that never advertises a length; only its end-of-stream
    /// reveals how long it was.
    pub fn unadvertised(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }
}

/// Observable transport events, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A transfer was initiated.
    Opened {
        /// Segment index.
        segment: u64,
        /// Segment-relative start offset.
        offset: u64,
        /// Segment-relative exclusive end, when bounded.
        end: Option<u64>,
    },
    /// A transfer completed its open handshake.
    Activated {
        /// Segment index.
        segment: u64,
    },
    /// The active transfer was closed cleanly.
    Closed {
        /// Segment index.
        segment: u64,
    },
    /// Everything outstanding was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct Active {
    segment: usize,
    pos: u64,
    end: Option<u64>,
}

/// [`SegmentSource`] with fully scripted, reproducible behavior.
pub struct SimulatedSource {
    segments: Vec<SimulatedSegment>,
    queue: VecDeque<OpenRequest>,
    active: Option<Active>,
    rng: ChaCha8Rng,
    max_chunk: usize,
    latency: Duration,
    events: Arc<Mutex<Vec<SourceEvent>>>,
}

impl SimulatedSource {
    /// Creates a source over scripted segments, deterministic for a seed.
    pub fn new(segments: Vec<SimulatedSegment>, seed: u64) -> Self {
        Self {
            segments,
            queue: VecDeque::new(),
            active: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
            max_chunk: 1024,
            latency: Duration::ZERO,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Caps how many bytes one read may deliver.
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Adds a fixed delay to every read.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Handle to the shared event log; clones stay valid after the source
    /// moves into a coordinator.
    pub fn events(&self) -> Arc<Mutex<Vec<SourceEvent>>> {
        Arc::clone(&self.events)
    }

    /// Peak number of transfers that were outstanding at once.
    pub fn peak_outstanding(&self) -> usize {
        let log = self.events.lock();
        let mut outstanding = 0usize;
        let mut peak = 0usize;
        for event in log.iter() {
            match event {
                SourceEvent::Opened { .. } => {
                    outstanding += 1;
                    peak = peak.max(outstanding);
                }
                SourceEvent::Closed { .. } => outstanding = outstanding.saturating_sub(1),
                SourceEvent::Cancelled => outstanding = 0,
                SourceEvent::Activated { .. } => {}
            }
        }
        peak
    }
}

#[async_trait]
impl SegmentSource for SimulatedSource {
    async fn open(&mut self, request: OpenRequest) -> Result<(), SourceError> {
        if request.segment as usize >= self.segments.len() {
            return Err(SourceError::NotFound {
                segment: request.segment,
            });
        }
        self.events.lock().push(SourceEvent::Opened {
            segment: request.segment,
            offset: request.offset,
            end: request.end,
        });
        self.queue.push_back(request);
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
                reason: "simulated open failure".into(),
            });
        }
        self.queue.pop_front();
        let total_length = script.advertise_length.then(|| script.data.len() as u64);
        self.active = Some(Active {
            segment: request.segment as usize,
            pos: request.offset,
            end: request.end,
        });
        self.events.lock().push(SourceEvent::Activated {
            segment: request.segment,
        });
        Ok(OpenInfo { total_length })
    }

    async fn read(&mut self, buf: &mut WriteSpan<'_>) -> Result<usize, SourceError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let active = self.active.as_mut().ok_or(SourceError::Closed)?;
        let script = &mut self.segments[active.segment];
        if script.block_reads > 0 {
            script.block_reads -= 1;
            return Err(SourceError::WouldBlock);
        }
        if script.fail_reads > 0 {
            script.fail_reads -= 1;
            return Err(SourceError::Network {
                reason: "simulated connection reset".into(),
            });
        }
        let end = active
            .end
            .unwrap_or(script.data.len() as u64)
            .min(script.data.len() as u64);
        if active.pos >= end {
            return Ok(0);
        }
        let budget = ((end - active.pos) as usize).min(self.max_chunk);
        let take = self.rng.random_range(1..=budget);
        let n = buf.fill_from(&script.data[active.pos as usize..active.pos as usize + take]);
        active.pos += n as u64;
        trace!(segment = active.segment, n, "simulated read");
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if let Some(active) = self.active.take() {
            self.events.lock().push(SourceEvent::Closed {
                segment: active.segment as u64,
            });
        }
        Ok(())
    }

    async fn cancel_all(&mut self) {
        self.queue.clear();
        self.active = None;
        self.events.lock().push(SourceEvent::Cancelled);
    }

    fn contains(&self, segment: u64) -> bool {
        (segment as usize) < self.segments.len()
    }

    fn known_length(&self, segment: u64) -> Option<u64> {
        self.segments
            .get(segment as usize)
            .and_then(|s| s.meta_length)
    }
}
