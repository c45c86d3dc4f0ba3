//! HTTP byte-range transport for segment acquisition.
//!
//! Each segment is a URL; transfers are issued as `Range: bytes=` requests
//! and spawned immediately, so connection setup and response latency of the
//! next segment overlap with draining the current one. The authoritative
//! length comes from Content-Range (partial responses) or Content-Length
//! (full responses); origins that advertise neither end up on the
//! guessed-length path of the coordinator.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Response, StatusCode, header};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::source::{OpenInfo, OpenRequest, SegmentSource, SourceError};
use crate::buffer::WriteSpan;

/// One fetchable segment: its URL and, when a playlist or manifest
/// advertises it, its byte length.
#[derive(Debug, Clone)]
pub struct HttpSegment {
    /// Where the segment's bytes live.
    pub url: Url,
    /// Metadata length, if the enclosing playlist declares one.
    pub length: Option<u64>,
}

impl HttpSegment {
    /// Creates a segment with no advertised length.
    pub fn new(url: Url) -> Self {
        Self { url, length: None }
    }

    /// Creates a segment with a playlist-advertised length.
    pub fn with_length(url: Url, length: u64) -> Self {
        Self {
            url,
            length: Some(length),
        }
    }
}

struct QueuedOpen {
    segment: u64,
    offset: u64,
    handle: JoinHandle<Result<Response, reqwest::Error>>,
}

struct ActiveStream {
    body: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    leftover: Bytes,
}

/// [`SegmentSource`] over plain HTTP byte ranges.
pub struct HttpSegmentSource {
    client: Client,
    segments: Vec<HttpSegment>,
    queue: VecDeque<QueuedOpen>,
    active: Option<ActiveStream>,
    /// Pause applied after a not-found before the retry machinery runs,
    /// for origins that are still publishing the live edge.
    not_found_backoff: Duration,
}

impl HttpSegmentSource {
    /// Creates a source over an ordered list of segment URLs.
    pub fn new(client: Client, segments: Vec<HttpSegment>) -> Self {
        Self {
            client,
            segments,
            queue: VecDeque::new(),
            active: None,
            not_found_backoff: Duration::from_millis(500),
        }
    }

    /// Overrides the pause applied after a not-found response.
    pub fn with_not_found_backoff(mut self, backoff: Duration) -> Self {
        self.not_found_backoff = backoff;
        self
    }
}

/// Formats the Range header for a relative byte range, or `None` when the
/// request covers the whole resource.
fn range_header(offset: u64, end: Option<u64>) -> Option<String> {
    match end {
        Some(end) => Some(format!("bytes={}-{}", offset, end - 1)),
        None if offset > 0 => Some(format!("bytes={offset}-")),
        None => None,
    }
}

/// Extracts the resource total from a `Content-Range: bytes a-b/total`
/// header value. A `*` total means the origin does not know it.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// Authoritative segment length for a response to a transfer starting at
/// `offset`.
fn total_from_response(response: &Response, offset: u64) -> Option<u64> {
    if let Some(value) = response.headers().get(header::CONTENT_RANGE) {
        return content_range_total(value.to_str().ok()?);
    }
    // a plain 200 body covers the remainder from `offset`
    response.content_length().map(|n| offset + n)
}

#[async_trait]
impl SegmentSource for HttpSegmentSource {
    async fn open(&mut self, request: OpenRequest) -> Result<(), SourceError> {
        let segment = self
            .segments
            .get(request.segment as usize)
            .ok_or(SourceError::NotFound {
                segment: request.segment,
            })?;
        let mut builder = self.client.get(segment.url.clone());
        if let Some(range) = range_header(request.offset, request.end) {
            builder = builder.header(header::RANGE, range);
        }
        debug!(
            segment = request.segment,
            offset = request.offset,
            end = ?request.end,
            "issuing range request"
        );
        let handle = tokio::spawn(builder.send());
        self.queue.push_back(QueuedOpen {
            segment: request.segment,
            offset: request.offset,
            handle,
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.active.is_some()
    }

    async fn activate(&mut self) -> Result<OpenInfo, SourceError> {
        let open = self.queue.pop_front().ok_or(SourceError::Closed)?;
        let response = open
            .handle
            .await
            .map_err(|e| SourceError::Network {
                reason: format!("transfer task failed: {e}"),
            })?
            .map_err(|e| SourceError::Network {
                reason: e.to_string(),
            })?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(SourceError::NotFound {
                    segment: open.segment,
                });
            }
            status if !status.is_success() => {
                return Err(SourceError::Rejected {
                    reason: format!("status {status}"),
                });
            }
            _ => {}
        }
        let total_length = total_from_response(&response, open.offset);
        self.active = Some(ActiveStream {
            body: response.bytes_stream().boxed(),
            leftover: Bytes::new(),
        });
        Ok(OpenInfo { total_length })
    }

    async fn read(&mut self, buf: &mut WriteSpan<'_>) -> Result<usize, SourceError> {
        let active = self.active.as_mut().ok_or(SourceError::Closed)?;
        if active.leftover.is_empty() {
            match active.body.next().await {
                Some(Ok(bytes)) => active.leftover = bytes,
                Some(Err(e)) => {
                    return Err(SourceError::Network {
                        reason: e.to_string(),
                    });
                }
                None => return Ok(0),
            }
        }
        let n = buf.fill_from(&active.leftover);
        active.leftover.advance(n);
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.active = None;
        Ok(())
    }

    async fn cancel_all(&mut self) {
        for open in self.queue.drain(..) {
            open.handle.abort();
        }
        self.active = None;
    }

    fn contains(&self, segment: u64) -> bool {
        (segment as usize) < self.segments.len()
    }

    fn known_length(&self, segment: u64) -> Option<u64> {
        self.segments.get(segment as usize).and_then(|s| s.length)
    }

    async fn on_error(&mut self, err: &SourceError) {
        if let SourceError::NotFound { segment } = err {
            warn!(segment, "segment not found, pausing before retry");
            if !self.not_found_backoff.is_zero() {
                tokio::time::sleep(self.not_found_backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header_formatting() {
        assert_eq!(range_header(0, Some(100)), Some("bytes=0-99".into()));
        assert_eq!(range_header(50, Some(100)), Some("bytes=50-99".into()));
        assert_eq!(range_header(50, None), Some("bytes=50-".into()));
        assert_eq!(range_header(0, None), None);
    }

    #[test]
    fn test_content_range_total_parsing() {
        assert_eq!(content_range_total("bytes 0-99/5000"), Some(5000));
        assert_eq!(content_range_total("bytes 100-199/200"), Some(200));
        assert_eq!(content_range_total("bytes 0-99/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    #[test]
    fn test_contains_and_known_length() {
        let url = Url::parse("http://example.com/seg0.ts").unwrap();
        let source = HttpSegmentSource::new(
            Client::new(),
            vec![
                HttpSegment::with_length(url.clone(), 4096),
                HttpSegment::new(url),
            ],
        );
        assert!(source.contains(0));
        assert!(source.contains(1));
        assert!(!source.contains(2));
        assert_eq!(source.known_length(0), Some(4096));
        assert_eq!(source.known_length(1), None);
    }
}
