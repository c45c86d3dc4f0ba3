//! End-to-end streaming across segment boundaries with a scripted transport.

use spindrift_core::config::{BufferConfig, FetchConfig, SpindriftConfig};
use spindrift_core::segment::{SegmentCoordinator, SimulatedSegment, SimulatedSource};
use spindrift_core::{SegmentLength, StreamReader};
use std::time::Duration;

fn pattern(seed: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| (seed as usize + i * 7) as u8).collect()
}

fn config_with_capacity(capacity: usize) -> SpindriftConfig {
    SpindriftConfig {
        buffer: BufferConfig {
            capacity,
            prepare_size: 1024,
        },
        fetch: FetchConfig {
            pipeline_depth: 2,
            max_attempts: 3,
            read_timeout: Duration::from_secs(5),
            retry_delay: Duration::ZERO,
        },
    }
}

#[tokio::test]
async fn test_streams_mixed_segments_end_to_end() -> anyhow::Result<()> {
    let seg0 = pattern(1, 1000);
    let seg1 = pattern(2, 4096);
    let seg2 = pattern(3, 500);
    let mut expected = seg0.clone();
    expected.extend_from_slice(&seg1);
    expected.extend_from_slice(&seg2);

    // the middle segment never advertises its length; only its end of
    // stream reveals it
    let source = SimulatedSource::new(
        vec![
            SimulatedSegment::advertised(seg0),
            SimulatedSegment::unadvertised(seg1),
            SimulatedSegment::advertised(seg2),
        ],
        42,
    )
    .with_max_chunk(333);

    let coordinator = SegmentCoordinator::new(&SpindriftConfig::deterministic_testing(), source);
    let mut reader = StreamReader::new(coordinator);

    let mut collected = Vec::new();
    let mut buf = [0u8; 777];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    assert_eq!(collected, expected);
    assert_eq!(reader.position(), expected.len() as u64);
    assert_eq!(
        reader.coordinator().segment_length(1),
        SegmentLength::Guessed(4096)
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_length_finalizes_and_advances() {
    // 8 KiB window, segment 0 delivers 4096 bytes and ends with no length
    // header; the guess becomes the boundary of segment 1
    let source = SimulatedSource::new(
        vec![
            SimulatedSegment::unadvertised(pattern(5, 4096)),
            SimulatedSegment::advertised(pattern(6, 256)),
        ],
        7,
    );
    let mut coordinator = SegmentCoordinator::new(&config_with_capacity(8192), source);

    let readable = coordinator.prepare(8192).await.unwrap();
    assert_eq!(readable, 4096);
    assert_eq!(coordinator.segment_length(0), SegmentLength::Guessed(4096));

    coordinator.discard(4096).unwrap();
    coordinator.finish_segment().await.unwrap();
    assert_eq!(coordinator.segment_position(), (1, 0));
    assert_eq!(coordinator.position(), 4096);

    assert_eq!(coordinator.prepare(256).await.unwrap(), 256);
    assert_eq!(coordinator.data(256).to_vec(), pattern(6, 256));
}

#[tokio::test]
async fn test_seek_ahead_then_back_refetches_skipped_range() {
    let body = pattern(9, 8000);
    let mut seg = SimulatedSegment::advertised(body.clone());
    seg.meta_length = Some(8000);
    let source = SimulatedSource::new(vec![seg], 11).with_max_chunk(64);
    let mut coordinator = SegmentCoordinator::new(&config_with_capacity(16 * 1024), source);

    // fetch a head, jump past unfetched territory, fetch there too
    coordinator.prepare(100).await.unwrap();
    assert!(coordinator.seek(0, 3000, None).await.unwrap());
    coordinator.prepare(100).await.unwrap();

    // back to the start: free for the downloaded head, but the skipped
    // middle is a hole, not stale-readable
    assert!(coordinator.seek(0, 0, None).await.unwrap());
    assert!(!coordinator.buffer().is_resident(1000, 100));

    let readable = coordinator.prepare(3000).await.unwrap();
    assert!(readable >= 3000);
    assert_eq!(coordinator.data(3000).to_vec(), body[..3000]);

    // the refetched middle matches the origin bytes exactly
    let view = coordinator.peek(2500, 600).await.unwrap();
    assert_eq!(view.to_vec(), body[2500..3100]);
}

#[tokio::test]
async fn test_header_probe_with_end_hint() {
    let mut segments = Vec::new();
    for i in 0..4u64 {
        let mut seg = SimulatedSegment::advertised(pattern(i, 512));
        seg.meta_length = Some(512);
        segments.push(seg);
    }
    let source = SimulatedSource::new(segments, 3);
    let events = source.events();
    let mut coordinator =
        SegmentCoordinator::new(&SpindriftConfig::deterministic_testing(), source);

    // probe only the first 600 bytes of the stream
    coordinator.seek(0, 0, Some(600)).await.unwrap();
    coordinator.prepare(512).await.unwrap();

    // transfers stop at the hint: segments 0 and 1 are touched, 2 and 3
    // never are
    let log = events.lock();
    let opened: Vec<u64> = log
        .iter()
        .filter_map(|e| match e {
            spindrift_core::segment::SourceEvent::Opened { segment, .. } => Some(*segment),
            _ => None,
        })
        .collect();
    assert!(opened.iter().all(|&s| s <= 1));
    assert!(!opened.is_empty());
}
