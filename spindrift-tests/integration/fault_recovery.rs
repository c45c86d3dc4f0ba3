//! Retry, timeout and cancellation policy against a misbehaving transport.

use spindrift_core::config::SpindriftConfig;
use spindrift_core::segment::{
    SegmentCoordinator, SimulatedSegment, SimulatedSource, SourceEvent,
};
use spindrift_core::{StreamError, StreamReader};

fn pattern(seed: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| (seed as usize + i * 3) as u8).collect()
}

#[tokio::test]
async fn test_transient_faults_recover_within_budget() {
    let mut seg = SimulatedSegment::advertised(pattern(1, 2000));
    seg.fail_reads = 2; // two resets, then clean
    let source = SimulatedSource::new(vec![seg], 17);
    let mut coordinator =
        SegmentCoordinator::new(&SpindriftConfig::deterministic_testing(), source);

    let readable = coordinator.prepare(2000).await.unwrap();
    assert_eq!(readable, 2000);
    assert_eq!(coordinator.data(2000).to_vec(), pattern(1, 2000));
    assert_eq!(coordinator.attempts(0), 2);
}

#[tokio::test]
async fn test_exhausted_budget_is_fatal_after_exact_attempts() {
    let mut seg = SimulatedSegment::advertised(pattern(2, 500));
    seg.fail_reads = u32::MAX; // never recovers
    let source = SimulatedSource::new(vec![seg], 23);
    let events = source.events();
    let mut coordinator =
        SegmentCoordinator::new(&SpindriftConfig::deterministic_testing(), source);

    let err = coordinator.prepare(10).await.unwrap_err();
    assert!(matches!(
        err,
        StreamError::Fatal {
            segment: 0,
            attempts: 3
        }
    ));
    let opened = events
        .lock()
        .iter()
        .filter(|e| matches!(e, SourceEvent::Opened { .. }))
        .count();
    assert_eq!(opened, 3);
}

#[tokio::test]
async fn test_open_failures_count_against_the_same_budget() {
    let mut seg = SimulatedSegment::advertised(pattern(3, 500));
    seg.fail_opens = 2;
    let source = SimulatedSource::new(vec![seg], 29);
    let mut coordinator =
        SegmentCoordinator::new(&SpindriftConfig::deterministic_testing(), source);

    let readable = coordinator.prepare(500).await.unwrap();
    assert_eq!(readable, 500);
    assert_eq!(coordinator.attempts(0), 2);
}

#[tokio::test]
async fn test_pipelining_stays_within_depth_across_stream() {
    let mut segments = Vec::new();
    for i in 0..5u64 {
        let mut seg = SimulatedSegment::advertised(pattern(i, 700));
        seg.meta_length = Some(700);
        segments.push(seg);
    }
    let source = SimulatedSource::new(segments, 31).with_max_chunk(97);
    let events = source.events();
    let coordinator =
        SegmentCoordinator::new(&SpindriftConfig::deterministic_testing(), source);
    let mut reader = StreamReader::new(coordinator);

    let mut total = 0usize;
    let mut buf = [0u8; 256];
    loop {
        let n = reader.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(total, 5 * 700);

    // the request window never exceeded the configured depth
    let log = events.lock();
    let mut outstanding = 0usize;
    let mut peak = 0usize;
    for event in log.iter() {
        match event {
            SourceEvent::Opened { .. } => {
                outstanding += 1;
                peak = peak.max(outstanding);
            }
            SourceEvent::Closed { .. } => outstanding -= 1,
            SourceEvent::Cancelled => outstanding = 0,
            SourceEvent::Activated { .. } => {}
        }
    }
    assert!(peak <= 2, "peak outstanding opens was {peak}");
}

#[tokio::test]
async fn test_cancel_is_sticky_and_observable() {
    let seg = SimulatedSegment::advertised(pattern(4, 1000));
    let source = SimulatedSource::new(vec![seg], 37);
    let events = source.events();
    let mut coordinator =
        SegmentCoordinator::new(&SpindriftConfig::deterministic_testing(), source);

    coordinator.prepare(100).await.unwrap();
    coordinator.cancel().await;

    assert!(matches!(
        coordinator.prepare(100).await.unwrap_err(),
        StreamError::Aborted
    ));
    assert!(matches!(
        coordinator.seek(0, 0, None).await.unwrap_err(),
        StreamError::Aborted
    ));
    assert!(matches!(events.lock().last(), Some(SourceEvent::Cancelled)));

    // explicit clearing makes the session usable again
    coordinator.clear_fault();
    assert!(coordinator.prepare(100).await.is_ok());
}
