//! Window behavior of the sparse ring buffer under demuxer-like access.

use proptest::prelude::*;
use spindrift_core::buffer::RingBuffer;

fn pattern(offset: u64, len: usize) -> Vec<u8> {
    (0..len).map(|i| (offset as usize + i) as u8).collect()
}

/// Streams far more data than the window holds through the buffer in odd
/// chunk sizes, verifying every byte and the window invariants along the way.
#[test]
fn test_sliding_window_streams_past_capacity() {
    let mut ring = RingBuffer::new(8192);
    let total: u64 = 100_000;
    let mut produced: u64 = 0;
    let mut consumed: u64 = 0;
    let mut chunk = 1usize;

    while consumed < total {
        // produce in growing, non-aligned chunks
        if produced < total {
            let want = chunk.min((total - produced) as usize);
            let mut span = ring.prepare(want);
            let data = pattern(produced, span.len());
            let n = span.fill_from(&data);
            drop(span);
            assert!(ring.commit(n));
            produced += n as u64;
            chunk = (chunk % 977) + 13;
        }

        // consume roughly half of what is buffered
        let take = (ring.buffered() / 2).max(1).min(ring.buffered()) as usize;
        if take > 0 {
            let view = ring.data(take);
            assert_eq!(view.to_vec(), pattern(consumed, view.len()));
            let n = view.len();
            drop(view);
            assert!(ring.consume(n));
            consumed += n as u64;
        }

        assert!(ring.read_offset() <= ring.write_offset());
        assert!(ring.write_offset() - ring.read_offset() <= ring.capacity());
        assert!(ring.data_end() - ring.data_beg() <= ring.capacity());
    }
    assert_eq!(consumed, total);
}

/// A consumer that jumps ahead, reads, and comes back sees the skipped
/// range as missing until it is explicitly refilled.
#[test]
fn test_skipped_range_is_not_stale_readable() {
    let mut ring = RingBuffer::new(16 * 1024);
    let mut span = ring.prepare(1000);
    let n = span.fill_from(&pattern(0, 1000));
    drop(span);
    ring.commit(n);

    assert!(ring.seek(5000));
    let mut span = ring.prepare(1000);
    let n = span.fill_from(&pattern(5000, 1000));
    drop(span);
    ring.commit(n);

    assert!(ring.seek(0));
    // the never-fetched middle must read as missing, both sides as data
    assert!(ring.read_at(0, 1000).is_ok());
    assert!(ring.read_at(5000, 1000).is_ok());
    assert!(ring.read_at(1000, 4000).is_err());

    // refill lands exactly in the gap and makes it readable
    let mut filled = 1000u64;
    while filled < 5000 {
        let mut span = ring.prepare(4096);
        let data = pattern(filled, span.len());
        let n = span.fill_from(&data);
        drop(span);
        assert!(ring.commit(n));
        filled += n as u64;
    }
    assert_eq!(ring.read_at(1000, 4000).unwrap().to_vec(), pattern(1000, 4000));
}

proptest! {
    /// Whatever offset the window is parked at, committed bytes read back
    /// identically through the random-access path.
    #[test]
    fn prop_round_trip_at_arbitrary_offsets(
        origin in 0u64..1_000_000,
        len in 1usize..=4096,
    ) {
        let mut ring = RingBuffer::new(4096);
        ring.reset_to(origin);
        let mut span = ring.prepare(len);
        let data = pattern(origin, len);
        let n = span.fill_from(&data);
        drop(span);
        prop_assert!(ring.commit(n));
        prop_assert_eq!(n, len);
        prop_assert_eq!(ring.read_at(origin, len).unwrap().to_vec(), data);
    }
}
