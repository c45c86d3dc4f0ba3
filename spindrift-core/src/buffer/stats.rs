//! Statistics tracking for ring buffer operations

use serde::{Deserialize, Serialize};

/// Counters for buffer throughput and seek behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferStats {
    /// Total bytes committed by the producer side.
    pub bytes_committed: u64,

    /// Total bytes consumed by the reader side.
    pub bytes_consumed: u64,

    /// Seeks resolved inside the populated region or by walking holes forward.
    pub seeks_forward: u64,

    /// Seeks that walked holes backward into retained territory.
    pub seeks_backward: u64,

    /// Seeks that collapsed the window entirely.
    pub seeks_reset: u64,

    /// Largest readable backlog observed between the cursors.
    pub peak_buffered: u64,
}

impl BufferStats {
    /// Records a committed write and updates the backlog peak.
    pub(crate) fn record_commit(&mut self, n: u64, buffered: u64) {
        self.bytes_committed += n;
        self.peak_buffered = self.peak_buffered.max(buffered);
    }

    /// Total seeks of any kind.
    pub fn total_seeks(&self) -> u64 {
        self.seeks_forward + self.seeks_backward + self.seeks_reset
    }

    /// Peak backlog as a percentage of capacity (0-100).
    pub fn peak_utilization_percent(&self, capacity: u64) -> f64 {
        if capacity == 0 {
            return 0.0;
        }
        (self.peak_buffered as f64 / capacity as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_utilization() {
        let mut stats = BufferStats::default();
        stats.record_commit(512, 512);
        stats.record_commit(512, 256);
        assert_eq!(stats.bytes_committed, 1024);
        assert_eq!(stats.peak_buffered, 512);
        assert_eq!(stats.peak_utilization_percent(1024), 50.0);
    }

    #[test]
    fn test_total_seeks() {
        let stats = BufferStats {
            seeks_forward: 2,
            seeks_backward: 1,
            seeks_reset: 1,
            ..Default::default()
        };
        assert_eq!(stats.total_seeks(), 4);
    }
}
