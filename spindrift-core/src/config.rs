//! Centralized configuration for Spindrift.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Central configuration for a buffering session.
///
/// Groups related settings into logical sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpindriftConfig {
    pub buffer: BufferConfig,
    pub fetch: FetchConfig,
}

/// Window sizing for the sparse ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Ring capacity in bytes; the retained window never exceeds this.
    pub capacity: usize,
    /// Upper bound on bytes moved per source read.
    pub prepare_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 8 * 1024 * 1024,  // 8 MiB
            prepare_size: 64 * 1024,    // 64 KiB
        }
    }
}

/// Transfer scheduling, retry and timeout policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum segment opens outstanding at once (pipelining window).
    pub pipeline_depth: usize,
    /// Transfer attempts per segment before the fault becomes permanent.
    pub max_attempts: u32,
    /// How long the source may report would-block without progress before
    /// the wait escalates to a timeout failure.
    pub read_timeout: Duration,
    /// Pause between transfer attempts.
    pub retry_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            pipeline_depth: 3,
            max_attempts: 3,
            read_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl SpindriftConfig {
    /// Configuration tuned for live edges: a small window and an
    /// aggressive timeout.
    pub fn low_latency() -> Self {
        Self {
            buffer: BufferConfig {
                capacity: 2 * 1024 * 1024, // 2 MiB
                prepare_size: 16 * 1024,   // 16 KiB
            },
            fetch: FetchConfig {
                pipeline_depth: 2,
                read_timeout: Duration::from_secs(10),
                retry_delay: Duration::from_millis(500),
                ..Default::default()
            },
        }
    }

    /// Configuration for deterministic tests: tiny window, no retry pauses.
    pub fn deterministic_testing() -> Self {
        Self {
            buffer: BufferConfig {
                capacity: 64 * 1024, // 64 KiB
                prepare_size: 4096,
            },
            fetch: FetchConfig {
                pipeline_depth: 2,
                max_attempts: 3,
                read_timeout: Duration::from_millis(100),
                retry_delay: Duration::ZERO,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SpindriftConfig::default();
        assert_eq!(config.buffer.capacity, 8 * 1024 * 1024);
        assert_eq!(config.buffer.prepare_size, 64 * 1024);
        assert_eq!(config.fetch.pipeline_depth, 3);
        assert_eq!(config.fetch.max_attempts, 3);
    }

    #[test]
    fn test_low_latency_config() {
        let config = SpindriftConfig::low_latency();
        assert_eq!(config.buffer.capacity, 2 * 1024 * 1024);
        assert_eq!(config.fetch.pipeline_depth, 2);
        assert_eq!(config.fetch.read_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_deterministic_testing_config() {
        let config = SpindriftConfig::deterministic_testing();
        assert_eq!(config.fetch.retry_delay, Duration::ZERO);
        assert!(config.buffer.capacity <= 64 * 1024);
    }
}
