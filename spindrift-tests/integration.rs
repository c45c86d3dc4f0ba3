//! Integration tests for Spindrift
//!
//! These tests verify the interaction between the sparse ring buffer, the
//! segment coordinator and the scripted transport: window behavior under
//! demuxer-like access, end-to-end streaming across segment boundaries, and
//! fault recovery policy.

#[path = "integration/buffer_window.rs"]
mod buffer_window;

#[path = "integration/fault_recovery.rs"]
mod fault_recovery;

#[path = "integration/streaming_flow.rs"]
mod streaming_flow;
