//! Byte-stream adaptation for container demultiplexers.
//!
//! Demultiplexers want one flat, seekable byte stream; the coordinator
//! thinks in segments. The reader in this module bridges the two.

pub mod reader;

pub use reader::StreamReader;
