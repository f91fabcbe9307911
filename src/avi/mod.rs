//! MJPEG-in-AVI container writing.

pub mod header;
pub mod index;
pub mod quartet;
pub mod writer;

/// Chunk id for compressed video frames of stream 0.
pub const FRAME_CHUNK_TAG: &[u8; 4] = b"00dc";
