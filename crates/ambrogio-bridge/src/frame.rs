//! Sentinel-delimited framing for the short-range link
//!
//! The device terminates every protocol unit with [`FRAME_SENTINEL`]
//! (`0x03`). A single read may carry several units back to back, so each
//! received chunk is split into its terminated spans before anything is
//! handed to the decoder.
//!
//! A burst from the device is expected to end on a sentinel. Bytes after
//! the last sentinel in a chunk are dropped; nothing is carried into the
//! next chunk.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::FRAME_SENTINEL;

/// One complete protocol unit, sentinel included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    /// Raw bytes of the frame, ending in the sentinel
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes including the sentinel
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Frames always hold at least the sentinel
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Splits received chunks into frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSplitter;

impl FrameSplitter {
    /// Splitter for the [`FRAME_SENTINEL`] terminator
    pub fn new() -> Self {
        Self
    }

    /// Split one received chunk, left to right, in a single pass
    pub fn split(&self, chunk: &Bytes) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut start = 0;

        for (i, byte) in chunk.iter().enumerate() {
            if *byte == FRAME_SENTINEL {
                frames.push(Frame(chunk.slice(start..=i)));
                start = i + 1;
            }
        }

        if start < chunk.len() {
            debug!(
                dropped = chunk.len() - start,
                "Dropping unterminated bytes after last frame"
            );
        }
        trace!(bytes = chunk.len(), frames = frames.len(), "Split chunk");

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(data: &[u8]) -> Vec<Frame> {
        FrameSplitter::new().split(&Bytes::copy_from_slice(data))
    }

    #[test]
    fn test_single_frame() {
        let frames = split(&[0x02, 0x10, 0x20, 0x03]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[0x02, 0x10, 0x20, 0x03]);
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let frames = split(&[0x02, 0xAA, 0x03, 0x02, 0xBB, 0xCC, 0x03]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_bytes(), &[0x02, 0xAA, 0x03]);
        assert_eq!(frames[1].as_bytes(), &[0x02, 0xBB, 0xCC, 0x03]);
    }

    #[test]
    fn test_no_sentinel_yields_nothing() {
        assert!(split(&[0x02, 0x10, 0x20]).is_empty());
        assert!(split(&[]).is_empty());
    }

    #[test]
    fn test_trailing_bytes_dropped() {
        let frames = split(&[0x01, 0x03, 0x04, 0x05]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[0x01, 0x03]);
    }

    #[test]
    fn test_no_carry_over_between_chunks() {
        let splitter = FrameSplitter::new();
        assert!(splitter.split(&Bytes::from_static(&[0x02, 0x10])).is_empty());
        let frames = splitter.split(&Bytes::from_static(&[0x20, 0x03]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &[0x20, 0x03]);
    }

    #[test]
    fn test_bare_sentinels() {
        let frames = split(&[0x03, 0x03, 0x03]);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.as_bytes() == [0x03]));
    }

    #[test]
    fn test_frame_count_matches_sentinel_count() {
        // Deterministic pseudo-random buffers
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..200 {
            let len = (seed % 64) as usize;
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                data.push(((seed >> 16) % 8) as u8);
            }
            seed = seed.wrapping_add(7);

            let sentinels = data.iter().filter(|b| **b == FRAME_SENTINEL).count();
            let frames = split(&data);
            assert_eq!(frames.len(), sentinels);

            // Frames are contiguous, ordered and each ends on the sentinel
            let mut offset = 0;
            for frame in &frames {
                assert_eq!(frame.as_bytes().last(), Some(&FRAME_SENTINEL));
                assert_eq!(&data[offset..offset + frame.len()], frame.as_bytes());
                offset += frame.len();
            }
        }
    }
}
