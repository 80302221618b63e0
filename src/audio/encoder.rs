//! # PCM Frame Encoder
//!
//! Accumulates a continuous stream of floating-point audio samples into
//! fixed-size frames and converts each completed frame into one
//! little-endian 16-bit PCM block.
//!
//! ## Invariants:
//! - A frame is only emitted once it is completely full; partial frames stay
//!   buffered and are never padded or sent
//! - Every pushed sample ends up in exactly one emitted block (or remains
//!   buffered), regardless of how the capture callback chunks its input
//! - An emitted frame buffer is never reused; a fresh buffer replaces it
//!
//! ## Real-time contract:
//! `push`/`extend` run on the capture device's callback thread. They take no
//! locks and perform no I/O; the only allocation is the replacement frame
//! buffer at the moment of emission.

/// Quantize one float sample in [-1.0, 1.0] to a signed 16-bit value.
///
/// Out-of-range input is clamped first. Negative values scale by 32768 and
/// non-negative values by 32767, producing the full [-32768, 32767] range.
/// The agent backend expects exactly this two-branch scaling, so it is kept
/// even though it makes the positive extreme slightly lossy.
pub fn quantize_sample(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 {
        clamped * 32768.0
    } else {
        clamped * 32767.0
    };
    scaled.round() as i16
}

/// Convert a full frame of float samples to little-endian PCM bytes.
fn encode_block(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&quantize_sample(sample).to_le_bytes());
    }
    bytes
}

/// Accumulates capture samples and emits one PCM block per full frame.
pub struct FrameEncoder {
    frame_size: usize,
    buffer: Vec<f32>,
}

impl FrameEncoder {
    /// Create an encoder emitting blocks of `frame_size` samples.
    pub fn new(frame_size: usize) -> Self {
        debug_assert!(frame_size > 0, "frame size must be non-zero");
        Self {
            frame_size,
            buffer: Vec::with_capacity(frame_size),
        }
    }

    /// Samples per emitted block.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples currently buffered toward the next block.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append one sample; returns the encoded block when the frame fills.
    ///
    /// The filled buffer is converted and handed out exactly once, and a
    /// fresh empty buffer takes its place.
    pub fn push(&mut self, sample: f32) -> Option<Vec<u8>> {
        self.buffer.push(sample);
        if self.buffer.len() == self.frame_size {
            let frame =
                std::mem::replace(&mut self.buffer, Vec::with_capacity(self.frame_size));
            Some(encode_block(&frame))
        } else {
            None
        }
    }

    /// Append a chunk of samples, invoking `emit` for every completed block.
    ///
    /// Capture callbacks deliver a different number of samples each
    /// invocation; correctness does not depend on any alignment between the
    /// chunk size and the frame size.
    pub fn extend<F>(&mut self, samples: &[f32], mut emit: F)
    where
        F: FnMut(Vec<u8>),
    {
        for &sample in samples {
            if let Some(block) = self.push(sample) {
                emit(block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decode an emitted block back to i16 values for assertions.
    fn block_to_i16(block: &[u8]) -> Vec<i16> {
        block
            .chunks(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_quantization_boundaries() {
        assert_eq!(quantize_sample(1.0), 32767);
        assert_eq!(quantize_sample(-1.0), -32768);
        assert_eq!(quantize_sample(0.0), 0);
        assert_eq!(quantize_sample(0.5), 16384);
        assert_eq!(quantize_sample(-0.5), -16384);

        // Out-of-range input behaves exactly like the clamped boundary
        assert_eq!(quantize_sample(1.5), quantize_sample(1.0));
        assert_eq!(quantize_sample(-2.0), quantize_sample(-1.0));
    }

    #[test]
    fn test_block_count_is_floor_of_total() {
        let mut encoder = FrameEncoder::new(8);
        let mut blocks = Vec::new();

        // 20 samples at frame size 8 must produce exactly 2 blocks with
        // 4 samples left buffered
        let samples: Vec<f32> = (0..20).map(|i| i as f32 / 32.0).collect();
        encoder.extend(&samples, |block| blocks.push(block));

        assert_eq!(blocks.len(), 2);
        assert_eq!(encoder.buffered(), 4);
        for block in &blocks {
            assert_eq!(block.len(), 16); // 8 samples, 2 bytes each
        }
    }

    #[test]
    fn test_emission_preserves_order() {
        let mut encoder = FrameEncoder::new(4);
        let mut emitted = Vec::new();

        let samples: Vec<f32> = (0..12).map(|i| i as f32 / 100.0).collect();
        encoder.extend(&samples, |block| emitted.extend(block_to_i16(&block)));

        let expected: Vec<i16> = samples.iter().map(|&s| quantize_sample(s)).collect();
        assert_eq!(emitted, expected);
    }

    #[test]
    fn test_chunking_does_not_affect_output() {
        let samples: Vec<f32> = (0..50).map(|i| ((i * 7) % 13) as f32 / 13.0 - 0.5).collect();

        // One sample at a time
        let mut single = FrameEncoder::new(16);
        let mut single_out = Vec::new();
        for &s in &samples {
            if let Some(block) = single.push(s) {
                single_out.push(block);
            }
        }

        // Uneven chunks that never align with the frame size
        let mut chunked = FrameEncoder::new(16);
        let mut chunked_out = Vec::new();
        for chunk in samples.chunks(7) {
            chunked.extend(chunk, |block| chunked_out.push(block));
        }

        assert_eq!(single_out, chunked_out);
        assert_eq!(single.buffered(), chunked.buffered());
    }

    #[test]
    fn test_partial_frame_never_emitted() {
        let mut encoder = FrameEncoder::new(64);
        for i in 0..63 {
            assert!(encoder.push(i as f32 / 63.0).is_none());
        }
        assert_eq!(encoder.buffered(), 63);

        // The 64th sample completes the frame and resets the buffer
        let block = encoder.push(1.0).expect("full frame should emit");
        assert_eq!(block.len(), 128);
        assert_eq!(encoder.buffered(), 0);
    }
}
