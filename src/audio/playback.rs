//! # PCM Playback Decoding
//!
//! Converts inbound raw PCM blocks (the agent's spoken replies) into float
//! samples for the output device.
//!
//! ## Decode rule:
//! Each little-endian 16-bit sample maps to `v / 32768.0`, the symmetric
//! inverse of the encoder's two-branch scaling. The round trip is integer
//! exact for negative values; large positive values can drift by one step
//! because the encoder scales non-negative samples by 32767.

use crate::error::{VoiceError, VoiceResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Decode a raw PCM block into normalized float samples.
///
/// ## Errors:
/// An odd byte count cannot hold whole 16-bit samples and is rejected as a
/// protocol error; the caller logs it and keeps the session alive.
pub fn decode_pcm(bytes: &[u8]) -> VoiceResult<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Protocol(
            "PCM payload length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);

    while let Ok(value) = cursor.read_i16::<LittleEndian>() {
        samples.push(value as f32 / 32768.0);
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::quantize_sample;

    fn to_le_bytes(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_normalization() {
        let bytes = to_le_bytes(&[0, -32768, 16384, -16384]);
        let samples = decode_pcm(&bytes).unwrap();

        assert_eq!(samples, vec![0.0, -1.0, 0.5, -0.5]);
    }

    #[test]
    fn test_odd_length_rejected() {
        let result = decode_pcm(&[0u8, 1, 2]);
        assert!(matches!(result, Err(VoiceError::Protocol(_))));
    }

    #[test]
    fn test_empty_payload_is_no_samples() {
        assert!(decode_pcm(&[]).unwrap().is_empty());
    }

    /// Decoding and re-encoding is integer exact for every negative value
    /// and for positive values up to the half-scale point.
    #[test]
    fn test_round_trip_exactness() {
        let values: Vec<i16> = vec![-32768, -32767, -16385, -1, 0, 1, 4096, 16384];
        let bytes = to_le_bytes(&values);

        let reencoded: Vec<i16> = decode_pcm(&bytes)
            .unwrap()
            .iter()
            .map(|&s| quantize_sample(s))
            .collect();

        assert_eq!(reencoded, values);
    }

    /// The encoder's asymmetric scaling costs at most one step at the
    /// positive extreme: 32767 decodes to 32767/32768 and re-encodes to
    /// 32766. This matches what the agent backend expects and must not be
    /// "fixed" to a symmetric scale.
    #[test]
    fn test_positive_extreme_drift() {
        let bytes = to_le_bytes(&[32767]);
        let samples = decode_pcm(&bytes).unwrap();

        assert!(samples[0] < 1.0);
        let reencoded = quantize_sample(samples[0]);
        assert_eq!(reencoded, 32766);
        assert!((32767 - reencoded) <= 1);
    }
}
