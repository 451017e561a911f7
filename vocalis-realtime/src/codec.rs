//! Conversions between float samples, PCM16 little-endian bytes and base64
//! wire blobs.
//!
//! Every function here is pure. Encoding is total: out-of-range samples are
//! clamped, never rejected. Decoding fails only on malformed input.

use crate::audio::{AudioFrame, WireBlob};
use crate::error::{RealtimeError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Scale between normalized float samples and i16.
const I16_SCALE: f32 = 32768.0;

/// Convert normalized float samples to i16, clamping to [-1, 1].
pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| quantize_sample(s)).collect()
}

#[inline]
fn quantize_sample(sample: f32) -> i16 {
    // NaN survives the clamps and casts to 0.
    (sample.clamp(-1.0, 1.0) * I16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Convert i16 samples back to normalized floats.
pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    let mut out = Vec::with_capacity(samples.len());
    to_f32_into(samples, &mut out);
    out
}

/// [`to_f32`] into a reused buffer, for audio callbacks that must not allocate.
pub fn to_f32_into(samples: &[i16], out: &mut Vec<f32>) {
    out.clear();
    out.extend(samples.iter().map(|&s| s as f32 / I16_SCALE));
}

/// Pack i16 samples as little-endian bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        data.extend_from_slice(&sample.to_le_bytes());
    }
    data
}

/// Encode float samples as a PCM16 wire blob tagged with `sample_rate`.
pub fn encode(samples: &[f32], sample_rate: u32) -> WireBlob {
    let pcm = quantize(samples);
    WireBlob::pcm(STANDARD.encode(to_le_bytes(&pcm)), sample_rate)
}

/// Encode an already-quantized frame.
pub fn encode_frame(frame: &AudioFrame) -> WireBlob {
    WireBlob::pcm(STANDARD.encode(to_le_bytes(frame.samples())), frame.sample_rate())
}

/// Decode a wire blob into a frame.
///
/// Fails with [`RealtimeError::Decode`] when the payload is not valid base64
/// or its byte length is not a multiple of `2 * channels`.
pub fn decode(blob: &WireBlob, sample_rate: u32, channels: u16) -> Result<AudioFrame> {
    if channels == 0 {
        return Err(RealtimeError::decode("channel count must be at least 1"));
    }

    let bytes = STANDARD
        .decode(blob.data.as_bytes())
        .map_err(|e| RealtimeError::decode(format!("invalid base64: {}", e)))?;

    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(RealtimeError::decode(format!(
            "payload of {} bytes is not a multiple of {} ({} channel PCM16)",
            bytes.len(),
            frame_bytes,
            channels
        )));
    }

    let samples: Vec<i16> =
        bytes.chunks_exact(2).map(|pair| i16::from_le_bytes([pair[0], pair[1]])).collect();

    Ok(AudioFrame::new(samples, sample_rate, channels))
}

/// Root-mean-square amplitude of normalized samples; 0 for empty input.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// RMS amplitude of PCM16 samples, normalized to [0, 1].
pub fn rms_i16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let f = s as f64 / I16_SCALE as f64;
            f * f
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_clamps_out_of_range() {
        assert_eq!(quantize(&[2.0, -2.0, 1.0, -1.0]), vec![32767, -32768, 32767, -32768]);
    }

    #[test]
    fn test_quantize_nan_is_silence() {
        assert_eq!(quantize(&[f32::NAN]), vec![0]);
    }

    #[test]
    fn test_to_f32_into_reuses_buffer() {
        let mut scratch = Vec::with_capacity(8);
        to_f32_into(&[16384, -32768], &mut scratch);
        assert_eq!(scratch, vec![0.5, -1.0]);
        let capacity = scratch.capacity();
        to_f32_into(&[0], &mut scratch);
        assert_eq!(scratch, vec![0.0]);
        assert_eq!(scratch.capacity(), capacity);
    }

    #[test]
    fn test_le_byte_order() {
        assert_eq!(to_le_bytes(&[0x0102, -1]), vec![0x02, 0x01, 0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_tags_rate() {
        let blob = encode(&[0.0, 0.5], 16_000);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        // 0 -> 00 00, 0.5 -> 16384 -> 00 40
        assert_eq!(blob.data, STANDARD.encode([0x00, 0x00, 0x00, 0x40]));
    }

    #[test]
    fn test_decode_roundtrip_exact_for_pcm() {
        let frame = AudioFrame::mono(vec![0, 1, -1, 32767, -32768, 1000, -1000], 24_000);
        let decoded = decode(&encode_frame(&frame), 24_000, 1).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_odd_length_fails() {
        let blob = WireBlob::pcm(STANDARD.encode([1u8, 2, 3]), 24_000);
        assert!(matches!(decode(&blob, 24_000, 1), Err(RealtimeError::Decode(_))));
    }

    #[test]
    fn test_decode_stereo_requires_four_byte_frames() {
        let blob = WireBlob::pcm(STANDARD.encode([0u8; 6]), 24_000);
        assert!(decode(&blob, 24_000, 2).is_err());
        let blob = WireBlob::pcm(STANDARD.encode([0u8; 8]), 24_000);
        assert_eq!(decode(&blob, 24_000, 2).unwrap().frame_count(), 2);
    }

    #[test]
    fn test_decode_invalid_base64_fails() {
        let blob = WireBlob::pcm("not base64!!", 24_000);
        assert!(matches!(decode(&blob, 24_000, 1), Err(RealtimeError::Decode(_))));
    }

    #[test]
    fn test_decode_empty_payload() {
        let frame = decode(&WireBlob::pcm("", 24_000), 24_000, 1).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert!((rms_i16(&[16384, -16384]) - 0.5).abs() < 1e-6);
    }
}
