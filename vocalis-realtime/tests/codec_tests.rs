//! Property tests for the PCM16 wire codec.

use proptest::prelude::*;
use vocalis_realtime::codec::{self, decode, encode, to_f32};
use vocalis_realtime::{RealtimeError, WireBlob};

const STEP: f32 = 1.0 / 32768.0;

fn arb_samples() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..=1.0f32, 0..2048)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Decoding an encoded buffer recovers every sample to within one
    /// quantization step.
    #[test]
    fn prop_round_trip_within_one_step(samples in arb_samples()) {
        let blob = encode(&samples, 16_000);
        let frame = decode(&blob, 16_000, 1).unwrap();
        let restored = to_f32(frame.samples());

        prop_assert_eq!(restored.len(), samples.len());
        for (original, restored) in samples.iter().zip(restored.iter()) {
            prop_assert!((original - restored).abs() <= STEP, "{} vs {}", original, restored);
        }
    }

    /// Out-of-range input is clamped instead of wrapping.
    #[test]
    fn prop_encode_clamps(sample in prop_oneof![1.0f32..1000.0, -1000.0f32..-1.0]) {
        let pcm = codec::quantize(&[sample]);
        if sample > 0.0 {
            prop_assert_eq!(pcm[0], i16::MAX);
        } else {
            prop_assert_eq!(pcm[0], i16::MIN);
        }
    }

    /// Any payload whose length is not a whole number of samples is rejected.
    #[test]
    fn prop_odd_payload_rejected(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        prop_assume!(bytes.len() % 2 == 1);
        use base64::Engine;
        let blob = WireBlob::pcm(base64::engine::general_purpose::STANDARD.encode(&bytes), 24_000);
        prop_assert!(matches!(decode(&blob, 24_000, 1), Err(RealtimeError::Decode(_))));
    }
}

#[test]
fn test_wire_blob_shape() {
    let blob = encode(&[0.0, 0.5], 16_000);
    assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    let json = serde_json::to_value(&blob).unwrap();
    assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
    assert!(json["data"].is_string());
}

#[test]
fn test_empty_payload_decodes_to_empty_frame() {
    let frame = decode(&WireBlob::pcm("", 24_000), 24_000, 1).unwrap();
    assert!(frame.is_empty());
    assert_eq!(frame.duration(), std::time::Duration::ZERO);
}

#[test]
fn test_invalid_base64_is_decode_error() {
    let blob = WireBlob::pcm("not base64!!", 24_000);
    assert!(matches!(decode(&blob, 24_000, 1), Err(RealtimeError::Decode(_))));
}

#[test]
fn test_stereo_requires_whole_frames() {
    // Three samples cannot form stereo frames.
    let blob = codec::encode_frame(&vocalis_realtime::AudioFrame::mono(vec![1i16, 2, 3], 24_000));
    assert!(decode(&blob, 24_000, 2).is_err());
    assert_eq!(decode(&blob, 24_000, 1).unwrap().samples(), &[1, 2, 3]);
}
