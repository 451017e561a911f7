//! Audio format definitions and the frame/blob data model.

use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

/// Sample rate of microphone audio sent upstream.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized speech received downstream.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Sample rates accepted in a downstream `rate=` tag.
pub const PCM_RATE_RANGE: RangeInclusive<u32> = 8_000..=48_000;

/// MIME type prefix for linear PCM blobs.
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

/// Linear PCM16 audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g., 24000, 16000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono).
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_24khz()
    }
}

impl AudioFormat {
    /// Create a new audio format.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    /// PCM16 mono at 24kHz (speech output).
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: OUTPUT_SAMPLE_RATE, channels: 1 }
    }

    /// PCM16 mono at 16kHz (microphone input).
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: INPUT_SAMPLE_RATE, channels: 1 }
    }

    /// Calculate bytes per second for this format.
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 2
    }

    /// Calculate duration in milliseconds for a given number of bytes.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        let bytes_per_ms = self.bytes_per_second() as f64 / 1000.0;
        bytes as f64 / bytes_per_ms
    }

    /// Number of mono samples in a frame of the given length.
    pub fn samples_for(&self, duration: Duration) -> usize {
        (duration.as_nanos() * self.sample_rate as u128 / 1_000_000_000) as usize
    }

    /// MIME-like tag used on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("{};rate={}", PCM_MIME_PREFIX, self.sample_rate)
    }
}

/// Exact playback duration of `frames` sample frames at `sample_rate`.
///
/// Rounds down to the nanosecond, so summing durations of consecutive frames
/// never overshoots the true end time.
pub fn duration_of(frames: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Decoded PCM16 audio.
///
/// Immutable once produced; the samples live in a shared slice so clones are
/// cheap and a frame can be handed to an output while the scheduler keeps
/// its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Create a frame from interleaved samples.
    pub fn new(samples: impl Into<Arc<[i16]>>, sample_rate: u32, channels: u16) -> Self {
        Self { samples: samples.into(), sample_rate, channels: channels.max(1) }
    }

    /// Create a mono frame.
    pub fn mono(samples: impl Into<Arc<[i16]>>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// A mono frame of `duration` silence.
    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        let len = AudioFormat::new(sample_rate, 1).samples_for(duration);
        Self::mono(vec![0i16; len], sample_rate)
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Shared handle to the sample buffer.
    pub fn shared_samples(&self) -> Arc<[i16]> {
        Arc::clone(&self.samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of this frame.
    pub fn duration(&self) -> Duration {
        duration_of(self.frame_count(), self.sample_rate)
    }
}

/// Base64-encoded PCM plus its MIME-like tag, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlob {
    /// Base64 of little-endian PCM16 bytes.
    pub data: String,
    /// Tag such as `audio/pcm;rate=24000`.
    pub mime_type: String,
}

impl WireBlob {
    /// Create a blob from already-encoded data.
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self { data: data.into(), mime_type: mime_type.into() }
    }

    /// Create a PCM blob tagged with the given sample rate.
    pub fn pcm(data: impl Into<String>, sample_rate: u32) -> Self {
        Self::new(data, AudioFormat::new(sample_rate, 1).mime_type())
    }

    /// Whether the tag describes linear PCM.
    pub fn is_pcm(&self) -> bool {
        self.mime_type.trim().starts_with(PCM_MIME_PREFIX)
    }

    /// Sample rate declared by the `rate=` parameter, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }

    /// Rate to play this chunk at.
    ///
    /// An untagged chunk plays at `fallback`. A tag that does not parse or
    /// falls outside [`PCM_RATE_RANGE`] is a decode error.
    pub fn playback_rate(&self, fallback: u32) -> Result<u32> {
        let Some(tag) =
            self.mime_type.split(';').find_map(|param| param.trim().strip_prefix("rate="))
        else {
            return Ok(fallback);
        };
        match tag.trim().parse::<u32>() {
            Ok(rate) if PCM_RATE_RANGE.contains(&rate) => Ok(rate),
            _ => Err(RealtimeError::decode(format!("unsupported sample rate tag: {}", tag.trim()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_bytes_per_second() {
        assert_eq!(AudioFormat::pcm16_24khz().bytes_per_second(), 48000);
        assert_eq!(AudioFormat::pcm16_16khz().bytes_per_second(), 32000);
    }

    #[test]
    fn test_audio_format_duration() {
        let format = AudioFormat::pcm16_24khz();
        let duration = format.duration_ms(48000);
        assert!((duration - 1000.0).abs() < 0.001);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(AudioFormat::pcm16_16khz().mime_type(), "audio/pcm;rate=16000");
    }

    #[test]
    fn test_frame_duration_is_exact() {
        let frame = AudioFrame::mono(vec![0i16; 12_000], OUTPUT_SAMPLE_RATE);
        assert_eq!(frame.duration(), Duration::from_millis(500));

        let frame = AudioFrame::mono(vec![0i16; 640], INPUT_SAMPLE_RATE);
        assert_eq!(frame.duration(), Duration::from_millis(40));
    }

    #[test]
    fn test_stereo_frame_count() {
        let frame = AudioFrame::new(vec![0i16; 960], 24_000, 2);
        assert_eq!(frame.frame_count(), 480);
        assert_eq!(frame.duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_silence_length() {
        let frame = AudioFrame::silence(Duration::from_millis(100), INPUT_SAMPLE_RATE);
        assert_eq!(frame.samples().len(), 1600);
        assert!(frame.samples().iter().all(|s| *s == 0));
    }

    #[test]
    fn test_wire_blob_rate_parsing() {
        assert_eq!(WireBlob::pcm("", 24_000).sample_rate(), Some(24_000));
        assert_eq!(WireBlob::new("", "audio/pcm; rate=16000").sample_rate(), Some(16_000));
        assert_eq!(WireBlob::new("", "audio/pcm").sample_rate(), None);
        assert!(WireBlob::new("", "audio/pcm").is_pcm());
        assert!(!WireBlob::new("", "audio/opus").is_pcm());
    }

    #[test]
    fn test_playback_rate_bounds() {
        assert_eq!(WireBlob::pcm("", 16_000).playback_rate(24_000).unwrap(), 16_000);
        assert_eq!(WireBlob::new("", "audio/pcm").playback_rate(24_000).unwrap(), 24_000);
        for mime in ["audio/pcm;rate=0", "audio/pcm;rate=1", "audio/pcm;rate=96000", "audio/pcm;rate=fast"] {
            assert!(
                matches!(WireBlob::new("", mime).playback_rate(24_000), Err(RealtimeError::Decode(_))),
                "{} should be rejected",
                mime
            );
        }
    }

    #[test]
    fn test_wire_blob_serializes_camel_case() {
        let json = serde_json::to_value(WireBlob::pcm("AAA=", 16_000)).unwrap();
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["data"], "AAA=");
    }
}
