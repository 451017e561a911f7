//! Microphone capture pipeline.
//!
//! Audio backends deliver whatever buffer sizes and channel layouts the
//! hardware gives them. [`InputCapture`] turns that into fixed-length mono
//! PCM16 frames, meters each one, and hands it to a [`FrameSink`].

use crate::audio::{AudioFormat, AudioFrame};
use crate::codec;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Latest RMS level of the microphone, readable from any thread.
///
/// Writes overwrite; readers may miss intermediate values.
#[derive(Debug, Clone, Default)]
pub struct AmplitudeMeter {
    bits: Arc<AtomicU32>,
}

impl AmplitudeMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new level.
    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    /// Most recently published level in [0, 1].
    pub fn level(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}

/// Destination of completed microphone frames.
///
/// Called from the audio thread, so implementations must not block.
pub trait FrameSink: Send {
    fn deliver(&mut self, frame: AudioFrame);
}

impl<F> FrameSink for F
where
    F: FnMut(AudioFrame) + Send,
{
    fn deliver(&mut self, frame: AudioFrame) {
        self(frame)
    }
}

/// Sink that forwards frames into a bounded queue, dropping the newest
/// frame when the queue is full.
#[derive(Debug)]
pub struct QueueSink {
    tx: mpsc::Sender<AudioFrame>,
    dropped: u64,
}

impl QueueSink {
    pub fn new(tx: mpsc::Sender<AudioFrame>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Frames dropped because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for QueueSink {
    fn deliver(&mut self, frame: AudioFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::debug!(dropped = self.dropped, "Capture queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Capture queue closed, discarding frame");
            }
        }
    }
}

/// Average interleaved channels into mono. Trailing partial frames are dropped.
pub fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    data.chunks_exact(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
}

/// Device-independent frame assembly for microphone audio.
///
/// Feed it raw callback buffers already at [`InputCapture::sample_rate`].
/// Never holds more than one partial frame.
pub struct InputCapture {
    format: AudioFormat,
    frame_samples: usize,
    pending: Vec<f32>,
    meter: AmplitudeMeter,
    sink: Box<dyn FrameSink>,
    frames_delivered: u64,
}

impl InputCapture {
    /// Create a pipeline producing mono frames of `frame_duration` at
    /// `sample_rate`.
    pub fn new(
        sample_rate: u32,
        frame_duration: Duration,
        meter: AmplitudeMeter,
        sink: impl FrameSink + 'static,
    ) -> Self {
        let format = AudioFormat::new(sample_rate, 1);
        let frame_samples = format.samples_for(frame_duration).max(1);
        Self {
            format,
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
            meter,
            sink: Box::new(sink),
            frames_delivered: 0,
        }
    }

    /// Push an interleaved buffer with `channels` channels, downmixing to mono.
    pub fn push_interleaved(&mut self, data: &[f32], channels: u16) {
        if channels <= 1 {
            self.push_mono(data);
        } else {
            self.push_mono(&downmix(data, channels));
        }
    }

    /// Push mono samples.
    pub fn push_mono(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            let wanted = self.frame_samples - self.pending.len();
            let take = wanted.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_samples {
                self.emit();
            }
        }
    }

    fn emit(&mut self) {
        self.meter.set(codec::rms(&self.pending).min(1.0));
        let frame = AudioFrame::mono(codec::quantize(&self.pending), self.format.sample_rate);
        self.pending.clear();
        self.frames_delivered += 1;
        self.sink.deliver(frame);
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    /// Samples per emitted frame.
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Samples waiting for the current frame to fill.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    pub fn meter(&self) -> &AmplitudeMeter {
        &self.meter
    }
}

impl fmt::Debug for InputCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputCapture")
            .field("format", &self.format)
            .field("frame_samples", &self.frame_samples)
            .field("pending", &self.pending.len())
            .field("frames_delivered", &self.frames_delivered)
            .finish()
    }
}

/// Ownership of an open microphone.
///
/// The device is released exactly once: on [`CaptureHandle::close`] or when
/// the handle is dropped, whichever comes first.
pub struct CaptureHandle {
    device_name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureHandle {
    /// Wrap an open device; `release` stops it.
    pub fn new(device_name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self { device_name: device_name.into(), release: Some(Box::new(release)) }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_open(&self) -> bool {
        self.release.is_some()
    }

    /// Stop capturing and release the device. Idempotent.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(device = %self.device_name, "Capture device released");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("device_name", &self.device_name)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A microphone that can be opened.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Acquire the microphone and start feeding `capture`.
    ///
    /// Fails with [`crate::RealtimeError::DeviceUnavailable`] when no device
    /// exists or permission is denied.
    async fn open(&self, capture: InputCapture) -> Result<CaptureHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting(frame_ms: u64) -> (InputCapture, Arc<Mutex<Vec<AudioFrame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let frames = frames.clone();
            move |frame: AudioFrame| frames.lock().push(frame)
        };
        let capture =
            InputCapture::new(16_000, Duration::from_millis(frame_ms), AmplitudeMeter::new(), sink);
        (capture, frames)
    }

    #[test]
    fn test_frames_have_fixed_length() {
        let (mut capture, frames) = collecting(40);
        // Odd callback sizes still produce 640-sample frames.
        for _ in 0..10 {
            capture.push_mono(&[0.25; 333]);
        }
        let frames = frames.lock();
        assert_eq!(frames.len(), 3330 / 640);
        assert!(frames.iter().all(|f| f.samples().len() == 640 && f.sample_rate() == 16_000));
        assert_eq!(capture.pending_len(), 3330 % 640);
    }

    #[test]
    fn test_pending_never_exceeds_one_frame() {
        let (mut capture, _) = collecting(20);
        capture.push_mono(&vec![0.0; 10_000]);
        assert!(capture.pending_len() < capture.frame_samples());
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let (mut capture, frames) = collecting(20);
        let stereo: Vec<f32> = (0..640).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        capture.push_interleaved(&stereo, 2);
        assert_eq!(capture.frames_delivered(), 1);
        assert!(frames.lock()[0].samples().iter().all(|s| *s == 0));
    }

    #[test]
    fn test_meter_tracks_last_frame() {
        let (mut capture, _) = collecting(20);
        capture.push_mono(&[0.5; 320]);
        assert!((capture.meter().level() - 0.5).abs() < 1e-6);
        capture.push_mono(&[0.0; 320]);
        assert_eq!(capture.meter().level(), 0.0);
    }

    #[test]
    fn test_queue_sink_drops_newest_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = QueueSink::new(tx);
        sink.deliver(AudioFrame::mono(vec![1i16], 16_000));
        sink.deliver(AudioFrame::mono(vec![2i16], 16_000));
        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().samples(), &[1]);
    }

    #[test]
    fn test_handle_releases_once() {
        let count = Arc::new(AtomicU32::new(0));
        let mut handle = {
            let count = count.clone();
            CaptureHandle::new("test-mic", move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        handle.close();
        handle.close();
        drop(handle);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
