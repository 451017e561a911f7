use super::{find_output_device, host_stream};
use crate::audio::{AudioFormat, AudioFrame};
use crate::clock::{SampleClock, SharedClock};
use crate::error::{RealtimeError, Result};
use crate::playback::{BoxedOutput, CompletionHook, PlaybackDevice, PlaybackOutput, UnitId};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Speaker output through the system audio host.
#[derive(Debug, Clone, Default)]
pub struct CpalPlaybackDevice {
    device_name: Option<String>,
}

impl CpalPlaybackDevice {
    /// Use the default output device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the output device with this name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self { device_name: Some(name.into()) }
    }
}

#[async_trait]
impl PlaybackDevice for CpalPlaybackDevice {
    async fn open(&self, format: AudioFormat) -> Result<BoxedOutput> {
        let device_name = self.device_name.clone();
        let (config_tx, config_rx) = tokio::sync::oneshot::channel();
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let shared = Arc::clone(&mixer);

        let (name, stop_tx) = host_stream("vocalis-playback", move || {
            let device = find_output_device(device_name.as_deref())?;
            let (config, sample_format) = pick_config(&device, format.sample_rate)?;
            let clock = Arc::new(SampleClock::new(config.sample_rate.0));
            let _ = config_tx.send(Arc::clone(&clock));
            let stream = build_stream(&device, &config, sample_format, shared, clock)?;
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            Ok((stream, name))
        })
        .await?;

        let clock = config_rx.await.map_err(|_| RealtimeError::device("playback clock unavailable"))?;
        tracing::info!(device = %name, sample_rate = clock.sample_rate(), "Speaker opened");
        Ok(Box::new(CpalPlaybackOutput { device_name: name, mixer, clock, stop_tx: Some(stop_tx) }))
    }
}

fn pick_config(device: &cpal::Device, preferred: u32) -> Result<(StreamConfig, SampleFormat)> {
    let native = device.supported_output_configs().ok().and_then(|mut configs| {
        configs.find(|c| {
            matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
                && c.min_sample_rate().0 <= preferred
                && c.max_sample_rate().0 >= preferred
        })
    });

    let supported = match native {
        Some(range) => range.with_sample_rate(cpal::SampleRate(preferred)),
        None => device
            .default_output_config()
            .map_err(|e| RealtimeError::device(format!("No usable output config: {}", e)))?,
    };
    Ok((supported.config(), supported.sample_format()))
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<SampleClock>,
) -> Result<cpal::Stream> {
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;
    let err_fn = |e: cpal::StreamError| tracing::warn!(error = %e, "Output stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render_into(data, channels, rate, &mixer, &clock);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0f32);
                    render_into(&mut scratch, channels, rate, &mixer, &clock);
                    for (out, s) in data.iter_mut().zip(scratch.iter()) {
                        *out = (s * 32767.0) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(RealtimeError::device(format!("unsupported output sample format {:?}", other)));
        }
    }
    .map_err(|e| RealtimeError::device(format!("Failed to build output stream: {}", e)))?;

    stream.play().map_err(|e| RealtimeError::device(format!("Failed to start output stream: {}", e)))?;
    Ok(stream)
}

/// Render one callback buffer, advance the clock, then fire completion hooks
/// outside the lock.
fn render_into(
    data: &mut [f32],
    channels: usize,
    rate: u32,
    mixer: &Mutex<Mixer>,
    clock: &SampleClock,
) {
    let frames = data.len() / channels.max(1);
    let finished = mixer.lock().render(data, channels, rate, clock.frames());
    clock.advance_frames(frames as u64);
    for hook in finished {
        hook();
    }
}

/// A scheduled buffer positioned on the device timeline.
struct MixUnit {
    id: UnitId,
    frame: AudioFrame,
    start_frame: u64,
    end_frame: u64,
    on_finished: Option<CompletionHook>,
}

#[derive(Default)]
struct Mixer {
    units: Vec<MixUnit>,
}

impl Mixer {
    /// Sum every unit overlapping `[base, base + frames)` into `data` and
    /// return the hooks of units that ended within it.
    fn render(&mut self, data: &mut [f32], channels: usize, rate: u32, base: u64) -> Vec<CompletionHook> {
        data.fill(0.0);
        let frames = (data.len() / channels.max(1)) as u64;
        let window_end = base + frames;

        for unit in &self.units {
            if unit.start_frame >= window_end || unit.end_frame <= base {
                continue;
            }
            let samples = unit.frame.samples();
            let unit_channels = unit.frame.channels() as usize;
            let unit_frames = unit.frame.frame_count() as u64;
            let unit_rate = unit.frame.sample_rate() as u64;

            let from = unit.start_frame.max(base);
            let to = unit.end_frame.min(window_end);
            for n in from..to {
                // Nearest source frame for this device frame.
                let src = (n - unit.start_frame) * unit_rate / rate as u64;
                if src >= unit_frames {
                    break;
                }
                let offset = src as usize * unit_channels;
                let sum: i32 = samples[offset..offset + unit_channels].iter().map(|s| *s as i32).sum();
                let value = sum as f32 / unit_channels as f32 / 32768.0;

                let out = (n - base) as usize * channels;
                for sample in &mut data[out..out + channels] {
                    *sample += value;
                }
            }
        }

        for sample in data.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        let mut finished = Vec::new();
        self.units.retain_mut(|unit| {
            if unit.end_frame <= window_end {
                if let Some(hook) = unit.on_finished.take() {
                    finished.push(hook);
                }
                false
            } else {
                true
            }
        });
        finished
    }
}

/// An open speaker. Units are mixed by the output callback at their
/// scheduled device frame.
pub struct CpalPlaybackOutput {
    device_name: String,
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<SampleClock>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
}

impl CpalPlaybackOutput {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn to_device_frames(&self, at: Duration) -> u64 {
        (at.as_nanos() * self.clock.sample_rate() as u128 / 1_000_000_000) as u64
    }
}

impl PlaybackOutput for CpalPlaybackOutput {
    fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    fn schedule(
        &mut self,
        id: UnitId,
        frame: AudioFrame,
        start_at: Duration,
        on_finished: CompletionHook,
    ) -> Result<()> {
        if self.stop_tx.is_none() {
            return Err(RealtimeError::SessionClosed);
        }
        let start_frame = self.to_device_frames(start_at);
        let end_frame = self.to_device_frames(start_at + frame.duration()).max(start_frame + 1);
        self.mixer.lock().units.push(MixUnit {
            id,
            frame,
            start_frame,
            end_frame,
            on_finished: Some(on_finished),
        });
        Ok(())
    }

    fn stop(&mut self, id: UnitId) {
        self.mixer.lock().units.retain(|unit| unit.id != id);
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            self.mixer.lock().units.clear();
            let _ = stop_tx.send(());
            tracing::debug!(device = %self.device_name, "Speaker released");
        }
    }
}

impl Drop for CpalPlaybackOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unit(id: u64, samples: Vec<i16>, start_frame: u64, fired: &Arc<AtomicUsize>) -> MixUnit {
        let frame = AudioFrame::mono(samples, 24_000);
        let end_frame = start_frame + frame.frame_count() as u64;
        let fired = fired.clone();
        MixUnit {
            id: UnitId::from_raw(id),
            frame,
            start_frame,
            end_frame,
            on_finished: Some(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })),
        }
    }

    #[test]
    fn test_mixer_renders_at_start_frame_and_fires_hook() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::default();
        mixer.units.push(unit(1, vec![16384; 4], 2, &fired));

        let mut data = vec![0.0f32; 8];
        let hooks = mixer.render(&mut data, 1, 24_000, 0);
        assert_eq!(data, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(hooks.len(), 1);
        assert!(mixer.units.is_empty());
    }

    #[test]
    fn test_mixer_spans_callbacks() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut mixer = Mixer::default();
        mixer.units.push(unit(1, vec![-16384; 6], 0, &fired));

        let mut data = vec![0.0f32; 8];
        assert!(mixer.render(&mut data[..4], 2, 24_000, 0).is_empty());
        assert_eq!(&data[..4], &[-0.5, -0.5, -0.5, -0.5]);
        let hooks = mixer.render(&mut data, 2, 24_000, 2);
        assert_eq!(hooks.len(), 1);
    }
}
