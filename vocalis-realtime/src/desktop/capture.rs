use super::{find_input_device, host_stream};
use crate::capture::{CaptureDevice, CaptureHandle, InputCapture, downmix};
use crate::codec;
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Input frames per resampler call.
const RESAMPLER_CHUNK: usize = 1024;

/// Microphone capture through the system audio host.
///
/// Opens the device natively at the capture rate when it supports it and
/// resamples otherwise.
#[derive(Debug, Clone, Default)]
pub struct CpalCaptureDevice {
    device_name: Option<String>,
}

impl CpalCaptureDevice {
    /// Use the default input device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the input device with this name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self { device_name: Some(name.into()) }
    }
}

#[async_trait]
impl CaptureDevice for CpalCaptureDevice {
    async fn open(&self, capture: InputCapture) -> Result<CaptureHandle> {
        let device_name = self.device_name.clone();
        let (name, stop_tx) =
            host_stream("vocalis-capture", move || build_stream(device_name.as_deref(), capture))
                .await?;
        tracing::info!(device = %name, "Microphone opened");
        Ok(CaptureHandle::new(name, move || {
            let _ = stop_tx.send(());
        }))
    }
}

fn build_stream(device_name: Option<&str>, capture: InputCapture) -> Result<(cpal::Stream, String)> {
    let device = find_input_device(device_name)?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let (config, sample_format) = pick_config(&device, capture.sample_rate())?;
    tracing::debug!(
        device = %name,
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        sample_format = ?sample_format,
        "Input stream config"
    );

    let mut pipeline = DevicePipeline::new(capture, config.sample_rate.0, config.channels)?;
    let err_fn = |e: cpal::StreamError| tracing::warn!(error = %e, "Input stream error");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| pipeline.push(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    codec::to_f32_into(data, &mut scratch);
                    pipeline.push(&scratch);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(RealtimeError::device(format!("unsupported input sample format {:?}", other)));
        }
    }
    .map_err(|e| RealtimeError::device(format!("Failed to build input stream: {}", e)))?;

    stream.play().map_err(|e| RealtimeError::device(format!("Failed to start input stream: {}", e)))?;
    Ok((stream, name))
}

/// Prefer a config that runs natively at `target` Hz.
fn pick_config(device: &cpal::Device, target: u32) -> Result<(StreamConfig, SampleFormat)> {
    let native = device.supported_input_configs().ok().and_then(|mut configs| {
        configs.find(|c| {
            matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
                && c.min_sample_rate().0 <= target
                && c.max_sample_rate().0 >= target
        })
    });

    let supported = match native {
        Some(range) => range.with_sample_rate(cpal::SampleRate(target)),
        None => device
            .default_input_config()
            .map_err(|e| RealtimeError::device(format!("No usable input config: {}", e)))?,
    };
    Ok((supported.config(), supported.sample_format()))
}

/// Feeds callback buffers into the capture pipeline, resampling on the way
/// when the device rate differs from the capture rate.
struct DevicePipeline {
    capture: InputCapture,
    channels: u16,
    resampler: Option<FastFixedIn<f32>>,
    buffer: Vec<f32>,
}

impl DevicePipeline {
    fn new(capture: InputCapture, device_rate: u32, channels: u16) -> Result<Self> {
        let resampler = if device_rate == capture.sample_rate() {
            None
        } else {
            let ratio = capture.sample_rate() as f64 / device_rate as f64;
            let resampler =
                FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLER_CHUNK, 1)
                    .map_err(|e| RealtimeError::device(format!("Failed to create resampler: {}", e)))?;
            tracing::debug!(from = device_rate, to = capture.sample_rate(), "Resampling microphone input");
            Some(resampler)
        };
        Ok(Self { capture, channels, resampler, buffer: Vec::with_capacity(RESAMPLER_CHUNK * 2) })
    }

    fn push(&mut self, data: &[f32]) {
        let Some(resampler) = self.resampler.as_mut() else {
            self.capture.push_interleaved(data, self.channels);
            return;
        };

        self.buffer.extend(downmix(data, self.channels));
        loop {
            let needed = resampler.input_frames_next();
            if self.buffer.len() < needed {
                break;
            }
            match resampler.process(&[&self.buffer[..needed]], None) {
                Ok(out) => {
                    if let Some(mono) = out.first() {
                        self.capture.push_mono(mono);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Resampling failed, dropping input"),
            }
            self.buffer.drain(..needed);
        }
    }
}
