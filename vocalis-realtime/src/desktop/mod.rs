//! Desktop microphone and speaker backends built on `cpal`.
//!
//! `cpal` streams are not `Send`, so each stream lives on its own thread for
//! as long as its handle exists. The threads only build, play and drop the
//! stream; audio flows through the callbacks.

mod capture;
mod playback;

pub use capture::CpalCaptureDevice;
pub use playback::{CpalPlaybackDevice, CpalPlaybackOutput};

use crate::error::{RealtimeError, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// Names of available input devices.
pub fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| RealtimeError::device(format!("Failed to list input devices: {}", e)))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Names of available output devices.
pub fn output_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| RealtimeError::device(format!("Failed to list output devices: {}", e)))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_input_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| RealtimeError::device("no default input device")),
        Some(name) => host
            .input_devices()
            .map_err(|e| RealtimeError::device(format!("Failed to list input devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| RealtimeError::device(format!("input device not found: {}", name))),
    }
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| RealtimeError::device("no default output device")),
        Some(name) => host
            .output_devices()
            .map_err(|e| RealtimeError::device(format!("Failed to list output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| RealtimeError::device(format!("output device not found: {}", name))),
    }
}

/// Build a stream on a dedicated thread and keep it alive until the
/// returned sender fires or is dropped.
async fn host_stream<F>(thread_name: &str, build: F) -> Result<(String, std::sync::mpsc::Sender<()>)>
where
    F: FnOnce() -> Result<(cpal::Stream, String)> + Send + 'static,
{
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

    std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Returns on an explicit stop or when the sender is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        })
        .map_err(|e| RealtimeError::device(format!("Failed to spawn audio thread: {}", e)))?;

    let name = ready_rx
        .await
        .map_err(|_| RealtimeError::device("audio thread exited before the stream started"))??;
    Ok((name, stop_tx))
}
