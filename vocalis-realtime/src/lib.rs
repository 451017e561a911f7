//! # vocalis-realtime
//!
//! Full-duplex voice sessions against a remote conversational model.
//!
//! A session streams microphone audio up as PCM16 frames, plays the
//! model's audio replies back gaplessly, answers tool calls the model makes
//! mid-conversation, and drops queued speech the moment the model reports
//! that the user barged in.
//!
//! ## Architecture
//!
//! ```text
//!   mic ──▶ InputCapture ──frames──▶ ┌───────────────────┐ ──ClientMessage──▶
//!                                     │ SessionController │                    VoiceChannel
//!   speaker ◀── PlaybackScheduler ◀── └───────────────────┘ ◀──ServerMessage──
//!                                             │
//!                                       ToolDispatcher
//! ```
//!
//! - [`codec`]: float ⇄ PCM16 conversion and base64 wire blobs
//! - [`capture`]: fixed-size mono frames from arbitrary device buffers
//! - [`playback`]: gapless scheduling on a monotonic clock, flush on barge-in
//! - [`controller`]: session lifecycle, message routing and teardown
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vocalis_realtime::{SessionConfig, SessionController, ToolDefinition, ToolRegistry};
//! use vocalis_realtime::desktop::{CpalCaptureDevice, CpalPlaybackDevice};
//! use vocalis_realtime::gemini::GeminiConnector;
//!
//! let tools = ToolRegistry::new().with_fn(
//!     ToolDefinition::new("smartSearch").with_description("Look up a patient"),
//!     |_call| Ok(serde_json::json!({ "found": true, "id": "P001" })),
//! );
//!
//! let handle = SessionController::new(
//!     SessionConfig::default().with_instruction("You are a clinic receptionist."),
//!     Arc::new(GeminiConnector::from_env()?),
//!     Arc::new(CpalCaptureDevice::new()),
//!     Arc::new(CpalPlaybackDevice::new()),
//! )
//! .with_tools(tools)
//! .start()
//! .await?;
//!
//! tokio::signal::ctrl_c().await?;
//! handle.stop().await;
//! ```

pub mod audio;
pub mod capture;
pub mod channel;
pub mod clock;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod playback;
pub mod tools;

// Transports and devices
#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "desktop-audio")]
pub mod desktop;

// Re-exports
pub use audio::{AudioFormat, AudioFrame, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, WireBlob};
pub use capture::{AmplitudeMeter, CaptureDevice, CaptureHandle, FrameSink, InputCapture, QueueSink};
pub use channel::{BoxedChannel, ChannelConnector, VoiceChannel};
pub use clock::{ManualClock, PlaybackClock, SampleClock, SharedClock, WallClock};
pub use config::{SessionConfig, SessionConfigBuilder, ToolDefinition};
pub use controller::{CloseReason, SessionController, SessionHandle, SessionState};
pub use error::{RealtimeError, Result};
pub use events::{ClientMessage, Role, ServerMessage, ToolInvocation, ToolResult, Transcript};
pub use playback::{
    BoxedOutput, CompletionHook, PlaybackDevice, PlaybackOutput, PlaybackScheduler, ScheduledUnit,
    UnitId,
};
pub use tools::{ToolDispatcher, ToolLedger, ToolRegistry, dispatch_with_timeout};
