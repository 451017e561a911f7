//! # Vocalis Telemetry
//!
//! Structured logging for the Vocalis voice engine using `tracing`.
//!
//! ## Usage
//!
//! ```rust
//! use vocalis_telemetry::{init_telemetry, info, session_span};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry("clinic-voice")?;
//!
//!     let span = session_span("session-1", "gemini");
//!     let _enter = span.enter();
//!     info!("session started");
//!     Ok(())
//! }
//! ```

pub mod init;
pub mod spans;

// Re-export tracing macros for convenience
pub use tracing::{Instrument, Span, debug, error, info, instrument, trace, warn};

pub use init::{LogFormat, init_telemetry, init_with_format};
pub use spans::*;
