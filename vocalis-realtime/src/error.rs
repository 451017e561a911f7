//! Error types for the voice engine.

use thiserror::Error;

/// Result type for voice engine operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur while running a voice session.
///
/// Acquisition failures (`DeviceUnavailable`, `ChannelOpen`) are fatal to the
/// session. Per-message failures (`Decode`, `ToolDispatchTimeout`, `Tool`) are
/// handled inside the session loop and never tear it down.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Microphone or speaker could not be opened.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Handshake with the remote provider failed.
    #[error("Channel open error: {0}")]
    ChannelOpen(String),

    /// A downstream audio blob was malformed.
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// The tool handler did not respond in time.
    #[error("Tool dispatch timed out after {timeout_ms} ms: {name}")]
    ToolDispatchTimeout {
        /// Name of the capability that timed out.
        name: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The remote side closed without a close handshake.
    #[error("Channel closed unexpectedly: {0}")]
    ChannelClosedUnexpectedly(String),

    /// Send or receive failure on an open channel.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed provider message or tool-result bookkeeping violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tool handler returned an error.
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation on a session that already closed.
    #[error("Session already closed")]
    SessionClosed,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    /// Create a new channel-open error.
    pub fn channel_open<S: Into<String>>(msg: S) -> Self {
        Self::ChannelOpen(msg.into())
    }

    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a new tool error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::Tool(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_)
                | Self::ChannelOpen(_)
                | Self::ChannelClosedUnexpectedly(_)
                | Self::Connection(_)
                | Self::SessionClosed
        )
    }
}
