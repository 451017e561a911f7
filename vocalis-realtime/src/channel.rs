//! The duplex channel to a speech provider.

use crate::audio::WireBlob;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::events::{ClientMessage, ServerMessage, ToolResult};
use async_trait::async_trait;

/// An open, bidirectional session with a speech provider.
///
/// Methods take `&self`; implementations synchronize internally so one task
/// can wait on [`VoiceChannel::next_message`] while sending.
///
/// # Example
///
/// ```rust,ignore
/// use vocalis_realtime::{ServerMessage, VoiceChannel};
///
/// async fn drain(channel: &dyn VoiceChannel) -> vocalis_realtime::Result<()> {
///     while let Some(message) = channel.next_message().await {
///         if let ServerMessage::ToolCall(call) = message? {
///             channel.send_tool_response(ToolResult::new(call.id, json!({}))).await?;
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait VoiceChannel: Send + Sync {
    /// Provider-assigned or locally generated session identifier.
    fn session_id(&self) -> &str;

    /// Whether the channel is still open.
    fn is_connected(&self) -> bool;

    /// Send a message upstream.
    async fn send(&self, message: ClientMessage) -> Result<()>;

    /// Send a microphone frame.
    async fn send_audio(&self, blob: WireBlob) -> Result<()> {
        self.send(ClientMessage::Audio(blob)).await
    }

    /// Send a text turn.
    async fn send_text(&self, text: &str) -> Result<()> {
        self.send(ClientMessage::Text(text.to_string())).await
    }

    /// Send a tool result.
    async fn send_tool_response(&self, result: ToolResult) -> Result<()> {
        self.send(ClientMessage::ToolResponse(result)).await
    }

    /// Get the next downstream message.
    ///
    /// Returns `None` after a graceful close and
    /// `Some(Err(RealtimeError::ChannelClosedUnexpectedly(_)))` when the
    /// remote side went away without one. Must be cancel-safe: dropping the
    /// future before it resolves loses no message.
    async fn next_message(&self) -> Option<Result<ServerMessage>>;

    /// Close the channel with a close handshake. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// A boxed channel for dynamic dispatch.
pub type BoxedChannel = Box<dyn VoiceChannel>;

/// Opens channels to one provider.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Provider name used in logs and spans.
    fn provider(&self) -> &str;

    /// Connect and complete the setup handshake for `config`.
    ///
    /// Fails with [`crate::RealtimeError::ChannelOpen`] when the provider is
    /// unreachable or rejects the setup.
    async fn connect(&self, config: &SessionConfig) -> Result<BoxedChannel>;
}
