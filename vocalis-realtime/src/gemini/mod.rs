//! Gemini Live API provider.
//!
//! Connects to Google's WebSocket-based Live API and translates between its
//! wire format and [`ClientMessage`](crate::ClientMessage) /
//! [`ServerMessage`](crate::ServerMessage).
//!
//! - Input audio: 16kHz mono PCM
//! - Output audio: 24kHz mono PCM
//! - Server-side voice activity detection; barge-in arrives as
//!   `serverContent.interrupted`
//!
//! # Example
//!
//! ```rust,ignore
//! use vocalis_realtime::gemini::GeminiConnector;
//!
//! let connector = GeminiConnector::new(std::env::var("GOOGLE_API_KEY")?);
//! let controller = SessionController::new(config, Arc::new(connector), mic, speaker);
//! ```

mod protocol;
mod session;

pub use session::GeminiChannel;

use crate::channel::{BoxedChannel, ChannelConnector};
use crate::config::SessionConfig;
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Gemini Live API WebSocket endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model for Gemini Live.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// Available voices for Gemini Live (varies by model).
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Opens Gemini Live sessions with an API key.
#[derive(Clone)]
pub struct GeminiConnector {
    api_key: SecretString,
    endpoint: String,
}

impl GeminiConnector {
    /// Create a connector for the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { api_key: SecretString::from(api_key.into()), endpoint: GEMINI_LIVE_URL.to_string() }
    }

    /// Read the key from `GOOGLE_API_KEY`, falling back to `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map(Self::new)
            .map_err(|_| RealtimeError::config("GOOGLE_API_KEY or GEMINI_API_KEY must be set"))
    }

    /// Use a different WebSocket endpoint, e.g. a regional proxy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| RealtimeError::config(format!("invalid Gemini endpoint: {}", e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RealtimeError::config(format!(
                "Gemini endpoint must use ws or wss, got {}",
                url.scheme()
            )));
        }
        url.query_pairs_mut().append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }
}

impl std::fmt::Debug for GeminiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConnector").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

#[async_trait]
impl ChannelConnector for GeminiConnector {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn connect(&self, config: &SessionConfig) -> Result<BoxedChannel> {
        let url = self.request_url()?;
        let channel = GeminiChannel::connect(url, config).await?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_carries_key() {
        let url = GeminiConnector::new("secret-key").request_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert!(url.query_pairs().any(|(k, v)| k == "key" && v == "secret-key"));
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", GeminiConnector::new("secret-key"));
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_rejects_non_websocket_endpoint() {
        let connector = GeminiConnector::new("k").with_endpoint("https://example.com/live");
        assert!(matches!(connector.request_url(), Err(RealtimeError::Config(_))));
    }
}
