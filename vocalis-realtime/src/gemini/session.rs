use super::protocol::{self, GeminiClientMessage};
use crate::channel::VoiceChannel;
use crate::config::SessionConfig;
use crate::error::{RealtimeError, Result};
use crate::events::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::connect_async;
use url::Url;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;
type WsSource = futures::stream::SplitStream<WsStream>;

/// Read half plus messages already translated but not yet handed out.
struct Inbound {
    source: WsSource,
    pending: VecDeque<ServerMessage>,
}

/// Gemini Live session.
///
/// Manages a WebSocket connection to Google's Gemini Live API.
pub struct GeminiChannel {
    session_id: String,
    connected: AtomicBool,
    closing: AtomicBool,
    sender: Mutex<WsSink>,
    inbound: Mutex<Inbound>,
    call_names: parking_lot::Mutex<HashMap<String, String>>,
}

impl GeminiChannel {
    /// Open the WebSocket, send the setup message and wait for
    /// `setupComplete`.
    ///
    /// `endpoint` carries the credentials; it is never logged.
    pub(crate) async fn connect(endpoint: Url, config: &SessionConfig) -> Result<Self> {
        let request = endpoint.as_str().into_client_request().map_err(|e| {
            RealtimeError::channel_open(format!("Failed to create client request: {}", e))
        })?;
        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| RealtimeError::channel_open(format!("WebSocket connect error: {}", e)))?;

        let (sink, source) = stream.split();
        let channel = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            connected: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            sender: Mutex::new(sink),
            inbound: Mutex::new(Inbound { source, pending: VecDeque::new() }),
            call_names: parking_lot::Mutex::new(HashMap::new()),
        };

        tracing::info!(model_id = ?config.model, "Sending setup message");
        channel
            .send_raw(&protocol::setup_message(config))
            .await
            .map_err(|e| RealtimeError::channel_open(e.to_string()))?;
        channel.await_setup_complete().await?;
        Ok(channel)
    }

    async fn await_setup_complete(&self) -> Result<()> {
        let mut inbound = self.inbound.lock().await;
        loop {
            let Some(raw) = inbound.source.next().await else {
                return Err(RealtimeError::channel_open("connection closed during setup"));
            };
            let text = match raw {
                Ok(Message::Text(text)) => text.as_str().to_string(),
                Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(Message::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                    return Err(RealtimeError::channel_open(format!("setup rejected: {}", reason)));
                }
                Ok(_) => continue,
                Err(e) => return Err(RealtimeError::channel_open(format!("Receive error: {}", e))),
            };
            let messages = protocol::server_messages(&text)
                .map_err(|e| RealtimeError::channel_open(e.to_string()))?;
            self.remember_calls(&messages);
            let mut ready = false;
            for message in messages {
                if matches!(message, ServerMessage::SetupComplete {}) {
                    ready = true;
                } else {
                    inbound.pending.push_back(message);
                }
            }
            if ready {
                tracing::debug!(session_id = %self.session_id, "Gemini setup complete");
                return Ok(());
            }
        }
    }

    /// Send a raw message.
    async fn send_raw(&self, value: &GeminiClientMessage) -> Result<()> {
        let msg = serde_json::to_string(value)
            .map_err(|e| RealtimeError::protocol(format!("JSON serialize error: {}", e)))?;

        let mut sender = self.sender.lock().await;
        sender.send(Message::Text(msg.into())).await.map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            RealtimeError::connection(format!("Send error: {}", e))
        })
    }

    fn remember_calls(&self, messages: &[ServerMessage]) {
        let mut names = self.call_names.lock();
        for message in messages {
            if let ServerMessage::ToolCall(call) = message {
                names.insert(call.id.clone(), call.name.clone());
            }
        }
    }
}

#[async_trait]
impl VoiceChannel for GeminiChannel {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(RealtimeError::SessionClosed);
        }
        let tool_name = match &message {
            ClientMessage::ToolResponse(result) => self.call_names.lock().remove(&result.id),
            _ => None,
        };
        self.send_raw(&protocol::client_message(message, tool_name)).await
    }

    async fn next_message(&self) -> Option<Result<ServerMessage>> {
        let mut inbound = self.inbound.lock().await;
        loop {
            if let Some(message) = inbound.pending.pop_front() {
                return Some(Ok(message));
            }
            if !self.is_connected() {
                return None;
            }

            let text = match inbound.source.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => text.to_string(),
                    Err(e) => {
                        return Some(Err(RealtimeError::protocol(format!(
                            "Invalid UTF-8 in binary message: {}",
                            e
                        ))));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    self.connected.store(false, Ordering::SeqCst);
                    tracing::debug!(frame = ?frame, "Gemini closed the session");
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    if self.closing.load(Ordering::SeqCst) {
                        return None;
                    }
                    return Some(Err(RealtimeError::ChannelClosedUnexpectedly(format!(
                        "Receive error: {}",
                        e
                    ))));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    if self.closing.load(Ordering::SeqCst) {
                        return None;
                    }
                    return Some(Err(RealtimeError::ChannelClosedUnexpectedly(
                        "stream ended without a close frame".to_string(),
                    )));
                }
            };

            match protocol::server_messages(&text) {
                Ok(messages) => {
                    self.remember_calls(&messages);
                    inbound.pending.extend(messages);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.connected.store(false, Ordering::SeqCst);

        let mut sender = self.sender.lock().await;
        sender
            .send(Message::Close(None))
            .await
            .map_err(|e| RealtimeError::connection(format!("Close error: {}", e)))
    }
}

impl std::fmt::Debug for GeminiChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiChannel")
            .field("session_id", &self.session_id)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}
