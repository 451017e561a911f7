//! Session lifecycle: acquisition, the session loop and teardown.
//!
//! ```text
//!   Idle ──start()──▶ Connecting ──handshake ok──▶ Active ──stop / error──▶ Closing ──▶ Closed
//!                         │
//!                         └──acquisition failed──▶ Failed(reason)
//! ```
//!
//! A started session is a single tokio task that owns the channel, the
//! capture handle and the playback scheduler. It serializes microphone
//! frames, downstream messages and control events in one `select!` loop, so
//! none of that state is ever shared. Tool calls run on their own tasks and
//! report back through the control queue, so a slow tool never holds up
//! playback or shutdown.

use crate::audio::AudioFrame;
use crate::capture::{AmplitudeMeter, CaptureDevice, CaptureHandle, InputCapture, QueueSink};
use crate::channel::{BoxedChannel, ChannelConnector};
use crate::codec;
use crate::config::SessionConfig;
use crate::error::{RealtimeError, Result};
use crate::events::{ClientMessage, ServerMessage, ToolResult};
use crate::playback::{FinishNotifier, PlaybackDevice, PlaybackScheduler, UnitId};
use crate::tools::{SharedDispatcher, ToolLedger, ToolRegistry, dispatch_with_timeout};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Lifecycle state of a session, published through a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closing,
    Closed,
    /// Acquisition failed; nothing is held.
    Failed(String),
}

impl SessionState {
    /// `Closed` and `Failed` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Why an active session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`SessionHandle::stop`] was called or the handle was dropped.
    Stopped,
    /// The provider closed the channel with a close handshake.
    RemoteClosed,
    /// The channel failed or the remote side vanished.
    ConnectionLost(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::RemoteClosed => f.write_str("remote closed"),
            Self::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
        }
    }
}

/// Commands and notifications delivered to the session task.
enum Control {
    UnitFinished(UnitId),
    ToolFinished(ToolResult),
    SendText(String, oneshot::Sender<Result<()>>),
    Interrupt(oneshot::Sender<usize>),
    Stop,
}

/// Everything a live session holds. Exists only while the session is active.
struct ActiveResources {
    channel: BoxedChannel,
    capture: CaptureHandle,
    scheduler: PlaybackScheduler,
    channel_closed: bool,
}

impl ActiveResources {
    /// Release everything in order. Each step runs regardless of the others
    /// and repeated calls release nothing twice.
    async fn teardown(&mut self, close_timeout: Duration) {
        let flushed = self.scheduler.flush();
        tracing::debug!(flushed, "Playback flushed");

        self.capture.close();

        if !self.channel_closed {
            self.channel_closed = true;
            match tokio::time::timeout(close_timeout, self.channel.close()).await {
                Ok(Ok(())) => tracing::debug!("Channel closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Channel close failed"),
                Err(_) => tracing::warn!("Channel close timed out"),
            }
        }

        self.scheduler.close();
    }
}

/// Builds and starts voice sessions.
///
/// # Example
///
/// ```rust,ignore
/// let controller = SessionController::new(config, connector, microphone, speaker)
///     .with_tools(registry);
/// let mut states = controller.subscribe();
/// let session = controller.start().await?;
/// session.stop().await;
/// ```
pub struct SessionController {
    config: SessionConfig,
    connector: Arc<dyn ChannelConnector>,
    capture: Arc<dyn CaptureDevice>,
    playback: Arc<dyn PlaybackDevice>,
    dispatcher: SharedDispatcher,
    state_tx: watch::Sender<SessionState>,
}

impl SessionController {
    /// Create a controller in the `Idle` state.
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn ChannelConnector>,
        capture: Arc<dyn CaptureDevice>,
        playback: Arc<dyn PlaybackDevice>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            config,
            connector,
            capture,
            playback,
            dispatcher: Arc::new(ToolRegistry::new()),
            state_tx,
        }
    }

    /// Route tool calls to `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: SharedDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Route tool calls to `registry` and declare its tools to the provider.
    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        for def in registry.definitions() {
            if !self.config.tools.iter().any(|t| t.name == def.name) {
                self.config.tools.push(def);
            }
        }
        self.dispatcher = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Observe state changes, including the outcome of [`Self::start`].
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Acquire the channel, microphone and speaker and start the session.
    ///
    /// The three are opened concurrently. If any fails the others are
    /// cancelled, whatever was acquired is released, the state becomes
    /// `Failed` and the error is returned.
    pub async fn start(self) -> Result<SessionHandle> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let provider = self.connector.provider().to_string();
        let span = vocalis_telemetry::session_span(&session_id, &provider);

        let state_tx = self.state_tx.clone();
        let fail = move |e: RealtimeError| {
            tracing::error!(error = %e, "Session failed to start");
            vocalis_telemetry::record_session_outcome("failed");
            state_tx.send_replace(SessionState::Failed(e.to_string()));
            e
        };

        if let Err(e) = self.config.validate() {
            return Err(span.in_scope(|| fail(e)));
        }

        self.state_tx.send_replace(SessionState::Connecting);
        let meter = AmplitudeMeter::new();
        let (frame_tx, frame_rx) = mpsc::channel(self.config.capture_queue_capacity);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let acquired = async {
            tracing::info!(provider = %provider, "Starting voice session");
            let input = InputCapture::new(
                self.config.input_sample_rate,
                self.config.frame_duration(),
                meter.clone(),
                QueueSink::new(frame_tx),
            );
            let connect = async {
                match tokio::time::timeout(
                    self.config.connect_timeout(),
                    self.connector.connect(&self.config),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RealtimeError::channel_open(format!(
                        "handshake timed out after {} ms",
                        self.config.connect_timeout_ms
                    ))),
                }
            }
            .instrument(vocalis_telemetry::connect_span(&provider));

            tokio::try_join!(
                connect,
                self.capture.open(input),
                self.playback.open(self.config.output_format())
            )
        }
        .instrument(span.clone())
        .await;

        let (channel, capture, output) = match acquired {
            Ok(resources) => resources,
            Err(e) => return Err(span.in_scope(|| fail(e))),
        };

        let notifier: FinishNotifier = {
            let tx = control_tx.clone();
            Arc::new(move |id| {
                let _ = tx.send(Control::UnitFinished(id));
            })
        };
        let mut resources = ActiveResources {
            channel,
            capture,
            scheduler: PlaybackScheduler::new(output, notifier),
            channel_closed: false,
        };

        if let Some(text) = self.config.trigger_text.clone() {
            let sent = resources.channel.send(ClientMessage::Text(text)).instrument(span.clone()).await;
            if let Err(e) = sent {
                resources.teardown(self.config.connect_timeout()).instrument(span.clone()).await;
                return Err(span.in_scope(|| fail(e)));
            }
        }

        self.state_tx.send_replace(SessionState::Active);
        span.in_scope(|| tracing::info!("Voice session active"));

        let state_rx = self.state_tx.subscribe();
        let task = SessionTask {
            resources,
            frame_rx,
            control_rx,
            control_tx: control_tx.clone(),
            dispatcher: self.dispatcher,
            ledger: ToolLedger::new(),
            in_flight: HashMap::new(),
            config: self.config,
            state_tx: self.state_tx,
            meter: meter.clone(),
        };
        let join = tokio::spawn(task.run().instrument(span));

        Ok(SessionHandle { session_id, commands: control_tx, state_rx, meter, task: Some(join) })
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("provider", &self.connector.provider())
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

/// The session loop.
struct SessionTask {
    resources: ActiveResources,
    frame_rx: mpsc::Receiver<AudioFrame>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    control_tx: mpsc::UnboundedSender<Control>,
    dispatcher: SharedDispatcher,
    ledger: ToolLedger,
    /// Dispatches still running, keyed by call id.
    in_flight: HashMap<String, JoinHandle<()>>,
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    meter: AmplitudeMeter,
}

impl SessionTask {
    async fn run(mut self) -> CloseReason {
        let reason = loop {
            let step = tokio::select! {
                biased;
                Some(control) = self.control_rx.recv() => self.handle_control(control).await,
                inbound = self.resources.channel.next_message() => self.handle_inbound(inbound).await,
                Some(frame) = self.frame_rx.recv() => self.handle_frame(frame).await,
            };
            if let Some(reason) = step {
                break reason;
            }
        };

        tracing::info!(reason = %reason, "Closing voice session");
        self.state_tx.send_replace(SessionState::Closing);
        self.frame_rx.close();
        if !self.in_flight.is_empty() {
            tracing::debug!(count = self.in_flight.len(), "Abandoning running tool calls");
        }
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
        self.resources.teardown(self.config.connect_timeout()).await;
        self.meter.reset();
        self.state_tx.send_replace(SessionState::Closed);
        vocalis_telemetry::record_session_outcome("closed");
        reason
    }

    async fn handle_control(&mut self, control: Control) -> Option<CloseReason> {
        match control {
            Control::UnitFinished(id) => {
                self.resources.scheduler.complete(id);
                None
            }
            Control::ToolFinished(result) => self.answer_tool(result).await,
            Control::SendText(text, ack) => {
                let result = self.resources.channel.send(ClientMessage::Text(text)).await;
                let exit = lost(&result);
                let _ = ack.send(result);
                exit
            }
            Control::Interrupt(ack) => {
                let _ = ack.send(self.resources.scheduler.flush());
                None
            }
            Control::Stop => Some(CloseReason::Stopped),
        }
    }

    async fn handle_frame(&mut self, frame: AudioFrame) -> Option<CloseReason> {
        let result = self.resources.channel.send(ClientMessage::Audio(codec::encode_frame(&frame))).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Failed to send microphone frame");
        }
        lost(&result)
    }

    async fn handle_inbound(
        &mut self,
        inbound: Option<Result<ServerMessage>>,
    ) -> Option<CloseReason> {
        let message = match inbound {
            None => return Some(CloseReason::RemoteClosed),
            Some(Err(e)) if e.is_fatal() => return Some(CloseReason::ConnectionLost(e.to_string())),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Ignoring malformed provider message");
                return None;
            }
            Some(Ok(message)) => message,
        };

        tracing::trace!(kind = message.kind(), "Received provider message");
        match message {
            ServerMessage::Audio(blob) => {
                if !blob.is_pcm() {
                    tracing::warn!(mime_type = %blob.mime_type, "Dropping non-PCM audio chunk");
                    return None;
                }
                let decoded = blob
                    .playback_rate(self.config.output_sample_rate)
                    .and_then(|rate| codec::decode(&blob, rate, 1));
                match decoded {
                    Ok(frame) => {
                        if let Err(e) = self.resources.scheduler.enqueue(frame) {
                            tracing::warn!(error = %e, "Failed to schedule audio");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping malformed audio chunk"),
                }
                None
            }
            ServerMessage::Interrupted(true) => {
                let flushed = self.resources.scheduler.flush();
                tracing::debug!(flushed, "Provider interrupted playback");
                None
            }
            ServerMessage::Interrupted(false) => None,
            ServerMessage::ToolCall(call) => {
                if let Err(e) = self.ledger.open(&call) {
                    tracing::warn!(error = %e, "Ignoring tool call");
                    return None;
                }
                tracing::info!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
                let dispatcher = Arc::clone(&self.dispatcher);
                let timeout = self.config.tool_timeout();
                let reply = ToolReply::new(&call.id, self.control_tx.clone());
                let id = call.id.clone();
                let task = tokio::spawn(
                    async move {
                        let result = dispatch_with_timeout(dispatcher.as_ref(), &call, timeout).await;
                        reply.deliver(result);
                    }
                    .in_current_span(),
                );
                self.in_flight.insert(id, task);
                None
            }
            ServerMessage::ToolCallCancellation { ids } => {
                for id in ids {
                    if self.ledger.cancel(&id) {
                        if let Some(task) = self.in_flight.remove(&id) {
                            task.abort();
                        }
                        tracing::debug!(call_id = %id, "Tool call cancelled");
                    } else {
                        tracing::debug!(call_id = %id, "Cancellation for answered call ignored");
                    }
                }
                None
            }
            ServerMessage::TurnComplete(_) => {
                tracing::debug!("Model turn complete");
                None
            }
            ServerMessage::Transcript(transcript) => {
                tracing::debug!(role = ?transcript.role, text = %transcript.text, "Transcript");
                None
            }
            ServerMessage::GoAway { time_left } => {
                tracing::info!(time_left = ?time_left, "Provider will close the session soon");
                None
            }
            ServerMessage::SetupComplete {} => None,
        }
    }

    async fn answer_tool(&mut self, result: ToolResult) -> Option<CloseReason> {
        if self.in_flight.remove(&result.id).is_none() {
            tracing::debug!(call_id = %result.id, "Discarding result of cancelled tool call");
            return None;
        }
        if let Err(e) = self.ledger.resolve(&result.id) {
            tracing::warn!(error = %e, "Dropping tool result");
            return None;
        }
        let sent = self.resources.channel.send(ClientMessage::ToolResponse(result)).await;
        if let Err(e) = &sent {
            tracing::warn!(error = %e, "Failed to send tool result");
        }
        lost(&sent)
    }
}

/// Carries a dispatch result back to the session loop.
///
/// A dispatch task that dies without a result, for example because its
/// handler panicked, still produces an error reply for its call.
struct ToolReply {
    id: String,
    tx: mpsc::UnboundedSender<Control>,
    delivered: bool,
}

impl ToolReply {
    fn new(id: &str, tx: mpsc::UnboundedSender<Control>) -> Self {
        Self { id: id.to_string(), tx, delivered: false }
    }

    fn deliver(mut self, result: ToolResult) {
        self.delivered = true;
        let _ = self.tx.send(Control::ToolFinished(result));
    }
}

impl Drop for ToolReply {
    fn drop(&mut self) {
        if !self.delivered {
            let error = RealtimeError::tool("tool call ended without a result");
            let _ = self.tx.send(Control::ToolFinished(ToolResult::error(&self.id, error)));
        }
    }
}

/// Map a send result to a close reason when the failure ends the session.
fn lost(result: &Result<()>) -> Option<CloseReason> {
    match result {
        Err(e) if e.is_fatal() => Some(CloseReason::ConnectionLost(e.to_string())),
        _ => None,
    }
}

/// Handle to a running session.
///
/// Dropping the handle stops the session.
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::UnboundedSender<Control>,
    state_rx: watch::Receiver<SessionState>,
    meter: AmplitudeMeter,
    task: Option<JoinHandle<CloseReason>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Latest microphone RMS level in [0, 1].
    pub fn amplitude(&self) -> f32 {
        self.meter.level()
    }

    /// Shared meter for UI threads that poll without the handle.
    pub fn meter(&self) -> AmplitudeMeter {
        self.meter.clone()
    }

    /// Send a text turn.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(Control::SendText(text.into(), ack))
            .map_err(|_| RealtimeError::SessionClosed)?;
        rx.await.map_err(|_| RealtimeError::SessionClosed)?
    }

    /// Discard all queued speech locally. Returns the number of units stopped.
    pub async fn interrupt(&self) -> Result<usize> {
        let (ack, rx) = oneshot::channel();
        self.commands.send(Control::Interrupt(ack)).map_err(|_| RealtimeError::SessionClosed)?;
        rx.await.map_err(|_| RealtimeError::SessionClosed)
    }

    /// Stop the session and wait until teardown completes. Idempotent.
    pub async fn stop(&self) {
        let _ = self.commands.send(Control::Stop);
        let mut state_rx = self.state_rx.clone();
        let _ = state_rx.wait_for(SessionState::is_terminal).await;
    }

    /// Wait for the session to end on its own and report why.
    pub async fn wait(mut self) -> CloseReason {
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                CloseReason::ConnectionLost(format!("session task ended abnormally: {}", e))
            }),
            None => CloseReason::Stopped,
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(Control::Stop);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.session_id)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Closed.is_terminal());
        assert!(SessionState::Failed("no mic".into()).is_terminal());
        assert!(!SessionState::Closing.is_terminal());
        assert!(!SessionState::Idle.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Active.to_string(), "active");
        assert_eq!(SessionState::Failed("no mic".into()).to_string(), "failed: no mic");
        assert_eq!(CloseReason::ConnectionLost("reset".into()).to_string(), "connection lost: reset");
    }

    #[test]
    fn test_lost_only_for_fatal_errors() {
        assert_eq!(lost(&Ok(())), None);
        assert_eq!(lost(&Err(RealtimeError::protocol("bad"))), None);
        assert!(matches!(
            lost(&Err(RealtimeError::connection("reset"))),
            Some(CloseReason::ConnectionLost(_))
        ));
    }
}
