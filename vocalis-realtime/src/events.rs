//! Messages exchanged with the speech provider.
//!
//! This is the provider-neutral contract the session controller speaks.
//! Transports translate it to and from their own wire format. Every message
//! serializes as a single-key JSON object, e.g. `{"audio": {...}}` or
//! `{"toolResponse": {"id": "t1", "result": {...}}}`.

use crate::audio::WireBlob;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Upstream ────────────────────────────────────────────────────────────

/// Messages sent from the engine to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// A microphone frame.
    Audio(WireBlob),
    /// A text turn, typically the trigger that starts the greeting.
    Text(String),
    /// The result of a tool call.
    ToolResponse(ToolResult),
}

impl ClientMessage {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Audio(_) => "audio",
            Self::Text(_) => "text",
            Self::ToolResponse(_) => "toolResponse",
        }
    }
}

// ── Downstream ──────────────────────────────────────────────────────────

/// Messages received from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    /// The provider accepted the session setup.
    SetupComplete {},
    /// A chunk of synthesized speech.
    Audio(WireBlob),
    /// The user barged in; pending speech must be discarded.
    Interrupted(bool),
    /// The model finished its turn.
    TurnComplete(bool),
    /// A capability invocation awaiting a result.
    ToolCall(ToolInvocation),
    /// Previously issued tool calls that no longer need results.
    ToolCallCancellation {
        /// Ids of the cancelled calls.
        ids: Vec<String>,
    },
    /// Transcription of either side of the conversation.
    Transcript(Transcript),
    /// The provider will close the connection soon.
    GoAway {
        /// Remaining time as reported by the provider, e.g. `"10s"`.
        #[serde(rename = "timeLeft", default, skip_serializing_if = "Option::is_none")]
        time_left: Option<String>,
    },
}

impl ServerMessage {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetupComplete {} => "setupComplete",
            Self::Audio(_) => "audio",
            Self::Interrupted(_) => "interrupted",
            Self::TurnComplete(_) => "turnComplete",
            Self::ToolCall(_) => "toolCall",
            Self::ToolCallCancellation { .. } => "toolCallCancellation",
            Self::Transcript(_) => "transcript",
            Self::GoAway { .. } => "goAway",
        }
    }
}

/// A capability invocation requested by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Request id, echoed back in the result.
    pub id: String,
    /// Capability name.
    pub name: String,
    /// Arguments keyed by parameter name.
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolInvocation {
    /// Create an invocation with no arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), args: Map::new() }
    }

    /// Add an argument.
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Look up an argument.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }

    /// Look up a string argument.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Arguments as a single JSON object.
    pub fn args_value(&self) -> Value {
        Value::Object(self.args.clone())
    }
}

/// The answer to a [`ToolInvocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the invocation being answered.
    pub id: String,
    /// Result payload.
    pub result: Value,
}

impl ToolResult {
    /// Create a new result.
    pub fn new(id: impl Into<String>, result: Value) -> Self {
        Self { id: id.into(), result }
    }

    /// Create an error result the model can read.
    pub fn error(id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::new(id, serde_json::json!({ "error": message.to_string() }))
    }

    /// Whether this result carries an error payload.
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }
}

/// Who produced a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A transcription fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub role: Role,
}
