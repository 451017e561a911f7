//! Configuration types for voice sessions.

use crate::audio::{AudioFormat, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::error::{RealtimeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default length of an upstream microphone frame.
pub const DEFAULT_FRAME_DURATION_MS: u32 = 40;

/// Default time a tool handler may take before an error result is sent.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 10_000;

/// Default time allowed for the channel handshake.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;

/// Default number of microphone frames buffered ahead of the session loop.
pub const DEFAULT_CAPTURE_QUEUE_CAPACITY: usize = 32;

/// Capability declaration sent to the provider at session open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Capability name the provider will call, e.g. `smartSearch`.
    pub name: String,
    /// What the capability does, in words the model can use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Configuration for a voice session.
///
/// Every field has a default so a config can be loaded from a partial
/// document in any serde format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model to use (provider-specific).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// System instruction for the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    /// Prebuilt voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Output modalities, usually `["audio"]`.
    pub modalities: Vec<String>,

    /// Capabilities the provider may call.
    pub tools: Vec<ToolDefinition>,

    /// Text sent once the session becomes active, e.g. `"begin greeting"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_text: Option<String>,

    /// Sample rate of upstream microphone audio.
    pub input_sample_rate: u32,

    /// Sample rate of downstream speech audio.
    pub output_sample_rate: u32,

    /// Length of each upstream frame in milliseconds.
    pub frame_duration_ms: u32,

    /// Bound on a single tool dispatch in milliseconds.
    pub tool_timeout_ms: u64,

    /// Bound on the channel handshake in milliseconds.
    pub connect_timeout_ms: u64,

    /// Capacity of the capture-to-session frame queue.
    pub capture_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: None,
            instruction: None,
            voice: None,
            modalities: vec!["audio".to_string()],
            tools: Vec::new(),
            trigger_text: None,
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            frame_duration_ms: DEFAULT_FRAME_DURATION_MS,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            capture_queue_capacity: DEFAULT_CAPTURE_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for SessionConfig.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set output modalities.
    pub fn with_modalities(mut self, modalities: Vec<String>) -> Self {
        self.modalities = modalities;
        self
    }

    /// Add a tool definition.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Replace all tool definitions.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the text sent when the session becomes active.
    pub fn with_trigger_text(mut self, text: impl Into<String>) -> Self {
        self.trigger_text = Some(text.into());
        self
    }

    /// Set the upstream frame length.
    pub fn with_frame_duration(mut self, duration: Duration) -> Self {
        self.frame_duration_ms = duration.as_millis().min(u32::MAX as u128) as u32;
        self
    }

    /// Set the tool dispatch timeout.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the capture queue capacity.
    pub fn with_capture_queue_capacity(mut self, capacity: usize) -> Self {
        self.capture_queue_capacity = capacity;
        self
    }

    pub fn input_format(&self) -> AudioFormat {
        AudioFormat::new(self.input_sample_rate, 1)
    }

    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::new(self.output_sample_rate, 1)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms as u64)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Samples in one upstream frame.
    pub fn frame_samples(&self) -> usize {
        self.input_format().samples_for(self.frame_duration())
    }

    /// Check that every rate, duration and capacity is usable.
    pub fn validate(&self) -> Result<()> {
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(RealtimeError::config("sample rates must be non-zero"));
        }
        if self.frame_samples() == 0 {
            return Err(RealtimeError::config(format!(
                "frame duration of {} ms holds no samples at {} Hz",
                self.frame_duration_ms, self.input_sample_rate
            )));
        }
        if self.tool_timeout_ms == 0 {
            return Err(RealtimeError::config("tool timeout must be non-zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(RealtimeError::config("connect timeout must be non-zero"));
        }
        if self.capture_queue_capacity == 0 {
            return Err(RealtimeError::config("capture queue capacity must be non-zero"));
        }
        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(RealtimeError::config(format!("tool with empty name: {:?}", tool)));
        }
        Ok(())
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Builder for SessionConfig.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = Some(voice.into());
        self
    }

    /// Add a tool.
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.config.tools.push(tool);
        self
    }

    /// Set the trigger text.
    pub fn trigger_text(mut self, text: impl Into<String>) -> Self {
        self.config.trigger_text = Some(text.into());
        self
    }

    /// Set the tool dispatch timeout.
    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.input_sample_rate, 16_000);
        assert_eq!(config.output_sample_rate, 24_000);
        assert_eq!(config.frame_samples(), 640);
        assert_eq!(config.modalities, vec!["audio"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::builder()
            .model("gemini-2.0-flash-live-001")
            .voice("Kore")
            .trigger_text("begin greeting")
            .tool(ToolDefinition::new("smartSearch").with_description("Find records"))
            .tool_timeout(Duration::from_secs(3))
            .build();
        assert_eq!(config.voice.as_deref(), Some("Kore"));
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.tool_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(SessionConfig::new().with_capture_queue_capacity(0).validate().is_err());
        assert!(SessionConfig::new().with_tool_timeout(Duration::ZERO).validate().is_err());
        assert!(SessionConfig::new().with_frame_duration(Duration::ZERO).validate().is_err());
        let mut config = SessionConfig::new();
        config.output_sample_rate = 0;
        assert!(matches!(config.validate(), Err(RealtimeError::Config(_))));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"voice":"Puck","tool_timeout_ms":2500}"#).unwrap();
        assert_eq!(config.voice.as_deref(), Some("Puck"));
        assert_eq!(config.tool_timeout_ms, 2500);
        assert_eq!(config.frame_duration_ms, DEFAULT_FRAME_DURATION_MS);
    }
}
