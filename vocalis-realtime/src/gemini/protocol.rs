//! Gemini Live wire format and its translation to engine messages.

use crate::audio::WireBlob;
use crate::config::{SessionConfig, ToolDefinition};
use crate::error::{RealtimeError, Result};
use crate::events::{ClientMessage, Role, ServerMessage, ToolInvocation, ToolResult, Transcript};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::DEFAULT_MODEL;

// ── Client → Gemini ─────────────────────────────────────────────────────

/// Gemini-specific client message format. Exactly one field is set.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<GeminiSetup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<GeminiRealtimeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_response: Option<GeminiToolResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_content: Option<GeminiClientContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiSetup {
    model: String,
    generation_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiClientContent {
    turns: Vec<GeminiContent>,
    turn_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireBlob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRealtimeInput {
    media_chunks: Vec<WireBlob>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolResponse {
    function_responses: Vec<GeminiFunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiFunctionResponse {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    response: Value,
}

/// Build the `setup` message sent once at connect.
pub(crate) fn setup_message(config: &SessionConfig) -> GeminiClientMessage {
    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    let model =
        if model.starts_with("models/") { model.to_string() } else { format!("models/{}", model) };

    let modalities: Vec<String> = config.modalities.iter().map(|m| m.to_uppercase()).collect();
    let mut generation_config = json!({ "responseModalities": modalities });
    if let Some(voice) = &config.voice {
        generation_config["speechConfig"] = json!({
            "voiceConfig": {
                "prebuiltVoiceConfig": {
                    "voiceName": voice
                }
            }
        });
    }

    let system_instruction = config.instruction.as_ref().map(|text| GeminiContent {
        role: None,
        parts: vec![GeminiPart { text: Some(text.clone()), inline_data: None }],
    });

    GeminiClientMessage {
        setup: Some(GeminiSetup {
            model,
            generation_config,
            system_instruction,
            tools: convert_tools(&config.tools),
            output_audio_transcription: Some(json!({})),
        }),
        ..Default::default()
    }
}

/// Translate an engine message into Gemini's format.
///
/// `tool_name` is the name of the call a tool result answers, when known.
pub(crate) fn client_message(
    message: ClientMessage,
    tool_name: Option<String>,
) -> GeminiClientMessage {
    match message {
        ClientMessage::Audio(blob) => GeminiClientMessage {
            realtime_input: Some(GeminiRealtimeInput { media_chunks: vec![blob] }),
            ..Default::default()
        },
        ClientMessage::Text(text) => GeminiClientMessage {
            client_content: Some(GeminiClientContent {
                turns: vec![GeminiContent {
                    role: Some("user".to_string()),
                    parts: vec![GeminiPart { text: Some(text), inline_data: None }],
                }],
                turn_complete: true,
            }),
            ..Default::default()
        },
        ClientMessage::ToolResponse(ToolResult { id, result }) => {
            // Gemini requires an object payload.
            let response = match result {
                Value::Object(_) => result,
                other => json!({ "result": other }),
            };
            GeminiClientMessage {
                tool_response: Some(GeminiToolResponse {
                    function_responses: vec![GeminiFunctionResponse {
                        id,
                        name: tool_name,
                        response,
                    }],
                }),
                ..Default::default()
            }
        }
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<Value>> {
    if tools.is_empty() {
        return None;
    }
    let function_declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description.clone().unwrap_or_default(),
                "parameters": t.parameters.clone().unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
            })
        })
        .collect();

    Some(vec![json!({ "functionDeclarations": function_declarations })])
}

// ── Gemini → Client ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<GeminiServerContent>,
    tool_call: Option<GeminiToolCall>,
    tool_call_cancellation: Option<GeminiToolCallCancellation>,
    go_away: Option<GeminiGoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiServerContent {
    model_turn: Option<GeminiContent>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
    input_transcription: Option<GeminiTranscription>,
    output_transcription: Option<GeminiTranscription>,
}

#[derive(Debug, Deserialize)]
struct GeminiTranscription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolCall {
    #[serde(default)]
    function_calls: Vec<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct GeminiToolCallCancellation {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGoAway {
    time_left: Option<String>,
}

/// Translate one Gemini message into zero or more engine messages, in order.
///
/// Messages with only unrecognized fields (usage metadata, resumption
/// updates) yield nothing.
pub(crate) fn server_messages(raw: &str) -> Result<Vec<ServerMessage>> {
    let msg: GeminiServerMessage = serde_json::from_str(raw)
        .map_err(|e| RealtimeError::protocol(format!("Parse error: {}", e)))?;

    let mut out = Vec::new();

    if msg.setup_complete.is_some() {
        out.push(ServerMessage::SetupComplete {});
    }

    if let Some(content) = msg.server_content {
        if content.interrupted {
            out.push(ServerMessage::Interrupted(true));
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    out.push(ServerMessage::Audio(blob));
                } else if let Some(text) = part.text {
                    out.push(ServerMessage::Transcript(Transcript { text, role: Role::Model }));
                }
            }
        }
        if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
            out.push(ServerMessage::Transcript(Transcript { text: t.text, role: Role::User }));
        }
        if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
            out.push(ServerMessage::Transcript(Transcript { text: t.text, role: Role::Model }));
        }
        if content.turn_complete {
            out.push(ServerMessage::TurnComplete(true));
        }
    }

    if let Some(tool_call) = msg.tool_call {
        for call in tool_call.function_calls {
            let (Some(id), Some(name)) = (call.id, call.name) else {
                return Err(RealtimeError::protocol("function call without id or name"));
            };
            out.push(ServerMessage::ToolCall(ToolInvocation {
                id,
                name,
                args: call.args.unwrap_or_default(),
            }));
        }
    }

    if let Some(cancellation) = msg.tool_call_cancellation {
        out.push(ServerMessage::ToolCallCancellation { ids: cancellation.ids });
    }

    if let Some(go_away) = msg.go_away {
        out.push(ServerMessage::GoAway { time_left: go_away.time_left });
    }

    Ok(out)
}
