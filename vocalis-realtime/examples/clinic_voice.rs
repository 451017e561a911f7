//! Clinic Receptionist Voice Demo
//!
//! Talks to Gemini Live through the default microphone and speaker. The
//! model greets the caller, looks patients up with `smartSearch` and books
//! visits with `bookAppointment`.
//!
//! # Usage
//!
//! ```bash
//! export GOOGLE_API_KEY="your-api-key"
//! cargo run --example clinic_voice --features gemini,desktop-audio
//! ```
//!
//! Press Ctrl+C to hang up.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vocalis_realtime::desktop::{CpalCaptureDevice, CpalPlaybackDevice};
use vocalis_realtime::gemini::GeminiConnector;
use vocalis_realtime::{
    RealtimeError, SessionConfig, SessionController, SessionState, ToolDefinition, ToolRegistry,
};

const INSTRUCTION: &str = "You are the receptionist of a small family clinic. Greet the caller, \
ask for their full name, look them up with smartSearch and offer to book an appointment. \
Keep answers short and friendly.";

/// In-memory patient list standing in for the clinic database.
const PATIENTS: &[(&str, &str)] = &[("P001", "Juan Perez"), ("P002", "Maria Gomez")];

fn clinic_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();

    tools.register_fn(
        ToolDefinition::new("smartSearch")
            .with_description("Find a patient by full name")
            .with_parameters(json!({
                "type": "object",
                "properties": { "query": { "type": "string", "description": "Patient full name" } },
                "required": ["query"]
            })),
        |call| {
            let query = call
                .str_arg("query")
                .ok_or_else(|| RealtimeError::tool("missing query"))?
                .to_lowercase();
            let hit = PATIENTS.iter().find(|(_, name)| name.to_lowercase().contains(&query));
            Ok(match hit {
                Some((id, name)) => json!({ "found": true, "id": id, "name": name }),
                None => json!({ "found": false }),
            })
        },
    );

    tools.register_async(
        ToolDefinition::new("bookAppointment")
            .with_description("Book the next free slot for a patient")
            .with_parameters(json!({
                "type": "object",
                "properties": { "patientId": { "type": "string" } },
                "required": ["patientId"]
            })),
        |call| async move {
            // Pretend to talk to the scheduling backend.
            tokio::time::sleep(Duration::from_millis(300)).await;
            let patient = call.str_arg("patientId").unwrap_or("unknown").to_string();
            Ok(json!({ "booked": true, "patientId": patient, "slot": "tomorrow 09:30" }))
        },
    );

    tools
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    vocalis_telemetry::init_telemetry("clinic-voice")
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    let config = SessionConfig::builder()
        .instruction(INSTRUCTION)
        .voice("Kore")
        .trigger_text("begin greeting")
        .tool_timeout(Duration::from_secs(5))
        .build();

    let controller = SessionController::new(
        config,
        Arc::new(GeminiConnector::from_env()?),
        Arc::new(CpalCaptureDevice::new()),
        Arc::new(CpalPlaybackDevice::new()),
    )
    .with_tools(clinic_tools());

    let session = controller.start().await?;
    info!(session_id = session.session_id(), "Call started, press Ctrl+C to hang up");

    let mut states = session.subscribe();
    let mut meter = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Hanging up");
                break;
            }
            changed = states.changed() => {
                let state = states.borrow_and_update().clone();
                if changed.is_err() || state.is_terminal() {
                    warn!(state = %state, "Call ended by the remote side");
                    break;
                }
            }
            _ = meter.tick() => {
                if session.state() == SessionState::Active {
                    info!(level = %format!("{:.3}", session.amplitude()), "Microphone");
                }
            }
        }
    }

    session.stop().await;
    info!(state = %session.state(), "Session finished");
    Ok(())
}
