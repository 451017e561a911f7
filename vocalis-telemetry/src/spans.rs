//! Span helpers for voice session operations.

use tracing::Span;

/// Create the span a voice session task runs in.
///
/// # Example
/// ```
/// use vocalis_telemetry::session_span;
/// let span = session_span("3f6c0d", "gemini");
/// let _enter = span.enter();
/// ```
pub fn session_span(session_id: &str, provider: &str) -> Span {
    tracing::info_span!(
        "voice.session",
        session.id = session_id,
        provider = provider,
        session.outcome = tracing::field::Empty
    )
}

/// Create a span for opening the provider channel.
pub fn connect_span(provider: &str) -> Span {
    tracing::info_span!("voice.connect", provider = provider)
}

/// Create a span for a single tool dispatch.
///
/// # Example
/// ```
/// use vocalis_telemetry::tool_dispatch_span;
/// let span = tool_dispatch_span("smartSearch", "t1");
/// let _enter = span.enter();
/// ```
pub fn tool_dispatch_span(tool_name: &str, call_id: &str) -> Span {
    tracing::info_span!("voice.tool", tool.name = tool_name, tool.call_id = call_id)
}

/// Record the final session state on the current span.
pub fn record_session_outcome(outcome: &str) {
    Span::current().record("session.outcome", outcome);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_construct_without_subscriber() {
        let span = session_span("s1", "mock");
        let _enter = span.enter();
        let tool = tool_dispatch_span("smartSearch", "t1");
        drop(tool);
        record_session_outcome("closed");
    }
}
