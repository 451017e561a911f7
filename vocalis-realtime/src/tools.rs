//! Tool dispatch for provider-initiated capability calls.
//!
//! The engine never interprets tool arguments or results. It routes each
//! [`ToolInvocation`] to a [`ToolDispatcher`], bounds the wait, and relays
//! exactly one [`ToolResult`] back.

use crate::config::ToolDefinition;
use crate::error::{RealtimeError, Result};
use crate::events::{ToolInvocation, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Routes tool calls to whatever implements them.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Execute a call and return its JSON result.
    async fn dispatch(&self, call: &ToolInvocation) -> Result<Value>;
}

/// A shared dispatcher.
pub type SharedDispatcher = Arc<dyn ToolDispatcher>;

/// Handler for a single named capability.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute a tool call and return the result.
    async fn execute(&self, call: &ToolInvocation) -> Result<Value>;
}

/// A simple function-based tool handler.
pub struct FnToolHandler<F>
where
    F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync,
{
    handler: F,
}

impl<F> FnToolHandler<F>
where
    F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync,
{
    /// Create a new function-based tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, call: &ToolInvocation) -> Result<Value> {
        (self.handler)(call)
    }
}

/// Async function-based tool handler.
pub struct AsyncToolHandler<F, Fut>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    handler: F,
}

impl<F, Fut> AsyncToolHandler<F, Fut>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    /// Create a new async tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for AsyncToolHandler<F, Fut>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, call: &ToolInvocation) -> Result<Value> {
        (self.handler)(call.clone()).await
    }
}

/// Name-keyed set of tool handlers together with their declarations.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, Arc<dyn ToolHandler>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `definition.name`, replacing any previous one.
    pub fn register(&mut self, definition: ToolDefinition, handler: impl ToolHandler + 'static) {
        self.tools.insert(definition.name.clone(), (definition, Arc::new(handler)));
    }

    /// Register a synchronous function.
    pub fn register_fn<F>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(definition, FnToolHandler::new(handler));
    }

    /// Register an async function.
    pub fn register_async<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(definition, AsyncToolHandler::new(handler));
    }

    /// Builder-style [`Self::register_fn`].
    pub fn with_fn<F>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_fn(definition, handler);
        self
    }

    /// Declarations to announce at session open, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|(def, _)| def.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, call: &ToolInvocation) -> Result<Value> {
        match self.tools.get(&call.name) {
            Some((_, handler)) => handler.execute(call).await,
            None => Err(RealtimeError::tool(format!("Unknown tool: {}", call.name))),
        }
    }
}

/// Run `call` through `dispatcher`, never waiting longer than `timeout`.
///
/// Always produces a result for the call: handler errors and timeouts become
/// `{"error": "..."}` payloads so the provider is never left waiting.
pub async fn dispatch_with_timeout(
    dispatcher: &dyn ToolDispatcher,
    call: &ToolInvocation,
    timeout: Duration,
) -> ToolResult {
    let span = vocalis_telemetry::tool_dispatch_span(&call.name, &call.id);
    async {
        match tokio::time::timeout(timeout, dispatcher.dispatch(call)).await {
            Ok(Ok(value)) => {
                tracing::debug!("Tool call completed");
                ToolResult::new(&call.id, value)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Tool call failed");
                ToolResult::error(&call.id, e)
            }
            Err(_) => {
                let e = RealtimeError::ToolDispatchTimeout {
                    name: call.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                tracing::warn!(error = %e, "Tool call timed out");
                ToolResult::error(&call.id, e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Bookkeeping that guarantees each call id is answered exactly once.
#[derive(Debug, Default)]
pub struct ToolLedger {
    pending: HashSet<String>,
    answered: HashSet<String>,
}

impl ToolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new invocation. A reused id is a protocol error.
    pub fn open(&mut self, call: &ToolInvocation) -> Result<()> {
        if self.pending.contains(&call.id) || self.answered.contains(&call.id) {
            return Err(RealtimeError::protocol(format!("duplicate tool call id: {}", call.id)));
        }
        self.pending.insert(call.id.clone());
        Ok(())
    }

    /// Record that a result is about to be sent for `id`.
    ///
    /// Fails for ids that were already answered or never opened.
    pub fn resolve(&mut self, id: &str) -> Result<()> {
        if self.pending.remove(id) {
            self.answered.insert(id.to_string());
            Ok(())
        } else if self.answered.contains(id) {
            Err(RealtimeError::protocol(format!("duplicate tool result for call: {}", id)))
        } else {
            Err(RealtimeError::protocol(format!("tool result for unknown call: {}", id)))
        }
    }

    /// Drop a pending call the provider no longer wants answered.
    ///
    /// Returns `false` when the call was already answered or unknown.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.pending.remove(id)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn answered_len(&self) -> usize {
        self.answered.len()
    }
}
