use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ConversationContext, Message};

/// Capability — the one narrow contract every dispatch target satisfies.
///
/// An LLM-backed agent, a plain function, and a manager agent all sit
/// behind this trait via thin adapters; the orchestrator never cares which.
pub trait Capability: Send + Sync + 'static {
    /// Stable identifier used in task specs, routes, and handoff chains.
    fn name(&self) -> &str;

    /// Execute with the given input against the current conversation.
    /// Rejection is treated as node/handoff failure by the caller.
    fn invoke<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: &'a ConversationContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>>;
}

/// Summarizer — collapses a message history into one summary string.
/// Only consulted under `ContextPolicy::Summary`.
pub trait Summarizer: Send + Sync + 'static {
    fn summarize(&self, messages: &[Message]) -> BoxFuture<'_, Result<String>>;
}

/// Telemetry sink — fire-and-forget event recording.
/// Passed in explicitly; the engine never reaches for a global.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, event: &str, attributes: serde_json::Value);
}

/// Adapter exposing a plain function as a [`Capability`].
pub struct FnCapability {
    name: String,
    func: Arc<dyn Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync>,
}

impl FnCapability {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(
        &'a self,
        input: serde_json::Value,
        _ctx: &'a ConversationContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        let func = self.func.clone();
        Box::pin(async move { func(input) })
    }
}
