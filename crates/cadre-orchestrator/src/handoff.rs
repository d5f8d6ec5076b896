use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cadre_core::config::OrchestratorConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::traits::{Capability, Summarizer, TelemetrySink};
use cadre_core::types::{ConversationContext, Message, TransferResult};

use crate::hooks::{HookCascade, HookContext};

/// How much conversation history crosses a handoff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Copy the entire message history.
    #[default]
    Full,
    /// Replace the history with a single summarizer-produced message.
    Summary,
    /// Start empty, with a system note naming the handoff reason.
    None,
    /// Copy only the most recent N messages.
    LastN { n: usize },
}

/// Filter predicate: false means silent no-handoff, not an error.
pub type HandoffFilter = Arc<dyn Fn(&ConversationContext) -> bool + Send + Sync>;

/// Per-handoff options; unset fields fall back to the controller config.
#[derive(Clone, Default)]
pub struct HandoffOptions {
    pub policy: ContextPolicy,
    pub timeout_secs: Option<u64>,
    pub max_depth: Option<usize>,
    pub reason: Option<String>,
    pub filter: Option<HandoffFilter>,
}

/// Transfers an in-flight conversation between capabilities under the
/// safety invariants: bounded depth, no chain revisits, bounded time.
///
/// The controller owns each context/chain pair only for the duration of a
/// transfer; it rewrites contexts rather than mutating them in place.
pub struct HandoffController {
    config: OrchestratorConfig,
    hooks: Arc<HookCascade>,
    telemetry: Arc<dyn TelemetrySink>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl HandoffController {
    pub fn new(
        config: OrchestratorConfig,
        hooks: Arc<HookCascade>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            hooks,
            telemetry,
            summarizer: None,
        }
    }

    /// Attach the summarizer consulted under `ContextPolicy::Summary`.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Attempt a transfer. `Ok(None)` means the handoff was declined (by
    /// filter or hook) and the source conversation proceeds normally.
    pub async fn handoff(
        &self,
        source: &ConversationContext,
        target: &Arc<dyn Capability>,
        options: &HandoffOptions,
    ) -> Result<Option<TransferResult>> {
        let target_name = target.name().to_string();

        let hook_ctx = HookContext::new("handoff")
            .with("target", serde_json::json!(target_name))
            .with("depth", serde_json::json!(source.handoff_depth));
        let execution = self.hooks.execute("handoff", hook_ctx).await;
        if execution.blocked {
            debug!(target = %target_name, "Handoff blocked by hook");
            return Ok(None);
        }
        if !execution.success {
            return Err(execution.error.unwrap_or_else(|| {
                CadreError::Config("hook cascade failed without error".into())
            }));
        }

        // 1. Depth
        let max_depth = options.max_depth.unwrap_or(self.config.max_handoff_depth);
        let depth = source.handoff_depth + 1;
        if depth > max_depth {
            return Err(CadreError::HandoffDepth { depth, max_depth });
        }

        // 2. Cycle: a capability may hold a conversation at most once
        if source.handoff_chain.iter().any(|id| id == &target_name) {
            let mut chain = source.handoff_chain.clone();
            chain.push(target_name);
            return Err(CadreError::HandoffCycle { chain });
        }

        // 3. Filter: false is a silent decline
        if let Some(ref filter) = options.filter {
            if !filter(source) {
                debug!(target = %target_name, "Handoff declined by filter");
                return Ok(None);
            }
        }

        let target_ctx = self.build_target_context(source, &target_name, options).await?;
        let input = source
            .messages
            .last()
            .map(|m| serde_json::Value::String(m.content.clone()))
            .unwrap_or(serde_json::Value::Null);

        info!(
            target = %target_name,
            depth,
            policy = ?options.policy,
            "Handing off conversation"
        );

        // 4. Timeout bounds the transfer including the target's execution
        let timeout_secs = options
            .timeout_secs
            .unwrap_or(self.config.handoff_timeout_secs);
        let budget = Duration::from_secs(timeout_secs);
        let output = match tokio::time::timeout(budget, target.invoke(input, &target_ctx)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                self.record_failed(&target_name, &e);
                return Err(e);
            }
            Err(_) => {
                let err = CadreError::HandoffTimeout {
                    timeout_secs,
                    target: target_name.clone(),
                };
                warn!(target = %target_name, timeout_secs, "Handoff timed out");
                self.record_failed(&target_name, &err);
                return Err(err);
            }
        };

        self.telemetry.record(
            "handoff_complete",
            serde_json::json!({ "target": target_name, "depth": depth }),
        );

        Ok(Some(TransferResult {
            output,
            chain: target_ctx.handoff_chain,
            depth,
        }))
    }

    /// Rewrite the source context into the target's, per policy.
    async fn build_target_context(
        &self,
        source: &ConversationContext,
        target_name: &str,
        options: &HandoffOptions,
    ) -> Result<ConversationContext> {
        let reason = options.reason.as_deref().unwrap_or("task transfer");

        let messages = match options.policy {
            ContextPolicy::Full => source.messages.clone(),
            ContextPolicy::Summary => {
                let summarizer = self.summarizer.as_ref().ok_or_else(|| {
                    CadreError::Config("summary context policy requires a summarizer".into())
                })?;
                let summary = summarizer.summarize(&source.messages).await?;
                vec![Message::system(format!("Conversation summary: {}", summary))]
            }
            ContextPolicy::None => {
                vec![Message::system(format!(
                    "Conversation handed off from {}: {}",
                    source.source.as_deref().unwrap_or("unknown"),
                    reason
                ))]
            }
            ContextPolicy::LastN { n } => {
                let n = if n == 0 { self.config.last_n_messages } else { n };
                let start = source.messages.len().saturating_sub(n);
                source.messages[start..].to_vec()
            }
        };

        let mut chain = source.handoff_chain.clone();
        chain.push(target_name.to_string());

        Ok(ConversationContext {
            messages,
            metadata: source.metadata.clone(),
            handoff_depth: source.handoff_depth + 1,
            handoff_chain: chain,
            source: Some(target_name.to_string()),
        })
    }

    fn record_failed(&self, target: &str, error: &CadreError) {
        self.telemetry.record(
            "handoff_failed",
            serde_json::json!({ "target": target, "error": error.to_string() }),
        );
    }
}
