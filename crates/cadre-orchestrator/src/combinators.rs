use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use cadre_core::condition::Condition;
use cadre_core::error::{CadreError, Result};
use cadre_core::traits::Capability;
use cadre_core::types::ConversationContext;

/// Result of a loop run. `results` holds successful outputs in input
/// order; `errors` holds every failed iteration. Partial progress is
/// never dropped.
#[derive(Debug, Default)]
pub struct LoopResult {
    pub results: Vec<serde_json::Value>,
    pub errors: Vec<CadreError>,
    pub success: bool,
}

/// Iterates a named collection in the input, invoking the target once per
/// element.
pub struct LoopBlock {
    target: Arc<dyn Capability>,
    /// Key naming the collection in the input object.
    over: String,
    /// Key under which each element reaches the target.
    var_name: String,
    /// Keep iterating past element failures, reporting partial results.
    continue_on_error: bool,
    /// In-flight bound; 1 means strictly sequential.
    max_concurrency: usize,
}

impl LoopBlock {
    pub fn new(target: Arc<dyn Capability>, over: impl Into<String>) -> Self {
        Self {
            target,
            over: over.into(),
            var_name: "item".into(),
            continue_on_error: false,
            max_concurrency: 1,
        }
    }

    pub fn with_var_name(mut self, name: impl Into<String>) -> Self {
        self.var_name = name.into();
        self
    }

    pub fn with_continue_on_error(mut self, flag: bool) -> Self {
        self.continue_on_error = flag;
        self
    }

    pub fn with_max_concurrency(mut self, bound: usize) -> Self {
        self.max_concurrency = bound.max(1);
        self
    }

    /// Run the loop. A missing or non-array collection is a configuration
    /// error; element failures are handled per `continue_on_error`.
    pub async fn run(
        &self,
        input: &serde_json::Value,
        ctx: &ConversationContext,
    ) -> Result<LoopResult> {
        let items = input
            .get(&self.over)
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                CadreError::Config(format!("loop input '{}' is not a collection", self.over))
            })?
            .clone();

        debug!(over = %self.over, count = items.len(), "Running loop");

        let mut result = LoopResult {
            success: true,
            ..Default::default()
        };

        // buffered() preserves input order while keeping up to
        // max_concurrency invocations in flight
        let target = &self.target;
        let var_name = &self.var_name;
        let mut outcomes = stream::iter(items.into_iter().map(|item| async move {
            let mut element = serde_json::Map::new();
            element.insert(var_name.clone(), item);
            target.invoke(serde_json::Value::Object(element), ctx).await
        }))
        .buffered(self.max_concurrency);

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(value) => result.results.push(value),
                Err(e) => {
                    warn!(error = %e, "Loop iteration failed");
                    result.errors.push(e);
                    result.success = false;
                    if !self.continue_on_error {
                        break;
                    }
                }
            }
        }

        Ok(result)
    }
}

/// A conditional branch inside a [`RouteBlock`].
pub struct Branch {
    pub condition: Condition,
    pub target: Arc<dyn Capability>,
}

impl Branch {
    pub fn new(condition: Condition, target: Arc<dyn Capability>) -> Self {
        Self { condition, target }
    }
}

/// Evaluates branch conditions in declaration order and executes the first
/// truthy branch exactly once.
pub struct RouteBlock {
    branches: Vec<Branch>,
    default: Option<Arc<dyn Capability>>,
}

impl RouteBlock {
    pub fn new(branches: Vec<Branch>) -> Self {
        Self {
            branches,
            default: None,
        }
    }

    pub fn with_default(mut self, target: Arc<dyn Capability>) -> Self {
        self.default = Some(target);
        self
    }

    /// No matching branch and no default is a configuration error.
    pub async fn run(
        &self,
        input: &serde_json::Value,
        ctx: &ConversationContext,
    ) -> Result<serde_json::Value> {
        let text = match input {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let target = self
            .branches
            .iter()
            .find(|b| b.condition.matches(&text, Some(ctx)))
            .map(|b| &b.target)
            .or(self.default.as_ref())
            .ok_or(CadreError::NoMatchingRoute)?;

        debug!(target = %target.name(), "Route branch selected");
        target.invoke(input.clone(), ctx).await
    }
}
