use std::sync::Arc;

use tracing::debug;

use cadre_core::config::OrchestratorConfig;
use cadre_core::error::Result;
use cadre_core::event::LogSink;
use cadre_core::traits::{Capability, Summarizer, TelemetrySink};
use cadre_core::types::{ConversationContext, TaskSpec, TransferResult};

use crate::engine::{CapabilityMap, ProcessMode, RunOptions, RunResult, WorkflowEngine};
use crate::graph::TaskGraph;
use crate::handoff::{HandoffController, HandoffOptions};
use crate::hooks::{HookCascade, HookHandler, HookId, HookOptions};
use crate::router::{Route, Router};

/// The externally visible multi-agent API.
///
/// Composes the workflow engine, handoff controller, router factory, and
/// hook cascade over one capability registry. Cascade, telemetry, and
/// config are constructed here and injected downward, so concurrent
/// orchestrators never share accidental mutable state.
pub struct Orchestrator {
    capabilities: CapabilityMap,
    hooks: Arc<HookCascade>,
    telemetry: Arc<dyn TelemetrySink>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            capabilities: CapabilityMap::new(),
            hooks: Arc::new(HookCascade::new()),
            telemetry: Arc::new(LogSink),
            summarizer: None,
            config,
        }
    }

    /// Swap in a telemetry sink (event bus, collector, test probe).
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Attach the summarizer used by summary-policy handoffs.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Register a capability under its own name. Capabilities are shared;
    /// the orchestrator holds handles, never ownership.
    pub fn register_capability(&mut self, capability: Arc<dyn Capability>) {
        debug!(name = %capability.name(), "Capability registered");
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    pub fn capability(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    pub fn hooks(&self) -> &Arc<HookCascade> {
        &self.hooks
    }

    /// Validate task specs into an executable graph. Configuration errors
    /// (duplicate ids, unknown dependencies, cycles) surface here, before
    /// any node executes.
    pub fn build_graph(&self, specs: Vec<TaskSpec>) -> Result<TaskGraph> {
        TaskGraph::build(specs)
    }

    /// Execute a graph under a process mode.
    pub async fn run_graph(
        &self,
        graph: TaskGraph,
        mode: ProcessMode,
        options: &RunOptions,
    ) -> RunResult {
        let engine = WorkflowEngine::new(
            self.config.clone(),
            self.hooks.clone(),
            self.telemetry.clone(),
        );
        engine.run(graph, mode, &self.capabilities, options).await
    }

    /// Register a hook handler on the shared cascade.
    pub fn register_hook(
        &self,
        event: impl Into<String>,
        handler: HookHandler,
        options: HookOptions,
    ) -> HookId {
        self.hooks.register(event, handler, options)
    }

    /// Build a router over the given routes; conditions are validated up
    /// front.
    pub fn create_router(
        &self,
        routes: Vec<Route>,
        default_capability: Option<String>,
    ) -> Result<Router> {
        Router::new(routes, default_capability)
    }

    /// Hand a conversation off to a registered capability.
    pub async fn handoff(
        &self,
        context: &ConversationContext,
        target: &str,
        options: &HandoffOptions,
    ) -> Result<Option<TransferResult>> {
        let capability = self
            .capability(target)
            .ok_or_else(|| cadre_core::error::CadreError::CapabilityNotFound(target.to_string()))?;

        let mut controller = HandoffController::new(
            self.config.clone(),
            self.hooks.clone(),
            self.telemetry.clone(),
        );
        if let Some(ref summarizer) = self.summarizer {
            controller = controller.with_summarizer(summarizer.clone());
        }
        controller.handoff(context, &capability, options).await
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}
