use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cadre_core::config::OrchestratorConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::traits::{Capability, TelemetrySink};
use cadre_core::types::{ConversationContext, TaskStatus};

use crate::graph::TaskGraph;
use crate::hooks::{HookCascade, HookContext};

/// Scheduling discipline applied to a task graph.
#[derive(Debug, Clone)]
pub enum ProcessMode {
    /// One node at a time, topological order, declaration-order ties.
    Sequential,
    /// Every ready node dispatches as soon as its dependencies complete.
    Parallel,
    /// A manager capability turns the task list into a dispatch plan,
    /// which then executes under Sequential semantics.
    Hierarchical { manager: String },
}

/// Registered capabilities, shared and never owned by the engine.
pub type CapabilityMap = HashMap<String, Arc<dyn Capability>>;

/// Per-run options; unset fields fall back to the engine config.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub continue_on_error: Option<bool>,
    pub max_concurrency: Option<usize>,
    pub node_timeout_secs: Option<u64>,
    /// Used for nodes whose spec names no capability.
    pub default_capability: Option<String>,
    /// Cancelling prevents dispatch of not-yet-started nodes and aborts
    /// in-flight calls; completed results are retained.
    pub cancel: CancellationToken,
}

/// Outcome of one run. The per-node status map is always complete, even
/// when the run failed partway.
#[derive(Debug)]
pub struct RunResult {
    pub statuses: HashMap<String, TaskStatus>,
    pub results: HashMap<String, serde_json::Value>,
    pub success: bool,
    pub error: Option<CadreError>,
    pub elapsed_ms: u64,
}

/// Executes a validated task graph under a process mode.
///
/// The engine exclusively owns the graph's nodes for the duration of one
/// run; hook cascade and telemetry are injected, never global.
pub struct WorkflowEngine {
    hooks: Arc<HookCascade>,
    telemetry: Arc<dyn TelemetrySink>,
    config: OrchestratorConfig,
}

/// What the dispatch loop decided about a node before it ran.
enum Gate {
    Dispatch,
    Skip,
    Fail(CadreError),
}

impl WorkflowEngine {
    pub fn new(
        config: OrchestratorConfig,
        hooks: Arc<HookCascade>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            hooks,
            telemetry,
            config,
        }
    }

    /// Run the graph to completion (or terminal failure) under `mode`.
    pub async fn run(
        &self,
        graph: TaskGraph,
        mode: ProcessMode,
        capabilities: &CapabilityMap,
        options: &RunOptions,
    ) -> RunResult {
        let start = Instant::now();
        let result = match mode {
            ProcessMode::Sequential => {
                let order = graph.topo_order();
                self.run_ordered(graph, order, capabilities, options).await
            }
            ProcessMode::Parallel => self.run_parallel(graph, capabilities, options).await,
            ProcessMode::Hierarchical { manager } => {
                self.run_hierarchical(graph, &manager, capabilities, options)
                    .await
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.telemetry.record(
            "run_complete",
            serde_json::json!({
                "success": result.success,
                "elapsed_ms": elapsed_ms,
            }),
        );
        RunResult {
            elapsed_ms,
            ..result
        }
    }

    /// Sequential semantics over an explicit execution order.
    async fn run_ordered(
        &self,
        mut graph: TaskGraph,
        order: Vec<String>,
        capabilities: &CapabilityMap,
        options: &RunOptions,
    ) -> RunResult {
        let continue_on_error = options
            .continue_on_error
            .unwrap_or(self.config.continue_on_error);
        let ctx = ConversationContext::new();
        let mut first_error: Option<CadreError> = None;

        for id in order {
            if options.cancel.is_cancelled() {
                first_error.get_or_insert(CadreError::Cancelled);
                break;
            }

            match self.gate_node(&graph, &id, continue_on_error).await {
                Gate::Skip => {
                    self.mark(&mut graph, &id, TaskStatus::Skipped, None);
                    continue;
                }
                Gate::Fail(e) => {
                    // Hook failures under block_on_failure are always fatal
                    self.mark(&mut graph, &id, TaskStatus::Failed, None);
                    first_error.get_or_insert(e);
                    continue;
                }
                Gate::Dispatch => {}
            }

            let input = node_input(&graph, &id);
            let outcome = match self.resolve_capability(&graph, &id, capabilities, options) {
                Ok(cap) => {
                    self.mark(&mut graph, &id, TaskStatus::Running, None);
                    self.invoke_node(&id, cap, input, &ctx, options).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => {
                    self.mark(&mut graph, &id, TaskStatus::Completed, Some(value));
                }
                Err(e) => {
                    error!(node_id = %id, error = %e, "Task node failed");
                    self.mark(&mut graph, &id, TaskStatus::Failed, None);
                    // Recovered locally when continue_on_error is set
                    if !continue_on_error {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        finish(graph, first_error)
    }

    /// Batched Kahn's-algorithm dispatch: every node whose dependencies
    /// completed is dispatched as soon as a slot is free, and the ready set
    /// is recomputed whenever a running node finishes. Ready nodes past the
    /// concurrency bound dequeue FIFO by the time they became ready.
    async fn run_parallel(
        &self,
        mut graph: TaskGraph,
        capabilities: &CapabilityMap,
        options: &RunOptions,
    ) -> RunResult {
        let continue_on_error = options
            .continue_on_error
            .unwrap_or(self.config.continue_on_error);
        let bound = options
            .max_concurrency
            .or(self.config.max_concurrency)
            .unwrap_or(usize::MAX)
            .max(1);
        let ctx = ConversationContext::new();
        let mut first_error: Option<CadreError> = None;

        // Unmet dependency counts, declaration order for the initial batch
        let mut unmet: HashMap<String, usize> = HashMap::new();
        let mut ready: VecDeque<String> = VecDeque::new();
        for node in graph.nodes() {
            unmet.insert(node.spec.id.clone(), node.spec.depends_on.len());
            if node.spec.depends_on.is_empty() {
                ready.push_back(node.spec.id.clone());
            }
        }

        let mut in_flight: FuturesUnordered<
            BoxFuture<'_, (String, std::result::Result<serde_json::Value, CadreError>)>,
        > = FuturesUnordered::new();
        let mut cancelled = false;

        loop {
            // Fill free slots from the ready queue
            while !cancelled && in_flight.len() < bound {
                let Some(id) = ready.pop_front() else { break };
                if graph.node(&id).map(|n| n.status) != Some(TaskStatus::Pending) {
                    continue;
                }

                match self.gate_node(&graph, &id, continue_on_error).await {
                    Gate::Skip => {
                        self.mark(&mut graph, &id, TaskStatus::Skipped, None);
                        self.settle_dependents(
                            &mut graph,
                            &id,
                            &mut unmet,
                            &mut ready,
                            continue_on_error,
                        );
                        continue;
                    }
                    Gate::Fail(e) => {
                        self.mark(&mut graph, &id, TaskStatus::Failed, None);
                        first_error.get_or_insert(e);
                        self.settle_dependents(
                            &mut graph,
                            &id,
                            &mut unmet,
                            &mut ready,
                            continue_on_error,
                        );
                        continue;
                    }
                    Gate::Dispatch => {}
                }

                let cap = match self.resolve_capability(&graph, &id, capabilities, options) {
                    Ok(cap) => cap,
                    Err(e) => {
                        self.mark(&mut graph, &id, TaskStatus::Failed, None);
                        if !continue_on_error {
                            first_error.get_or_insert(e);
                        }
                        self.settle_dependents(
                            &mut graph,
                            &id,
                            &mut unmet,
                            &mut ready,
                            continue_on_error,
                        );
                        continue;
                    }
                };

                let input = node_input(&graph, &id);
                self.mark(&mut graph, &id, TaskStatus::Running, None);

                let node_id = id.clone();
                let timeout_secs = options
                    .node_timeout_secs
                    .unwrap_or(self.config.node_timeout_secs);
                let ctx_ref = &ctx;
                in_flight.push(Box::pin(async move {
                    let outcome = invoke_with_timeout(
                        &node_id,
                        cap.as_ref(),
                        input,
                        ctx_ref,
                        timeout_secs,
                    )
                    .await;
                    (node_id, outcome)
                }));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                _ = options.cancel.cancelled(), if !cancelled => {
                    info!("Run cancelled, aborting in-flight nodes");
                    cancelled = true;
                    first_error.get_or_insert(CadreError::Cancelled);
                    // Dropping the set aborts the in-flight invocations
                    in_flight.clear();
                    ready.clear();

                    // Aborted nodes must not read as still running
                    let aborted: Vec<String> = graph
                        .nodes()
                        .iter()
                        .filter(|n| n.status == TaskStatus::Running)
                        .map(|n| n.spec.id.clone())
                        .collect();
                    for id in aborted {
                        self.mark(&mut graph, &id, TaskStatus::Failed, None);
                    }
                }
                Some((id, outcome)) = in_flight.next() => {
                    match outcome {
                        Ok(value) => {
                            self.mark(&mut graph, &id, TaskStatus::Completed, Some(value));
                        }
                        Err(e) => {
                            error!(node_id = %id, error = %e, "Task node failed");
                            self.mark(&mut graph, &id, TaskStatus::Failed, None);
                            if !continue_on_error {
                                first_error.get_or_insert(e);
                            }
                        }
                    }
                    self.settle_dependents(
                        &mut graph,
                        &id,
                        &mut unmet,
                        &mut ready,
                        continue_on_error,
                    );
                }
            }
        }

        finish(graph, first_error)
    }

    /// Hierarchical: the manager capability receives the task list and
    /// answers with a dispatch plan, executed under Sequential semantics.
    async fn run_hierarchical(
        &self,
        graph: TaskGraph,
        manager: &str,
        capabilities: &CapabilityMap,
        options: &RunOptions,
    ) -> RunResult {
        let plan = match self.manager_plan(&graph, manager, capabilities).await {
            Ok(plan) => plan,
            Err(e) => return finish(graph, Some(e)),
        };
        let order = planned_order(&graph, plan);
        self.run_ordered(graph, order, capabilities, options).await
    }

    async fn manager_plan(
        &self,
        graph: &TaskGraph,
        manager: &str,
        capabilities: &CapabilityMap,
    ) -> Result<Vec<String>> {
        let cap = capabilities
            .get(manager)
            .ok_or_else(|| CadreError::CapabilityNotFound(manager.to_string()))?;

        let tasks: Vec<serde_json::Value> = graph
            .nodes()
            .iter()
            .map(|n| {
                serde_json::json!({
                    "id": n.spec.id,
                    "description": n.spec.description,
                    "depends_on": n.spec.depends_on,
                })
            })
            .collect();

        let ctx = ConversationContext::for_capability(manager);
        let output = cap
            .invoke(serde_json::json!({ "tasks": tasks }), &ctx)
            .await
            .map_err(|e| CadreError::NodeExecution {
                node_id: manager.to_string(),
                message: format!("manager dispatch failed: {}", e),
            })?;

        // Accept either a bare array of ids or {"plan": [...]}
        let ids = output
            .as_array()
            .cloned()
            .or_else(|| output.get("plan").and_then(|p| p.as_array()).cloned())
            .ok_or_else(|| CadreError::NodeExecution {
                node_id: manager.to_string(),
                message: "manager returned no dispatch plan".into(),
            })?;

        let mut plan = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id
                .as_str()
                .ok_or_else(|| CadreError::NodeExecution {
                    node_id: manager.to_string(),
                    message: format!("non-string task id in plan: {}", id),
                })?
                .to_string();
            if !graph.contains(&id) {
                return Err(CadreError::Config(format!(
                    "manager plan names unknown task '{}'",
                    id
                )));
            }
            if !plan.contains(&id) {
                plan.push(id);
            }
        }

        debug!(manager, plan_len = plan.len(), "Manager produced dispatch plan");
        Ok(plan)
    }

    /// Pre-dispatch gating: dependency outcomes, then the task_start hook.
    async fn gate_node(&self, graph: &TaskGraph, id: &str, continue_on_error: bool) -> Gate {
        let node = match graph.node(id) {
            Some(n) => n,
            None => return Gate::Fail(CadreError::Config(format!("unknown node '{}'", id))),
        };

        if !continue_on_error {
            let bad_dep = node.spec.depends_on.iter().any(|d| {
                matches!(
                    graph.node(d).map(|n| n.status),
                    Some(TaskStatus::Failed) | Some(TaskStatus::Skipped)
                )
            });
            if bad_dep {
                debug!(node_id = %id, "Skipping node with failed dependency");
                return Gate::Skip;
            }
        }

        let hook_ctx = HookContext::new("task_start")
            .with("node_id", serde_json::json!(id))
            .with("description", serde_json::json!(node.spec.description));
        let execution = self.hooks.execute("task_start", hook_ctx).await;
        if execution.blocked {
            warn!(node_id = %id, "task_start hook blocked node");
            return Gate::Skip;
        }
        if !execution.success {
            return Gate::Fail(execution.error.unwrap_or_else(|| {
                CadreError::Config("hook cascade failed without error".into())
            }));
        }
        Gate::Dispatch
    }

    fn resolve_capability(
        &self,
        graph: &TaskGraph,
        id: &str,
        capabilities: &CapabilityMap,
        options: &RunOptions,
    ) -> Result<Arc<dyn Capability>> {
        let node = graph
            .node(id)
            .ok_or_else(|| CadreError::Config(format!("unknown node '{}'", id)))?;
        let name = node
            .spec
            .capability
            .as_deref()
            .or(options.default_capability.as_deref())
            .ok_or_else(|| CadreError::NodeExecution {
                node_id: id.to_string(),
                message: "no capability assigned and no default configured".into(),
            })?;
        capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| CadreError::CapabilityNotFound(name.to_string()))
    }

    async fn invoke_node(
        &self,
        id: &str,
        cap: Arc<dyn Capability>,
        input: serde_json::Value,
        ctx: &ConversationContext,
        options: &RunOptions,
    ) -> Result<serde_json::Value> {
        let timeout_secs = options
            .node_timeout_secs
            .unwrap_or(self.config.node_timeout_secs);

        tokio::select! {
            _ = options.cancel.cancelled() => Err(CadreError::Cancelled),
            out = invoke_with_timeout(id, cap.as_ref(), input, ctx, timeout_secs) => out,
        }
    }

    /// Record a status transition and fire the task_complete hook for
    /// terminal states.
    fn mark(
        &self,
        graph: &mut TaskGraph,
        id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) {
        if let Some(node) = graph.node_mut(id) {
            node.status = status;
            if result.is_some() {
                node.result = result;
            }
        }
        if status != TaskStatus::Running {
            self.telemetry.record(
                "task_complete",
                serde_json::json!({ "node_id": id, "status": status }),
            );
        } else {
            info!(node_id = %id, "Executing task node");
            self.telemetry
                .record("task_start", serde_json::json!({ "node_id": id }));
        }
    }

    /// Decrement dependents' unmet counts after `id` reached a terminal
    /// state; newly satisfied nodes join the FIFO ready queue, and nodes
    /// doomed by a failed dependency are skipped transitively.
    fn settle_dependents(
        &self,
        graph: &mut TaskGraph,
        id: &str,
        unmet: &mut HashMap<String, usize>,
        ready: &mut VecDeque<String>,
        continue_on_error: bool,
    ) {
        let mut worklist = VecDeque::from([id.to_string()]);
        while let Some(done) = worklist.pop_front() {
            for dep_id in graph.dependents_of(&done) {
                if graph.node(&dep_id).map(|n| n.status) != Some(TaskStatus::Pending) {
                    continue;
                }
                let count = unmet.entry(dep_id.clone()).or_insert(0);
                *count = count.saturating_sub(1);
                if *count > 0 {
                    continue;
                }

                let doomed = !continue_on_error
                    && graph
                        .node(&dep_id)
                        .map(|n| {
                            n.spec.depends_on.iter().any(|d| {
                                matches!(
                                    graph.node(d).map(|n| n.status),
                                    Some(TaskStatus::Failed) | Some(TaskStatus::Skipped)
                                )
                            })
                        })
                        .unwrap_or(false);

                if doomed {
                    self.mark(graph, &dep_id, TaskStatus::Skipped, None);
                    worklist.push_back(dep_id);
                } else {
                    ready.push_back(dep_id);
                }
            }
        }
    }
}

/// Build a node's input from its spec and its dependencies' results.
/// Failed or skipped dependencies contribute null placeholders.
fn node_input(graph: &TaskGraph, id: &str) -> serde_json::Value {
    let node = match graph.node(id) {
        Some(n) => n,
        None => return serde_json::Value::Null,
    };
    let deps: serde_json::Map<String, serde_json::Value> = node
        .spec
        .depends_on
        .iter()
        .map(|d| {
            let result = graph
                .node(d)
                .and_then(|n| n.result.clone())
                .unwrap_or(serde_json::Value::Null);
            (d.clone(), result)
        })
        .collect();

    serde_json::json!({
        "description": node.spec.description,
        "dependencies": deps,
    })
}

async fn invoke_with_timeout(
    id: &str,
    cap: &dyn Capability,
    input: serde_json::Value,
    ctx: &ConversationContext,
    timeout_secs: u64,
) -> Result<serde_json::Value> {
    let budget = Duration::from_secs(timeout_secs);
    match tokio::time::timeout(budget, cap.invoke(input, ctx)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CadreError::NodeExecution {
            node_id: id.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(CadreError::NodeTimeout {
            node_id: id.to_string(),
            timeout_secs,
        }),
    }
}

/// Fold the finished graph into a run result. Ownership of the nodes ends
/// here; the graph is discarded.
///
/// Terminal errors were only recorded when the failure policy made them
/// fatal, so success reduces to "no terminal error". A run with failed
/// nodes under continue_on_error is completed-with-partial-failures.
fn finish(graph: TaskGraph, error: Option<CadreError>) -> RunResult {
    let mut statuses = HashMap::new();
    let mut results = HashMap::new();

    for node in graph.nodes() {
        statuses.insert(node.spec.id.clone(), node.status);
        if let Some(ref result) = node.result {
            results.insert(node.spec.id.clone(), result.clone());
        }
    }

    RunResult {
        statuses,
        results,
        success: error.is_none(),
        error,
        elapsed_ms: 0,
    }
}

/// Dependency-correct a manager plan: planned ids lead (deferred until
/// their dependencies are placed), omitted ids follow in declaration order.
fn planned_order(graph: &TaskGraph, plan: Vec<String>) -> Vec<String> {
    let mut pool: Vec<String> = plan;
    for node in graph.nodes() {
        if !pool.contains(&node.spec.id) {
            pool.push(node.spec.id.clone());
        }
    }

    let mut placed: Vec<String> = Vec::with_capacity(pool.len());
    while placed.len() < pool.len() {
        let next = pool
            .iter()
            .find(|id| {
                !placed.contains(id)
                    && graph
                        .node(id)
                        .map(|n| n.spec.depends_on.iter().all(|d| placed.contains(d)))
                        .unwrap_or(false)
            })
            .cloned()
            .expect("validated graph is acyclic");
        placed.push(next);
    }
    placed
}
