use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use cadre_core::config::OrchestratorConfig;
use cadre_core::error::{CadreError, Result};
use cadre_core::traits::{Capability, FnCapability};
use cadre_core::types::{ConversationContext, TaskSpec, TaskStatus};
use cadre_orchestrator::{
    HookOptions, HookVerdict, Orchestrator, ProcessMode, RunOptions,
};

/// Capability that records invocation order and echoes its own name.
struct Recorder {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl Recorder {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Capability> {
        Arc::new(Self {
            name: name.into(),
            log,
            fail: false,
        })
    }

    fn failing(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<dyn Capability> {
        Arc::new(Self {
            name: name.into(),
            log,
            fail: true,
        })
    }
}

impl Capability for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(
        &'a self,
        _input: serde_json::Value,
        _ctx: &'a ConversationContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(self.name.clone());
            if self.fail {
                Err(CadreError::NodeExecution {
                    node_id: self.name.clone(),
                    message: "deliberate failure".into(),
                })
            } else {
                Ok(serde_json::json!(self.name))
            }
        })
    }
}

/// Capability that waits on a barrier: only releases if its peers are in
/// flight at the same time.
struct BarrierCap {
    name: String,
    barrier: Arc<tokio::sync::Barrier>,
}

impl Capability for BarrierCap {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(
        &'a self,
        _input: serde_json::Value,
        _ctx: &'a ConversationContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            self.barrier.wait().await;
            Ok(serde_json::json!(self.name))
        })
    }
}

/// Capability that announces it started, then sleeps far past any budget.
struct Staller {
    name: String,
    started: Arc<tokio::sync::Notify>,
}

impl Capability for Staller {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke<'a>(
        &'a self,
        _input: serde_json::Value,
        _ctx: &'a ConversationContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        Box::pin(async move {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(serde_json::Value::Null)
        })
    }
}

fn spec(id: &str, cap: &str, deps: &[&str]) -> TaskSpec {
    TaskSpec::new(id, format!("task {}", id))
        .with_capability(cap)
        .with_depends_on(deps.iter().map(|s| s.to_string()).collect())
}

#[tokio::test]
async fn sequential_respects_dependency_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    for name in ["research", "write", "review"] {
        orch.register_capability(Recorder::new(name, log.clone()));
    }

    // Declared out of order on purpose
    let graph = orch
        .build_graph(vec![
            spec("review", "review", &["write"]),
            spec("write", "write", &["research"]),
            spec("research", "research", &[]),
        ])
        .expect("valid graph");

    let result = orch
        .run_graph(graph, ProcessMode::Sequential, &RunOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["research", "write", "review"],
        "dependency completion must precede dependent start"
    );
    assert_eq!(result.statuses.len(), 3);
    assert!(result
        .statuses
        .values()
        .all(|s| *s == TaskStatus::Completed));
}

#[tokio::test]
async fn parallel_dispatches_independent_nodes_together() {
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    let mut orch = Orchestrator::default();
    for name in ["left", "right"] {
        orch.register_capability(Arc::new(BarrierCap {
            name: name.into(),
            barrier: barrier.clone(),
        }));
    }

    let graph = orch
        .build_graph(vec![spec("left", "left", &[]), spec("right", "right", &[])])
        .expect("valid graph");

    // Would deadlock (and hit the timeout) if the engine serialized them
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orch.run_graph(graph, ProcessMode::Parallel, &RunOptions::default()),
    )
    .await
    .expect("independent ready nodes must run in one batch");

    assert!(result.success);
}

#[tokio::test]
async fn parallel_never_starts_before_dependencies_complete() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    for name in ["a", "b", "join"] {
        orch.register_capability(Recorder::new(name, log.clone()));
    }

    let graph = orch
        .build_graph(vec![
            spec("a", "a", &[]),
            spec("b", "b", &[]),
            spec("join", "join", &["a", "b"]),
        ])
        .expect("valid graph");

    let result = orch
        .run_graph(graph, ProcessMode::Parallel, &RunOptions::default())
        .await;

    assert!(result.success);
    let order = log.lock().unwrap().clone();
    let join_pos = order.iter().position(|n| n == "join").unwrap();
    assert!(join_pos > order.iter().position(|n| n == "a").unwrap());
    assert!(join_pos > order.iter().position(|n| n == "b").unwrap());
}

#[tokio::test]
async fn failed_node_skips_dependents() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    orch.register_capability(Recorder::failing("broken", log.clone()));
    orch.register_capability(Recorder::new("after", log.clone()));
    orch.register_capability(Recorder::new("independent", log.clone()));

    let graph = orch
        .build_graph(vec![
            spec("broken", "broken", &[]),
            spec("after", "after", &["broken"]),
            spec("independent", "independent", &[]),
        ])
        .expect("valid graph");

    let result = orch
        .run_graph(graph, ProcessMode::Sequential, &RunOptions::default())
        .await;

    assert!(!result.success);
    assert!(result.error.is_some());
    assert_eq!(result.statuses["broken"], TaskStatus::Failed);
    assert_eq!(result.statuses["after"], TaskStatus::Skipped);
    // Unrelated branches still run, and the full status map is reported
    assert_eq!(result.statuses["independent"], TaskStatus::Completed);
    assert!(!log.lock().unwrap().contains(&"after".to_string()));
}

#[tokio::test]
async fn continue_on_error_substitutes_null_placeholder() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen_input = Arc::new(Mutex::new(serde_json::Value::Null));
    let seen = seen_input.clone();

    let mut orch = Orchestrator::default();
    orch.register_capability(Recorder::failing("broken", log.clone()));
    orch.register_capability(Arc::new(FnCapability::new("probe", move |input| {
        *seen.lock().unwrap() = input.clone();
        Ok(serde_json::json!("done"))
    })));

    let graph = orch
        .build_graph(vec![
            spec("broken", "broken", &[]),
            spec("after", "probe", &["broken"]),
        ])
        .expect("valid graph");

    let options = RunOptions {
        continue_on_error: Some(true),
        ..Default::default()
    };
    let result = orch
        .run_graph(graph, ProcessMode::Sequential, &options)
        .await;

    // Completed with partial failures
    assert!(result.success);
    assert_eq!(result.statuses["broken"], TaskStatus::Failed);
    assert_eq!(result.statuses["after"], TaskStatus::Completed);
    assert_eq!(
        seen_input.lock().unwrap()["dependencies"]["broken"],
        serde_json::Value::Null
    );
}

#[tokio::test]
async fn hierarchical_runs_manager_plan_sequentially() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    for name in ["draft", "polish"] {
        orch.register_capability(Recorder::new(name, log.clone()));
    }
    // Manager reverses the declared order; no edges constrain it
    orch.register_capability(Arc::new(FnCapability::new("manager", |_input| {
        Ok(serde_json::json!(["polish", "draft"]))
    })));

    let graph = orch
        .build_graph(vec![spec("draft", "draft", &[]), spec("polish", "polish", &[])])
        .expect("valid graph");

    let result = orch
        .run_graph(
            graph,
            ProcessMode::Hierarchical {
                manager: "manager".into(),
            },
            &RunOptions::default(),
        )
        .await;

    assert!(result.success);
    assert_eq!(*log.lock().unwrap(), vec!["polish", "draft"]);
}

#[tokio::test]
async fn cancellation_prevents_pending_dispatch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    for name in ["first", "second"] {
        orch.register_capability(Recorder::new(name, log.clone()));
    }

    let graph = orch
        .build_graph(vec![
            spec("first", "first", &[]),
            spec("second", "second", &["first"]),
        ])
        .expect("valid graph");

    let options = RunOptions::default();
    options.cancel.cancel();

    let result = orch
        .run_graph(graph, ProcessMode::Sequential, &options)
        .await;

    assert!(!result.success);
    assert!(matches!(result.error, Some(CadreError::Cancelled)));
    assert!(log.lock().unwrap().is_empty());
    // Status map still complete
    assert_eq!(result.statuses.len(), 2);
}

#[tokio::test]
async fn blocking_hook_skips_guarded_node() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    orch.register_capability(Recorder::new("guarded", log.clone()));
    orch.register_capability(Recorder::new("open", log.clone()));

    orch.register_hook(
        "task_start",
        Arc::new(|ctx| {
            Box::pin(async move {
                if ctx.get("node_id") == Some(&serde_json::json!("guarded")) {
                    Ok(HookVerdict::Block { reason: None })
                } else {
                    Ok(HookVerdict::Continue(ctx))
                }
            })
        }),
        HookOptions::default(),
    );

    let graph = orch
        .build_graph(vec![
            spec("guarded", "guarded", &[]),
            spec("open", "open", &[]),
        ])
        .expect("valid graph");

    let result = orch
        .run_graph(graph, ProcessMode::Sequential, &RunOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.statuses["guarded"], TaskStatus::Skipped);
    assert_eq!(result.statuses["open"], TaskStatus::Completed);
    assert_eq!(*log.lock().unwrap(), vec!["open"]);
}

#[tokio::test]
async fn build_rejects_cycles_before_execution() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    orch.register_capability(Recorder::new("any", log.clone()));

    let err = orch
        .build_graph(vec![
            spec("a", "any", &["b"]),
            spec("b", "any", &["a"]),
        ])
        .unwrap_err();

    assert!(matches!(err, CadreError::CyclicGraph { .. }));
    assert!(log.lock().unwrap().is_empty(), "no node may have executed");
}

#[tokio::test]
async fn results_flow_to_dependents() {
    let seen_input = Arc::new(Mutex::new(serde_json::Value::Null));
    let seen = seen_input.clone();

    let mut orch = Orchestrator::default();
    orch.register_capability(Arc::new(FnCapability::new("producer", |_| {
        Ok(serde_json::json!({"finding": "rust is fast"}))
    })));
    orch.register_capability(Arc::new(FnCapability::new("consumer", move |input| {
        *seen.lock().unwrap() = input.clone();
        Ok(serde_json::json!("ok"))
    })));

    let graph = orch
        .build_graph(vec![
            spec("produce", "producer", &[]),
            spec("consume", "consumer", &["produce"]),
        ])
        .expect("valid graph");

    let result = orch
        .run_graph(graph, ProcessMode::Parallel, &RunOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(
        seen_input.lock().unwrap()["dependencies"]["produce"]["finding"],
        "rust is fast"
    );
    assert_eq!(
        result.results["produce"],
        serde_json::json!({"finding": "rust is fast"})
    );
}

#[tokio::test]
async fn parallel_bounded_concurrency_still_completes() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    for name in ["a", "b", "c", "d"] {
        orch.register_capability(Recorder::new(name, log.clone()));
    }

    let graph = orch
        .build_graph(vec![
            spec("a", "a", &[]),
            spec("b", "b", &[]),
            spec("c", "c", &[]),
            spec("d", "d", &["a", "b", "c"]),
        ])
        .expect("valid graph");

    let options = RunOptions {
        max_concurrency: Some(1),
        ..Default::default()
    };
    let result = orch.run_graph(graph, ProcessMode::Parallel, &options).await;

    assert!(result.success);
    // FIFO by ready time: declaration order for the initial batch
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn node_timeout_fails_node_and_skips_dependents() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut orch = Orchestrator::default();
    orch.register_capability(Arc::new(Staller {
        name: "slow".into(),
        started: Arc::new(tokio::sync::Notify::new()),
    }));
    orch.register_capability(Recorder::new("report", log.clone()));

    let graph = orch
        .build_graph(vec![
            spec("slow", "slow", &[]),
            spec("report", "report", &["slow"]),
        ])
        .expect("valid graph");

    let options = RunOptions {
        node_timeout_secs: Some(1),
        ..Default::default()
    };

    tokio::time::pause();
    let result = orch.run_graph(graph, ProcessMode::Sequential, &options).await;

    assert!(!result.success);
    match result.error {
        Some(CadreError::NodeTimeout {
            node_id,
            timeout_secs,
        }) => {
            assert_eq!(node_id, "slow");
            assert_eq!(timeout_secs, 1);
        }
        other => panic!("expected node timeout, got {:?}", other),
    }
    assert_eq!(result.statuses["slow"], TaskStatus::Failed);
    assert_eq!(result.statuses["report"], TaskStatus::Skipped);
    assert_eq!(result.statuses.len(), 2);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_fails_aborted_in_flight_nodes() {
    let started = Arc::new(tokio::sync::Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut orch = Orchestrator::default();
    orch.register_capability(Arc::new(Staller {
        name: "stall".into(),
        started: started.clone(),
    }));
    orch.register_capability(Recorder::new("after", log.clone()));

    let graph = orch
        .build_graph(vec![
            spec("stall", "stall", &[]),
            spec("after", "after", &["stall"]),
        ])
        .expect("valid graph");

    let options = RunOptions::default();
    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        started.notified().await;
        cancel.cancel();
    });

    let result = orch.run_graph(graph, ProcessMode::Parallel, &options).await;

    assert!(!result.success);
    assert!(matches!(result.error, Some(CadreError::Cancelled)));
    // Aborted invocations settle as failed, never as still running
    assert_eq!(result.statuses["stall"], TaskStatus::Failed);
    assert!(result.statuses.values().all(|s| *s != TaskStatus::Running));
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn run_with_default_config() {
    let mut orch = Orchestrator::new(OrchestratorConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    orch.register_capability(Recorder::new("solo", log.clone()));

    let graph = orch
        .build_graph(vec![spec("solo", "solo", &[])])
        .expect("valid graph");
    let result = orch
        .run_graph(graph, ProcessMode::Sequential, &RunOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.statuses["solo"], TaskStatus::Completed);
    assert_eq!(result.results["solo"], serde_json::json!("solo"));
}
