pub mod combinators;
pub mod engine;
pub mod facade;
pub mod graph;
pub mod handoff;
pub mod hooks;
pub mod router;

pub use combinators::{Branch, LoopBlock, LoopResult, RouteBlock};
pub use engine::{CapabilityMap, ProcessMode, RunOptions, RunResult, WorkflowEngine};
pub use facade::Orchestrator;
pub use graph::{TaskGraph, TaskNode};
pub use handoff::{ContextPolicy, HandoffController, HandoffFilter, HandoffOptions};
pub use hooks::{
    HookCascade, HookContext, HookExecution, HookHandler, HookId, HookOptions, HookVerdict,
};
pub use router::{Route, RouteMatch, Router};
