use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadreError {
    // Graph configuration errors — fatal, raised at build time
    #[error("Config error: {0}")]
    Config(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Dependency cycle: {}", .path.join(" -> "))]
    CyclicGraph { path: Vec<String> },

    #[error("No route matched and no default capability is configured")]
    NoMatchingRoute,

    // Handoff errors — recoverable by the caller
    #[error("Handoff cycle: {}", .chain.join(" -> "))]
    HandoffCycle { chain: Vec<String> },

    #[error("Handoff depth {depth} exceeds maximum {max_depth}")]
    HandoffDepth { depth: usize, max_depth: usize },

    #[error("Handoff to '{target}' timed out after {timeout_secs}s")]
    HandoffTimeout { timeout_secs: u64, target: String },

    // Execution errors
    #[error("Task '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("Task '{node_id}' timed out after {timeout_secs}s")]
    NodeTimeout { node_id: String, timeout_secs: u64 },

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Run cancelled")]
    Cancelled,

    // Hook errors — fatal only under block_on_failure
    #[error("Hook {hook_id} failed on event '{event}': {message}")]
    HookFailure {
        event: String,
        hook_id: String,
        message: String,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // TOML errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CadreError>;
