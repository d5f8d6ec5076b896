use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Engine-wide settings. Every field has a default so a missing or partial
/// config file still yields a working orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum handoff chain depth before `HandoffDepth` is raised.
    #[serde(default = "default_max_handoff_depth")]
    pub max_handoff_depth: usize,

    /// Seconds a single handoff (including target execution) may take.
    #[serde(default = "default_handoff_timeout_secs")]
    pub handoff_timeout_secs: u64,

    /// Seconds a single task node may take.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,

    /// Upper bound on simultaneously running nodes in Parallel mode and on
    /// in-flight Loop iterations. None = unbounded.
    #[serde(default)]
    pub max_concurrency: Option<usize>,

    /// When true, a failed node's dependents run with a null placeholder
    /// instead of being skipped.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Messages kept under `ContextPolicy::LastN` when no explicit N is
    /// given.
    #[serde(default = "default_last_n")]
    pub last_n_messages: usize,
}

fn default_max_handoff_depth() -> usize {
    10
}

fn default_handoff_timeout_secs() -> u64 {
    120
}

fn default_node_timeout_secs() -> u64 {
    300
}

fn default_last_n() -> usize {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_handoff_depth: default_max_handoff_depth(),
            handoff_timeout_secs: default_handoff_timeout_secs(),
            node_timeout_secs: default_node_timeout_secs(),
            max_concurrency: None,
            continue_on_error: false,
            last_n_messages: default_last_n(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}
