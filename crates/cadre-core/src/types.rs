use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// In-flight conversation state carried across capabilities.
///
/// A context is never mutated in place during a handoff; the controller
/// constructs a fresh context for the target, so sibling branches running
/// concurrently never observe each other's transfers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Ordered message history.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Free-form metadata available to routing conditions and hooks.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// How many handoffs deep this conversation is.
    #[serde(default)]
    pub handoff_depth: usize,
    /// Capability ids this conversation has traversed, in order.
    /// Append-only; no id may repeat.
    #[serde(default)]
    pub handoff_chain: Vec<String>,
    /// The capability currently holding the conversation.
    #[serde(default)]
    pub source: Option<String>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation owned by the named capability.
    pub fn for_capability(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            handoff_chain: vec![source.clone()],
            source: Some(source),
            ..Self::default()
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Concatenated text of all messages, newest last.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Lifecycle of a task node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Declarative description of one unit of work.
///
/// Specs are what external loaders (YAML, config, code) hand to
/// `TaskGraph::build`; the graph resolves them into owned task nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique identifier within one graph.
    pub id: String,
    /// Human-readable description; also the capability's input when no
    /// upstream results exist.
    pub description: String,
    /// Capability that executes this task. May stay unresolved until the
    /// engine falls back to a run-level default.
    #[serde(default)]
    pub capability: Option<String>,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            capability: None,
            depends_on: vec![],
        }
    }

    /// Set the capability that executes this task.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    /// Set the dependency ids.
    pub fn with_depends_on(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }
}

/// Outcome of a successful handoff, for the caller to fold back into the
/// top-level conversation.
#[derive(Debug, Clone)]
pub struct TransferResult {
    /// The target capability's output.
    pub output: serde_json::Value,
    /// Updated handoff chain including the target.
    pub chain: Vec<String>,
    /// Updated handoff depth.
    pub depth: usize,
}
