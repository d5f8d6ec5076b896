use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};
use uuid::Uuid;

use cadre_core::error::{CadreError, Result};

/// Mutable context threaded through a cascade of handlers.
///
/// Handler N receives whatever handler N-1 returned, so an event's handlers
/// run strictly sequentially. Independent events may be executed
/// concurrently by callers.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub event: String,
    pub data: HashMap<String, serde_json::Value>,
}

impl HookContext {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

/// What a handler decided.
pub enum HookVerdict {
    /// Proceed with the (possibly mutated) context.
    Continue(HookContext),
    /// Halt the cascade and mark the guarded operation blocked.
    Block { reason: Option<String> },
}

/// Boxed async handler. Returning `Err` counts as handler failure.
pub type HookHandler =
    Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<HookVerdict>> + Send + Sync>;

/// Identifier handed back by `register`, usable for unregister/toggle.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct HookId(pub String);

impl std::fmt::Display for HookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-registration options.
#[derive(Debug, Clone)]
pub struct HookOptions {
    /// Higher runs first; ties break by registration order.
    pub priority: i32,
    /// Per-handler budget; expiry counts as failure.
    pub timeout_secs: u64,
    /// When true, a failing handler aborts the cascade instead of being
    /// logged and skipped.
    pub block_on_failure: bool,
    pub enabled: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            timeout_secs: 30,
            block_on_failure: false,
            enabled: true,
        }
    }
}

struct Registration {
    id: HookId,
    handler: HookHandler,
    priority: i32,
    order: u64,
    timeout_secs: u64,
    block_on_failure: bool,
    enabled: bool,
}

/// Outcome of running one event's cascade.
pub struct HookExecution {
    pub success: bool,
    pub blocked: bool,
    /// The context after the last handler that ran.
    pub context: HookContext,
    pub error: Option<CadreError>,
}

impl HookExecution {
    fn passed(context: HookContext) -> Self {
        Self {
            success: true,
            blocked: false,
            context,
            error: None,
        }
    }
}

/// Ordered pre/post interceptors around named events.
///
/// Explicitly constructed and injected; concurrent runs sharing a cascade
/// share registrations but never execution state.
#[derive(Default)]
pub struct HookCascade {
    registrations: RwLock<HashMap<String, Vec<Registration>>>,
    next_order: AtomicU64,
}

impl HookCascade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event. Returns an id for later
    /// unregistration or toggling.
    pub fn register(
        &self,
        event: impl Into<String>,
        handler: HookHandler,
        options: HookOptions,
    ) -> HookId {
        let event = event.into();
        let id = HookId(Uuid::new_v4().to_string());
        let order = self.next_order.fetch_add(1, Ordering::Relaxed);

        let mut map = self.registrations.write().expect("hook registry poisoned");
        let entries = map.entry(event.clone()).or_default();
        entries.push(Registration {
            id: id.clone(),
            handler,
            priority: options.priority,
            order,
            timeout_secs: options.timeout_secs,
            block_on_failure: options.block_on_failure,
            enabled: options.enabled,
        });
        // Priority descending, registration order ascending on ties
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));

        debug!(%event, hook_id = %id, priority = options.priority, "Hook registered");
        id
    }

    /// Remove a registration. Returns true if it existed.
    pub fn unregister(&self, id: &HookId) -> bool {
        let mut map = self.registrations.write().expect("hook registry poisoned");
        let mut removed = false;
        for entries in map.values_mut() {
            let before = entries.len();
            entries.retain(|r| &r.id != id);
            removed |= entries.len() != before;
        }
        removed
    }

    /// Enable or disable a registration without removing it.
    pub fn set_enabled(&self, id: &HookId, enabled: bool) -> bool {
        let mut map = self.registrations.write().expect("hook registry poisoned");
        for entries in map.values_mut() {
            if let Some(reg) = entries.iter_mut().find(|r| &r.id == id) {
                reg.enabled = enabled;
                return true;
            }
        }
        false
    }

    /// Run the cascade for an event. Zero registered handlers is a no-op.
    pub async fn execute(&self, event: &str, context: HookContext) -> HookExecution {
        // Snapshot under the lock; handlers run without it held
        let snapshot: Vec<(HookId, HookHandler, u64, bool)> = {
            let map = self.registrations.read().expect("hook registry poisoned");
            match map.get(event) {
                Some(entries) => entries
                    .iter()
                    .filter(|r| r.enabled)
                    .map(|r| {
                        (
                            r.id.clone(),
                            r.handler.clone(),
                            r.timeout_secs,
                            r.block_on_failure,
                        )
                    })
                    .collect(),
                None => return HookExecution::passed(context),
            }
        };

        let mut current = context;
        for (id, handler, timeout_secs, block_on_failure) in snapshot {
            let budget = Duration::from_secs(timeout_secs);
            let outcome = tokio::time::timeout(budget, handler(current.clone())).await;

            let failure = match outcome {
                Ok(Ok(HookVerdict::Continue(next))) => {
                    current = next;
                    continue;
                }
                Ok(Ok(HookVerdict::Block { reason })) => {
                    debug!(%event, hook_id = %id, ?reason, "Hook blocked operation");
                    return HookExecution {
                        success: true,
                        blocked: true,
                        context: current,
                        error: None,
                    };
                }
                Ok(Err(e)) => CadreError::HookFailure {
                    event: event.to_string(),
                    hook_id: id.to_string(),
                    message: e.to_string(),
                },
                Err(_) => CadreError::HookFailure {
                    event: event.to_string(),
                    hook_id: id.to_string(),
                    message: format!("timed out after {}s", timeout_secs),
                },
            };

            if block_on_failure {
                return HookExecution {
                    success: false,
                    blocked: false,
                    context: current,
                    error: Some(failure),
                };
            }
            warn!(%event, hook_id = %id, error = %failure, "Hook failed, continuing cascade");
        }

        HookExecution::passed(current)
    }
}
