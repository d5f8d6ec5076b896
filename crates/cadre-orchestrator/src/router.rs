use serde::{Deserialize, Serialize};
use tracing::debug;

use cadre_core::condition::Condition;
use cadre_core::error::Result;
use cadre_core::types::ConversationContext;

/// A (condition, capability, priority) routing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Capability this route dispatches to. The router references it by
    /// name only; it never owns the capability.
    pub capability: String,
    pub condition: Condition,
    /// Higher wins; ties break by registration order.
    #[serde(default)]
    pub priority: i32,
}

impl Route {
    pub fn new(capability: impl Into<String>, condition: Condition) -> Self {
        Self {
            capability: capability.into(),
            condition,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Outcome of a routing decision.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub capability: &'a str,
    /// The route whose condition matched; None when the default capability
    /// was used as fallback.
    pub matched_route: Option<&'a Route>,
}

/// Selects a target capability from a prioritized, condition-matched
/// table. Routing is pure; dispatching the chosen capability is the
/// caller's responsibility.
pub struct Router {
    /// Sorted priority-descending, stable by registration order.
    routes: Vec<Route>,
    default_capability: Option<String>,
}

impl Router {
    /// Build a router, validating every condition up front so malformed
    /// patterns surface as configuration errors rather than dead routes.
    pub fn new(routes: Vec<Route>, default_capability: Option<String>) -> Result<Self> {
        for route in &routes {
            route.condition.validate()?;
        }

        let mut indexed: Vec<(usize, Route)> = routes.into_iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));

        Ok(Self {
            routes: indexed.into_iter().map(|(_, r)| r).collect(),
            default_capability,
        })
    }

    /// First route whose condition is truthy over `(input, context)`;
    /// falls back to the default capability, else None.
    pub fn route<'a>(
        &'a self,
        input: &str,
        context: Option<&ConversationContext>,
    ) -> Option<RouteMatch<'a>> {
        for route in &self.routes {
            if route.condition.matches(input, context) {
                debug!(capability = %route.capability, "Route matched");
                return Some(RouteMatch {
                    capability: &route.capability,
                    matched_route: Some(route),
                });
            }
        }

        self.default_capability.as_deref().map(|capability| {
            debug!(capability, "No route matched, using default");
            RouteMatch {
                capability,
                matched_route: None,
            }
        })
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}
