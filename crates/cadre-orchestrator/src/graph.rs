use std::collections::{HashMap, HashSet};

use tracing::debug;

use cadre_core::error::{CadreError, Result};
use cadre_core::types::{TaskSpec, TaskStatus};

/// A resolved unit of work inside one run.
///
/// Nodes are created at graph build, mutated only by the workflow engine,
/// and discarded when the run ends.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub spec: TaskSpec,
    pub status: TaskStatus,
    /// Write-once: set by the node that owns it, read by dependents.
    pub result: Option<serde_json::Value>,
}

impl TaskNode {
    fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            status: TaskStatus::Pending,
            result: None,
        }
    }
}

/// A validated task dependency graph.
///
/// Validation is all-or-nothing at build time: unknown dependency ids and
/// cycles are configuration errors raised before any node executes, never
/// at runtime.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Build and validate a graph from task specs.
    pub fn build(specs: Vec<TaskSpec>) -> Result<Self> {
        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.id.clone(), i).is_some() {
                return Err(CadreError::DuplicateTask(spec.id.clone()));
            }
        }

        for spec in &specs {
            for dep in &spec.depends_on {
                if !index.contains_key(dep) {
                    return Err(CadreError::UnknownDependency {
                        task: spec.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let graph = Self {
            nodes: specs.into_iter().map(TaskNode::new).collect(),
            index,
        };
        graph.check_acyclic()?;
        debug!(tasks = graph.nodes.len(), "Task graph validated");
        Ok(graph)
    }

    /// Depth-first cycle check over dependency edges. Reports the cycle
    /// path on failure.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(
            graph: &TaskGraph,
            node: usize,
            marks: &mut [Mark],
            stack: &mut Vec<String>,
        ) -> Result<()> {
            marks[node] = Mark::InProgress;
            stack.push(graph.nodes[node].spec.id.clone());

            for dep in &graph.nodes[node].spec.depends_on {
                let dep_idx = graph.index[dep];
                match marks[dep_idx] {
                    Mark::Done => {}
                    Mark::InProgress => {
                        // Close the loop for the error message
                        let start = stack.iter().position(|id| id == dep).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..].to_vec();
                        path.push(dep.clone());
                        return Err(CadreError::CyclicGraph { path });
                    }
                    Mark::Unvisited => visit(graph, dep_idx, marks, stack)?,
                }
            }

            stack.pop();
            marks[node] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        for i in 0..self.nodes.len() {
            if marks[i] == Mark::Unvisited {
                visit(self, i, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    /// Topological order with ties broken by declaration order.
    pub fn topo_order(&self) -> Vec<String> {
        let mut remaining: Vec<usize> = (0..self.nodes.len()).collect();
        let mut placed: HashSet<usize> = HashSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        while !remaining.is_empty() {
            // First declared node whose dependencies are all placed
            let pos = remaining
                .iter()
                .position(|&i| {
                    self.nodes[i]
                        .spec
                        .depends_on
                        .iter()
                        .all(|dep| placed.contains(&self.index[dep]))
                })
                .expect("validated graph is acyclic");
            let node = remaining.remove(pos);
            placed.insert(node);
            order.push(self.nodes[node].spec.id.clone());
        }

        order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        let i = *self.index.get(id)?;
        self.nodes.get_mut(i)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Ids of nodes that depend directly on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.spec.depends_on.iter().any(|d| d == id))
            .map(|n| n.spec.id.clone())
            .collect()
    }
}
