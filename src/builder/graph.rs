//! The build graph: tasks plus "must complete before" edges.
//!
//! An edge `a -> b` means task `a` must finish before task `b` starts
//! (`b` consumes `a`'s output). The graph rejects edges that would close a
//! cycle and tasks whose output path is already claimed.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use thiserror::Error;

use crate::core::{Task, TaskId, TaskStatus};

/// Errors constructing the build graph. Fatal before scheduling.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("dependency cycle: `{from}` -> `{to}` closes a loop")]
    Cycle { from: TaskId, to: TaskId },

    #[error("output `{}` is produced by both `{first}` and `{second}`", .path.display())]
    DuplicateOutput {
        path: PathBuf,
        first: TaskId,
        second: TaskId,
    },

    #[error("unknown task `{0}`")]
    UnknownTask(TaskId),
}

/// DAG of tasks with per-task status.
#[derive(Debug, Default)]
pub struct BuildGraph {
    graph: DiGraph<Task, ()>,

    /// Map from task id to node index
    index: HashMap<TaskId, NodeIndex>,

    /// Which task claims each output path
    outputs: HashMap<PathBuf, TaskId>,

    /// Status per node, indexed by `NodeIndex::index()`
    status: Vec<TaskStatus>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from tasks, wiring an edge for every input that is
    /// another task's output.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut graph = BuildGraph::new();
        let mut edges = Vec::new();

        for task in tasks {
            let deps: Vec<TaskId> = task.upstream().cloned().collect();
            let id = task.id.clone();
            graph.add_task(task, &[])?;
            edges.extend(deps.into_iter().map(|dep| (dep, id.clone())));
        }

        for (before, after) in edges {
            graph.add_dependency(&before, &after)?;
        }

        Ok(graph)
    }

    /// Add a task that depends on already-present tasks.
    pub fn add_task(&mut self, task: Task, depends_on: &[TaskId]) -> Result<NodeIndex, GraphError> {
        if let Some(first) = self.outputs.get(&task.output) {
            return Err(GraphError::DuplicateOutput {
                path: task.output.clone(),
                first: first.clone(),
                second: task.id.clone(),
            });
        }
        if let Some(&existing) = self.index.get(&task.id) {
            return Err(GraphError::DuplicateOutput {
                path: task.output.clone(),
                first: self.graph[existing].id.clone(),
                second: task.id.clone(),
            });
        }

        let deps = depends_on
            .iter()
            .map(|dep| self.node(dep))
            .collect::<Result<Vec<_>, _>>()?;

        let id = task.id.clone();
        self.outputs.insert(task.output.clone(), id.clone());
        let node = self.graph.add_node(task);
        self.index.insert(id, node);
        self.status.push(TaskStatus::Pending);

        // A fresh node has no successors, so these edges cannot close a cycle.
        for dep in deps {
            self.graph.update_edge(dep, node, ());
        }

        Ok(node)
    }

    /// Record that `before` must complete before `after`.
    pub fn add_dependency(&mut self, before: &TaskId, after: &TaskId) -> Result<(), GraphError> {
        let from = self.node(before)?;
        let to = self.node(after)?;

        if from == to || has_path_connecting(&self.graph, to, from, None) {
            return Err(GraphError::Cycle {
                from: before.clone(),
                to: after.clone(),
            });
        }

        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Node index for a task id.
    pub fn node(&self, id: &TaskId) -> Result<NodeIndex, GraphError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownTask(id.clone()))
    }

    pub fn task(&self, node: NodeIndex) -> &Task {
        &self.graph[node]
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&node| &self.graph[node])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All node indices in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn status(&self, node: NodeIndex) -> TaskStatus {
        self.status[node.index()]
    }

    pub fn set_status(&mut self, node: NodeIndex, status: TaskStatus) {
        self.status[node.index()] = status;
    }

    /// Tasks that must complete before `node`.
    pub fn dependencies(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Incoming)
    }

    /// Tasks that wait on `node`.
    pub fn dependents(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Outgoing)
    }

    /// Everything downstream of `node`, excluding `node` itself.
    pub fn transitive_dependents(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeIndex> = self.dependents(node).collect();
        let mut result = Vec::new();

        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                result.push(current);
                stack.extend(self.dependents(current));
            }
        }

        result.sort();
        result
    }

    /// Tasks in dependency order. Ties keep insertion order, so the result
    /// is deterministic for a given task list.
    pub fn topo_order(&self) -> Result<Vec<NodeIndex>, GraphError> {
        let mut indegree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.dependencies(n).count())
            .collect();
        let mut ready: std::collections::BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| indegree[n.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for dependent in self.dependents(node) {
                indegree[dependent.index()] -= 1;
                if indegree[dependent.index()] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.len() {
            // Let petgraph name a node on the cycle.
            let node = match toposort(&self.graph, None) {
                Err(cycle) => cycle.node_id(),
                Ok(_) => order.last().copied().unwrap_or_else(|| NodeIndex::new(0)),
            };
            let id = self.graph[node].id.clone();
            return Err(GraphError::Cycle {
                from: id.clone(),
                to: id,
            });
        }

        Ok(order)
    }

    /// The Link/Archive task producing the final artifact, if any.
    pub fn artifact(&self) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&n| self.graph[n].kind.is_artifact())
    }
}
