//! Incremental planning: decide which tasks must run.
//!
//! A task is dirty when
//!
//! - it has no record from a previous successful run;
//! - the fingerprint of the profile options it reads changed;
//! - any input fingerprint changed, or inputs were added or removed;
//! - a task it depends on is dirty;
//! - its output file is gone or no longer matches the recorded content.
//!
//! Everything else is skipped and its recorded output reused.

use std::collections::BTreeMap;
use std::fmt;

use petgraph::graph::NodeIndex;

use crate::builder::graph::{BuildGraph, GraphError};
use crate::builder::state::BuildState;
use crate::core::{Task, TaskId, TaskInput, TaskKind, TaskStatus};
use crate::util::hash::file_fingerprint;

/// Why a task has to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyReason {
    /// Never built, or its record was discarded
    NoRecord,
    ProfileChanged,
    /// An input's content changed (state key of the input)
    InputChanged(String),
    /// Inputs were added or removed
    InputSetChanged,
    UpstreamDirty(TaskId),
    OutputMissing,
    /// Output exists but differs from what the last build produced
    OutputModified,
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyReason::NoRecord => write!(f, "not built before"),
            DirtyReason::ProfileChanged => write!(f, "profile options changed"),
            DirtyReason::InputChanged(key) => {
                let what = key
                    .strip_prefix("file:")
                    .or_else(|| key.strip_prefix("task:"))
                    .unwrap_or(key);
                write!(f, "input changed: {}", what)
            }
            DirtyReason::InputSetChanged => write!(f, "inputs added or removed"),
            DirtyReason::UpstreamDirty(id) => write!(f, "depends on dirty `{}`", id),
            DirtyReason::OutputMissing => write!(f, "output missing"),
            DirtyReason::OutputModified => write!(f, "output modified"),
        }
    }
}

/// A task selected for execution.
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub node: NodeIndex,
    pub id: TaskId,
    pub kind: TaskKind,
    pub reason: DirtyReason,
}

/// Result of planning a graph.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Dirty tasks in dependency order
    pub dirty: Vec<PlannedTask>,
    pub skipped: usize,
}

impl Plan {
    pub fn is_up_to_date(&self) -> bool {
        self.dirty.is_empty()
    }

    pub fn reason(&self, id: &TaskId) -> Option<&DirtyReason> {
        self.dirty.iter().find(|t| &t.id == id).map(|t| &t.reason)
    }

    pub fn dirty_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.dirty.iter().map(|t| &t.id)
    }
}

/// Fingerprints of a task's inputs as they are now.
///
/// Source inputs use the fingerprint taken at collection time; inputs that
/// are another task's output use that task's recorded output fingerprint.
pub fn input_fingerprints(task: &Task, state: &BuildState) -> BTreeMap<String, String> {
    task.inputs
        .iter()
        .map(|input| {
            let fingerprint = match input {
                TaskInput::Source(file) => file.fingerprint.clone(),
                TaskInput::Output { task, .. } => state
                    .get(task)
                    .map(|record| record.output.clone())
                    .unwrap_or_default(),
            };
            (input.state_key(), fingerprint)
        })
        .collect()
}

/// Compares a graph with the previous build's state.
pub struct IncrementalPlanner<'a> {
    state: &'a BuildState,
}

impl<'a> IncrementalPlanner<'a> {
    pub fn new(state: &'a BuildState) -> Self {
        IncrementalPlanner { state }
    }

    /// Mark every task Dirty or Skipped and return the dirty set.
    pub fn plan(&self, graph: &mut BuildGraph) -> Result<Plan, GraphError> {
        let mut plan = Plan::default();

        for node in graph.topo_order()? {
            let reason = self.check(graph, node);
            match reason {
                Some(reason) => {
                    let task = graph.task(node);
                    tracing::debug!("{} is dirty: {}", task.id, reason);
                    plan.dirty.push(PlannedTask {
                        node,
                        id: task.id.clone(),
                        kind: task.kind,
                        reason,
                    });
                    graph.set_status(node, TaskStatus::Dirty);
                }
                None => {
                    plan.skipped += 1;
                    graph.set_status(node, TaskStatus::Skipped);
                }
            }
        }

        Ok(plan)
    }

    fn check(&self, graph: &BuildGraph, node: NodeIndex) -> Option<DirtyReason> {
        let task = graph.task(node);

        let Some(record) = self.state.get(&task.id) else {
            return Some(DirtyReason::NoRecord);
        };

        if record.profile != task.profile_fingerprint {
            return Some(DirtyReason::ProfileChanged);
        }

        let current = input_fingerprints(task, self.state);
        if current.len() != record.inputs.len()
            || current.keys().any(|k| !record.inputs.contains_key(k))
        {
            return Some(DirtyReason::InputSetChanged);
        }
        if let Some((key, _)) = current
            .iter()
            .find(|(key, fp)| record.inputs.get(*key) != Some(*fp))
        {
            return Some(DirtyReason::InputChanged(key.clone()));
        }

        // Dependencies are visited first, so their status is final.
        if let Some(dep) = graph
            .dependencies(node)
            .find(|&dep| graph.status(dep) == TaskStatus::Dirty)
        {
            return Some(DirtyReason::UpstreamDirty(graph.task(dep).id.clone()));
        }

        if !task.output.is_file() {
            return Some(DirtyReason::OutputMissing);
        }
        match file_fingerprint(&task.output) {
            Ok(fp) if fp == record.output => None,
            Ok(_) => Some(DirtyReason::OutputModified),
            Err(_) => Some(DirtyReason::OutputMissing),
        }
    }
}
