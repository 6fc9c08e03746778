//! Final archive/link step.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::builder::graph::BuildGraph;
use crate::builder::invoker::ToolInvoker;
use crate::builder::planner::input_fingerprints;
use crate::builder::state::{BuildState, TaskRecord};
use crate::builder::toolchain::{command_for, Toolchain};
use crate::core::{TaskId, TaskKind, TaskStatus};
use crate::util::fs::ensure_dir;
use crate::util::hash::file_fingerprint;

/// Errors producing the final artifact. The artifact's state record is
/// left untouched when any of these occur.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("the build graph has no link or archive task")]
    NoArtifact,

    #[error("`{artifact}` not produced: {failed} task(s) it depends on failed")]
    UpstreamFailed { artifact: TaskId, failed: usize },

    #[error("input `{}` of `{artifact}` is missing", .path.display())]
    MissingInput { artifact: TaskId, path: PathBuf },

    #[error("{kind} of `{artifact}` failed")]
    Toolchain {
        artifact: TaskId,
        kind: TaskKind,
        command: Option<String>,
        output: String,
    },
}

impl LinkError {
    /// Captured tool output, if the tool ran.
    pub fn output(&self) -> Option<&str> {
        match self {
            LinkError::Toolchain { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// What the linker did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The artifact was up to date
    Fresh(PathBuf),
    Linked(PathBuf),
}

impl LinkOutcome {
    pub fn path(&self) -> &Path {
        match self {
            LinkOutcome::Fresh(path) | LinkOutcome::Linked(path) => path,
        }
    }
}

/// Runs the artifact task once everything it depends on is done.
pub struct ArtifactLinker<'a> {
    toolchain: &'a dyn Toolchain,
    invoker: &'a dyn ToolInvoker,
    root: &'a Path,
}

impl<'a> ArtifactLinker<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, invoker: &'a dyn ToolInvoker, root: &'a Path) -> Self {
        ArtifactLinker {
            toolchain,
            invoker,
            root,
        }
    }

    pub fn link(
        &self,
        graph: &mut BuildGraph,
        state: &mut BuildState,
    ) -> Result<LinkOutcome, LinkError> {
        let node = graph.artifact().ok_or(LinkError::NoArtifact)?;
        let task = graph.task(node).clone();

        let failed = graph
            .dependencies(node)
            .filter(|&dep| !graph.status(dep).is_ok())
            .count();
        if failed > 0 || graph.status(node).is_failed() {
            graph.set_status(node, TaskStatus::FailedByPropagation);
            return Err(LinkError::UpstreamFailed {
                artifact: task.id,
                failed,
            });
        }

        if graph.status(node) == TaskStatus::Skipped {
            tracing::debug!("{} is up to date", task.id);
            return Ok(LinkOutcome::Fresh(task.output));
        }

        for input in &task.inputs {
            if !input.path().is_file() {
                graph.set_status(node, TaskStatus::Failed);
                return Err(LinkError::MissingInput {
                    artifact: task.id.clone(),
                    path: input.path().to_path_buf(),
                });
            }
        }

        let fail = |command: Option<String>, output: String| LinkError::Toolchain {
            artifact: task.id.clone(),
            kind: task.kind,
            command,
            output,
        };

        let command = command_for(self.toolchain, &task, self.root)
            .map_err(|e| fail(None, e.to_string()))?;
        let shown = command.display();

        let prepare = || -> anyhow::Result<()> {
            if let Some(parent) = task.output.parent() {
                ensure_dir(parent)?;
            }
            // Archivers update existing archives in place; start fresh so
            // removed objects do not linger.
            if task.kind == TaskKind::Archive && task.output.exists() {
                std::fs::remove_file(&task.output)?;
            }
            Ok(())
        };
        if let Err(e) = prepare() {
            graph.set_status(node, TaskStatus::Failed);
            return Err(fail(Some(shown), format!("{:#}", e)));
        }

        tracing::info!("{} {}", task.kind, task.output.display());
        tracing::debug!("running: {}", shown);
        let result = match self.invoker.invoke(&command) {
            Ok(out) if out.success => file_fingerprint(&task.output).map_err(|e| {
                format!("{}{:#}", out.output, e)
            }),
            Ok(out) => Err(out.output),
            Err(e) => Err(format!("{:#}", e)),
        };

        match result {
            Ok(output) => {
                let record = TaskRecord {
                    inputs: input_fingerprints(&task, state),
                    profile: task.profile_fingerprint.clone(),
                    output,
                };
                state.record(task.id.clone(), record);
                graph.set_status(node, TaskStatus::Succeeded);
                Ok(LinkOutcome::Linked(task.output.clone()))
            }
            Err(output) => {
                graph.set_status(node, TaskStatus::Failed);
                Err(fail(Some(shown), output))
            }
        }
    }
}
