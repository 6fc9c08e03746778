//! Tasks: single units of build work.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::profile::ResolvedProfile;
use crate::core::source_file::{Language, SourceFile};

/// Stable task identifier, derived from the task's output path relative to
/// the build directory (with `/` separators on every platform).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        TaskId(id.into())
    }

    /// Derive the id for an output path inside `build_dir`.
    pub fn for_output(build_dir: &Path, output: &Path) -> Self {
        let rel = output.strip_prefix(build_dir).unwrap_or(output);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        TaskId(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Compile one translation unit to an object file
    Compile,
    /// Generate a derived source from an interface header
    Generate,
    /// Link objects into an executable
    Link,
    /// Archive objects into a static library
    Archive,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Compile => "compile",
            TaskKind::Generate => "generate",
            TaskKind::Link => "link",
            TaskKind::Archive => "archive",
        }
    }

    /// Link and Archive tasks produce the final artifact.
    pub fn is_artifact(&self) -> bool {
        matches!(self, TaskKind::Link | TaskKind::Archive)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskInput {
    /// A file that exists before the build starts
    Source(SourceFile),
    /// The output of another task
    Output { task: TaskId, path: PathBuf },
}

impl TaskInput {
    /// Key under which this input's fingerprint is recorded in build state.
    pub fn state_key(&self) -> String {
        match self {
            TaskInput::Source(file) => format!("file:{}", file.path.display()),
            TaskInput::Output { task, .. } => format!("task:{}", task),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TaskInput::Source(file) => &file.path,
            TaskInput::Output { path, .. } => path,
        }
    }
}

/// Lifecycle of a task within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Not yet planned
    Pending,
    /// Needs to run
    Dirty,
    Running,
    Succeeded,
    /// The task's own tool invocation failed
    Failed,
    /// Not attempted because an upstream task failed
    FailedByPropagation,
    /// Up to date; the recorded output is reused
    Skipped,
}

impl TaskStatus {
    /// Succeeded or Skipped: dependents may proceed.
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Skipped)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::FailedByPropagation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dirty => "dirty",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::FailedByPropagation => "failed-by-propagation",
            TaskStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of build work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Ordered inputs; for Compile and Generate the first one is the primary
    pub inputs: Vec<TaskInput>,
    pub output: PathBuf,
    pub profile: Arc<ResolvedProfile>,
    /// Fingerprint of the profile options this task's kind reads
    pub profile_fingerprint: String,
    /// Source language, for Compile tasks
    pub language: Option<Language>,
}

impl Task {
    pub fn new(
        build_dir: &Path,
        kind: TaskKind,
        output: PathBuf,
        profile: Arc<ResolvedProfile>,
    ) -> Self {
        Task {
            id: TaskId::for_output(build_dir, &output),
            kind,
            inputs: Vec::new(),
            profile_fingerprint: profile.fingerprint_for(kind),
            output,
            profile,
            language: None,
        }
    }

    pub fn with_input(mut self, input: TaskInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    /// Ids of the tasks whose outputs this task consumes.
    pub fn upstream(&self) -> impl Iterator<Item = &TaskId> {
        self.inputs.iter().filter_map(|input| match input {
            TaskInput::Output { task, .. } => Some(task),
            TaskInput::Source(_) => None,
        })
    }

    /// The first input's path (the translation unit for Compile tasks).
    pub fn primary_input(&self) -> Option<&Path> {
        self.inputs.first().map(TaskInput::path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::ProfileSet;
    use crate::core::profile::ConfigProfile;

    fn profile() -> Arc<ResolvedProfile> {
        let mut set = ProfileSet::default();
        set.insert(ConfigProfile::new("base", None)).unwrap();
        Arc::new(set.resolve("base").unwrap())
    }

    #[test]
    fn test_task_id_from_output() {
        let id = TaskId::for_output(
            Path::new("/p/build/Debug"),
            Path::new("/p/build/Debug/obj/src/a.c.o"),
        );
        assert_eq!(id.as_str(), "obj/src/a.c.o");
    }

    #[test]
    fn test_upstream_lists_output_inputs_only() {
        let build = Path::new("/b");
        let task = Task::new(build, TaskKind::Link, PathBuf::from("/b/app"), profile())
            .with_input(TaskInput::Output {
                task: TaskId::new("obj/a.c.o"),
                path: PathBuf::from("/b/obj/a.c.o"),
            })
            .with_input(TaskInput::Output {
                task: TaskId::new("obj/b.c.o"),
                path: PathBuf::from("/b/obj/b.c.o"),
            });

        let upstream: Vec<&str> = task.upstream().map(TaskId::as_str).collect();
        assert_eq!(upstream, ["obj/a.c.o", "obj/b.c.o"]);
        assert_eq!(task.id.as_str(), "app");
    }

    #[test]
    fn test_status_predicates() {
        assert!(TaskStatus::Skipped.is_ok());
        assert!(TaskStatus::Succeeded.is_ok());
        assert!(!TaskStatus::Dirty.is_ok());
        assert!(TaskStatus::FailedByPropagation.is_failed());
        assert_eq!(
            TaskStatus::FailedByPropagation.to_string(),
            "failed-by-propagation"
        );
    }
}
