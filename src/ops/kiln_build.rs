//! Implementation of `kiln build` and `kiln plan`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use thiserror::Error;

use crate::builder::collector::FileCollector;
use crate::builder::generator::{GenerateContext, GeneratorRegistry};
use crate::builder::includes::IncludeScanner;
use crate::builder::scheduler::DEFAULT_JOBS;
use crate::builder::{
    ArtifactLinker, BuildGraph, BuildObserver, BuildStateStore, IncrementalPlanner, LinkError,
    LinkOutcome, Plan, ScheduleReport, Scheduler, StateGuard, TaskFailure, ToolInvoker, Toolchain,
};
use crate::core::manifest::ArtifactKind;
use crate::core::{Manifest, ProfileSet, ResolvedProfile, Task, TaskId, TaskInput, TaskKind};
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::fs::{ensure_dir, publish_link};

/// Options for the build command.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Selected build type (e.g. `Debug`)
    pub build_type: String,

    /// Number of parallel workers (None = manifest, then default)
    pub jobs: Option<usize>,

    /// Expose the artifact under the manifest's `publish` name
    pub publish: bool,
}

impl BuildOptions {
    pub fn new(build_type: impl Into<String>) -> Self {
        BuildOptions {
            build_type: build_type.into(),
            jobs: None,
            publish: true,
        }
    }
}

/// The collaborators a build runs with.
pub struct BuildEnv<'a> {
    pub toolchain: &'a dyn Toolchain,
    pub invoker: &'a dyn ToolInvoker,
    pub observer: &'a dyn BuildObserver,
    /// Set to stop dispatching new tasks
    pub abort: Arc<AtomicBool>,
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    /// The library or executable
    pub artifact: PathBuf,
    /// Whether the artifact was relinked
    pub linked: bool,
    pub report: ScheduleReport,
    /// Where the artifact was published
    pub published: Option<PathBuf>,
}

/// Why a build that got past planning did not produce its artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build failed: {} task(s) failed, {} not attempted", .failed.len(), .propagated.len())]
    TasksFailed {
        failed: Vec<TaskFailure>,
        propagated: Vec<TaskId>,
    },

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("build interrupted: {completed} task(s) completed, {remaining} not started")]
    Interrupted { completed: usize, remaining: usize },
}

impl BuildError {
    /// One diagnostic per failed task, with captured tool output.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            BuildError::TasksFailed { failed, propagated } => {
                let mut diags: Vec<Diagnostic> = failed
                    .iter()
                    .map(|failure| {
                        let mut diag = Diagnostic::error(format!("task `{}` failed", failure.id));
                        if let Some(command) = &failure.command {
                            diag = diag.with_context(format!("command: {}", command));
                        }
                        diag.with_output(&failure.output)
                    })
                    .collect();
                if !propagated.is_empty() {
                    let names: Vec<&str> = propagated.iter().map(TaskId::as_str).collect();
                    diags.push(
                        Diagnostic::note(format!(
                            "{} task(s) not attempted because a dependency failed",
                            propagated.len()
                        ))
                        .with_context(names.join(", "))
                        .with_suggestion(suggestions::BUILD_FAILED),
                    );
                }
                diags
            }
            BuildError::Link(err) => {
                let mut diag = Diagnostic::error(err.to_string());
                if let LinkError::Toolchain {
                    command: Some(command),
                    ..
                } = err
                {
                    diag = diag.with_context(format!("command: {}", command));
                }
                if let Some(output) = err.output() {
                    diag = diag.with_output(output);
                }
                if let LinkError::MissingInput { .. } = err {
                    diag = diag.with_suggestion(suggestions::STALE_STATE);
                }
                vec![diag]
            }
            BuildError::Interrupted { .. } => vec![Diagnostic::note(self.to_string())],
        }
    }
}

/// Collect sources, generate tasks and wire the graph for a build type.
///
/// Configuration and graph errors surface here, before any state is read
/// or any task runs.
pub fn prepare(manifest: &Manifest, build_type: &str) -> Result<BuildGraph> {
    let profiles = manifest.configure(build_type)?;
    let root = manifest
        .root()
        .canonicalize()
        .with_context(|| format!("failed to resolve project root {}", manifest.root().display()))?;
    let build_dir = root.join(&manifest.project.build_dir).join(build_type);

    let mut resolved = ResolvedProfiles::new(&profiles);
    let mut scanner = IncludeScanner::new();
    let mut tasks: Vec<Task> = Vec::new();

    for group in &manifest.sources {
        let profile = resolved.get(&group.profile)?;
        let files = FileCollector::new(&group.patterns, group.recursive)?
            .collect(&root.join(&group.root))
            .with_context(|| format!("failed to collect sources in `{}`", group.root.display()))?;
        let registry = GeneratorRegistry::for_group(group);
        let mut ctx = GenerateContext {
            project_root: &root,
            build_dir: &build_dir,
            profile: &profile,
            scanner: &mut scanner,
        };
        tasks.extend(registry.generate_all(&files, &mut ctx)?);
    }

    let objects: Vec<TaskInput> = tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Compile)
        .map(|t| TaskInput::Output {
            task: t.id.clone(),
            path: t.output.clone(),
        })
        .collect();
    if objects.is_empty() {
        bail!(
            "no compilable sources found for `{}`; check the `[[sources]]` patterns",
            manifest.artifact.name
        );
    }

    let kind = match manifest.artifact.kind {
        ArtifactKind::Exe => TaskKind::Link,
        ArtifactKind::Staticlib => TaskKind::Archive,
    };
    let mut artifact = Task::new(
        &build_dir,
        kind,
        build_dir.join(manifest.artifact.file_name()),
        resolved.get(&manifest.artifact.profile)?,
    );
    for object in objects {
        artifact = artifact.with_input(object);
    }
    tasks.push(artifact);

    tracing::debug!("generated {} task(s) for {}", tasks.len(), build_type);
    Ok(BuildGraph::from_tasks(tasks)?)
}

/// Resolve each profile once and share it between tasks.
struct ResolvedProfiles<'a> {
    set: &'a ProfileSet,
    cache: HashMap<String, Arc<ResolvedProfile>>,
}

impl<'a> ResolvedProfiles<'a> {
    fn new(set: &'a ProfileSet) -> Self {
        ResolvedProfiles {
            set,
            cache: HashMap::new(),
        }
    }

    fn get(&mut self, name: &str) -> Result<Arc<ResolvedProfile>> {
        if let Some(profile) = self.cache.get(name) {
            return Ok(profile.clone());
        }
        let profile = Arc::new(self.set.resolve(name)?);
        self.cache.insert(name.to_string(), profile.clone());
        Ok(profile)
    }
}

/// Plan without executing anything.
pub fn plan(manifest: &Manifest, build_type: &str) -> Result<(BuildGraph, Plan)> {
    let mut graph = prepare(manifest, build_type)?;
    let state = BuildStateStore::new(manifest.state_path(build_type)).load();
    let plan = IncrementalPlanner::new(&state).plan(&mut graph)?;
    Ok((graph, plan))
}

/// Run a full incremental build.
pub fn build(manifest: &Manifest, opts: &BuildOptions, env: &BuildEnv<'_>) -> Result<BuildResult> {
    let start = Instant::now();
    let build_type = opts.build_type.as_str();

    let mut graph = prepare(manifest, build_type)?;
    let root = graph_root(manifest)?;
    ensure_dir(&manifest.build_dir(build_type))?;

    // From here on the state is saved on every way out of this function.
    let mut guard = StateGuard::load(BuildStateStore::new(manifest.state_path(build_type)));

    let plan = IncrementalPlanner::new(guard.state()).plan(&mut graph)?;
    let stale = guard
        .state_mut()
        .retain_ids(|id| graph.get(id).is_some());
    if !stale.is_empty() {
        tracing::debug!("dropped {} record(s) for removed tasks", stale.len());
    }
    env.observer
        .build_started(build_type, plan.dirty.len(), plan.skipped);
    tracing::debug!(
        "{} dirty, {} up to date",
        plan.dirty.len(),
        plan.skipped
    );

    let jobs = opts
        .jobs
        .or(manifest.project.jobs)
        .unwrap_or(DEFAULT_JOBS);
    let report = Scheduler::new(env.toolchain, env.invoker, env.observer, &root)
        .jobs(jobs)
        .with_abort(env.abort.clone())
        .run(&mut graph, guard.state_mut())?;

    if report.aborted {
        env.observer
            .build_finished(false, start.elapsed(), report.succeeded.len());
        return Err(BuildError::Interrupted {
            completed: report.succeeded.len(),
            remaining: report.not_run.len(),
        }
        .into());
    }

    if !report.is_success() {
        env.observer
            .build_finished(false, start.elapsed(), report.succeeded.len());
        return Err(BuildError::TasksFailed {
            failed: report.failed,
            propagated: report.propagated,
        }
        .into());
    }

    let outcome = match ArtifactLinker::new(env.toolchain, env.invoker, &root)
        .link(&mut graph, guard.state_mut())
    {
        Ok(outcome) => outcome,
        Err(e) => {
            env.observer
                .build_finished(false, start.elapsed(), report.succeeded.len());
            return Err(BuildError::Link(e).into());
        }
    };
    guard.finish()?;

    let linked = matches!(outcome, LinkOutcome::Linked(_));
    let artifact = outcome.path().to_path_buf();
    env.observer.artifact_ready(&artifact, linked);

    let published = match manifest.publish_path() {
        Some(link) if opts.publish => {
            publish_link(&artifact, &link)?;
            tracing::debug!("published {} -> {}", link.display(), artifact.display());
            Some(link)
        }
        _ => None,
    };

    let tasks_run = report.succeeded.len() + usize::from(linked);
    env.observer
        .build_finished(true, start.elapsed(), tasks_run);

    Ok(BuildResult {
        artifact,
        linked,
        report,
        published,
    })
}

fn graph_root(manifest: &Manifest) -> Result<PathBuf> {
    let root: &Path = manifest.root();
    root.canonicalize()
        .with_context(|| format!("failed to resolve project root {}", root.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{GnuToolchain, NullObserver, TaskRecord};
    use crate::core::TaskStatus;
    use crate::test_support::{manifests, MockInvoker, ProjectFixture};
    use tempfile::TempDir;

    struct Project {
        _tmp: TempDir,
        root: PathBuf,
    }

    impl Project {
        fn new(fixture: ProjectFixture) -> Self {
            let tmp = TempDir::new().unwrap();
            let root = fixture.write_to(&tmp.path().join("demo")).unwrap();
            Project { _tmp: tmp, root }
        }

        fn manifest(&self) -> Manifest {
            Manifest::load(&self.root.join("Kiln.toml")).unwrap()
        }

        fn build(&self, invoker: &MockInvoker) -> Result<BuildResult> {
            self.build_with(invoker, BuildOptions::new("Debug"), Arc::new(AtomicBool::new(false)))
        }

        fn build_with(
            &self,
            invoker: &MockInvoker,
            opts: BuildOptions,
            abort: Arc<AtomicBool>,
        ) -> Result<BuildResult> {
            let env = BuildEnv {
                toolchain: &GnuToolchain,
                invoker,
                observer: &NullObserver,
                abort,
            };
            build(&self.manifest(), &opts, &env)
        }

        fn write(&self, rel: &str, content: &str) {
            std::fs::write(self.root.join(rel), content).unwrap();
        }

        fn state(&self) -> crate::builder::BuildState {
            BuildStateStore::new(self.root.join("build/Debug/.kiln-state")).load()
        }

        fn record(&self, id: &str) -> Option<TaskRecord> {
            self.state().get(&TaskId::new(id)).cloned()
        }
    }

    fn succeeded(result: &BuildResult) -> Vec<&str> {
        let mut ids: Vec<&str> = result.report.succeeded.iter().map(TaskId::as_str).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_prepare_builds_expected_graph() {
        let project = Project::new(ProjectFixture::two_units());
        let graph = prepare(&project.manifest(), "Debug").unwrap();

        let ids: Vec<&str> = graph
            .topo_order()
            .unwrap()
            .into_iter()
            .map(|n| graph.task(n).id.as_str())
            .collect();
        assert_eq!(ids, ["obj/src/a.c.o", "obj/src/b.c.o", "demo"]);

        let b = graph.get(&TaskId::new("obj/src/b.c.o")).unwrap();
        assert_eq!(b.inputs.len(), 2);
        assert!(b.inputs[1].path().ends_with("src/x.h"));
    }

    #[test]
    fn test_unknown_build_type_fails_before_tasks() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new();
        let err = project
            .build_with(
                &invoker,
                BuildOptions::new("Fast"),
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap_err();

        assert!(err.to_string().contains("unknown build type `Fast`"));
        assert!(err.to_string().contains("Debug, Release"));
        assert!(invoker.invocations().is_empty());
        assert!(!project.root.join("build/Fast").exists());
    }

    #[test]
    fn test_full_then_noop_build() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new();

        let first = project.build(&invoker).unwrap();
        assert_eq!(succeeded(&first), ["obj/src/a.c.o", "obj/src/b.c.o"]);
        assert!(first.linked);
        assert!(first.artifact.is_file());
        assert_eq!(first.published, Some(project.root.join("demo")));
        let calls = invoker.invocations().len();
        assert_eq!(calls, 3);

        let second = project.build(&invoker).unwrap();
        assert!(second.report.succeeded.is_empty());
        assert!(!second.linked);
        assert_eq!(invoker.invocations().len(), calls);
    }

    #[test]
    fn test_header_change_rebuilds_dependents_only() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new();
        project.build(&invoker).unwrap();
        let a_before = project.record("obj/src/a.c.o");

        project.write("src/x.h", "#define X 3\n");
        let result = project.build(&invoker).unwrap();

        assert_eq!(succeeded(&result), ["obj/src/b.c.o"]);
        assert!(result.linked);
        assert_eq!(project.record("obj/src/a.c.o"), a_before);
    }

    #[test]
    fn test_interface_header_include_rebuilds_generated_chain() {
        let project = Project::new(ProjectFixture::interface_units());
        let invoker = MockInvoker::new();

        let first = project.build(&invoker).unwrap();
        assert_eq!(
            succeeded(&first),
            [
                "gen/src/widget.gen.cpp",
                "obj/gen/src/widget.gen.cpp.o",
                "obj/src/main.cpp.o",
            ]
        );
        let main_before = project.record("obj/src/main.cpp.o");
        let gen_before = project.record("gen/src/widget.gen.cpp");

        project.write("src/cfg.h", "#define SIZE 2\n");
        let result = project.build(&invoker).unwrap();

        assert_eq!(succeeded(&result), ["obj/gen/src/widget.gen.cpp.o"]);
        assert!(result.linked);
        assert_eq!(project.record("obj/src/main.cpp.o"), main_before);
        assert_eq!(project.record("gen/src/widget.gen.cpp"), gen_before);

        let third = project.build(&invoker).unwrap();
        assert!(third.report.succeeded.is_empty());
        assert!(!third.linked);
    }

    #[test]
    fn test_removed_source_drops_its_record() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new();
        project.build(&invoker).unwrap();
        assert!(project.record("obj/src/a.c.o").is_some());

        std::fs::remove_file(project.root.join("src/a.c")).unwrap();
        let result = project.build(&invoker).unwrap();

        assert!(result.report.succeeded.is_empty());
        assert!(result.linked);
        assert!(project.record("obj/src/a.c.o").is_none());
        assert!(project.record("obj/src/b.c.o").is_some());
        assert!(project.record("demo").is_some());
        assert_eq!(project.state().len(), 2);
    }

    #[test]
    fn test_profile_change_rebuilds_affected_kinds() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new();
        project.build(&invoker).unwrap();

        let manifest = std::fs::read_to_string(project.root.join("Kiln.toml")).unwrap();
        project.write(
            "Kiln.toml",
            &manifest.replace("cflags = [\"-g\"]", "cflags = [\"-g\", \"-Wall\"]"),
        );
        let result = project.build(&invoker).unwrap();
        assert_eq!(succeeded(&result), ["obj/src/a.c.o", "obj/src/b.c.o"]);
    }

    #[test]
    fn test_failure_keeps_sibling_progress() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new().fail_on("obj/src/b.c.o");

        let err = project.build(&invoker).unwrap_err();
        let build_err = err.downcast_ref::<BuildError>().unwrap();
        match build_err {
            BuildError::TasksFailed { failed, propagated } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].id.as_str(), "obj/src/b.c.o");
                assert_eq!(propagated, &[TaskId::new("demo")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let diags = build_err.diagnostics();
        assert!(diags[0].format(false).contains("mock failure"));

        // a.c.o was recorded, b.c.o and the artifact were not
        assert!(project.record("obj/src/a.c.o").is_some());
        assert!(project.record("obj/src/b.c.o").is_none());
        assert!(project.record("demo").is_none());

        // The next build only retries what failed
        let retry = MockInvoker::new();
        let result = project.build(&retry).unwrap();
        assert_eq!(succeeded(&result), ["obj/src/b.c.o"]);
    }

    #[test]
    fn test_link_failure_reported() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new().fail_on("Debug/demo");

        let err = project.build(&invoker).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Link(LinkError::Toolchain { .. }))
        ));
        assert!(project.record("obj/src/a.c.o").is_some());
        assert!(project.record("demo").is_none());
        assert!(!project.root.join("demo").exists());
    }

    #[test]
    fn test_interrupt_persists_completed_tasks() {
        let project = Project::new(ProjectFixture::two_units());
        let abort = Arc::new(AtomicBool::new(false));
        let invoker = MockInvoker::new().abort_after(1, abort.clone());
        let mut opts = BuildOptions::new("Debug");
        opts.jobs = Some(1);

        let err = project.build_with(&invoker, opts, abort).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::Interrupted {
                completed: 1,
                remaining: 1
            })
        ));
        assert!(project.record("obj/src/a.c.o").is_some());
        assert!(project.record("obj/src/b.c.o").is_none());
    }

    #[test]
    fn test_corrupt_state_forces_rebuild() {
        let project = Project::new(ProjectFixture::two_units());
        let invoker = MockInvoker::new();
        project.build(&invoker).unwrap();

        std::fs::write(project.root.join("build/Debug/.kiln-state"), "garbage").unwrap();
        let result = project.build(&invoker).unwrap();
        assert_eq!(succeeded(&result), ["obj/src/a.c.o", "obj/src/b.c.o"]);
    }

    #[test]
    fn test_plan_reports_reasons() {
        let project = Project::new(ProjectFixture::two_units());
        project.build(&MockInvoker::new()).unwrap();
        std::fs::remove_file(project.root.join("build/Debug/obj/src/a.c.o")).unwrap();

        let (graph, plan) = super::plan(&project.manifest(), "Debug").unwrap();
        let dirty: Vec<&str> = plan.dirty_ids().map(TaskId::as_str).collect();
        assert_eq!(dirty, ["obj/src/a.c.o", "demo"]);
        let b = graph.node(&TaskId::new("obj/src/b.c.o")).unwrap();
        assert_eq!(graph.status(b), TaskStatus::Skipped);
    }

    #[test]
    fn test_staticlib_archive() {
        let project = Project::new(
            ProjectFixture::new(manifests::staticlib("core"))
                .with_file("src/one.c", "int one;\n")
                .with_file("src/two.c", "int two;\n"),
        );
        let result = project.build(&MockInvoker::new()).unwrap();
        assert!(result.artifact.ends_with("build/Debug/libcore.a"));
        assert!(result.published.is_none());
    }
}
