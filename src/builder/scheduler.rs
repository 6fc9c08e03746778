//! Parallel execution of dirty tasks.
//!
//! The coordinator runs on the calling thread. It owns the graph, the
//! ready queue and the build state; workers in a rayon pool only run tool
//! commands and send the outcome back over a channel. A task is queued the
//! moment its last outstanding dependency succeeds.
//!
//! When a task fails, everything downstream of it is marked
//! `FailedByPropagation` without being attempted, and independent branches
//! keep running. Link and Archive tasks are left to the artifact linker.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use anyhow::{Context, Result};
use petgraph::graph::NodeIndex;

use crate::builder::graph::BuildGraph;
use crate::builder::invoker::{ToolInvoker, ToolOutput};
use crate::builder::planner::input_fingerprints;
use crate::builder::progress::BuildObserver;
use crate::builder::state::{BuildState, TaskRecord};
use crate::builder::toolchain::{command_for, Toolchain};
use crate::core::{Task, TaskId, TaskStatus};
use crate::util::fs::ensure_dir;
use crate::util::hash::file_fingerprint;

/// Worker count when neither the manifest nor the command line sets one.
pub const DEFAULT_JOBS: usize = 2;

/// A task whose own invocation failed.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub id: TaskId,
    /// Command line, when one was built
    pub command: Option<String>,
    /// Captured tool output or the error that prevented running the tool
    pub output: String,
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default)]
pub struct ScheduleReport {
    pub succeeded: Vec<TaskId>,
    pub failed: Vec<TaskFailure>,
    pub propagated: Vec<TaskId>,
    /// Dirty tasks never started because the build was aborted
    pub not_run: Vec<TaskId>,
    pub aborted: bool,
}

impl ScheduleReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.propagated.is_empty() && !self.aborted
    }
}

/// Runs the dirty part of a planned graph.
pub struct Scheduler<'a> {
    toolchain: &'a dyn Toolchain,
    invoker: &'a dyn ToolInvoker,
    observer: &'a dyn BuildObserver,
    root: &'a Path,
    jobs: usize,
    abort: Arc<AtomicBool>,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        toolchain: &'a dyn Toolchain,
        invoker: &'a dyn ToolInvoker,
        observer: &'a dyn BuildObserver,
        root: &'a Path,
    ) -> Self {
        Scheduler {
            toolchain,
            invoker,
            observer,
            root,
            jobs: DEFAULT_JOBS,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of workers; `1` (or `0`) runs tasks inline in dependency order.
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Share an abort flag. Once set, no further task starts.
    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Execute every Dirty non-artifact task in `graph`, recording each
    /// success in `state`.
    pub fn run(&self, graph: &mut BuildGraph, state: &mut BuildState) -> Result<ScheduleReport> {
        let mut run = Coordinator::new(graph, state)?;

        if self.jobs == 1 {
            while let Some(node) = run.next_ready(self.is_aborted()) {
                let task = run.graph.task(node).clone();
                self.observer.task_started(&task);
                let outcome = execute_guarded(&task, self.toolchain, self.invoker, self.root);
                run.complete(node, outcome, self.observer);
            }
        } else {
            self.run_parallel(&mut run)?;
        }

        Ok(run.finish(self.is_aborted()))
    }

    fn run_parallel(&self, run: &mut Coordinator<'_>) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("kiln-worker-{}", i))
            .build()
            .context("failed to start worker pool")?;

        let (tx, rx) = mpsc::channel::<(NodeIndex, Outcome)>();
        let toolchain = self.toolchain;
        let invoker = self.invoker;
        let root = self.root;

        pool.in_place_scope(|scope| -> Result<()> {
            let mut running = 0usize;
            loop {
                while running < self.jobs {
                    let Some(node) = run.next_ready(self.is_aborted()) else {
                        break;
                    };
                    let task = run.graph.task(node).clone();
                    self.observer.task_started(&task);
                    let tx = tx.clone();
                    running += 1;
                    scope.spawn(move |_| {
                        let outcome = execute_guarded(&task, toolchain, invoker, root);
                        // The receiver outlives every worker in this scope.
                        let _ = tx.send((node, outcome));
                    });
                }

                if running == 0 {
                    return Ok(());
                }

                let (node, outcome) = rx
                    .recv()
                    .context("worker exited without reporting its task")?;
                running -= 1;
                run.complete(node, outcome, self.observer);
            }
        })
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Result of running one task on a worker.
#[derive(Debug)]
enum Outcome {
    Success(ToolOutput),
    Failure {
        command: Option<String>,
        output: String,
    },
}

/// Run [`execute`], turning a panic in the toolchain or invoker into a
/// failure of that task.
fn execute_guarded(
    task: &Task,
    toolchain: &dyn Toolchain,
    invoker: &dyn ToolInvoker,
    root: &Path,
) -> Outcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| execute(task, toolchain, invoker, root)));
    result.unwrap_or_else(|payload| Outcome::Failure {
        command: None,
        output: format!("tool invocation panicked: {}", panic_message(payload.as_ref())),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

fn execute(task: &Task, toolchain: &dyn Toolchain, invoker: &dyn ToolInvoker, root: &Path) -> Outcome {
    let command = match command_for(toolchain, task, root) {
        Ok(command) => command,
        Err(e) => {
            return Outcome::Failure {
                command: None,
                output: e.to_string(),
            }
        }
    };
    let shown = command.display();

    if let Some(parent) = task.output.parent() {
        if let Err(e) = ensure_dir(parent) {
            return Outcome::Failure {
                command: Some(shown),
                output: format!("{:#}", e),
            };
        }
    }

    tracing::debug!("{} {}: {}", task.kind, task.id, shown);
    match invoker.invoke(&command) {
        Ok(out) if out.success && !task.output.is_file() => Outcome::Failure {
            command: Some(shown),
            output: format!(
                "{}tool succeeded but did not produce {}",
                out.output,
                task.output.display()
            ),
        },
        Ok(out) if out.success => Outcome::Success(out),
        Ok(out) => Outcome::Failure {
            command: Some(shown),
            output: out.output,
        },
        Err(e) => Outcome::Failure {
            command: Some(shown),
            output: format!("{:#}", e),
        },
    }
}

/// Coordinator-side bookkeeping for one run.
struct Coordinator<'g> {
    graph: &'g mut BuildGraph,
    state: &'g mut BuildState,
    /// Outstanding dirty dependencies per node
    pending: Vec<usize>,
    ready: VecDeque<NodeIndex>,
    report: ScheduleReport,
}

impl<'g> Coordinator<'g> {
    fn new(graph: &'g mut BuildGraph, state: &'g mut BuildState) -> Result<Self> {
        let order = graph.topo_order()?;
        let mut pending = vec![0; graph.len()];
        let mut ready = VecDeque::new();

        for &node in &order {
            if !Self::schedulable(graph, node) {
                continue;
            }
            pending[node.index()] = graph
                .dependencies(node)
                .filter(|&dep| graph.status(dep) == TaskStatus::Dirty)
                .count();
            if pending[node.index()] == 0 {
                ready.push_back(node);
            }
        }

        Ok(Coordinator {
            graph,
            state,
            pending,
            ready,
            report: ScheduleReport::default(),
        })
    }

    fn schedulable(graph: &BuildGraph, node: NodeIndex) -> bool {
        graph.status(node) == TaskStatus::Dirty && !graph.task(node).kind.is_artifact()
    }

    fn next_ready(&mut self, aborted: bool) -> Option<NodeIndex> {
        if aborted {
            return None;
        }
        while let Some(node) = self.ready.pop_front() {
            if self.graph.status(node) == TaskStatus::Dirty {
                self.graph.set_status(node, TaskStatus::Running);
                return Some(node);
            }
        }
        None
    }

    fn complete(&mut self, node: NodeIndex, outcome: Outcome, observer: &dyn BuildObserver) {
        let outcome = match outcome {
            Outcome::Success(out) => match self.record(node) {
                Ok(()) => Ok(out),
                Err(e) => Err((None, format!("{}{:#}", out.output, e))),
            },
            Outcome::Failure { command, output } => Err((command, output)),
        };

        match outcome {
            Ok(out) => {
                self.graph.set_status(node, TaskStatus::Succeeded);
                let task = self.graph.task(node);
                tracing::debug!("{} succeeded", task.id);
                observer.task_finished(task, TaskStatus::Succeeded, &out.output);
                self.report.succeeded.push(task.id.clone());

                let dependents: Vec<NodeIndex> = self.graph.dependents(node).collect();
                for dependent in dependents {
                    if !Self::schedulable(self.graph, dependent) {
                        continue;
                    }
                    let count = &mut self.pending[dependent.index()];
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.ready.push_back(dependent);
                    }
                }
            }
            Err((command, output)) => {
                self.graph.set_status(node, TaskStatus::Failed);
                let task = self.graph.task(node);
                tracing::debug!("{} failed", task.id);
                observer.task_finished(task, TaskStatus::Failed, &output);
                self.report.failed.push(TaskFailure {
                    id: task.id.clone(),
                    command,
                    output,
                });

                for downstream in self.graph.transitive_dependents(node) {
                    if self.graph.status(downstream) != TaskStatus::Dirty {
                        continue;
                    }
                    self.graph
                        .set_status(downstream, TaskStatus::FailedByPropagation);
                    let task = self.graph.task(downstream);
                    observer.task_finished(task, TaskStatus::FailedByPropagation, "");
                    self.report.propagated.push(task.id.clone());
                }
            }
        }
    }

    fn record(&mut self, node: NodeIndex) -> Result<()> {
        let task = self.graph.task(node);
        let record = TaskRecord {
            inputs: input_fingerprints(task, self.state),
            profile: task.profile_fingerprint.clone(),
            output: file_fingerprint(&task.output)?,
        };
        self.state.record(task.id.clone(), record);
        Ok(())
    }

    fn finish(mut self, aborted: bool) -> ScheduleReport {
        let graph: &BuildGraph = self.graph;
        self.report.not_run = graph
            .nodes()
            .filter(|&n| Self::schedulable(graph, n))
            .map(|n| graph.task(n).id.clone())
            .collect();
        // A flag raised after the last task finished stopped nothing.
        self.report.aborted = aborted && !self.report.not_run.is_empty();
        if !self.report.not_run.is_empty() {
            tracing::debug!("{} task(s) not started", self.report.not_run.len());
        }
        self.report
    }
}
