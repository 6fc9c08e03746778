//! Build progress reporting.
//!
//! The scheduler reports task lifecycle changes to a [`BuildObserver`].
//! Observers are only called from the coordinating thread.

use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::builder::events::BuildEvent;
use crate::core::{Task, TaskStatus};

/// Receives progress notifications during a build.
pub trait BuildObserver: Send + Sync {
    fn build_started(&self, _build_type: &str, _dirty: usize, _skipped: usize) {}

    fn task_started(&self, _task: &Task) {}

    /// Called once per task that reached a final status. `output` is the
    /// captured tool output, empty for propagated failures.
    fn task_finished(&self, _task: &Task, _status: TaskStatus, _output: &str) {}

    /// The final artifact exists; `fresh` is false when it was reused.
    fn artifact_ready(&self, _path: &Path, _fresh: bool) {}

    fn build_finished(&self, _success: bool, _elapsed: Duration, _tasks_run: usize) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NullObserver;

impl BuildObserver for NullObserver {}

/// Progress bar on stderr.
pub struct ProgressObserver {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressObserver {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        ProgressObserver { bar, verbose }
    }
}

impl BuildObserver for ProgressObserver {
    fn build_started(&self, build_type: &str, dirty: usize, skipped: usize) {
        if dirty == 0 {
            self.bar.finish_and_clear();
            return;
        }
        self.bar.set_length(dirty as u64);
        self.bar
            .println(format!("   Building {} ({} task(s), {} fresh)", build_type, dirty, skipped));
    }

    fn task_started(&self, task: &Task) {
        self.bar.set_message(task.id.to_string());
        if self.verbose {
            self.bar.println(format!("{:>10} {}", task.kind.as_str(), task.id));
        }
    }

    fn task_finished(&self, task: &Task, status: TaskStatus, output: &str) {
        self.bar.inc(1);
        if status == TaskStatus::Failed {
            self.bar.println(format!("    failed {}", task.id));
        }
        if self.verbose && !output.trim().is_empty() {
            self.bar.println(output.trim_end().to_string());
        }
    }

    fn build_finished(&self, success: bool, elapsed: Duration, tasks_run: usize) {
        self.bar.finish_and_clear();
        if success {
            eprintln!(
                "    Finished {} task(s) in {:.2}s",
                tasks_run,
                elapsed.as_secs_f64()
            );
        }
    }
}

/// Line-delimited JSON events on stdout.
#[derive(Debug, Default)]
pub struct JsonObserver;

impl JsonObserver {
    fn emit(&self, event: BuildEvent) {
        println!("{}", event.to_json());
    }
}

impl BuildObserver for JsonObserver {
    fn build_started(&self, build_type: &str, dirty: usize, skipped: usize) {
        self.emit(BuildEvent::started(build_type, dirty, skipped));
    }

    fn task_finished(&self, task: &Task, status: TaskStatus, output: &str) {
        if status.is_failed() {
            self.emit(BuildEvent::TaskFailed {
                task: task.id.clone(),
                kind: task.kind,
                status,
                message: output.to_string(),
            });
        } else {
            self.emit(BuildEvent::TaskFinished {
                task: task.id.clone(),
                kind: task.kind,
                status,
                output: task.output.clone(),
            });
        }
    }

    fn artifact_ready(&self, path: &Path, fresh: bool) {
        self.emit(BuildEvent::Artifact {
            filenames: vec![path.to_path_buf()],
            fresh,
        });
    }

    fn build_finished(&self, success: bool, elapsed: Duration, tasks_run: usize) {
        self.emit(BuildEvent::finished(
            success,
            elapsed.as_millis() as u64,
            tasks_run,
        ));
    }
}
