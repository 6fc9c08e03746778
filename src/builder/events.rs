//! Build event types for JSON output.
//!
//! This module defines the stable JSON schema for machine-readable build output.
//! These events are emitted when using `--message-format=json`.
//!
//! # Event Types
//!
//! - `build-started`: Planning finished, tasks are about to run
//! - `task-finished`: A task ran to completion (or was skipped)
//! - `task-failed`: A task failed, or was not attempted because of an upstream failure
//! - `artifact`: The final library or executable was produced
//! - `build-finished`: Build completed (success or failure)
//!
//! # Stability
//!
//! New fields may be added, but existing fields should not be removed or renamed.

use std::path::PathBuf;

use serde::Serialize;

use crate::core::{TaskId, TaskKind, TaskStatus};

/// A build event emitted during the build process.
///
/// Each event is serialized as a single JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "reason")]
pub enum BuildEvent {
    #[serde(rename = "build-started")]
    BuildStarted {
        /// Selected build type (e.g., "Debug")
        build_type: String,
        /// Tasks that will run
        dirty: usize,
        /// Tasks reused from the previous build
        skipped: usize,
    },

    #[serde(rename = "task-finished")]
    TaskFinished {
        task: TaskId,
        kind: TaskKind,
        status: TaskStatus,
        output: PathBuf,
    },

    #[serde(rename = "task-failed")]
    TaskFailed {
        task: TaskId,
        kind: TaskKind,
        status: TaskStatus,
        /// Captured tool output
        #[serde(skip_serializing_if = "String::is_empty")]
        message: String,
    },

    /// The final artifact was produced.
    #[serde(rename = "artifact")]
    Artifact {
        filenames: Vec<PathBuf>,
        /// False when the artifact was up to date
        fresh: bool,
    },

    #[serde(rename = "build-finished")]
    BuildFinished {
        success: bool,
        /// Total build duration in milliseconds
        duration_ms: u64,
        /// Number of tasks that ran
        tasks_run: usize,
    },
}

impl BuildEvent {
    /// Create a build started event.
    pub fn started(build_type: impl Into<String>, dirty: usize, skipped: usize) -> Self {
        BuildEvent::BuildStarted {
            build_type: build_type.into(),
            dirty,
            skipped,
        }
    }

    /// Create a build finished event.
    pub fn finished(success: bool, duration_ms: u64, tasks_run: usize) -> Self {
        BuildEvent::BuildFinished {
            success,
            duration_ms,
            tasks_run,
        }
    }

    /// Serialize this event to a JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_serialization() {
        let event = BuildEvent::finished(true, 2340, 3);
        let json = event.to_json();
        assert!(json.contains("\"reason\":\"build-finished\""));
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"duration_ms\":2340"));
        assert!(json.contains("\"tasks_run\":3"));
    }

    #[test]
    fn test_task_failed_serialization() {
        let event = BuildEvent::TaskFailed {
            task: TaskId::new("app"),
            kind: TaskKind::Link,
            status: TaskStatus::FailedByPropagation,
            message: String::new(),
        };
        let json = event.to_json();
        assert!(json.contains("\"reason\":\"task-failed\""));
        assert!(json.contains("\"task\":\"app\""));
        assert!(json.contains("\"status\":\"failed-by-propagation\""));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_task_finished_serialization() {
        let event = BuildEvent::TaskFinished {
            task: TaskId::new("obj/src/a.c.o"),
            kind: TaskKind::Compile,
            status: TaskStatus::Succeeded,
            output: PathBuf::from("build/Debug/obj/src/a.c.o"),
        };
        let json = event.to_json();
        assert!(json.contains("\"kind\":\"compile\""));
        assert!(json.contains("\"status\":\"succeeded\""));
    }
}
