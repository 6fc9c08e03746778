//! Test utilities and mocks for kiln unit tests.
//!
//! [`MockInvoker`] stands in for the compiler, generator, archiver and
//! linker: it records every command, writes a deterministic output file and
//! can be told to fail, stall or panic on specific tasks, or to raise the
//! abort flag.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln::test_support::{MockInvoker, TaskGraphFixture};
//!
//! #[test]
//! fn test_example() {
//!     let fx = TaskGraphFixture::new();
//!     let invoker = MockInvoker::new().fail_on("obj/b.c.o");
//!     // Plan and schedule fx.graph() with the invoker...
//! }
//! ```

pub mod fixtures;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::builder::invoker::{ToolInvoker, ToolOutput};
use crate::builder::toolchain::CommandSpec;

// Re-export fixtures for convenience
pub use fixtures::*;

/// In-memory tool invoker.
#[derive(Debug, Default)]
pub struct MockInvoker {
    /// Output path suffixes whose commands fail
    fail: Vec<String>,
    /// Output path suffixes whose commands sleep before finishing
    delay: Vec<(String, Duration)>,
    /// Output path suffixes whose commands panic
    panic: Vec<String>,
    /// Raise the flag after this many successful commands
    abort: Option<(usize, Arc<AtomicBool>)>,
    calls: Mutex<Vec<String>>,
    successes: AtomicUsize,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command whose output path ends with `suffix`.
    pub fn fail_on(mut self, suffix: impl Into<String>) -> Self {
        self.fail.push(suffix.into());
        self
    }

    /// Sleep for `delay` before finishing any command whose output path
    /// ends with `suffix`.
    pub fn delay_on(mut self, suffix: impl Into<String>, delay: Duration) -> Self {
        self.delay.push((suffix.into(), delay));
        self
    }

    /// Panic inside any command whose output path ends with `suffix`.
    pub fn panic_on(mut self, suffix: impl Into<String>) -> Self {
        self.panic.push(suffix.into());
        self
    }

    /// Set `flag` once `n` commands have succeeded.
    pub fn abort_after(mut self, n: usize, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some((n, flag));
        self
    }

    /// Output paths of every command run so far, in call order.
    pub fn invocations(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether a command producing a path ending with `suffix` ran.
    pub fn ran(&self, suffix: &str) -> bool {
        self.invocations().iter().any(|o| o.ends_with(suffix))
    }

    fn output_of(command: &CommandSpec) -> Option<PathBuf> {
        if let Some(pos) = command.args.iter().position(|a| a == "-o") {
            return command.args.get(pos + 1).map(PathBuf::from);
        }
        command
            .args
            .iter()
            .find(|a| a.ends_with(".a"))
            .map(PathBuf::from)
    }
}

impl ToolInvoker for MockInvoker {
    fn invoke(&self, command: &CommandSpec) -> Result<ToolOutput> {
        let output = Self::output_of(command)
            .ok_or_else(|| anyhow!("mock: no output in `{}`", command.display()))?;
        let shown = output.display().to_string();
        self.calls.lock().unwrap().push(shown.clone());

        if self.panic.iter().any(|suffix| shown.ends_with(suffix.as_str())) {
            panic!("mock panic for {}", shown);
        }
        for (suffix, delay) in &self.delay {
            if shown.ends_with(suffix.as_str()) {
                std::thread::sleep(*delay);
            }
        }
        if self.fail.iter().any(|suffix| shown.ends_with(suffix.as_str())) {
            return Ok(ToolOutput::failed(format!("mock failure for {}\n", shown)));
        }

        // Output content follows the command and the content of its inputs,
        // so downstream fingerprints change when an input does.
        let mut contents = command.display();
        for arg in &command.args {
            let path = Path::new(arg);
            if path != output && path.is_file() {
                contents.push('\n');
                contents.push_str(&String::from_utf8_lossy(&std::fs::read(path)?));
            }
        }
        std::fs::write(&output, contents)?;

        let done = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, flag)) = &self.abort {
            if done >= *n {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(ToolOutput::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mock_invoker_writes_and_fails() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("a.o");
        let invoker = MockInvoker::new().fail_on("b.o");

        let ok = invoker
            .invoke(&CommandSpec::new("cc").args(["-c", "a.c", "-o", &out.display().to_string()]))
            .unwrap();
        assert!(ok.success);
        assert!(out.is_file());

        let failed = invoker
            .invoke(&CommandSpec::new("cc").args(["-o", "b.o"]))
            .unwrap();
        assert!(!failed.success);
        assert!(invoker.ran("a.o"));
        assert_eq!(invoker.invocations().len(), 2);
    }
}
