//! External tool invocation.

use std::path::PathBuf;

use anyhow::Result;

use crate::builder::toolchain::CommandSpec;
use crate::util::process::ProcessBuilder;

/// Result of running one tool command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    /// Combined stdout and stderr
    pub output: String,
}

impl ToolOutput {
    pub fn ok() -> Self {
        ToolOutput {
            success: true,
            output: String::new(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        ToolOutput {
            success: false,
            output: output.into(),
        }
    }
}

/// Runs compiler, generator, archiver and linker commands.
///
/// An `Err` means the command could not be run at all (missing binary,
/// spawn failure); a command that ran and exited non-zero is an `Ok` with
/// `success == false`.
pub trait ToolInvoker: Send + Sync {
    fn invoke(&self, command: &CommandSpec) -> Result<ToolOutput>;
}

/// Invoker that spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    cwd: Option<PathBuf>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        ProcessInvoker {
            cwd: Some(dir.into()),
        }
    }
}

impl ToolInvoker for ProcessInvoker {
    fn invoke(&self, command: &CommandSpec) -> Result<ToolOutput> {
        let mut cmd = ProcessBuilder::new(&command.program).args(&command.args);
        if let Some(cwd) = &self.cwd {
            cmd = cmd.cwd(cwd);
        }

        tracing::debug!("running: {}", cmd.display_command());
        let captured = cmd.exec()?;

        Ok(ToolOutput {
            success: captured.status.success(),
            output: captured.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_reports_exit_status() {
        let invoker = ProcessInvoker::new();

        let ok = invoker
            .invoke(&CommandSpec::new("sh").args(["-c", "echo hi"]))
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.output.trim(), "hi");

        let failed = invoker
            .invoke(&CommandSpec::new("sh").args(["-c", "echo bad >&2; exit 3"]))
            .unwrap();
        assert!(!failed.success);
        assert!(failed.output.contains("bad"));
    }

    #[test]
    fn test_missing_program_is_error() {
        let invoker = ProcessInvoker::new();
        assert!(invoker
            .invoke(&CommandSpec::new("kiln-definitely-not-a-tool"))
            .is_err());
    }
}
