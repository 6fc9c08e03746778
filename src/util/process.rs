//! Subprocess execution for external tools.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result};

/// A finished process with its stdout and stderr merged into one text.
#[derive(Debug)]
pub struct Captured {
    pub status: ExitStatus,
    pub text: String,
}

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `cwd` instead of the current directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Run to completion with stdin closed, capturing stdout then stderr.
    ///
    /// Fails only when the process cannot be started or waited on; a
    /// non-zero exit is reported through [`Captured::status`].
    pub fn exec(&self) -> Result<Captured> {
        let mut cmd = Command::new(resolve_program(&self.program));
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd
            .spawn()
            .and_then(|child| child.wait_with_output())
            .with_context(|| format!("failed to run `{}`", self.program.display()))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(Captured {
            status: output.status,
            text,
        })
    }

    /// The command line, space separated.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Resolve a bare program name through PATH, leaving explicit paths alone.
fn resolve_program(program: &Path) -> PathBuf {
    if program.components().count() > 1 {
        return program.to_path_buf();
    }
    program
        .to_str()
        .and_then(|name| which::which(name).ok())
        .unwrap_or_else(|| program.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_exec_merges_streams() {
        let out = ProcessBuilder::new("sh")
            .args(["-c", "echo out; echo err >&2; exit 3"])
            .exec()
            .unwrap();

        assert_eq!(out.status.code(), Some(3));
        assert_eq!(out.text, "out\nerr\n");
    }

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("gcc").args(["-c", "main.c", "-o", "main.o"]);
        assert_eq!(pb.display_command(), "gcc -c main.c -o main.o");
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let result = ProcessBuilder::new("/definitely/not/a/compiler").exec();
        assert!(result.is_err());
    }
}
