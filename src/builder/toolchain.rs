//! Toolchain abstraction: turns tasks into concrete command lines.
//!
//! The [`Toolchain`] trait knows the argument conventions of one compiler
//! family. [`command_for`] pulls the relevant options out of a task's
//! resolved profile and asks the toolchain for the command.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::{Language, OptionKey, Task, TaskId, TaskKind};

/// A command to execute: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The program to run (e.g., "gcc", "ar")
    pub program: PathBuf,
    /// Command arguments
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a new command spec.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Render as a single shell-like line for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Input for a compile step.
#[derive(Debug, Clone)]
pub struct CompileInput {
    pub compiler: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    /// Preprocessor defines as given (`-DNAME`, `NAME=1`)
    pub defines: Vec<String>,
    pub cflags: Vec<String>,
}

/// Input for an interface generation step.
#[derive(Debug, Clone)]
pub struct GenerateInput {
    pub generator: String,
    pub header: PathBuf,
    pub output: PathBuf,
    pub flags: Vec<String>,
}

/// Input for an archive step (creating static library).
#[derive(Debug, Clone)]
pub struct ArchiveInput {
    pub archiver: String,
    pub objects: Vec<PathBuf>,
    pub output: PathBuf,
    pub flags: Vec<String>,
}

/// Input for a link step.
#[derive(Debug, Clone)]
pub struct LinkInput {
    pub linker: String,
    pub objects: Vec<PathBuf>,
    pub output: PathBuf,
    pub lib_dirs: Vec<PathBuf>,
    /// Libraries (`-lfoo` or archive paths), in link order
    pub libs: Vec<String>,
    pub ldflags: Vec<String>,
}

/// Errors building a command for a task.
#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("task `{task}` needs option `{key}` but its profile `{profile}` does not set it")]
    MissingTool {
        task: TaskId,
        key: OptionKey,
        profile: String,
    },

    #[error("task `{task}` has no input")]
    NoInput { task: TaskId },
}

/// Trait for toolchain implementations.
///
/// Each toolchain knows how to generate commands for its specific tools.
pub trait Toolchain: Send + Sync {
    /// Default compiler when a profile does not set `compiler`.
    fn default_compiler(&self, lang: Language) -> &'static str;

    /// Default linker when a profile does not set `linker`.
    fn default_linker(&self) -> &'static str;

    /// Default archiver when a profile does not set `archiver`.
    fn default_archiver(&self) -> &'static str;

    fn compile_command(&self, input: &CompileInput) -> CommandSpec;

    fn generate_command(&self, input: &GenerateInput) -> CommandSpec;

    fn archive_command(&self, input: &ArchiveInput) -> CommandSpec;

    fn link_command(&self, input: &LinkInput) -> CommandSpec;
}

/// GCC/Clang-style toolchain (`cc -c`, `ar rcs`, `cc -o`).
#[derive(Debug, Clone, Default)]
pub struct GnuToolchain;

impl Toolchain for GnuToolchain {
    fn default_compiler(&self, lang: Language) -> &'static str {
        match lang {
            Language::C => "cc",
            Language::Cxx => "c++",
        }
    }

    fn default_linker(&self) -> &'static str {
        "c++"
    }

    fn default_archiver(&self) -> &'static str {
        "ar"
    }

    fn compile_command(&self, input: &CompileInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&input.compiler)
            .arg("-c")
            .arg(input.source.display().to_string())
            .arg("-o")
            .arg(input.output.display().to_string())
            .args(input.cflags.iter().cloned());

        for define in &input.defines {
            if define.starts_with("-D") {
                cmd = cmd.arg(define.clone());
            } else {
                cmd = cmd.arg(format!("-D{}", define));
            }
        }

        for dir in &input.include_dirs {
            cmd = cmd.arg(format!("-I{}", dir.display()));
        }

        cmd
    }

    fn generate_command(&self, input: &GenerateInput) -> CommandSpec {
        CommandSpec::new(&input.generator)
            .args(input.flags.iter().cloned())
            .arg(input.header.display().to_string())
            .arg("-o")
            .arg(input.output.display().to_string())
    }

    fn archive_command(&self, input: &ArchiveInput) -> CommandSpec {
        let flags = if input.flags.is_empty() {
            vec!["rcs".to_string()]
        } else {
            input.flags.clone()
        };

        CommandSpec::new(&input.archiver)
            .args(flags)
            .arg(input.output.display().to_string())
            .args(input.objects.iter().map(|o| o.display().to_string()))
    }

    fn link_command(&self, input: &LinkInput) -> CommandSpec {
        let mut cmd = CommandSpec::new(&input.linker)
            .args(input.objects.iter().map(|o| o.display().to_string()))
            .arg("-o")
            .arg(input.output.display().to_string())
            .args(input.ldflags.iter().cloned());

        for dir in &input.lib_dirs {
            cmd = cmd.arg(format!("-L{}", dir.display()));
        }

        cmd.args(input.libs.iter().cloned())
    }
}

fn root_relative(root: &Path, paths: &[String]) -> Vec<PathBuf> {
    paths.iter().map(|p| root.join(p)).collect()
}

/// Build the command line for `task`.
///
/// `root` is the project root; relative include and library directories in
/// profiles are resolved against it.
pub fn command_for(
    toolchain: &dyn Toolchain,
    task: &Task,
    root: &Path,
) -> Result<CommandSpec, ToolchainError> {
    let profile = &task.profile;
    let inputs: Vec<PathBuf> = task.inputs.iter().map(|i| i.path().to_path_buf()).collect();

    match task.kind {
        TaskKind::Compile => {
            let source = inputs
                .first()
                .cloned()
                .ok_or_else(|| ToolchainError::NoInput {
                    task: task.id.clone(),
                })?;
            let lang = task.language.unwrap_or(Language::Cxx);
            let input = CompileInput {
                compiler: profile
                    .scalar(OptionKey::Compiler)
                    .unwrap_or(toolchain.default_compiler(lang))
                    .to_string(),
                source,
                output: task.output.clone(),
                include_dirs: root_relative(root, profile.list(OptionKey::IncludePaths)),
                defines: profile.list(OptionKey::Defines).to_vec(),
                cflags: profile.list(OptionKey::Cflags).to_vec(),
            };
            Ok(toolchain.compile_command(&input))
        }
        TaskKind::Generate => {
            let generator =
                profile
                    .scalar(OptionKey::Generator)
                    .ok_or_else(|| ToolchainError::MissingTool {
                        task: task.id.clone(),
                        key: OptionKey::Generator,
                        profile: profile.name().to_string(),
                    })?;
            let header = inputs
                .first()
                .cloned()
                .ok_or_else(|| ToolchainError::NoInput {
                    task: task.id.clone(),
                })?;
            let input = GenerateInput {
                generator: generator.to_string(),
                header,
                output: task.output.clone(),
                flags: profile.list(OptionKey::GeneratorFlags).to_vec(),
            };
            Ok(toolchain.generate_command(&input))
        }
        TaskKind::Archive => {
            let input = ArchiveInput {
                archiver: profile
                    .scalar(OptionKey::Archiver)
                    .unwrap_or(toolchain.default_archiver())
                    .to_string(),
                objects: inputs,
                output: task.output.clone(),
                flags: profile.list(OptionKey::Arflags).to_vec(),
            };
            Ok(toolchain.archive_command(&input))
        }
        TaskKind::Link => {
            let input = LinkInput {
                linker: profile
                    .scalar(OptionKey::Linker)
                    .unwrap_or(toolchain.default_linker())
                    .to_string(),
                objects: inputs,
                output: task.output.clone(),
                lib_dirs: root_relative(root, profile.list(OptionKey::LibPaths)),
                libs: profile.list(OptionKey::Libs).to_vec(),
                ldflags: profile.list(OptionKey::Ldflags).to_vec(),
            };
            Ok(toolchain.link_command(&input))
        }
    }
}
