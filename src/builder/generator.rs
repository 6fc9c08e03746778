//! Task generators: turn collected files into tasks.
//!
//! Each source group owns a [`GeneratorRegistry`]. Every collected file is
//! offered to the registered generators in order and the first one that
//! produces a task wins.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::builder::includes::IncludeScanner;
use crate::core::manifest::{GeneratorKind, SourceGroup};
use crate::core::{Language, OptionKey, ResolvedProfile, SourceFile, Task, TaskInput, TaskKind};

/// Marker an interface header must contain when the group sets none.
pub const DEFAULT_INTERFACE_MARKER: &str = "Q_OBJECT";

/// Everything a generator needs besides the file itself.
pub struct GenerateContext<'a> {
    /// Project root; task paths are laid out relative to it
    pub project_root: &'a Path,
    /// Output directory of the selected build type
    pub build_dir: &'a Path,
    pub profile: &'a Arc<ResolvedProfile>,
    pub scanner: &'a mut IncludeScanner,
}

impl GenerateContext<'_> {
    /// Build-directory-relative layout for a project file.
    fn layout_path(&self, file: &Path) -> PathBuf {
        let rel = file.strip_prefix(self.project_root).map_or_else(
            |_| crate::util::fs::relative_path(self.project_root, file),
            Path::to_path_buf,
        );
        // Files outside the project must not escape the build directory.
        rel.components()
            .map(|c| match c {
                Component::ParentDir => "__".into(),
                other => other.as_os_str().to_os_string(),
            })
            .collect()
    }

    fn include_dirs(&self) -> Vec<PathBuf> {
        self.profile
            .list(OptionKey::IncludePaths)
            .iter()
            .map(|dir| self.project_root.join(dir))
            .collect()
    }
}

/// Maps a source file to at most one task.
pub trait TaskGenerator: Send + Sync {
    /// The kind of task this generator produces.
    fn capability(&self) -> TaskKind;

    /// Whether this generator handles `file` at all.
    fn accepts(&self, file: &SourceFile) -> bool;

    fn generate(&self, file: &SourceFile, ctx: &mut GenerateContext<'_>) -> Result<Option<Task>>;
}

/// Compiles translation units into object files.
#[derive(Debug, Clone, Default)]
pub struct CompileGenerator;

impl CompileGenerator {
    fn object_path(ctx: &GenerateContext<'_>, file: &Path) -> PathBuf {
        let mut rel = ctx.layout_path(file).into_os_string();
        rel.push(".o");
        ctx.build_dir.join("obj").join(rel)
    }

    /// Compile task for a source produced by another task.
    pub fn compile_output(upstream: &Task, ctx: &GenerateContext<'_>) -> Task {
        let rel = upstream
            .output
            .strip_prefix(ctx.build_dir)
            .unwrap_or(&upstream.output);
        let mut name = rel.as_os_str().to_os_string();
        name.push(".o");
        let output = ctx.build_dir.join("obj").join(name);

        Task::new(ctx.build_dir, TaskKind::Compile, output, ctx.profile.clone())
            .with_input(TaskInput::Output {
                task: upstream.id.clone(),
                path: upstream.output.clone(),
            })
            .with_language(Language::Cxx)
    }
}

impl TaskGenerator for CompileGenerator {
    fn capability(&self) -> TaskKind {
        TaskKind::Compile
    }

    fn accepts(&self, file: &SourceFile) -> bool {
        file.is_compilable()
    }

    fn generate(&self, file: &SourceFile, ctx: &mut GenerateContext<'_>) -> Result<Option<Task>> {
        let output = Self::object_path(ctx, &file.path);
        let include_dirs = ctx.include_dirs();
        let headers = ctx
            .scanner
            .scan(&file.path, &include_dirs)
            .with_context(|| format!("failed to scan includes of {}", file.path.display()))?;

        let mut task = Task::new(ctx.build_dir, TaskKind::Compile, output, ctx.profile.clone())
            .with_input(TaskInput::Source(file.clone()));
        for header in headers {
            task = task.with_input(TaskInput::Source(header));
        }
        if let Some(language) = file.language {
            task = task.with_language(language);
        }
        Ok(Some(task))
    }
}

/// Runs the interface generator over marked headers.
#[derive(Debug, Clone)]
pub struct InterfaceGenerator {
    marker: String,
}

impl InterfaceGenerator {
    pub fn new(marker: impl Into<String>) -> Self {
        InterfaceGenerator {
            marker: marker.into(),
        }
    }
}

impl Default for InterfaceGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_INTERFACE_MARKER)
    }
}

impl TaskGenerator for InterfaceGenerator {
    fn capability(&self) -> TaskKind {
        TaskKind::Generate
    }

    fn accepts(&self, file: &SourceFile) -> bool {
        if !file.is_header() {
            return false;
        }
        match std::fs::read(&file.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).contains(&self.marker),
            Err(e) => {
                tracing::debug!("cannot read {}: {}", file.path.display(), e);
                false
            }
        }
    }

    fn generate(&self, file: &SourceFile, ctx: &mut GenerateContext<'_>) -> Result<Option<Task>> {
        let mut rel = ctx.layout_path(&file.path);
        rel.set_extension("gen.cpp");
        let output = ctx.build_dir.join("gen").join(rel);

        let task = Task::new(ctx.build_dir, TaskKind::Generate, output, ctx.profile.clone())
            .with_input(TaskInput::Source(file.clone()));
        Ok(Some(task))
    }
}

/// Ordered list of generators for one source group.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: Vec<Box<dyn TaskGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for a manifest source group.
    pub fn for_group(group: &SourceGroup) -> Self {
        let mut registry = Self::new();
        for kind in &group.generators {
            match kind {
                GeneratorKind::Compile => registry.register(CompileGenerator),
                GeneratorKind::Interface => registry.register(InterfaceGenerator::new(
                    group
                        .marker
                        .as_deref()
                        .unwrap_or(DEFAULT_INTERFACE_MARKER),
                )),
            }
        }
        registry
    }

    pub fn register(&mut self, generator: impl TaskGenerator + 'static) {
        self.generators.push(Box::new(generator));
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Offer `file` to each generator in order; first task wins.
    pub fn generate(
        &self,
        file: &SourceFile,
        ctx: &mut GenerateContext<'_>,
    ) -> Result<Option<Task>> {
        for generator in &self.generators {
            if !generator.accepts(file) {
                continue;
            }
            if let Some(task) = generator.generate(file, ctx)? {
                tracing::trace!("{} -> {} ({})", file.path.display(), task.id, task.kind);
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Generate tasks for every file, including the compile step for each
    /// generated source.
    pub fn generate_all(
        &self,
        files: &[SourceFile],
        ctx: &mut GenerateContext<'_>,
    ) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for file in files {
            let Some(task) = self.generate(file, ctx)? else {
                continue;
            };
            if task.kind == TaskKind::Generate {
                // The generated source includes its interface header.
                let include_dirs = ctx.include_dirs();
                let headers = ctx
                    .scanner
                    .scan(&file.path, &include_dirs)
                    .with_context(|| format!("failed to scan includes of {}", file.path.display()))?;
                let mut compile = CompileGenerator::compile_output(&task, ctx)
                    .with_input(TaskInput::Source(file.clone()));
                for header in headers {
                    compile = compile.with_input(TaskInput::Source(header));
                }
                tasks.push(task);
                tasks.push(compile);
            } else {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}
