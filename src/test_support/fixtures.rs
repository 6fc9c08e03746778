//! Test fixtures for common test scenarios.
//!
//! This module provides pre-built projects and task graphs for testing the
//! planner, scheduler, linker and build operations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::builder::graph::BuildGraph;
use crate::core::manifest::MANIFEST_NAME;
use crate::core::{
    ConfigProfile, Language, OptionKey, ProfileSet, ResolvedProfile, SourceFile, Task, TaskInput,
    TaskKind,
};

/// Fixture for a complete project structure.
#[derive(Debug, Clone)]
pub struct ProjectFixture {
    /// Kiln.toml content.
    pub manifest: String,
    /// Files (path relative to project root -> content).
    pub files: BTreeMap<PathBuf, String>,
}

impl ProjectFixture {
    /// Create a new empty project fixture.
    pub fn new(manifest: impl Into<String>) -> Self {
        ProjectFixture {
            manifest: manifest.into(),
            files: BTreeMap::new(),
        }
    }

    /// The `a.c`, `b.c`, `x.h` executable: `b.c` includes `x.h`.
    pub fn two_units() -> Self {
        ProjectFixture::new(manifests::exe("demo", "cc"))
            .with_file("src/a.c", "int a(void) { return 1; }\n")
            .with_file("src/b.c", "#include \"x.h\"\nint b(void) { return X; }\n")
            .with_file("src/x.h", "#define X 2\n")
    }

    /// A C++ executable with an interface header: `widget.h` carries the
    /// marker and includes `cfg.h`; `main.cpp` includes neither.
    pub fn interface_units() -> Self {
        ProjectFixture::new(manifests::interface("demo"))
            .with_file("src/main.cpp", "int main() { return 0; }\n")
            .with_file(
                "src/widget.h",
                "#include \"cfg.h\"\nclass Widget { Q_OBJECT };\n",
            )
            .with_file("src/cfg.h", "#define SIZE 1\n")
    }

    /// Add a file.
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// Write this fixture to a real directory.
    pub fn write_to(&self, root: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(root)?;
        std::fs::write(root.join(MANIFEST_NAME), &self.manifest)?;

        for (rel_path, content) in &self.files {
            let full_path = root.join(rel_path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, content)?;
        }

        root.canonicalize()
    }
}

/// Common manifest templates.
pub mod manifests {
    /// An executable built from `src/*.c` with Debug and Release types.
    pub fn exe(name: &str, compiler: &str) -> String {
        format!(
            r#"[project]
name = "{name}"
jobs = 2
publish = "{name}"

[artifact]
name = "{name}"
kind = "exe"
profile = "c"

[profiles.c]
compiler = "{compiler}"
linker = "{compiler}"
include-paths = ["src"]

[build-types.Debug.c]
cflags = ["-g"]
defines = ["-DDEBUG"]

[build-types.Release.c]
cflags = "-O2"

[[sources]]
root = "src"
patterns = ["*.c"]
profile = "c"
"#
        )
    }

    /// An executable from `src/*.cpp` plus generated sources for marked
    /// headers in `src/*.h`.
    pub fn interface(name: &str) -> String {
        format!(
            r#"[project]
name = "{name}"

[artifact]
name = "{name}"
kind = "exe"
profile = "cpp"

[profiles.cpp]
compiler = "c++"
linker = "c++"
generator = "moc"
include-paths = ["src"]

[build-types.Debug.cpp]
cflags = ["-g"]

[[sources]]
root = "src"
patterns = ["*.cpp"]
profile = "cpp"

[[sources]]
root = "src"
patterns = ["*.h"]
generators = ["interface"]
profile = "cpp"
"#
        )
    }

    /// A static library built from `src/*.c`.
    pub fn staticlib(name: &str) -> String {
        format!(
            r#"[project]
name = "{name}"

[artifact]
name = "{name}"
kind = "staticlib"
profile = "c"

[profiles.c]
compiler = "cc"

[build-types.Debug.c]
cflags = ["-g"]

[[sources]]
root = "src"
patterns = ["*.c"]
profile = "c"
"#
        )
    }
}

/// A small hand-built task graph over real files.
///
/// ```text
/// src/a.c -> obj/a.c.o --\
/// src/b.c -> obj/b.c.o ---+--> app
/// src/w.h -> gen/w.gen.cpp -> obj/gen/w.gen.cpp.o   (with_generated only)
/// ```
pub struct TaskGraphFixture {
    _tmp: TempDir,
    root: PathBuf,
    build: PathBuf,
    generated: bool,
    profile: Arc<ResolvedProfile>,
}

impl TaskGraphFixture {
    pub fn new() -> Self {
        Self::create(false)
    }

    /// Adds an interface header whose generated source is compiled and
    /// linked.
    pub fn with_generated() -> Self {
        Self::create(true)
    }

    fn create(generated: bool) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/a.c"), "int a;\n").unwrap();
        std::fs::write(root.join("src/b.c"), "int b;\n").unwrap();
        if generated {
            std::fs::write(root.join("src/w.h"), "class W { Q_OBJECT };\n").unwrap();
        }

        let mut profile = ConfigProfile::new("c", None);
        profile.set(OptionKey::Compiler, "cc".into()).unwrap();
        profile.set(OptionKey::Generator, "moc".into()).unwrap();
        let mut set = ProfileSet::default();
        set.insert(profile).unwrap();

        TaskGraphFixture {
            build: root.join("build"),
            root,
            _tmp: tmp,
            generated,
            profile: Arc::new(set.resolve("c").unwrap()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self) -> &Path {
        &self.build
    }

    /// Overwrite a project file.
    pub fn touch(&self, rel: &str, content: &str) {
        std::fs::write(self.root.join(rel), content).unwrap();
    }

    fn source(&self, rel: &str) -> TaskInput {
        TaskInput::Source(SourceFile::from_path(&self.root.join(rel)).unwrap())
    }

    fn output_of(task: &Task) -> TaskInput {
        TaskInput::Output {
            task: task.id.clone(),
            path: task.output.clone(),
        }
    }

    /// Fresh graph; source fingerprints are taken now.
    pub fn graph(&self) -> BuildGraph {
        let compile = |rel: &str, obj: &str| {
            Task::new(
                &self.build,
                TaskKind::Compile,
                self.build.join(obj),
                self.profile.clone(),
            )
            .with_input(self.source(rel))
            .with_language(Language::C)
        };

        let mut tasks = vec![
            compile("src/a.c", "obj/a.c.o"),
            compile("src/b.c", "obj/b.c.o"),
        ];

        if self.generated {
            let gen = Task::new(
                &self.build,
                TaskKind::Generate,
                self.build.join("gen/w.gen.cpp"),
                self.profile.clone(),
            )
            .with_input(self.source("src/w.h"));
            let gen_obj = Task::new(
                &self.build,
                TaskKind::Compile,
                self.build.join("obj/gen/w.gen.cpp.o"),
                self.profile.clone(),
            )
            .with_input(Self::output_of(&gen))
            .with_language(Language::Cxx);
            tasks.push(gen);
            tasks.push(gen_obj);
        }

        let mut link = Task::new(
            &self.build,
            TaskKind::Link,
            self.build.join("app"),
            self.profile.clone(),
        );
        for task in tasks.iter().filter(|t| t.kind == TaskKind::Compile) {
            link = link.with_input(Self::output_of(task));
        }
        tasks.push(link);

        BuildGraph::from_tasks(tasks).unwrap()
    }
}

impl Default for TaskGraphFixture {
    fn default() -> Self {
        Self::new()
    }
}
