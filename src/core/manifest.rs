//! Kiln.toml manifest parsing and schema.
//!
//! The manifest declares the project's profiles, build types, source groups
//! and the final artifact. Everything it describes is turned into a
//! [`ProfileSet`] and a task graph by the build operation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::core::profile::{
    BuildType, ConfigError, ConfigProfile, ListMerge, OptionKey, OptionValue, ProfileSet,
};

/// File name of the manifest.
pub const MANIFEST_NAME: &str = "Kiln.toml";

/// Name of the persisted state file inside each build directory.
pub const STATE_FILE_NAME: &str = ".kiln-state";

/// Errors locating or parsing the manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not find `{}` in `{}` or any parent directory", MANIFEST_NAME, .dir.display())]
    NotFound { dir: PathBuf },

    #[error("failed to read manifest `{}`", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest `{}`: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// Parsed `Kiln.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    pub project: ProjectSection,

    pub artifact: ArtifactSpec,

    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSpec>,

    /// build type -> profile -> options
    #[serde(default)]
    pub build_types: BTreeMap<String, BTreeMap<String, BTreeMap<OptionKey, OptionValue>>>,

    #[serde(default)]
    pub sources: Vec<SourceGroup>,

    /// Directory containing the manifest
    #[serde(skip)]
    root: PathBuf,
}

/// The `[project]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectSection {
    pub name: String,

    /// Parent of the per-build-type output directories
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Worker count
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Name under which the artifact is published in the project root
    #[serde(default)]
    pub publish: Option<String>,

    /// How list options combine across profile parents
    #[serde(default)]
    pub list_merge: ListMerge,
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

/// Kind of final artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Linked executable
    Exe,
    /// Static library archive
    Staticlib,
}

/// The `[artifact]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArtifactSpec {
    pub name: String,
    pub kind: ArtifactKind,
    /// Profile whose link/archive options produce the artifact
    pub profile: String,
}

impl ArtifactSpec {
    /// Output file name for this artifact.
    pub fn file_name(&self) -> String {
        match self.kind {
            ArtifactKind::Exe => {
                if cfg!(windows) {
                    format!("{}.exe", self.name)
                } else {
                    self.name.clone()
                }
            }
            ArtifactKind::Staticlib => format!("lib{}.a", self.name),
        }
    }
}

/// A `[profiles.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSpec {
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(flatten)]
    pub options: BTreeMap<OptionKey, OptionValue>,
}

/// Task generators a source group can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// Compile translation units
    Compile,
    /// Generate sources from marked interface headers
    Interface,
}

/// A `[[sources]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceGroup {
    /// Directory to search, relative to the project root
    pub root: PathBuf,

    /// File name patterns (`*.c`, `*.{cpp,cxx}`)
    pub patterns: Vec<String>,

    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Generators tried in order for every file; first match wins
    #[serde(default = "default_generators")]
    pub generators: Vec<GeneratorKind>,

    /// Profile for tasks generated from this group
    pub profile: String,

    /// Marker an interface header must contain
    #[serde(default)]
    pub marker: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_generators() -> Vec<GeneratorKind> {
    vec![GeneratorKind::Compile]
}

impl Manifest {
    /// Load and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&contents, path, root)
    }

    /// Parse manifest text; `root` is the project directory.
    pub fn parse(contents: &str, path: &Path, root: PathBuf) -> Result<Self, ManifestError> {
        let mut manifest: Manifest =
            toml::from_str(contents).map_err(|e| ManifestError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        manifest.root = root;
        Ok(manifest)
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Output directory for a build type.
    pub fn build_dir(&self, build_type: &str) -> PathBuf {
        self.root.join(&self.project.build_dir).join(build_type)
    }

    /// State file for a build type.
    pub fn state_path(&self, build_type: &str) -> PathBuf {
        self.build_dir(build_type).join(STATE_FILE_NAME)
    }

    /// Where the artifact gets published, if publishing is configured.
    pub fn publish_path(&self) -> Option<PathBuf> {
        self.project
            .publish
            .as_ref()
            .map(|name| self.root.join(name))
    }

    /// Declared build type names, sorted.
    pub fn build_type_names(&self) -> Vec<&str> {
        self.build_types.keys().map(String::as_str).collect()
    }

    /// Look up a build type by name.
    pub fn build_type(&self, name: &str) -> Result<BuildType, ConfigError> {
        let settings = self
            .build_types
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBuildType {
                name: name.to_string(),
                valid: self.build_type_names().join(", "),
            })?;
        Ok(BuildType {
            name: name.to_string(),
            settings: settings.clone(),
        })
    }

    /// Build the profile set declared by `[profiles]`.
    pub fn profile_set(&self) -> Result<ProfileSet, ConfigError> {
        let mut set = ProfileSet::new(self.project.list_merge);
        for (name, spec) in &self.profiles {
            let mut profile = ConfigProfile::new(name, spec.parent.as_deref());
            for (key, value) in &spec.options {
                profile.set(*key, value.clone())?;
            }
            set.insert(profile)?;
        }
        Ok(set)
    }

    /// Profile set with the named build type applied.
    pub fn configure(&self, build_type: &str) -> Result<ProfileSet, ConfigError> {
        let overlay = self.build_type(build_type)?;
        let mut set = self.profile_set()?;
        set.apply(&overlay)?;
        Ok(set)
    }
}
