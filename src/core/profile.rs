//! Build profiles: named, inheritable bags of compiler and linker settings.
//!
//! A [`ConfigProfile`] holds the options it sets itself plus an optional
//! parent name. Profiles live in a [`ProfileSet`], which resolves a profile
//! by walking its parent chain from the root down to the leaf:
//!
//! - scalar options (`compiler`, `linker`, ...) are replaced by the child;
//! - list options (`cflags`, `libs`, ...) are concatenated parent-first,
//!   unless the set uses [`ListMerge::Replace`] or the child was cleared.
//!
//! Build types (`Debug`, `Release`, ...) are overlays applied to the set
//! before resolution.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use miette::Diagnostic as MietteDiagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::task::TaskKind;
use crate::util::hash::Fingerprint;

/// Errors in profile configuration. All of them are fatal before any task
/// runs.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ConfigError {
    #[error("unknown build type `{name}` (valid: {valid})")]
    #[diagnostic(
        code(kiln::config::unknown_build_type),
        help("Run `kiln profiles` to see available build types")
    )]
    UnknownBuildType { name: String, valid: String },

    #[error("unknown profile `{name}` (valid: {valid})")]
    #[diagnostic(code(kiln::config::unknown_profile))]
    UnknownProfile { name: String, valid: String },

    #[error("profile `{profile}` has unknown parent `{parent}`")]
    #[diagnostic(code(kiln::config::unknown_parent))]
    UnknownParent { profile: String, parent: String },

    #[error("cyclic profile inheritance: {chain}")]
    #[diagnostic(
        code(kiln::config::parent_cycle),
        help("Remove one `parent` entry so the chain ends at a root profile")
    )]
    ParentCycle { chain: String },

    #[error("option `{key}` of profile `{profile}` expects a {expected} value")]
    #[diagnostic(code(kiln::config::option_shape))]
    OptionShape {
        profile: String,
        key: OptionKey,
        expected: OptionShape,
    },

    #[error("profile `{name}` is defined more than once")]
    #[diagnostic(code(kiln::config::duplicate_profile))]
    DuplicateProfile { name: String },
}

/// Whether an option holds one value or a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionShape {
    Scalar,
    List,
}

impl fmt::Display for OptionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionShape::Scalar => write!(f, "single"),
            OptionShape::List => write!(f, "list"),
        }
    }
}

/// The closed set of options a profile understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionKey {
    /// Compiler executable
    Compiler,
    /// Compiler flags
    Cflags,
    /// Preprocessor defines (`-DNAME` or `-DNAME=VALUE`)
    Defines,
    /// Include directories, relative to the project root
    IncludePaths,
    /// Interface generator executable
    Generator,
    /// Interface generator flags
    GeneratorFlags,
    /// Linker executable
    Linker,
    /// Linker flags
    Ldflags,
    /// Library search directories
    LibPaths,
    /// Libraries to link (`-lfoo`, or paths to archives)
    Libs,
    /// Archiver executable
    Archiver,
    /// Archiver flags
    Arflags,
}

impl OptionKey {
    pub const ALL: [OptionKey; 12] = [
        OptionKey::Compiler,
        OptionKey::Cflags,
        OptionKey::Defines,
        OptionKey::IncludePaths,
        OptionKey::Generator,
        OptionKey::GeneratorFlags,
        OptionKey::Linker,
        OptionKey::Ldflags,
        OptionKey::LibPaths,
        OptionKey::Libs,
        OptionKey::Archiver,
        OptionKey::Arflags,
    ];

    /// The manifest spelling of this key.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKey::Compiler => "compiler",
            OptionKey::Cflags => "cflags",
            OptionKey::Defines => "defines",
            OptionKey::IncludePaths => "include-paths",
            OptionKey::Generator => "generator",
            OptionKey::GeneratorFlags => "generator-flags",
            OptionKey::Linker => "linker",
            OptionKey::Ldflags => "ldflags",
            OptionKey::LibPaths => "lib-paths",
            OptionKey::Libs => "libs",
            OptionKey::Archiver => "archiver",
            OptionKey::Arflags => "arflags",
        }
    }

    pub fn shape(&self) -> OptionShape {
        match self {
            OptionKey::Compiler | OptionKey::Generator | OptionKey::Linker | OptionKey::Archiver => {
                OptionShape::Scalar
            }
            _ => OptionShape::List,
        }
    }

    /// Whether this option affects tasks of the given kind.
    ///
    /// Task fingerprints only cover the options their kind reads, so
    /// changing a linker flag does not recompile every object.
    pub fn applies_to(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::Compile => matches!(
                self,
                OptionKey::Compiler | OptionKey::Cflags | OptionKey::Defines | OptionKey::IncludePaths
            ),
            TaskKind::Generate => matches!(self, OptionKey::Generator | OptionKey::GeneratorFlags),
            TaskKind::Link => matches!(
                self,
                OptionKey::Linker | OptionKey::Ldflags | OptionKey::LibPaths | OptionKey::Libs
            ),
            TaskKind::Archive => matches!(self, OptionKey::Archiver | OptionKey::Arflags),
        }
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OptionKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| format!("unknown option `{}`", s))
    }
}

/// The value of a profile option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Scalar(String),
    List(Vec<String>),
}

impl OptionValue {
    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OptionValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Scalar(s.to_string())
    }
}

/// How list options combine across the parent chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListMerge {
    /// Child lists are appended to inherited lists.
    #[default]
    Accumulate,
    /// Child lists replace inherited lists.
    Replace,
}

/// A named bag of build settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProfile {
    name: String,
    parent: Option<String>,
    options: BTreeMap<OptionKey, OptionValue>,
    cleared: bool,
}

impl ConfigProfile {
    /// Create an empty profile, optionally inheriting from `parent`.
    pub fn new(name: impl Into<String>, parent: Option<&str>) -> Self {
        ConfigProfile {
            name: name.into(),
            parent: parent.map(str::to_string),
            options: BTreeMap::new(),
            cleared: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Set an option on this profile, replacing this profile's own value.
    ///
    /// A single string given for a list option is split on whitespace, so
    /// `cflags = "-O2 -Wall"` and `cflags = ["-O2", "-Wall"]` are the same.
    pub fn set(&mut self, key: OptionKey, value: OptionValue) -> Result<(), ConfigError> {
        let value = match (key.shape(), value) {
            (OptionShape::Scalar, OptionValue::Scalar(s)) => OptionValue::Scalar(s),
            (OptionShape::List, OptionValue::List(items)) => OptionValue::List(items),
            (OptionShape::List, OptionValue::Scalar(s)) => {
                OptionValue::list(s.split_whitespace())
            }
            (OptionShape::Scalar, OptionValue::List(_)) => {
                return Err(ConfigError::OptionShape {
                    profile: self.name.clone(),
                    key,
                    expected: OptionShape::Scalar,
                })
            }
        };
        self.options.insert(key, value);
        Ok(())
    }

    /// Drop every option set on this profile.
    ///
    /// After `clear`, list options set on this profile replace inherited
    /// lists instead of extending them.
    pub fn clear(&mut self) {
        self.options.clear();
        self.cleared = true;
    }

    pub fn get(&self, key: OptionKey) -> Option<&OptionValue> {
        self.options.get(&key)
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared
    }
}

/// A build type: per-profile option overrides selected by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildType {
    pub name: String,
    pub settings: BTreeMap<String, BTreeMap<OptionKey, OptionValue>>,
}

/// A fully merged profile, ready to drive command lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    name: String,
    options: BTreeMap<OptionKey, OptionValue>,
}

impl ResolvedProfile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &BTreeMap<OptionKey, OptionValue> {
        &self.options
    }

    /// A scalar option, if set.
    pub fn scalar(&self, key: OptionKey) -> Option<&str> {
        match self.options.get(&key) {
            Some(OptionValue::Scalar(s)) => Some(s),
            _ => None,
        }
    }

    /// A list option; unset lists are empty.
    pub fn list(&self, key: OptionKey) -> &[String] {
        match self.options.get(&key) {
            Some(OptionValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Fingerprint of every resolved option.
    pub fn fingerprint(&self) -> String {
        self.fingerprint_where(|_| true)
    }

    /// Fingerprint of the options a task of `kind` reads.
    pub fn fingerprint_for(&self, kind: TaskKind) -> String {
        self.fingerprint_where(|key| key.applies_to(kind))
    }

    fn fingerprint_where(&self, include: impl Fn(OptionKey) -> bool) -> String {
        let mut fp = Fingerprint::new();
        for (key, value) in self.options.iter().filter(|(k, _)| include(**k)) {
            fp.update_str(key.as_str());
            match value {
                OptionValue::Scalar(s) => {
                    fp.update_tag(0).update_str(s);
                }
                OptionValue::List(items) => {
                    fp.update_tag(1);
                    fp.update_strs(items.iter().map(String::as_str));
                }
            }
        }
        fp.finish_short()
    }
}

/// The collection of named profiles for a project.
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: BTreeMap<String, ConfigProfile>,
    list_merge: ListMerge,
}

impl ProfileSet {
    pub fn new(list_merge: ListMerge) -> Self {
        ProfileSet {
            profiles: BTreeMap::new(),
            list_merge,
        }
    }

    pub fn insert(&mut self, profile: ConfigProfile) -> Result<(), ConfigError> {
        if self.profiles.contains_key(profile.name()) {
            return Err(ConfigError::DuplicateProfile {
                name: profile.name().to_string(),
            });
        }
        self.profiles.insert(profile.name().to_string(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ConfigProfile> {
        self.profiles.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut ConfigProfile, ConfigError> {
        let valid = self.valid_names();
        self.profiles
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_string(),
                valid,
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    fn valid_names(&self) -> String {
        self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }

    /// Apply a build type's overrides to the named profiles.
    pub fn apply(&mut self, build_type: &BuildType) -> Result<(), ConfigError> {
        for (profile_name, options) in &build_type.settings {
            let profile = self.get_mut(profile_name)?;
            for (key, value) in options {
                profile.set(*key, value.clone())?;
            }
        }
        Ok(())
    }

    /// Walk the parent chain of `name`, returning it root-first.
    fn chain(&self, name: &str) -> Result<Vec<&ConfigProfile>, ConfigError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self
            .profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_string(),
                valid: self.valid_names(),
            })?;

        loop {
            if !seen.insert(current.name()) {
                let mut names: Vec<&str> = chain.iter().map(|p: &&ConfigProfile| p.name()).collect();
                names.push(current.name());
                return Err(ConfigError::ParentCycle {
                    chain: names.join(" -> "),
                });
            }
            chain.push(current);

            match current.parent() {
                None => break,
                Some(parent) => {
                    current =
                        self.profiles
                            .get(parent)
                            .ok_or_else(|| ConfigError::UnknownParent {
                                profile: current.name().to_string(),
                                parent: parent.to_string(),
                            })?;
                }
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Resolve `name` into a flat option mapping.
    pub fn resolve(&self, name: &str) -> Result<ResolvedProfile, ConfigError> {
        let mut options: BTreeMap<OptionKey, OptionValue> = BTreeMap::new();

        for profile in self.chain(name)? {
            let replace_lists = profile.is_cleared() || self.list_merge == ListMerge::Replace;

            for (key, value) in &profile.options {
                match (value, options.get_mut(key)) {
                    (OptionValue::List(items), Some(OptionValue::List(existing)))
                        if !replace_lists =>
                    {
                        existing.extend(items.iter().cloned());
                    }
                    _ => {
                        options.insert(*key, value.clone());
                    }
                }
            }
        }

        Ok(ResolvedProfile {
            name: name.to_string(),
            options,
        })
    }
}
