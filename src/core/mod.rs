//! Core data model: manifest, profiles, source files and tasks.

pub mod manifest;
pub mod profile;
pub mod source_file;
pub mod task;

pub use manifest::{ArtifactKind, Manifest, ManifestError};
pub use profile::{ConfigError, ConfigProfile, OptionKey, OptionValue, ProfileSet, ResolvedProfile};
pub use source_file::{FileCategory, Language, SourceFile};
pub use task::{Task, TaskId, TaskInput, TaskKind, TaskStatus};
