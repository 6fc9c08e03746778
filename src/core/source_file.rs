//! Source files discovered on disk.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::util::hash::file_fingerprint;

/// What a file is, as far as task generation is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    /// A translation unit (`.c`, `.cpp`, ...)
    Compilable,
    /// A header (`.h`, `.hpp`, ...)
    Header,
    /// Anything else
    Other,
}

/// Source language of a compilable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cxx,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cxx => "c++",
        }
    }
}

/// Classify a path by its extension.
pub fn classify(path: &Path) -> (FileCategory, Option<Language>) {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("c") => (FileCategory::Compilable, Some(Language::C)),
        Some("cpp" | "cxx" | "cc" | "c++") => (FileCategory::Compilable, Some(Language::Cxx)),
        Some("h" | "hpp" | "hxx" | "hh" | "inl") => (FileCategory::Header, None),
        _ => (FileCategory::Other, None),
    }
}

/// A file on disk with its content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute path
    pub path: PathBuf,
    /// `<size>:<sha256>` of the content at collection time
    pub fingerprint: String,
    pub category: FileCategory,
    /// Set for compilable files
    pub language: Option<Language>,
}

impl SourceFile {
    /// Stat and hash a file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let fingerprint = file_fingerprint(path)?;
        let (category, language) = classify(path);
        Ok(SourceFile {
            path: path.to_path_buf(),
            fingerprint,
            category,
            language,
        })
    }

    pub fn is_compilable(&self) -> bool {
        self.category == FileCategory::Compilable
    }

    pub fn is_header(&self) -> bool {
        self.category == FileCategory::Header
    }
}
