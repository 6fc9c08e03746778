//! Local header discovery for compile tasks.
//!
//! A compile task's inputs are its translation unit plus every project
//! header it includes, directly or through other headers. Only headers that
//! resolve to files on disk are tracked; system headers and headers that do
//! not exist yet are ignored.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use crate::core::SourceFile;
use crate::util::fs::normalize_path;

/// `#include "name"` or `#include <name>` at the start of a line.
fn include_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*([<"])([^>"]+)[>"]"#)
            .expect("include pattern is valid")
    })
}

#[derive(Debug, Clone)]
struct Include {
    name: String,
    quoted: bool,
}

/// Scans `#include` directives, caching per-file results.
#[derive(Debug, Default)]
pub struct IncludeScanner {
    direct: HashMap<PathBuf, Vec<Include>>,
    files: HashMap<PathBuf, SourceFile>,
}

impl IncludeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn direct_includes(&mut self, file: &Path) -> &[Include] {
        if !self.direct.contains_key(file) {
            let includes = match std::fs::read(file) {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    include_pattern()
                        .captures_iter(&text)
                        .map(|cap| Include {
                            quoted: &cap[1] == "\"",
                            name: cap[2].trim().to_string(),
                        })
                        .collect()
                }
                Err(e) => {
                    tracing::debug!("cannot scan {}: {}", file.display(), e);
                    Vec::new()
                }
            };
            self.direct.insert(file.to_path_buf(), includes);
        }
        &self.direct[file]
    }

    fn resolve(include: &Include, from: &Path, include_dirs: &[PathBuf]) -> Option<PathBuf> {
        let local = include
            .quoted
            .then(|| from.parent().map(|dir| dir.join(&include.name)))
            .flatten();

        local
            .into_iter()
            .chain(include_dirs.iter().map(|dir| dir.join(&include.name)))
            .find(|candidate| candidate.is_file())
            .map(|found| normalize_path(&found))
    }

    /// All project headers reachable from `source`, sorted by path.
    pub fn scan(&mut self, source: &Path, include_dirs: &[PathBuf]) -> Result<Vec<SourceFile>> {
        let source = normalize_path(source);
        let mut found: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue = VecDeque::from([source.clone()]);

        while let Some(current) = queue.pop_front() {
            let includes = self.direct_includes(&current).to_vec();
            for include in &includes {
                if let Some(header) = Self::resolve(include, &current, include_dirs) {
                    if header != source && found.insert(header.clone()) {
                        queue.push_back(header);
                    }
                }
            }
        }

        found.into_iter().map(|path| self.source_file(&path)).collect()
    }

    fn source_file(&mut self, path: &Path) -> Result<SourceFile> {
        if let Some(file) = self.files.get(path) {
            return Ok(file.clone());
        }
        let file = SourceFile::from_path(path)?;
        self.files.insert(path.to_path_buf(), file.clone());
        Ok(file)
    }
}
