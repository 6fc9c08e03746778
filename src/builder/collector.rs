//! Source file discovery.
//!
//! Collection is deterministic: results are sorted by path so that graph
//! construction and fingerprinting are reproducible. Symlinked directories
//! are followed once; a directory reached again through another link is
//! not descended into.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use crate::core::SourceFile;

/// Enumerates source files under a root directory.
#[derive(Debug, Clone)]
pub struct FileCollector {
    patterns: Vec<Pattern>,
    recursive: bool,
}

impl FileCollector {
    /// Create a collector for file-name patterns such as `*.c` or
    /// `*.{cpp,cxx}`.
    pub fn new(patterns: &[String], recursive: bool) -> Result<Self> {
        let mut compiled = Vec::new();
        for pattern in patterns {
            for expanded in expand_braces(pattern) {
                compiled.push(
                    Pattern::new(&expanded)
                        .with_context(|| format!("invalid file pattern: {}", pattern))?,
                );
            }
        }
        Ok(FileCollector {
            patterns: compiled,
            recursive,
        })
    }

    fn matches(&self, file_name: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        self.patterns
            .iter()
            .any(|p| p.matches_with(file_name, options))
    }

    /// Collect matching files under `root`, sorted by path.
    pub fn collect(&self, root: &Path) -> Result<Vec<SourceFile>> {
        if !root.is_dir() {
            bail!("source root is not a directory: {}", root.display());
        }
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve source root: {}", root.display()))?;

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut visited_dirs: HashSet<PathBuf> = HashSet::new();
        let mut seen_files: HashSet<PathBuf> = HashSet::new();
        let mut files = Vec::new();

        let walker = WalkDir::new(&root)
            .follow_links(true)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                match entry.path().canonicalize() {
                    Ok(real) => visited_dirs.insert(real),
                    Err(_) => false,
                }
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !self.matches(name) {
                continue;
            }

            let real = entry
                .path()
                .canonicalize()
                .unwrap_or_else(|_| entry.path().to_path_buf());
            if !seen_files.insert(real) {
                continue;
            }

            files.push(SourceFile::from_path(entry.path())?);
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!(
            "collected {} file(s) under {}",
            files.len(),
            root.display()
        );
        Ok(files)
    }
}

/// Collect files under `root` matching `patterns`.
pub fn collect(root: &Path, patterns: &[String], recursive: bool) -> Result<Vec<SourceFile>> {
    FileCollector::new(patterns, recursive)?.collect(root)
}

/// Expand `{a,b}` alternations into separate patterns.
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{}{}{}", prefix, alt, suffix)))
        .collect()
}
