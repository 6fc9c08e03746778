//! Implementation of `kiln clean`.

use std::path::PathBuf;

use anyhow::Result;

use crate::core::Manifest;
use crate::util::fs::remove_dir_contents;

/// Result of a clean.
#[derive(Debug)]
pub struct CleanResult {
    /// The emptied directory
    pub dir: PathBuf,
    /// Top-level entries removed
    pub removed: usize,
}

/// Empty the output directory of `build_type`, state file included.
///
/// No graph is built; the next build starts from scratch.
pub fn clean(manifest: &Manifest, build_type: &str) -> Result<CleanResult> {
    manifest.build_type(build_type)?;
    let dir = manifest.build_dir(build_type);
    let removed = remove_dir_contents(&dir)?;
    tracing::debug!("removed {} entries from {}", removed, dir.display());
    Ok(CleanResult { dir, removed })
}
