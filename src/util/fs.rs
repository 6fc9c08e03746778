//! Filesystem utilities.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write bytes to `path` atomically.
///
/// The data goes to a temporary file in the same directory, which is then
/// renamed over the destination. Readers see either the old file or the new
/// one, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write temporary file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temporary file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to move temporary file to {}", path.display()))?;
    Ok(())
}

/// Remove every entry inside `dir`, keeping the directory itself.
///
/// Returns the number of top-level entries removed. A missing directory is
/// not an error.
pub fn remove_dir_contents(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let ty = entry.file_type()?;

        if ty.is_dir() {
            fs::remove_dir_all(&path)
                .with_context(|| format!("failed to remove directory: {}", path.display()))?;
        } else {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove file: {}", path.display()))?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Canonicalize a path, but don't fail if it doesn't exist yet.
/// Returns the path as-is if canonicalization fails.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Create a symlink (platform-aware).
#[cfg(unix)]
pub fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
pub fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

/// Expose `target` under `link`, atomically replacing a previous link.
///
/// On Unix this is a symlink; elsewhere the file is copied. Either way the
/// new entry is created under a sibling temporary name and renamed into
/// place.
pub fn publish_link(target: &Path, link: &Path) -> Result<()> {
    let file_name = link
        .file_name()
        .with_context(|| format!("invalid publish path: {}", link.display()))?;
    let staging = link.with_file_name(format!(".{}.kiln-tmp", file_name.to_string_lossy()));

    if fs::symlink_metadata(&staging).is_ok() {
        fs::remove_file(&staging)
            .with_context(|| format!("failed to remove stale {}", staging.display()))?;
    }

    if cfg!(unix) {
        symlink(target, &staging).with_context(|| {
            format!(
                "failed to link {} -> {}",
                staging.display(),
                target.display()
            )
        })?;
    } else {
        fs::copy(target, &staging).with_context(|| {
            format!(
                "failed to copy {} to {}",
                target.display(),
                staging.display()
            )
        })?;
    }

    fs::rename(&staging, link)
        .with_context(|| format!("failed to publish {}", link.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        // No temporary files left behind
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_dir_contents() {
        let tmp = TempDir::new().unwrap();
        let build = tmp.path().join("Debug");
        fs::create_dir_all(build.join("obj/src")).unwrap();
        fs::write(build.join("obj/src/a.o"), "obj").unwrap();
        fs::write(build.join("app"), "exe").unwrap();

        let removed = remove_dir_contents(&build).unwrap();

        assert_eq!(removed, 2);
        assert!(build.exists());
        assert_eq!(fs::read_dir(&build).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_dir_contents_missing_dir() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(remove_dir_contents(&tmp.path().join("none")).unwrap(), 0);
    }

    #[test]
    fn test_relative_path() {
        let rel = relative_path(Path::new("/project"), Path::new("/project/src/main.c"));
        assert_eq!(rel, PathBuf::from("src/main.c"));
    }

    #[cfg(unix)]
    #[test]
    fn test_publish_link_replaces_previous() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        fs::write(&first, "1").unwrap();
        fs::write(&second, "2").unwrap();
        let link = tmp.path().join("app");

        publish_link(&first, &link).unwrap();
        assert_eq!(fs::read_to_string(&link).unwrap(), "1");

        publish_link(&second, &link).unwrap();
        assert_eq!(fs::read_to_string(&link).unwrap(), "2");
        assert_eq!(fs::read_link(&link).unwrap(), second);
    }
}
