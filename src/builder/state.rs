//! Persisted build state.
//!
//! One state file lives in each build output directory. It records, for
//! every task that last completed successfully, the fingerprints it was
//! built from. The file starts with a header line carrying the format
//! version and the SHA-256 of the JSON payload that follows:
//!
//! ```text
//! kiln-state v1 3f2a...e9
//! {"tasks":{"obj/src/a.c.o":{"inputs":{...},"profile":"...","output":"..."}}}
//! ```
//!
//! A missing file is an empty state. A file that fails to parse, carries
//! another version or does not match its checksum is discarded with a
//! warning, which forces a full rebuild.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::TaskId;
use crate::util::fs::write_atomic;
use crate::util::hash::sha256_bytes;

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

const STATE_MAGIC: &str = "kiln-state";

/// Why a state file was rejected.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("build state `{}` is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to read build state `{}`", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fingerprints a task was last built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Input state key -> fingerprint
    pub inputs: BTreeMap<String, String>,
    /// Profile fingerprint
    pub profile: String,
    /// Output content fingerprint
    pub output: String,
}

/// Task id -> record of its last successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
    tasks: BTreeMap<TaskId, TaskRecord>,
}

impl BuildState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    pub fn record(&mut self, id: TaskId, record: TaskRecord) {
        self.tasks.insert(id, record);
    }

    /// Drop every record whose id fails `keep`, returning the dropped ids.
    pub fn retain_ids(&mut self, keep: impl Fn(&TaskId) -> bool) -> Vec<TaskId> {
        let stale: Vec<TaskId> = self.tasks.keys().filter(|id| !keep(id)).cloned().collect();
        for id in &stale {
            self.tasks.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &TaskRecord)> {
        self.tasks.iter()
    }

    /// Serialize into the on-disk format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self).context("failed to serialize build state")?;
        let mut out = format!(
            "{} v{} {}\n",
            STATE_MAGIC,
            STATE_VERSION,
            sha256_bytes(&payload)
        )
        .into_bytes();
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse the on-disk format. `path` is only used in errors.
    pub fn from_bytes(bytes: &[u8], path: &Path) -> Result<Self, StateError> {
        let corrupt = |reason: &str| StateError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("missing header"))?;
        let header = std::str::from_utf8(&bytes[..newline]).map_err(|_| corrupt("bad header"))?;
        let payload = &bytes[newline + 1..];

        let mut parts = header.split(' ');
        if parts.next() != Some(STATE_MAGIC) {
            return Err(corrupt("not a kiln state file"));
        }
        let expected_version = format!("v{}", STATE_VERSION);
        match parts.next() {
            Some(v) if v == expected_version => {}
            Some(v) => return Err(corrupt(&format!("unsupported version {}", v))),
            None => return Err(corrupt("missing version")),
        }
        let checksum = parts.next().ok_or_else(|| corrupt("missing checksum"))?;
        if parts.next().is_some() {
            return Err(corrupt("trailing header fields"));
        }
        if sha256_bytes(payload) != checksum {
            return Err(corrupt("checksum mismatch"));
        }

        serde_json::from_slice(payload).map_err(|e| corrupt(&e.to_string()))
    }
}

/// Reads and writes the state file of one build directory.
#[derive(Debug, Clone)]
pub struct BuildStateStore {
    path: PathBuf,
}

impl BuildStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BuildStateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, distinguishing "absent" from "rejected".
    pub fn try_load(&self) -> Result<Option<BuildState>, StateError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        BuildState::from_bytes(&bytes, &self.path).map(Some)
    }

    /// Load the state; anything unusable yields an empty state.
    pub fn load(&self) -> BuildState {
        match self.try_load() {
            Ok(Some(state)) => {
                tracing::debug!(
                    "loaded {} task record(s) from {}",
                    state.len(),
                    self.path.display()
                );
                state
            }
            Ok(None) => BuildState::new(),
            Err(e) => {
                tracing::warn!("{}; rebuilding everything", e);
                BuildState::new()
            }
        }
    }

    /// Write the state atomically.
    pub fn save(&self, state: &BuildState) -> Result<()> {
        let bytes = state.to_bytes()?;
        write_atomic(&self.path, &bytes)
            .with_context(|| format!("failed to save build state {}", self.path.display()))?;
        tracing::debug!(
            "saved {} task record(s) to {}",
            state.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Owns the state for the duration of a build and saves it exactly once.
///
/// Call [`StateGuard::finish`] on the normal path. If the guard is dropped
/// first (an error returned with `?`, or a panic unwinding) the state is
/// saved from `Drop` instead, so completed tasks are never lost.
#[derive(Debug)]
pub struct StateGuard {
    store: BuildStateStore,
    state: BuildState,
    saved: bool,
}

impl StateGuard {
    pub fn load(store: BuildStateStore) -> Self {
        let state = store.load();
        StateGuard {
            store,
            state,
            saved: false,
        }
    }

    pub fn state(&self) -> &BuildState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut BuildState {
        &mut self.state
    }

    /// Save and disarm the guard.
    pub fn finish(mut self) -> Result<()> {
        self.saved = true;
        self.store.save(&self.state)
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if self.saved {
            return;
        }
        self.saved = true;
        if let Err(e) = self.store.save(&self.state) {
            tracing::warn!("{:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> BuildState {
        let mut state = BuildState::new();
        state.record(
            TaskId::new("obj/src/a.c.o"),
            TaskRecord {
                inputs: BTreeMap::from([("file:/p/src/a.c".to_string(), "6:abc".to_string())]),
                profile: "p1".to_string(),
                output: "10:def".to_string(),
            },
        );
        state
    }

    #[test]
    fn test_save_load_exact() {
        let tmp = TempDir::new().unwrap();
        let store = BuildStateStore::new(tmp.path().join("Debug/.kiln-state"));

        store.save(&sample()).unwrap();
        assert_eq!(store.load(), sample());

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.starts_with("kiln-state v1 "));
    }

    #[test]
    fn test_retain_ids_drops_unknown_tasks() {
        let mut state = sample();
        state.record(TaskId::new("obj/src/b.c.o"), TaskRecord::default());
        state.record(TaskId::new("demo"), TaskRecord::default());

        let dropped = state.retain_ids(|id| id.as_str() != "obj/src/a.c.o");
        assert_eq!(dropped, [TaskId::new("obj/src/a.c.o")]);
        assert_eq!(state.len(), 2);
        assert!(state.get(&TaskId::new("obj/src/a.c.o")).is_none());
        assert!(state.get(&TaskId::new("demo")).is_some());

        assert!(state.retain_ids(|_| true).is_empty());
    }

    #[test]
    fn test_missing_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = BuildStateStore::new(tmp.path().join(".kiln-state"));
        assert!(store.try_load().unwrap().is_none());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_tampered_payload_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = BuildStateStore::new(tmp.path().join(".kiln-state"));
        store.save(&sample()).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        std::fs::write(store.path(), text.replace("10:def", "10:xyz")).unwrap();

        let err = store.try_load().unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_version_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = BuildStateStore::new(tmp.path().join(".kiln-state"));
        store.save(&sample()).unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        std::fs::write(store.path(), text.replacen("v1", "v99", 1)).unwrap();

        assert!(matches!(store.try_load(), Err(StateError::Corrupt { .. })));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = BuildStateStore::new(tmp.path().join(".kiln-state"));
        std::fs::write(store.path(), b"\x00\x01not a state").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_guard_saves_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".kiln-state");

        let run = || -> Result<()> {
            let mut guard = StateGuard::load(BuildStateStore::new(&path));
            *guard.state_mut() = sample();
            anyhow::bail!("task failed");
        };
        assert!(run().is_err());

        assert_eq!(BuildStateStore::new(&path).load(), sample());
    }

    #[test]
    fn test_guard_finish_saves_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".kiln-state");

        let mut guard = StateGuard::load(BuildStateStore::new(&path));
        guard.state_mut().record(TaskId::new("x"), TaskRecord::default());
        guard.finish().unwrap();

        let state = BuildStateStore::new(&path).load();
        assert!(state.get(&TaskId::new("x")).is_some());
    }
}
