//! Build state store: per-ref record of the last built commit.
//!
//! Persists a [`BuildState`] JSON document at the configured state file.
//! Writes go to `<path>.tmp`, are fsynced, then renamed over the live file
//! (and the directory fsynced), so a crash never leaves a half-written state.
//! All writers go through the store's lock.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use preview_core::BuildState;

use crate::error::{state_io_err, BuildError};

#[derive(Debug)]
pub struct BuildStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl BuildStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state.
    ///
    /// Returns an empty state if the file does not yet exist.
    pub fn load(&self) -> Result<BuildState, BuildError> {
        load_at(&self.path)
    }

    /// Save `state` atomically.
    pub fn save(&self, state: &BuildState) -> Result<(), BuildError> {
        let _writing = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        save_at(&self.path, state)
    }

    /// Locked read-modify-write of the persisted state.
    pub fn update<T>(&self, f: impl FnOnce(&mut BuildState) -> T) -> Result<T, BuildError> {
        let _writing = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = load_at(&self.path)?;
        let out = f(&mut state);
        save_at(&self.path, &state)?;
        Ok(out)
    }
}

/// Load a state file; a missing file is an empty state.
pub fn load_at(path: &Path) -> Result<BuildState, BuildError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BuildState::new()),
        Err(err) => return Err(state_io_err(path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| BuildError::StateParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `state` to `path` via `<path>.tmp` + fsync + rename.
pub fn save_at(path: &Path, state: &BuildState) -> Result<(), BuildError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| state_io_err(&dir, e))?;

    let json = serde_json::to_string_pretty(state).map_err(|source| BuildError::StateParse {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = tmp_path(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| state_io_err(&tmp, e))?;
        file.write_all(json.as_bytes())
            .map_err(|e| state_io_err(&tmp, e))?;
        file.sync_all().map_err(|e| state_io_err(&tmp, e))?;
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(state_io_err(path, err));
    }
    File::open(&dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| state_io_err(&dir, e))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use preview_core::{BuildStateEntry, BuildStatus, CommitSha, GitRef, RefName};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sha(c: char) -> CommitSha {
        CommitSha::parse(c.to_string().repeat(40)).unwrap()
    }

    #[test]
    fn empty_state_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let store = BuildStateStore::new(tmp.path().join("nonexistent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let store = BuildStateStore::new(tmp.path().join("state.json"));
        let mut state = BuildState::new();
        let mut main = BuildStateEntry::init(sha('a'));
        main.mark_built(&sha('a'));
        state.insert(RefName::from("origin/main"), main);
        state.insert(RefName::from("origin/feat"), BuildStateEntry::init(sha('b')));

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        save_at(&path, &BuildState::new()).unwrap();
        assert!(path.exists());
        assert!(
            !tmp.path().join("state.json.tmp").exists(),
            "tmp file should be removed after atomic rename"
        );
    }

    #[test]
    fn save_creates_missing_parent_directory() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/state.json");
        save_at(&path, &BuildState::new()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_parse_error_not_empty_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(&path, "{\"origin/main\": ").unwrap();
        let err = load_at(&path).unwrap_err();
        assert!(matches!(err, BuildError::StateParse { .. }), "got {err}");
    }

    #[test]
    fn write_failure_is_explicit() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let err = save_at(&blocker.join("state.json"), &BuildState::new()).unwrap_err();
        assert!(matches!(err, BuildError::StateIo { .. }), "got {err}");
    }

    #[test]
    fn reads_legacy_state_written_by_earlier_versions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        fs::write(
            &path,
            format!(
                r#"{{"origin/main": {{"sha": "{a}", "status": "built", "built": "{a}"}}}}"#,
                a = "a".repeat(40)
            ),
        )
        .unwrap();
        let state = load_at(&path).unwrap();
        let entry = state.get(&RefName::from("origin/main")).unwrap();
        assert_eq!(entry.status, BuildStatus::Built);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(BuildStateStore::new(tmp.path().join("state.json")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let git_ref = GitRef::new(format!("origin/branch-{i}"), sha('c'));
                    store
                        .update(|state| {
                            let (entry, _) = state.entry_or_init(&git_ref);
                            entry.mark_built(&git_ref.commit);
                        })
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load().unwrap().len(), 8);
    }
}
