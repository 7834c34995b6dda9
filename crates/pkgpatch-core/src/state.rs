use crate::error::{PatchError, PatchResult};
use crate::hash::hash_file;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchState {
    pub patch_filename: String,
    pub did_apply: bool,
    pub patch_content_hash: String,
}

/// What is known about one package's series. An absent document means the
/// package is Clean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesState {
    pub version: u32,
    pub patches: Vec<PatchState>,
    pub is_rebasing: bool,
}

impl SeriesState {
    pub fn new(patches: Vec<PatchState>, is_rebasing: bool) -> Self {
        SeriesState {
            version: STATE_VERSION,
            patches,
            is_rebasing,
        }
    }

    pub fn applied(&self) -> impl Iterator<Item = &PatchState> {
        self.patches.iter().filter(|p| p.did_apply)
    }

    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }
}

fn slug(raw: &str) -> String {
    raw.trim_matches(|c| c == '/' || c == '\\')
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '+',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Documents are keyed by patch directory and package path specifier, so two
/// patch directories in one project never share state.
pub fn state_key(patch_dir: &str, path_specifier: &str) -> String {
    format!("{}--{}", slug(patch_dir), slug(path_specifier))
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StateStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn load(&self, key: &str) -> PatchResult<Option<SeriesState>> {
        let path = self.document_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PatchError::io(&path, e)),
        };

        let state: SeriesState =
            serde_json::from_str(&content).map_err(|source| PatchError::State {
                path: path.clone(),
                source,
            })?;
        if state.version != STATE_VERSION {
            warn!(
                "Ignoring state file {:?} written by a different version (format {})",
                path, state.version
            );
            return Ok(None);
        }
        Ok(Some(state))
    }

    pub fn save(&self, key: &str, state: &SeriesState) -> PatchResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| PatchError::io(&self.dir, e))?;
        let path = self.document_path(key);

        let json = serde_json::to_string_pretty(state).map_err(|source| PatchError::State {
            path: path.clone(),
            source,
        })?;
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| PatchError::io(&self.dir, e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| PatchError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| PatchError::io(&path, e.error))?;

        debug!("Saved state {:?}", path);
        Ok(())
    }

    pub fn clear(&self, key: &str) -> PatchResult<()> {
        let path = self.document_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Cleared state {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PatchError::io(&path, e)),
        }
    }

    /// Takes the per-package lock. Fails immediately if another process
    /// holds it.
    pub fn lock(&self, key: &str) -> PatchResult<StateLock> {
        fs::create_dir_all(&self.dir).map_err(|e| PatchError::io(&self.dir, e))?;
        let path = self.dir.join(format!("{}.lock", key));

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let lock = StateLock { path };
                writeln!(file, "{}", std::process::id())
                    .map_err(|e| PatchError::io(&lock.path, e))?;
                Ok(lock)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(PatchError::io(
                &path,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "another pkgpatch run is working on this package; remove the lock file if it is stale",
                ),
            )),
            Err(e) => Err(PatchError::io(&path, e)),
        }
    }
}

#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Could not remove lock {:?}: {}", self.path, e);
        }
    }
}

/// Recomputes the fingerprint of every patch recorded as applied and
/// compares it with what was stored.
pub fn verify_applied_patches(patch_dir: &Path, state: &SeriesState) -> PatchResult<()> {
    for patch in state.applied() {
        let path = patch_dir.join(&patch.patch_filename);
        if !path.is_file() {
            return Err(PatchError::MissingPatchFile(patch.patch_filename.clone()));
        }
        let actual = hash_file(&path)?;
        if actual != patch.patch_content_hash {
            return Err(PatchError::IntegrityMismatch {
                patch_filename: patch.patch_filename.clone(),
                expected: patch.patch_content_hash.clone(),
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use tempfile::tempdir;

    fn applied(name: &str, content: &str) -> PatchState {
        PatchState {
            patch_filename: name.to_string(),
            did_apply: true,
            patch_content_hash: hash_bytes(content.as_bytes()),
        }
    }

    #[test]
    fn test_state_key() {
        assert_eq!(state_key("patches/", "@types/node"), "patches--@types+node");
        assert_eq!(state_key("build/patches", "a/b"), "build+patches--a+b");
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        let key = state_key("patches", "left-pad");

        assert_eq!(store.load(&key).unwrap(), None);

        let state = SeriesState::new(vec![applied("a+1.0.0+001.patch", "x")], true);
        store.save(&key, &state).unwrap();
        assert_eq!(store.load(&key).unwrap(), Some(state));

        store.clear(&key).unwrap();
        assert_eq!(store.load(&key).unwrap(), None);
        store.clear(&key).unwrap();
    }

    #[test]
    fn test_document_uses_camel_case() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save("k", &SeriesState::new(vec![applied("p.patch", "x")], false))
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("k.json")).unwrap();
        assert!(raw.contains("\"patchFilename\""));
        assert!(raw.contains("\"didApply\""));
        assert!(raw.contains("\"patchContentHash\""));
        assert!(raw.contains("\"isRebasing\""));
    }

    #[test]
    fn test_unknown_version_is_clean() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("k.json"),
            r#"{"version":99,"patches":[],"isRebasing":true}"#,
        )
        .unwrap();
        assert_eq!(StateStore::new(dir.path()).load("k").unwrap(), None);
    }

    #[test]
    fn test_corrupt_document_is_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("k.json"), "{not json").unwrap();
        assert!(matches!(
            StateStore::new(dir.path()).load("k"),
            Err(PatchError::State { .. })
        ));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let guard = store.lock("k").unwrap();
        assert!(store.lock("k").is_err());
        drop(guard);
        assert!(store.lock("k").is_ok());
    }

    #[test]
    fn test_lock_file_holds_pid() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let guard = store.lock("k").unwrap();
        let content = fs::read_to_string(dir.path().join("k.lock")).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
        drop(guard);
        assert!(!dir.path().join("k.lock").exists());
    }

    #[test]
    fn test_verify_applied_patches() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.patch"), "one").unwrap();
        let state = SeriesState::new(vec![applied("a.patch", "one")], false);
        verify_applied_patches(dir.path(), &state).unwrap();

        fs::write(dir.path().join("a.patch"), "onE").unwrap();
        assert!(matches!(
            verify_applied_patches(dir.path(), &state),
            Err(PatchError::IntegrityMismatch { .. })
        ));

        fs::remove_file(dir.path().join("a.patch")).unwrap();
        assert!(matches!(
            verify_applied_patches(dir.path(), &state),
            Err(PatchError::MissingPatchFile(_))
        ));
    }

    #[test]
    fn test_unapplied_patches_are_not_verified() {
        let dir = tempdir().unwrap();
        let state = SeriesState::new(
            vec![PatchState {
                patch_filename: "gone.patch".to_string(),
                did_apply: false,
                patch_content_hash: String::new(),
            }],
            true,
        );
        verify_applied_patches(dir.path(), &state).unwrap();
    }
}
