//! Versioned, file-backed fingerprint store.

use crate::error::{StoreError, StoreResult};
use crate::store::LocalStore;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use tracksync_protocol::{Fingerprint, FingerprintSet, SyncMode};

/// Default number of snapshots retained per mode.
pub const DEFAULT_KEEP_VERSIONS: usize = 5;

const SNAPSHOT_PREFIX: &str = "fingerprints_";
const SNAPSHOT_SUFFIX: &str = ".json";
const META_FILE: &str = "latest.meta";
const TMP_SUFFIX: &str = ".tmp";

/// A file-backed fingerprint store.
///
/// Each mode gets its own directory under the root. Every save writes a new
/// immutable snapshot `fingerprints_<timestamp>_<uuid>.json` and then
/// repoints `latest.meta` at it. Both files are written to a temporary name
/// and renamed into place, so a crash leaves either the old or the new
/// pointer, never a torn one.
///
/// Loading follows the pointer. A missing or dangling pointer falls back to
/// the newest readable snapshot; a current snapshot that exists but cannot
/// be decoded is reported as [`StoreError::Corrupted`].
///
/// # Layout
///
/// ```text
/// <root>/
///   pcm/
///     latest.meta
///     fingerprints_20260101120000123_<uuid>.json
///   file/
///     ...
/// ```
///
/// # Thread Safety
///
/// Writes are serialized by an internal async mutex. Loads do not take the
/// lock; they follow whichever pointer is current.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    keep_versions: usize,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_versions: DEFAULT_KEEP_VERSIONS,
            write_lock: Mutex::new(()),
        }
    }

    /// Sets how many snapshots are kept per mode (at least one).
    #[must_use]
    pub fn with_keep_versions(mut self, keep: usize) -> Self {
        self.keep_versions = keep.max(1);
        self
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the snapshots for `mode`.
    #[must_use]
    pub fn mode_dir(&self, mode: SyncMode) -> PathBuf {
        self.root.join(mode.as_str())
    }

    /// Writes the current set for `mode` to `path` as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if the set cannot be loaded or the file written.
    pub async fn export_snapshot(&self, mode: SyncMode, path: &Path) -> StoreResult<()> {
        let set = self.load_fingerprint_set(mode).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(path, &serde_json::to_vec(&set)?).await
    }

    /// Unions the JSON array in `path` into the set for `mode` and saves it.
    ///
    /// Entries are canonicalized; blank entries are skipped. Returns the
    /// merged set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not a JSON array of strings or the
    /// merged set cannot be saved.
    pub async fn import_json(&self, mode: SyncMode, path: &Path) -> StoreResult<FingerprintSet> {
        let entries: Vec<String> = serde_json::from_slice(&fs::read(path).await?)?;
        let mut merged = self.load_fingerprint_set(mode).await?;
        let before = merged.len();
        merged.extend(
            entries
                .iter()
                .map(Fingerprint::new)
                .filter(|fp| !fp.as_str().is_empty()),
        );
        debug!(
            mode = %mode,
            imported = entries.len(),
            added = merged.len() - before,
            "imported fingerprint snapshot"
        );
        self.save_fingerprint_set(mode, &merged).await?;
        Ok(merged)
    }

    async fn read_snapshot(path: &Path) -> StoreResult<FingerprintSet> {
        let entries: Vec<String> = serde_json::from_slice(&fs::read(path).await?)?;
        Ok(entries
            .iter()
            .map(Fingerprint::new)
            .filter(|fp| !fp.as_str().is_empty())
            .collect())
    }

    async fn current_pointer(dir: &Path) -> StoreResult<Option<String>> {
        match fs::read_to_string(dir.join(META_FILE)).await {
            Ok(name) => {
                let name = name.trim().to_string();
                Ok((!name.is_empty()).then_some(name))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot file names in `dir`, newest first.
    async fn list_snapshots(dir: &Path) -> StoreResult<Vec<String>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        // Names embed a sortable timestamp.
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    async fn prune(&self, dir: &Path, current: &str) {
        let names = match Self::list_snapshots(dir).await {
            Ok(names) => names,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to list snapshots for pruning");
                return;
            }
        };

        // The current snapshot always survives and counts toward the limit.
        let mut kept = 1;
        for name in names.iter().filter(|name| name.as_str() != current) {
            if kept < self.keep_versions {
                kept += 1;
                continue;
            }
            if let Err(e) = fs::remove_file(dir.join(name)).await {
                // Retried on the next save.
                warn!(file = %name, error = %e, "failed to remove old snapshot");
            }
        }
    }
}

#[async_trait]
impl LocalStore for FileStore {
    async fn load_fingerprint_set(&self, mode: SyncMode) -> StoreResult<FingerprintSet> {
        let dir = self.mode_dir(mode);
        let pointer = Self::current_pointer(&dir).await?;

        if let Some(name) = &pointer {
            let path = dir.join(name);
            match Self::read_snapshot(&path).await {
                Ok(set) => return Ok(set),
                Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(file = %name, "latest.meta points at a missing snapshot");
                }
                Err(e) => {
                    // Never fall back past a corrupt current snapshot.
                    return Err(StoreError::Corrupted(format!(
                        "current snapshot {} unreadable: {e}",
                        path.display()
                    )));
                }
            }
        }

        let candidates = Self::list_snapshots(&dir).await?;
        if candidates.is_empty() {
            return Ok(FingerprintSet::new());
        }

        let mut last_error = None;
        for name in candidates.iter().filter(|n| Some(*n) != pointer.as_ref()) {
            match Self::read_snapshot(&dir.join(name)).await {
                Ok(set) => {
                    debug!(file = %name, "recovered fingerprint set from older snapshot");
                    return Ok(set);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(StoreError::Corrupted(match last_error {
            Some(e) => format!("no readable snapshot in {}: {e}", dir.display()),
            None => format!("no readable snapshot in {}", dir.display()),
        }))
    }

    async fn save_fingerprint_set(&self, mode: SyncMode, set: &FingerprintSet) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let dir = self.mode_dir(mode);
        fs::create_dir_all(&dir).await?;

        let name = format!(
            "{SNAPSHOT_PREFIX}{}_{}{SNAPSHOT_SUFFIX}",
            chrono::Utc::now().format("%Y%m%d%H%M%S%3f"),
            uuid::Uuid::new_v4()
        );
        write_atomic(&dir.join(&name), &serde_json::to_vec(set)?).await?;
        write_atomic(&dir.join(META_FILE), name.as_bytes()).await?;

        debug!(mode = %mode, file = %name, count = set.len(), "saved fingerprint set");

        self.prune(&dir, &name).await;
        Ok(())
    }
}

/// Writes `bytes` to a sibling temp file, syncs it, and renames it over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn set(items: &[&str]) -> FingerprintSet {
        items.iter().copied().collect()
    }

    #[tokio::test]
    async fn missing_directory_loads_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("never-created"));
        assert!(store.load_fingerprint_set(SyncMode::Pcm).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store
            .save_fingerprint_set(SyncMode::Pcm, &set(&["bb22", "aa11"]))
            .await
            .unwrap();

        let loaded = store.load_fingerprint_set(SyncMode::Pcm).await.unwrap();
        assert_eq!(loaded, set(&["aa11", "bb22"]));
        assert!(store.load_fingerprint_set(SyncMode::File).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_canonicalizes_hand_written_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mode_dir = store.mode_dir(SyncMode::Pcm);
        std::fs::create_dir_all(&mode_dir).unwrap();
        std::fs::write(
            mode_dir.join("fingerprints_1_a.json"),
            r#"["AA11","aa11"," ","BB22"]"#,
        )
        .unwrap();

        // No pointer: falls back to the newest snapshot on disk.
        let loaded = store.load_fingerprint_set(SyncMode::Pcm).await.unwrap();
        assert_eq!(loaded, set(&["aa11", "bb22"]));
    }

    #[tokio::test]
    async fn dangling_pointer_falls_back_to_newest_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .save_fingerprint_set(SyncMode::Pcm, &set(&["aa11"]))
            .await
            .unwrap();

        let mode_dir = store.mode_dir(SyncMode::Pcm);
        std::fs::write(mode_dir.join(META_FILE), "fingerprints_missing.json").unwrap();

        let loaded = store.load_fingerprint_set(SyncMode::Pcm).await.unwrap();
        assert_eq!(loaded, set(&["aa11"]));
    }

    #[tokio::test]
    async fn corrupt_only_snapshot_is_an_error() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let mode_dir = store.mode_dir(SyncMode::Pcm);
        std::fs::create_dir_all(&mode_dir).unwrap();
        std::fs::write(mode_dir.join("fingerprints_1_a.json"), "{not json").unwrap();
        std::fs::write(mode_dir.join(META_FILE), "fingerprints_1_a.json").unwrap();

        let result = store.load_fingerprint_set(SyncMode::Pcm).await;
        assert!(matches!(result, Err(StoreError::Corrupted(_))));
    }

    #[tokio::test]
    async fn corrupt_current_snapshot_does_not_load_older_one() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .save_fingerprint_set(SyncMode::Pcm, &set(&["aa11"]))
            .await
            .unwrap();
        store
            .save_fingerprint_set(SyncMode::Pcm, &set(&["aa11", "bb22", "cc33"]))
            .await
            .unwrap();

        let mode_dir = store.mode_dir(SyncMode::Pcm);
        let current = std::fs::read_to_string(mode_dir.join(META_FILE)).unwrap();
        std::fs::write(mode_dir.join(current.trim()), "{not json").unwrap();

        let result = store.load_fingerprint_set(SyncMode::Pcm).await;
        assert!(matches!(result, Err(StoreError::Corrupted(_))), "{result:?}");
    }

    #[tokio::test]
    async fn old_snapshots_are_pruned() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path()).with_keep_versions(2);

        for i in 0..5 {
            let items: FingerprintSet = [format!("{i:04x}")].into_iter().collect();
            store
                .save_fingerprint_set(SyncMode::Pcm, &items)
                .await
                .unwrap();
        }

        let names = FileStore::list_snapshots(&store.mode_dir(SyncMode::Pcm))
            .await
            .unwrap();
        assert!(names.len() <= 2, "kept {names:?}");

        let loaded = store.load_fingerprint_set(SyncMode::Pcm).await.unwrap();
        assert_eq!(loaded, set(&["0004"]));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .save_fingerprint_set(SyncMode::File, &set(&["aa11"]))
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.mode_dir(SyncMode::File))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }
}
