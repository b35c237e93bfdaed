//! Local registry cache of downloaded package artifacts.
//!
//! One registry per scope, each rooted in its own directory:
//!
//! ```text
//! <root>/
//! ├── installedPackages.json
//! ├── .lock
//! ├── locks/<stem>$<version>.lock
//! ├── packageCache/<stem>/<name>.<version>.upack
//! └── tmp/
//! ```
//!
//! An artifact is only ever made visible by renaming a fully downloaded temp
//! file from `tmp/`, and only counts as cached once its index record exists
//! and its bytes still hash to the recorded digest. Admission of a key is
//! serialized by an exclusive lock on `locks/<key>.lock`.

pub mod index;
pub mod lock;

use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use upack_schema::{CacheEntry, CacheKey, RegistryScope};

use crate::io::fetch::{DownloadedArtifact, FetchError, Fetcher, finish_digest};
use crate::paths::{CACHE_DIR, INDEX_FILE, LOCKS_DIR, TMP_DIR, registry_env, try_registry_root};
use lock::FileLock;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to {context} at {}: {source}", path.display())]
    Storage {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Registry index {} is corrupt (delete it to reset the cache): {source}", path.display())]
    CorruptIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not determine the {scope} registry location. Set {env} to override.")]
    NoRoot {
        scope: RegistryScope,
        env: &'static str,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl RegistryError {
    pub(crate) fn storage(context: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Storage {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Per-install metadata recorded against a cache entry.
///
/// Rewritten on every install of the key, cache hit or not.
#[derive(Debug, Clone, Default)]
pub struct InstallMetadata {
    pub comment: Option<String>,
    pub installed_by: String,
    pub install_path: Option<PathBuf>,
}

impl InstallMetadata {
    /// Overwrite the per-install fields of `entry`, leaving its artifact facts alone.
    fn stamp(&self, entry: &mut CacheEntry) {
        entry.comment.clone_from(&self.comment);
        entry.installed_at = Utc::now();
        entry.installed_by.clone_from(&self.installed_by);
        entry.install_path.clone_from(&self.install_path);
    }
}

/// An open handle on an admitted artifact.
#[derive(Debug)]
pub struct CachedArtifact {
    /// Positioned at the start of the archive.
    pub file: File,
    pub entry: CacheEntry,
    /// `true` if this call downloaded and admitted the artifact.
    pub downloaded: bool,
}

/// Result of [`Registry::purge_temp`] and [`Registry::purge_locks`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeSummary {
    pub removed: usize,
    /// Files left in place because they may still be in use.
    pub kept: usize,
}

#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    scope: RegistryScope,
}

impl Registry {
    /// Open the default registry for `scope`.
    pub fn open(scope: RegistryScope) -> Result<Self, RegistryError> {
        let root = try_registry_root(scope).ok_or(RegistryError::NoRoot {
            scope,
            env: registry_env(scope),
        })?;
        Ok(Self::at(root, scope))
    }

    /// Use an explicit root directory.
    pub fn at(root: impl Into<PathBuf>, scope: RegistryScope) -> Self {
        Self {
            root: root.into(),
            scope,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self) -> RegistryScope {
        self.scope
    }

    /// Final location of the artifact for `key`.
    pub fn artifact_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(CACHE_DIR)
            .join(key.package_stem())
            .join(key.artifact_file_name())
    }

    fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(LOCKS_DIR).join(key.lock_file_name())
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// All index records, in index order.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, RegistryError> {
        index::read_index(&self.root.join(INDEX_FILE))
    }

    /// Return the entry for `key` if its artifact is present and intact.
    ///
    /// Hashes the artifact, so this reads the whole file.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, RegistryError> {
        let registry = self.clone();
        let key = key.clone();
        blocking(move || registry.lookup_blocking(&key)).await
    }

    fn lookup_blocking(&self, key: &CacheKey) -> Result<Option<CacheEntry>, RegistryError> {
        let entries = self.entries()?;
        let Some(entry) = index::find(&entries, key) else {
            return Ok(None);
        };
        let path = self.artifact_path(key);
        let intact = verify_artifact(entry, &path)
            .map_err(|e| RegistryError::storage("verify cached artifact", &path, e))?;
        if intact {
            Ok(Some(entry.clone()))
        } else {
            warn!(package = %key, path = %path.display(), "cached artifact is missing or damaged");
            Ok(None)
        }
    }

    /// Serve `key` from the cache, downloading and admitting it first if needed.
    ///
    /// At most one caller per key and scope downloads at a time, across
    /// threads and processes; the others wait and then take the cached copy.
    pub async fn get_or_download_package(
        &self,
        key: &CacheKey,
        fetcher: &Fetcher,
        metadata: &InstallMetadata,
    ) -> Result<CachedArtifact, RegistryError> {
        if let Some(hit) = self.open_cached(key, metadata).await? {
            return Ok(hit);
        }

        let lock_path = self.lock_path(key);
        let _admission = FileLock::acquire_async(lock_path.clone())
            .await
            .map_err(|e| RegistryError::storage("lock cache key", &lock_path, e))?;

        // Someone else may have admitted it while we waited.
        if let Some(hit) = self.open_cached(key, metadata).await? {
            return Ok(hit);
        }

        let tmp_dir = self.tmp_dir();
        fs::create_dir_all(&tmp_dir)
            .map_err(|e| RegistryError::storage("create temp directory", &tmp_dir, e))?;

        info!(package = %key, scope = %self.scope, "downloading into registry");
        let artifact = fetcher.download_into(&tmp_dir, &key.id, &key.version).await?;

        let registry = self.clone();
        let key = key.clone();
        let feed_url = fetcher.source().to_string();
        let metadata = metadata.clone();
        blocking(move || registry.admit(&key, artifact, feed_url, &metadata)).await
    }

    /// Rename a finished download into place and record it.
    fn admit(
        &self,
        key: &CacheKey,
        artifact: DownloadedArtifact,
        feed_url: String,
        metadata: &InstallMetadata,
    ) -> Result<CachedArtifact, RegistryError> {
        let final_path = self.artifact_path(key);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RegistryError::storage("create cache directory", parent, e))?;
        }

        // A stale artifact left without a valid record.
        match fs::remove_file(&final_path) {
            Ok(()) => debug!(path = %final_path.display(), "replacing stale artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(RegistryError::storage("remove stale artifact", &final_path, e)),
        }

        let DownloadedArtifact { file, sha256, size } = artifact;
        file.persist(&final_path)
            .map_err(|e| RegistryError::storage("admit artifact", &final_path, e.error))?;

        let entry = CacheEntry {
            group: key.id.group().map(str::to_string),
            name: key.id.name().to_string(),
            version: key.version.clone(),
            artifact_path: final_path.clone(),
            sha256,
            size,
            feed_url,
            install_path: metadata.install_path.clone(),
            installed_at: Utc::now(),
            installed_by: metadata.installed_by.clone(),
            installed_using: crate::USER_AGENT.to_string(),
            comment: metadata.comment.clone(),
            scope: self.scope,
        };

        let recorded = index::update_index(&self.root, |entries| {
            index::upsert(entries, entry.clone());
        })
        .and_then(|()| {
            File::open(&final_path)
                .map_err(|e| RegistryError::storage("open cached artifact", &final_path, e))
        });

        match recorded {
            Ok(file) => {
                info!(package = %key, size, sha256 = %entry.sha256, "admitted artifact");
                Ok(CachedArtifact {
                    file,
                    entry,
                    downloaded: true,
                })
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&final_path) {
                    warn!(path = %final_path.display(), error = %rm, "could not remove unrecorded artifact");
                }
                Err(e)
            }
        }
    }

    /// Open an intact cached artifact and refresh its install metadata.
    async fn open_cached(
        &self,
        key: &CacheKey,
        metadata: &InstallMetadata,
    ) -> Result<Option<CachedArtifact>, RegistryError> {
        let registry = self.clone();
        let key = key.clone();
        let metadata = metadata.clone();
        blocking(move || {
            let Some(verified) = registry.lookup_blocking(&key)? else {
                return Ok(None);
            };
            let path = registry.artifact_path(&key);
            let file = File::open(&path)
                .map_err(|e| RegistryError::storage("open cached artifact", &path, e))?;

            // Patch the record as it is now, not the copy read before the lock.
            let current = index::update_index(&registry.root, |entries| {
                let slot = entries
                    .iter_mut()
                    .find(|e| key.matches(e) && e.sha256 == verified.sha256)?;
                metadata.stamp(slot);
                Some(slot.clone())
            })?;
            let Some(entry) = current else {
                debug!(package = %key, "record changed while opening; treating as miss");
                return Ok(None);
            };

            debug!(package = %key, "cache hit");
            Ok(Some(CachedArtifact {
                file,
                entry,
                downloaded: false,
            }))
        })
        .await
    }

    /// Remove temp downloads older than `min_age` left by interrupted installs.
    ///
    /// Younger files are kept because another process may still be writing
    /// them. Admitted artifacts are never touched.
    pub fn purge_temp(&self, min_age: Duration) -> Result<PurgeSummary, RegistryError> {
        let tmp_dir = self.tmp_dir();
        let read_dir = match fs::read_dir(&tmp_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PurgeSummary::default()),
            Err(e) => return Err(RegistryError::storage("read temp directory", &tmp_dir, e)),
        };

        let now = SystemTime::now();
        let mut summary = PurgeSummary::default();
        for entry in read_dir {
            let entry = entry.map_err(|e| RegistryError::storage("read temp directory", &tmp_dir, e))?;
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }

            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < min_age {
                summary.kept += 1;
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed orphaned download");
                    summary.removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(RegistryError::storage("remove temp file", &path, e)),
            }
        }
        Ok(summary)
    }

    /// Remove per-key lock files nobody holds.
    ///
    /// Each file is deleted while its lock is held, and acquirers re-check
    /// the path after locking, so a removal never splits one key between two
    /// lock files. Only unix can tell the files apart; elsewhere every lock
    /// is kept.
    pub fn purge_locks(&self) -> Result<PurgeSummary, RegistryError> {
        let locks_dir = self.root.join(LOCKS_DIR);
        let read_dir = match fs::read_dir(&locks_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PurgeSummary::default()),
            Err(e) => return Err(RegistryError::storage("read lock directory", &locks_dir, e)),
        };

        let mut summary = PurgeSummary::default();
        for entry in read_dir {
            let entry =
                entry.map_err(|e| RegistryError::storage("read lock directory", &locks_dir, e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "lock") {
                continue;
            }
            if !cfg!(unix) {
                summary.kept += 1;
                continue;
            }

            let lock = FileLock::try_acquire_existing(&path)
                .map_err(|e| RegistryError::storage("lock for cleanup", &path, e))?;
            let Some(_lock) = lock else {
                debug!(path = %path.display(), "lock in use; keeping");
                summary.kept += 1;
                continue;
            };
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed idle lock file");
                    summary.removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(RegistryError::storage("remove lock file", &path, e)),
            }
        }
        Ok(summary)
    }
}

/// Size and digest check of an artifact against its record.
fn verify_artifact(entry: &CacheEntry, path: &Path) -> io::Result<bool> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if !meta.is_file() || meta.len() != entry.size {
        return Ok(false);
    }
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(finish_digest(hasher)? == entry.sha256)
}

async fn blocking<T, F>(f: F) -> Result<T, RegistryError>
where
    F: FnOnce() -> Result<T, RegistryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RegistryError::Storage {
            context: "run registry task",
            path: PathBuf::new(),
            source: io::Error::other(e),
        })?
}
