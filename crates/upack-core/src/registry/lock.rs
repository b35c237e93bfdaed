//! Advisory file locks shared by threads and processes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::Instant;

use fs4::fs_std::FileExt;
use tracing::{debug, warn};

/// Waits longer than this are worth a warning.
const SLOW_LOCK_MS: u128 = 2_000;

/// An exclusive lock on a lock file, released on drop.
///
/// Each acquisition opens its own handle, so two holders inside one process
/// exclude each other just like two processes do.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock at `path` is held, creating the file if needed.
    ///
    /// Lock files may be removed by [`FileLock::try_acquire_existing`] holders,
    /// so a lock taken on a file that is no longer at `path` is dropped and
    /// taken again.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let started = Instant::now();
        let file = loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;
            FileExt::lock_exclusive(&file)?;
            if still_linked(&file, path)? {
                break file;
            }
            debug!(path = %path.display(), "lock file was removed while waiting; retrying");
        };

        let waited = started.elapsed().as_millis();
        if waited >= SLOW_LOCK_MS {
            warn!(path = %path.display(), waited_ms = waited, "waited on contended lock");
        } else {
            debug!(path = %path.display(), waited_ms = waited, "lock acquired");
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock at an existing `path` without waiting.
    ///
    /// `Ok(None)` if someone holds it or the file is gone. While the returned
    /// lock is held the file can be deleted safely.
    pub fn try_acquire_existing(path: &Path) -> io::Result<Option<Self>> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !FileExt::try_lock_exclusive(&file)? || !still_linked(&file, path)? {
            return Ok(None);
        }
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    /// Acquire on the blocking pool so the async executor keeps running.
    pub async fn acquire_async(path: PathBuf) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::acquire(&path))
            .await
            .map_err(io::Error::other)?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether `path` still names the file behind `file`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Lock files are only collected on unix, so the path never changes underneath.
#[cfg(not(unix))]
fn still_linked(_file: &File, _path: &Path) -> io::Result<bool> {
    Ok(true)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "unlock failed; closing handle");
        }
    }
}
