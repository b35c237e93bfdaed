//! `installedPackages.json`: the registry's metadata index.
//!
//! Readers never take a lock. Writers serialize on the registry-wide `.lock`
//! and replace the file by rename, so a reader sees either the old or the new
//! index, never a torn one.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use upack_schema::{CacheEntry, CacheKey};

use super::RegistryError;
use super::lock::FileLock;
use crate::paths::{INDEX_FILE, INDEX_LOCK_FILE};

/// Read the index; a missing or empty file is an empty index.
pub(crate) fn read_index(path: &Path) -> Result<Vec<CacheEntry>, RegistryError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RegistryError::storage("read registry index", path, e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).map_err(|source| RegistryError::CorruptIndex {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically replace the index with `entries`.
pub(crate) fn write_index(path: &Path, entries: &[CacheEntry]) -> Result<(), RegistryError> {
    let write = || -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    };
    write().map_err(|e| RegistryError::storage("write registry index", path, e))
}

/// Read-modify-write the index of the registry at `root` under its lock.
pub(crate) fn update_index<T>(
    root: &Path,
    f: impl FnOnce(&mut Vec<CacheEntry>) -> T,
) -> Result<T, RegistryError> {
    let lock_path = root.join(INDEX_LOCK_FILE);
    let _lock = FileLock::acquire(&lock_path)
        .map_err(|e| RegistryError::storage("lock registry index", &lock_path, e))?;

    let path = root.join(INDEX_FILE);
    let mut entries = read_index(&path)?;
    let out = f(&mut entries);
    write_index(&path, &entries)?;
    Ok(out)
}

/// Insert `entry`, replacing any record for the same key.
pub(crate) fn upsert(entries: &mut Vec<CacheEntry>, entry: CacheEntry) {
    let key = entry.key();
    match entries.iter_mut().find(|e| key.matches(e)) {
        Some(slot) => *slot = entry,
        None => entries.push(entry),
    }
}

pub(crate) fn find<'a>(entries: &'a [CacheEntry], key: &CacheKey) -> Option<&'a CacheEntry> {
    entries.iter().find(|e| key.matches(e))
}
