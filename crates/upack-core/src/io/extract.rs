//! Archive extraction.
//!
//! Universal packages are zip files whose content lives under `package/`,
//! next to an `upack.json` manifest. Every entry name is validated before
//! anything is written, so a hostile archive is rejected as a whole rather
//! than half-extracted.
//!
//! A failure while writing an entry aborts extraction without rolling back
//! files that were already written; the target may be left partially
//! populated.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use upack_schema::{CONTENT_PREFIX, MANIFEST_FILE, PackageManifest};
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry '{0}' resolves outside the target directory")]
    PathTraversal(String),

    #[error("Failed to extract {}: {source}", path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create target directory {}: {source}", path.display())]
    TargetDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counts reported after an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    /// Existing files left untouched because overwrite was off.
    pub skipped: usize,
}

/// A planned write, computed before touching the filesystem.
struct PlannedEntry {
    index: usize,
    dest: PathBuf,
    is_dir: bool,
}

/// Normalize an entry name into a safe relative path.
///
/// Backslashes are treated as separators. Absolute names, drive prefixes and
/// `..` segments are rejected; `.` and empty segments are dropped.
pub fn sanitize_entry_name(name: &str) -> Result<PathBuf, ExtractError> {
    let traversal = || ExtractError::PathTraversal(name.to_string());
    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(traversal());
    }

    let mut relative = PathBuf::new();
    for (i, segment) in normalized.split('/').enumerate() {
        match segment {
            "" | "." => {}
            ".." => return Err(traversal()),
            s if i == 0 && is_drive_prefix(s) => return Err(traversal()),
            s => {
                // Catches platform-specific prefixes the string checks miss.
                let mut components = Path::new(s).components();
                if !matches!(
                    (components.next(), components.next()),
                    (Some(Component::Normal(_)), None)
                ) {
                    return Err(traversal());
                }
                relative.push(s);
            }
        }
    }
    Ok(relative)
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Strip `prefix` case-insensitively, returning `None` for entries outside it.
fn strip_prefix_ignore_case<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &name[prefix.len()..])
}

/// An opened package archive.
pub struct PackageArchive<R: Read + Seek> {
    zip: ZipArchive<R>,
}

impl<R: Read + Seek> std::fmt::Debug for PackageArchive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageArchive")
            .field("entries", &self.zip.len())
            .finish()
    }
}

impl<R: Read + Seek> PackageArchive<R> {
    pub fn open(reader: R) -> Result<Self, ExtractError> {
        Ok(Self {
            zip: ZipArchive::new(reader)?,
        })
    }

    /// Read `upack.json`. A missing or unreadable manifest is not an error.
    pub fn manifest(&mut self) -> Option<PackageManifest> {
        let mut entry = match self.zip.by_name(MANIFEST_FILE) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return None,
            Err(e) => {
                warn!(error = %e, "could not open package manifest");
                return None;
            }
        };
        let mut bytes = Vec::new();
        if let Err(e) = entry.read_to_end(&mut bytes) {
            warn!(error = %e, "could not read package manifest");
            return None;
        }
        match PackageManifest::from_slice(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(error = %e, "package manifest is not valid JSON");
                None
            }
        }
    }

    /// Extract the package content (entries under `package/`, prefix stripped).
    pub fn extract(&mut self, target: &Path, overwrite: bool) -> Result<ExtractSummary, ExtractError> {
        self.extract_with_prefix(target, overwrite, Some(CONTENT_PREFIX))
    }

    /// Extract every entry as-is, without any content prefix handling.
    pub fn extract_all(
        &mut self,
        target: &Path,
        overwrite: bool,
    ) -> Result<ExtractSummary, ExtractError> {
        self.extract_with_prefix(target, overwrite, None)
    }

    fn plan(&mut self, target: &Path, prefix: Option<&str>) -> Result<Vec<PlannedEntry>, ExtractError> {
        let mut planned = Vec::with_capacity(self.zip.len());
        for index in 0..self.zip.len() {
            let entry = self.zip.by_index_raw(index)?;
            let name = entry.name().replace('\\', "/");
            let is_dir = entry.is_dir() || name.ends_with('/');

            // Validate every name, including ones we are about to ignore.
            sanitize_entry_name(&name)?;

            let relative_name = match prefix {
                Some(prefix) => match strip_prefix_ignore_case(&name, prefix) {
                    Some(rest) => rest,
                    None => continue,
                },
                None => name.as_str(),
            };
            let relative = sanitize_entry_name(relative_name)?;
            if relative.as_os_str().is_empty() {
                continue;
            }

            planned.push(PlannedEntry {
                index,
                dest: target.join(relative),
                is_dir,
            });
        }
        Ok(planned)
    }

    fn extract_with_prefix(
        &mut self,
        target: &Path,
        overwrite: bool,
        prefix: Option<&str>,
    ) -> Result<ExtractSummary, ExtractError> {
        let planned = self.plan(target, prefix)?;

        fs::create_dir_all(target).map_err(|source| ExtractError::TargetDirectory {
            path: target.to_path_buf(),
            source,
        })?;

        let mut summary = ExtractSummary::default();
        for item in planned {
            let failed = |source: io::Error| ExtractError::Extraction {
                path: item.dest.clone(),
                source,
            };

            if item.is_dir {
                fs::create_dir_all(&item.dest).map_err(failed)?;
                summary.directories += 1;
                continue;
            }

            if let Some(parent) = item.dest.parent() {
                fs::create_dir_all(parent).map_err(failed)?;
            }

            let Some(mut out) = open_destination(&item.dest, overwrite).map_err(failed)? else {
                debug!(path = %item.dest.display(), "exists, skipping");
                summary.skipped += 1;
                continue;
            };

            let mut entry = self.zip.by_index(item.index)?;
            io::copy(&mut entry, &mut out).map_err(failed)?;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&item.dest, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(failed)?;
            }

            summary.files += 1;
        }

        info!(
            files = summary.files,
            directories = summary.directories,
            skipped = summary.skipped,
            target = %target.display(),
            "extracted package"
        );
        Ok(summary)
    }
}

/// Open a destination for writing, or `None` if it exists and must be kept.
fn open_destination(dest: &Path, overwrite: bool) -> io::Result<Option<File>> {
    if !overwrite {
        return match OpenOptions::new().write(true).create_new(true).open(dest) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        };
    }

    // Never write through a pre-existing symlink.
    if fs::symlink_metadata(dest).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(dest)?;
    }
    File::create(dest).map(Some)
}

/// Extract a universal package's content into `target`.
pub fn extract_package<R: Read + Seek>(
    reader: R,
    target: &Path,
    overwrite: bool,
) -> Result<ExtractSummary, ExtractError> {
    PackageArchive::open(reader)?.extract(target, overwrite)
}

/// Extract every entry of a zip archive into `target`, paths unchanged.
pub fn extract_archive<R: Read + Seek>(
    reader: R,
    target: &Path,
    overwrite: bool,
) -> Result<ExtractSummary, ExtractError> {
    PackageArchive::open(reader)?.extract_all(target, overwrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, Option<&str>)]) -> Cursor<Vec<u8>> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, body) in entries {
            match body {
                Some(body) => {
                    zip.start_file(*name, options).unwrap();
                    zip.write_all(body.as_bytes()).unwrap();
                }
                None => zip.add_directory(*name, options).unwrap(),
            }
        }
        let mut cursor = zip.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    fn sample_package() -> Cursor<Vec<u8>> {
        build_zip(&[
            ("upack.json", Some(r#"{"name":"hdars","version":"1.0.0"}"#)),
            ("package/", None),
            ("package/bin/", None),
            ("package/bin/tool", Some("new tool")),
            ("package/readme.txt", Some("hello")),
            ("other/ignored.txt", Some("nope")),
        ])
    }

    #[test]
    fn sanitize_accepts_nested_relative_paths() {
        assert_eq!(
            sanitize_entry_name("a/./b\\c.txt").unwrap(),
            PathBuf::from("a").join("b").join("c.txt")
        );
    }

    #[test]
    fn sanitize_rejects_escapes() {
        for bad in ["../../evil", "a/../../b", "/etc/passwd", "\\abs", "C:/x", "a\\..\\..\\b"] {
            assert!(
                matches!(sanitize_entry_name(bad), Err(ExtractError::PathTraversal(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn extracts_content_under_package_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");

        let mut archive = PackageArchive::open(sample_package()).unwrap();
        let manifest = archive.manifest().unwrap();
        let summary = archive.extract(&target, false).unwrap();

        assert_eq!(manifest.name, "hdars");
        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 1);
        assert_eq!(fs::read(target.join("bin/tool")).unwrap(), b"new tool");
        assert_eq!(fs::read(target.join("readme.txt")).unwrap(), b"hello");
        assert!(!target.join("upack.json").exists());
        assert!(!target.join("other").exists());
    }

    #[test]
    fn existing_files_are_kept_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/tool"), b"original").unwrap();

        let summary = extract_package(sample_package(), dir.path(), false).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.files, 1);
        assert_eq!(fs::read(dir.path().join("bin/tool")).unwrap(), b"original");
    }

    #[test]
    fn existing_files_are_replaced_with_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/tool"), b"original but longer").unwrap();

        let summary = extract_package(sample_package(), dir.path(), true).unwrap();

        assert_eq!(summary.skipped, 0);
        assert_eq!(fs::read(dir.path().join("bin/tool")).unwrap(), b"new tool");
    }

    #[test]
    fn traversal_fails_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b");
        let archive = build_zip(&[
            ("package/ok.txt", Some("fine")),
            ("package/../../evil", Some("gotcha")),
        ]);

        let err = extract_package(archive, &target, true).unwrap_err();

        assert!(matches!(err, ExtractError::PathTraversal(_)));
        assert!(!dir.path().join("evil").exists());
        assert!(!dir.path().join("a").join("evil").exists());
        assert!(!target.join("ok.txt").exists());
    }

    #[test]
    fn traversal_outside_content_prefix_still_fails() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_zip(&[("../../evil", Some("gotcha"))]);
        let err = extract_package(archive, dir.path(), false).unwrap_err();
        assert!(matches!(err, ExtractError::PathTraversal(_)));
    }

    #[test]
    fn extract_all_keeps_full_paths() {
        let dir = tempfile::tempdir().unwrap();
        let summary = extract_archive(sample_package(), dir.path(), false).unwrap();
        assert_eq!(summary.files, 4);
        assert!(dir.path().join("upack.json").exists());
        assert!(dir.path().join("package/bin/tool").exists());
    }

    #[test]
    fn missing_manifest_is_none() {
        let mut archive = PackageArchive::open(build_zip(&[("package/a", Some("a"))])).unwrap();
        assert!(archive.manifest().is_none());
    }

    #[test]
    fn garbage_is_an_archive_error() {
        let err = extract_package(Cursor::new(b"not a zip".to_vec()), Path::new("."), false)
            .unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
    }

    #[cfg(unix)]
    #[test]
    fn unix_modes_are_applied() {
        use std::os::unix::fs::PermissionsExt;
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("package/run.sh", SimpleFileOptions::default().unix_permissions(0o755))
            .unwrap();
        zip.write_all(b"#!/bin/sh\n").unwrap();
        let mut cursor = zip.finish().unwrap();
        cursor.set_position(0);

        let dir = tempfile::tempdir().unwrap();
        extract_package(cursor, dir.path(), false).unwrap();
        let mode = fs::metadata(dir.path().join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
