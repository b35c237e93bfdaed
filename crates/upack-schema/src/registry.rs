//! Registry cache records.
//!
//! The index file (`installedPackages.json`) is a JSON array of
//! [`CacheEntry`] values. It is only ever replaced wholesale by an atomic
//! rename, so readers never observe a partially written index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::hash::Sha256Digest;
use crate::types::{PackageIdentifier, PackageVersion};

/// Storage domain of a registry. Each scope has its own root and lock files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryScope {
    /// Per-user registry.
    User,
    /// Machine-wide registry (default).
    #[default]
    Machine,
}

impl RegistryScope {
    /// Lowercase name used in logs and on disk.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Machine => "machine",
        }
    }
}

impl fmt::Display for RegistryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "machine" => Ok(Self::Machine),
            other => Err(format!("unknown registry scope '{other}'")),
        }
    }
}

/// Immutable identity of one cached artifact within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Package group and name.
    pub id: PackageIdentifier,
    /// Concrete version.
    pub version: PackageVersion,
}

impl CacheKey {
    /// Create a key from an identifier and concrete version.
    pub fn new(id: PackageIdentifier, version: PackageVersion) -> Self {
        Self { id, version }
    }

    /// Filesystem-safe stem for the package: every group segment and the
    /// name, escaped with [`escape_segment`] and joined by `$`. Shared by
    /// every version of the package.
    pub fn package_stem(&self) -> String {
        let mut stem = String::new();
        if let Some(group) = self.id.group() {
            for segment in group.split('/') {
                stem.push_str(&escape_segment(segment));
                stem.push('$');
            }
        }
        stem.push_str(&escape_segment(self.id.name()));
        stem
    }

    /// Artifact file name: `<name>.<version>.upack`.
    pub fn artifact_file_name(&self) -> String {
        format!("{}.{}.upack", escape_segment(self.id.name()), self.version)
    }

    /// Lock file name: `<stem>$<version>.lock`.
    pub fn lock_file_name(&self) -> String {
        format!("{}${}.lock", self.package_stem(), self.version)
    }

    /// Returns `true` if `entry` records this key.
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        entry.group.as_deref() == self.id.group()
            && entry.name == self.id.name()
            && entry.version == self.version
    }
}

/// Percent-encode one identifier segment for use inside a file name.
///
/// ASCII alphanumerics and `-`, `_`, `.`, `+` are kept; every other byte,
/// including `%`, `$`, `/` and `\`, becomes `%XX`. A leading `.` is escaped
/// too, so `.` and `..` never survive as path components. The mapping is
/// injective, so distinct segments never share a name.
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, byte) in segment.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_' | b'+')
            || (byte == b'.' && i > 0);
        if keep {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// One admitted artifact plus its most recent install metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Package group, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Package name.
    pub name: String,
    /// Concrete version.
    pub version: PackageVersion,
    /// Absolute path of the cached artifact.
    pub artifact_path: PathBuf,
    /// Digest of the artifact bytes at admission time.
    pub sha256: Sha256Digest,
    /// Size of the artifact in bytes.
    pub size: u64,
    /// Feed the artifact was downloaded from.
    pub feed_url: String,
    /// Directory the package was last extracted into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<PathBuf>,
    /// Time of the most recent install.
    pub installed_at: DateTime<Utc>,
    /// User that performed the most recent install.
    pub installed_by: String,
    /// Tool and version that performed the most recent install.
    pub installed_using: String,
    /// Reason given for the most recent install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Scope the entry belongs to.
    pub scope: RegistryScope,
}

impl CacheEntry {
    /// Reconstruct the key this entry is stored under.
    pub fn key(&self) -> CacheKey {
        CacheKey {
            id: PackageIdentifier {
                group: self.group.clone(),
                name: self.name.clone(),
            },
            version: self.version.clone(),
        }
    }
}
