//! `upack.json`, the manifest stored at the root of every universal package.

use serde::{Deserialize, Serialize};

use crate::types::{PackageIdentifier, PackageVersion};

/// File name of the package manifest inside the archive.
pub const MANIFEST_FILE: &str = "upack.json";

/// Directory prefix under which package content is stored inside the archive.
pub const CONTENT_PREFIX: &str = "package/";

/// Package metadata declared by the package author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package group, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Package name.
    pub name: String,
    /// Package version as declared (not validated here).
    pub version: String,
    /// Human-friendly title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PackageManifest {
    /// Parse a manifest from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the document is malformed.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Returns `true` if the manifest declares the given identity.
    ///
    /// Versions are compared semantically when the declared version parses.
    pub fn describes(&self, id: &PackageIdentifier, version: &PackageVersion) -> bool {
        let group = self.group.as_deref().filter(|g| !g.is_empty());
        let version_matches = PackageVersion::parse(&self.version)
            .map(|v| &v == version)
            .unwrap_or(false);
        group == id.group() && self.name == id.name() && version_matches
    }
}
