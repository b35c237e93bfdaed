//! Package coordinates and feed credentials.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors raised while parsing user-supplied package coordinates.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The package name part of an identifier is empty.
    #[error("Package name is required (got '{0}')")]
    EmptyName(String),

    /// The version string is not a valid semantic version.
    #[error("Invalid package version '{input}': {reason}")]
    InvalidVersion {
        /// The rejected input.
        input: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The credentials string is not of the form `user:password`.
    #[error("Credentials must be of the form user:password")]
    InvalidCredentials,
}

/// A package identity on a feed: an optional group plus a name.
///
/// Both parts are opaque strings; case handling is left to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentifier {
    /// Optional group (may itself contain `/` separators, e.g. `tools/build`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Package name. Never empty.
    pub name: String,
}

impl PackageIdentifier {
    /// Build an identifier from parts.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::EmptyName`] if `name` is empty.
    pub fn new(group: Option<&str>, name: &str) -> Result<Self, ParseError> {
        if name.is_empty() {
            return Err(ParseError::EmptyName(name.to_string()));
        }
        Ok(Self {
            group: group.filter(|g| !g.is_empty()).map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Parse `group:name` or `name`, splitting on the first `:`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::EmptyName`] if the name part is empty.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        match s.split_once(':') {
            Some((group, name)) if !name.is_empty() => Self::new(Some(group), name),
            Some(_) => Err(ParseError::EmptyName(s.to_string())),
            None => Self::new(None, s),
        }
    }

    /// Group as a string slice, if any.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for PackageIdentifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{group}:{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A concrete, totally ordered package version (semantic versioning 2.0).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageVersion(semver::Version);

impl PackageVersion {
    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidVersion`] if `s` is not a valid semantic version.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        semver::Version::parse(s.trim())
            .map(Self)
            .map_err(|e| ParseError::InvalidVersion {
                input: s.to_string(),
                reason: e.to_string(),
            })
    }

    /// Returns `true` if the version carries a prerelease tag (e.g. `2.0.0-beta`).
    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// Access the underlying semantic version.
    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl FromStr for PackageVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for PackageVersion {
    fn from(v: semver::Version) -> Self {
        Self(v)
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP basic credentials for a feed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    /// Password or API key.
    pub password: String,
}

impl Credentials {
    /// Create credentials from a user name and password.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl FromStr for Credentials {
    type Err = ParseError;

    /// Parse `user:password`, splitting on the first `:`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, password) = s.split_once(':').ok_or(ParseError::InvalidCredentials)?;
        if user.is_empty() {
            return Err(ParseError::InvalidCredentials);
        }
        Ok(Self::new(user, password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
