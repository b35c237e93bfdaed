//! Package artifact download.
//!
//! Artifacts are streamed chunk-by-chunk into a temp file that only this
//! process can see, hashing as they arrive. Zip needs random access to the
//! central directory, so callers always get a fully materialized file back,
//! rewound to the start. A failed download drops the temp file, which removes
//! it from disk.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use upack_schema::{Credentials, PackageIdentifier, PackageVersion, Sha256Digest};

/// The feed URL could not be used as a base for API calls.
#[derive(Error, Debug)]
#[error("Invalid feed URL '{url}': {reason}")]
pub struct InvalidSource {
    pub url: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    InvalidSource(#[from] InvalidSource),

    #[error("Package {package} {version} was not found on the feed")]
    NotFound { package: String, version: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a feed URL, rejecting anything that is not http(s).
pub(crate) fn parse_source(source: &str) -> Result<Url, InvalidSource> {
    let invalid = |reason: String| InvalidSource {
        url: source.to_string(),
        reason,
    };
    let url = Url::parse(source.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("URL cannot be a base".to_string()));
    }
    Ok(url)
}

/// Append path segments to a feed URL, dropping its query and fragment.
pub(crate) fn feed_endpoint<'a>(
    source: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, InvalidSource> {
    let mut url = parse_source(source)?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| InvalidSource {
            url: source.to_string(),
            reason: "URL cannot be a base".to_string(),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Build the artifact download URL:
/// `{source}/download/{group...}/{name}/{version}`.
///
/// Pure; every segment is percent-encoded and a group containing `/` becomes
/// several path segments.
pub fn download_url(
    source: &str,
    id: &PackageIdentifier,
    version: &PackageVersion,
) -> Result<Url, InvalidSource> {
    let version = version.to_string();
    let group = id.group().unwrap_or_default();
    let segments = std::iter::once("download")
        .chain(group.split('/').filter(|s| !s.is_empty()))
        .chain([id.name(), version.as_str()]);
    feed_endpoint(source, segments)
}

/// A download that landed in a named temp file, not yet admitted anywhere.
///
/// Dropping it deletes the file.
#[derive(Debug)]
pub struct DownloadedArtifact {
    pub file: NamedTempFile,
    pub sha256: Sha256Digest,
    pub size: u64,
}

/// Downloads package artifacts from one feed.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    source: String,
    credentials: Option<Credentials>,
}

impl Fetcher {
    pub fn new(client: Client, source: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            client,
            source: source.into(),
            credentials,
        }
    }

    /// Feed URL this fetcher downloads from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Download into an anonymous temp file.
    ///
    /// The file has no name on disk (or is deleted on close where the platform
    /// requires a name), so closing the returned handle reclaims the space.
    pub async fn download_to_temp(
        &self,
        id: &PackageIdentifier,
        version: &PackageVersion,
    ) -> Result<File, FetchError> {
        let file = tempfile::tempfile()?;
        let (file, _, _) = self.stream_into(id, version, file).await?;
        Ok(file)
    }

    /// Download into a uniquely named temp file inside `dir`.
    ///
    /// `dir` should be on the same volume as the final destination so the
    /// file can later be renamed into place.
    pub async fn download_into(
        &self,
        dir: &Path,
        id: &PackageIdentifier,
        version: &PackageVersion,
    ) -> Result<DownloadedArtifact, FetchError> {
        let temp = tempfile::Builder::new()
            .prefix(".upack-")
            .suffix(".partial")
            .tempfile_in(dir)?;
        let writer = temp.reopen()?;
        let (_, sha256, size) = self.stream_into(id, version, writer).await?;
        Ok(DownloadedArtifact {
            file: temp,
            sha256,
            size,
        })
    }

    async fn stream_into(
        &self,
        id: &PackageIdentifier,
        version: &PackageVersion,
        file: File,
    ) -> Result<(File, Sha256Digest, u64), FetchError> {
        let url = download_url(&self.source, id, version)?;
        debug!(%url, package = %id, %version, "downloading package");

        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.user, Some(&creds.password));
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                package: id.to_string(),
                version: version.to_string(),
            });
        }
        let response = response.error_for_status()?;

        let mut out = tokio::fs::File::from_std(file);
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        out.flush().await?;
        out.sync_all().await?;
        let mut file = out.into_std().await;
        file.seek(SeekFrom::Start(0))?;

        let sha256 = finish_digest(hasher)?;
        debug!(package = %id, %version, bytes = downloaded, %sha256, "download complete");
        Ok((file, sha256, downloaded))
    }
}

/// Hex-encode a finished SHA-256.
pub(crate) fn finish_digest(hasher: Sha256) -> std::io::Result<Sha256Digest> {
    Sha256Digest::new(hex::encode(hasher.finalize())).map_err(std::io::Error::other)
}
