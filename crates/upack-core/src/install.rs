//! The install pipeline: resolve, open the artifact, extract.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use reqwest::Client;
use tracing::{info, warn};
use upack_schema::{CacheKey, Credentials, PackageIdentifier, PackageManifest, PackageVersion, RegistryScope};

use crate::error::InstallError;
use crate::io::extract::{ExtractSummary, PackageArchive};
use crate::io::fetch::Fetcher;
use crate::registry::{InstallMetadata, Registry};
use crate::resolver::resolve_version;

/// Everything one install needs, built once per invocation.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub package: PackageIdentifier,
    /// Concrete version, `latest`, or `None` for the newest on the feed.
    pub version: Option<String>,
    pub source: String,
    pub credentials: Option<Credentials>,
    pub target: PathBuf,
    pub overwrite: bool,
    pub prerelease: bool,
    pub comment: Option<String>,
    pub scope: RegistryScope,
    /// Bypass the registry and stream straight from the feed.
    pub unregistered: bool,
    /// Registry root override; `None` uses the scope's default location.
    pub registry_root: Option<PathBuf>,
    pub installed_by: String,
}

/// Where the installed artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// Downloaded to a temp file, registry bypassed.
    Feed,
    /// Downloaded and admitted into the registry by this install.
    Downloaded,
    /// Served from the registry.
    Cached,
}

#[derive(Debug)]
pub struct InstallOutcome {
    pub version: PackageVersion,
    pub origin: ArtifactOrigin,
    pub summary: ExtractSummary,
    pub manifest: Option<PackageManifest>,
}

impl InstallOutcome {
    pub fn cache_hit(&self) -> bool {
        self.origin == ArtifactOrigin::Cached
    }
}

/// Install `request.package` into `request.target`.
///
/// # Errors
///
/// Whatever stage fails first; see [`InstallError::class`]. Nothing is retried.
pub async fn install(client: &Client, request: &InstallRequest) -> Result<InstallOutcome, InstallError> {
    let version = resolve_version(
        client,
        &request.source,
        &request.package,
        request.version.as_deref(),
        request.credentials.as_ref(),
        request.prerelease,
    )
    .await?;

    let fetcher = Fetcher::new(client.clone(), request.source.clone(), request.credentials.clone());

    let (file, origin) = if request.unregistered {
        let file = fetcher.download_to_temp(&request.package, &version).await?;
        (file, ArtifactOrigin::Feed)
    } else {
        let registry = match &request.registry_root {
            Some(root) => Registry::at(root, request.scope),
            None => Registry::open(request.scope)?,
        };
        let metadata = InstallMetadata {
            comment: request.comment.clone(),
            installed_by: request.installed_by.clone(),
            install_path: Some(std::path::absolute(&request.target).unwrap_or_else(|_| request.target.clone())),
        };
        let key = CacheKey::new(request.package.clone(), version.clone());
        let cached = registry.get_or_download_package(&key, &fetcher, &metadata).await?;
        let origin = if cached.downloaded {
            ArtifactOrigin::Downloaded
        } else {
            ArtifactOrigin::Cached
        };
        (cached.file, origin)
    };

    let target = request.target.clone();
    let overwrite = request.overwrite;
    let (summary, manifest) =
        tokio::task::spawn_blocking(move || extract(file, &target, overwrite)).await??;

    if let Some(manifest) = &manifest {
        if !manifest.describes(&request.package, &version) {
            warn!(
                package = %request.package,
                %version,
                manifest_name = %manifest.name,
                manifest_version = %manifest.version,
                "package manifest does not match the requested package"
            );
        }
    }

    info!(
        package = %request.package,
        %version,
        origin = ?origin,
        target = %request.target.display(),
        "installed"
    );
    Ok(InstallOutcome {
        version,
        origin,
        summary,
        manifest,
    })
}

fn extract(
    file: File,
    target: &std::path::Path,
    overwrite: bool,
) -> Result<(ExtractSummary, Option<PackageManifest>), InstallError> {
    let mut archive = PackageArchive::open(BufReader::new(file))?;
    let manifest = archive.manifest();
    let summary = archive.extract(target, overwrite)?;
    Ok((summary, manifest))
}
