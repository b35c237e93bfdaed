//! Install command

use upack_core::{ArtifactOrigin, InstallError, InstallRequest, default_installed_by, http_client};
use upack_schema::{Credentials, PackageIdentifier};

use crate::InstallArgs;

/// Build an install request from parsed arguments.
///
/// Malformed package names and credentials are validation failures.
pub fn request(args: InstallArgs) -> Result<InstallRequest, InstallError> {
    let package = PackageIdentifier::parse(&args.package)
        .map_err(|e| InstallError::Validation(format!("package '{}': {e}", args.package)))?;
    let credentials = args
        .user
        .as_deref()
        .map(str::parse::<Credentials>)
        .transpose()
        .map_err(|e| InstallError::Validation(format!("--user: {e}")))?;

    Ok(InstallRequest {
        package,
        version: args.version,
        source: args.source,
        credentials,
        target: args.target,
        overwrite: args.overwrite,
        prerelease: args.prerelease,
        comment: args.comment,
        scope: crate::scope(args.userregistry),
        unregistered: args.unregistered,
        registry_root: None,
        installed_by: default_installed_by(),
    })
}

/// Install one package
pub async fn install(args: InstallArgs) -> Result<(), InstallError> {
    let request = request(args)?;
    let client = http_client().map_err(|e| InstallError::Validation(e.to_string()))?;

    let outcome = upack_core::install(&client, &request).await?;

    let how = match outcome.origin {
        ArtifactOrigin::Cached => "from registry cache",
        ArtifactOrigin::Downloaded => "downloaded",
        ArtifactOrigin::Feed => "downloaded, unregistered",
    };
    println!(
        "Installed {} {} to {} ({how})",
        request.package,
        outcome.version,
        request.target.display()
    );
    println!("{}", crate::ui::summary_line(&outcome.summary));
    Ok(())
}
