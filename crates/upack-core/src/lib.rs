pub mod error;
pub mod install;
pub mod io;
pub mod paths;
pub mod registry;
pub mod resolver;

pub use error::{ErrorClass, InstallError};
pub use install::{ArtifactOrigin, InstallOutcome, InstallRequest, install};
pub use registry::{InstallMetadata, Registry, RegistryError};

use std::time::Duration;

/// User Agent string for feed requests
pub const USER_AGENT: &str = concat!("upack/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by every feed call in one process.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .build()
}

/// Name recorded as `installedBy` when none is given.
pub fn default_installed_by() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
