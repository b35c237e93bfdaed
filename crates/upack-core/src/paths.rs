use dirs::home_dir;
use std::path::PathBuf;
use upack_schema::RegistryScope;

/// Overrides the user registry root (default `~/.upack`).
pub const USER_REGISTRY_ENV: &str = "UPACK_USER_REGISTRY";

/// Overrides the machine registry root.
pub const MACHINE_REGISTRY_ENV: &str = "UPACK_MACHINE_REGISTRY";

/// Environment variable that overrides the root for `scope`.
pub fn registry_env(scope: RegistryScope) -> &'static str {
    match scope {
        RegistryScope::User => USER_REGISTRY_ENV,
        RegistryScope::Machine => MACHINE_REGISTRY_ENV,
    }
}

/// Returns the registry root for `scope`, or None if it cannot be determined.
pub fn try_registry_root(scope: RegistryScope) -> Option<PathBuf> {
    if let Some(val) = std::env::var_os(registry_env(scope)).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(val));
    }
    match scope {
        RegistryScope::User => home_dir().map(|h| h.join(".upack")),
        RegistryScope::Machine => machine_default(),
    }
}

#[cfg(windows)]
fn machine_default() -> Option<PathBuf> {
    std::env::var_os("ProgramData").map(|p| PathBuf::from(p).join("upack"))
}

#[cfg(not(windows))]
fn machine_default() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/upack"))
}

/// Metadata index file name within a registry root.
pub const INDEX_FILE: &str = "installedPackages.json";

/// Registry-wide lock guarding index updates.
pub const INDEX_LOCK_FILE: &str = ".lock";

/// Admitted artifacts: `<root>/packageCache`
pub const CACHE_DIR: &str = "packageCache";

/// Per-key admission locks: `<root>/locks`
pub const LOCKS_DIR: &str = "locks";

/// In-flight downloads: `<root>/tmp` (same volume as the cache)
pub const TMP_DIR: &str = "tmp";
