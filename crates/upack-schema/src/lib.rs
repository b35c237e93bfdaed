//! Shared types for upack: package coordinates, registry records and the
//! universal package manifest.

pub mod hash;
pub mod manifest;
pub mod registry;
pub mod types;

// Re-exports
pub use hash::*;
pub use manifest::{CONTENT_PREFIX, MANIFEST_FILE, PackageManifest};
pub use registry::{CacheEntry, CacheKey, RegistryScope};
pub use types::*;
