//! Clean command (orphaned downloads and idle lock files)

use std::time::Duration;

use anyhow::Result;
use tracing::info;
use upack_core::Registry;

/// Temp files younger than this may belong to a running install.
const MIN_AGE: Duration = Duration::from_secs(60 * 60);

/// Remove temp downloads left behind by interrupted installs, then idle key locks
pub fn clean(userregistry: bool) -> Result<()> {
    let registry = Registry::open(crate::scope(userregistry))?;
    info!(root = %registry.root().display(), "cleaning registry temp files");

    let summary = registry.purge_temp(MIN_AGE)?;
    if summary.kept > 0 {
        println!(
            "Removed {} orphaned downloads ({} recent ones kept, possibly in use).",
            summary.removed, summary.kept
        );
    } else {
        println!("Removed {} orphaned downloads.", summary.removed);
    }

    let locks = registry.purge_locks()?;
    if locks.removed > 0 || locks.kept > 0 {
        println!("Removed {} idle lock files ({} in use).", locks.removed, locks.kept);
    }
    Ok(())
}
