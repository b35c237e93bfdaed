use anyhow::{Context, Result};
use upack_core::Registry;

use crate::ui::list::{list_footer, list_header, list_row};

/// List packages recorded in a registry
pub fn list(userregistry: bool) -> Result<()> {
    let scope = crate::scope(userregistry);
    let registry = Registry::open(scope)?;
    let entries = registry
        .entries()
        .with_context(|| format!("Failed to read the {scope} registry"))?;

    if entries.is_empty() {
        println!();
        println!("  No packages in the {scope} registry ({}).", registry.root().display());
        return Ok(());
    }

    println!("{}", list_header());
    for entry in &entries {
        println!("{}", list_row(entry));
    }
    println!();
    println!("{}", list_footer(&entries));
    Ok(())
}
