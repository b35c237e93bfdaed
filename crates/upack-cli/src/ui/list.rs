//! Column-aligned rendering for `upack list`

use upack_schema::CacheEntry;

use super::format_size;

const NAME_WIDTH: usize = 32;
const VERSION_WIDTH: usize = 16;

/// Column headers for `upack list`
pub fn list_header() -> String {
    format!(
        "  {:<NAME_WIDTH$} {:<VERSION_WIDTH$} {:>9}   {:<10}   {}",
        "package", "version", "size", "installed", "by"
    )
}

/// A single registry entry
pub fn list_row(entry: &CacheEntry) -> String {
    let package = match &entry.group {
        Some(group) => format!("{group}:{}", entry.name),
        None => entry.name.clone(),
    };
    let mut line = format!(
        "  {:<NAME_WIDTH$} {:<VERSION_WIDTH$} {:>9}   {:<10}   {}",
        package,
        entry.version.to_string(),
        format_size(entry.size),
        entry.installed_at.format("%Y-%m-%d"),
        entry.installed_by
    );
    if let Some(comment) = &entry.comment {
        line.push_str(&format!("  # {comment}"));
    }
    line
}

/// Footer for `upack list`
pub fn list_footer(entries: &[CacheEntry]) -> String {
    let total: u64 = entries.iter().map(|e| e.size).sum();
    format!("  {} packages, {}", entries.len(), format_size(total))
}
