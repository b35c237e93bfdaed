//! Plain-text output for the `upack` commands.

pub mod list;

use upack_core::io::extract::ExtractSummary;

/// Human-readable byte size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// One-line description of an extraction.
pub fn summary_line(summary: &ExtractSummary) -> String {
    let mut line = format!(
        "  {} files, {} directories",
        summary.files, summary.directories
    );
    if summary.skipped > 0 {
        line.push_str(&format!(
            ", {} existing files kept (use --overwrite to replace)",
            summary.skipped
        ));
    }
    line
}
