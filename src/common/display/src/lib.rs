//! Display and formatting utilities for sluice.
//!
//! Provides tree rendering for operator graphs and human-readable byte sizes
//! for resource reports.

mod tree;

pub use tree::{DisplayTree, TreeNode};

const BYTE_UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count using binary units, e.g. `1.5 MiB`.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: f64) -> String {
    if bytes.is_infinite() {
        return "inf".to_string();
    }
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0}{}", BYTE_UNITS[unit])
    } else {
        format!("{value:.1}{}", BYTE_UNITS[unit])
    }
}
