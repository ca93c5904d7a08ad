//! Formatted output helpers for CLI commands.

use std::io::IsTerminal;

use hubroot_common::constants::APP_NAME;

const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Prints a one-line failure diagnostic on stderr.
#[allow(clippy::print_stderr)]
pub fn report_failure(message: &str) {
    if std::io::stderr().is_terminal() {
        eprintln!("{BOLD}{RED}{APP_NAME}:{RESET} {message}");
    } else {
        eprintln!("{APP_NAME}: {message}");
    }
}

/// Formats a byte count for logs, e.g. "3.2 MiB".
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KiB", "MiB", "GiB"];

    let mut value = bytes as f64;
    let mut unit = None;
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = Some(next);
    }
    unit.map_or_else(|| format!("{bytes} B"), |u| format!("{value:.1} {u}"))
}
