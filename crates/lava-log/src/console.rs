//! ANSI palette and console line formatting.

use chrono::{DateTime, Utc};

pub const FG_BOLD_RED: &str = "\x1b[0;1;38;5;197m";
pub const FG_CYAN: &str = "\x1b[0;36m";
pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";

/// Erase-in-line sequence GitLab expects around section markers.
pub const SECTION_ESCAPE: &str = "\x1b[0K";

/// Prefixes `msg` with a `HH:MM:SS.mmm` timestamp.
///
/// Section markers are returned untouched: GitLab only recognises them at
/// the very start of a line.
pub fn format_log_line(msg: &str, now: DateTime<Utc>) -> String {
    if msg.starts_with("\x1b[0Ksection_") {
        return msg.to_string();
    }
    // Reset first, a previous line may have left the terminal tinted.
    format!("{RESET}{}: {msg}", now.format("%H:%M:%S%.3f"))
}

pub fn bold(msg: &str) -> String {
    format!("{BOLD}{msg}{RESET}")
}

pub fn fatal_line(msg: &str) -> String {
    format!("{FG_BOLD_RED}{msg}{RESET}")
}
