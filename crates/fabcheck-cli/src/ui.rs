//! Terminal output primitives for check lines, sections and errors.
//!
//! Uses `colored` for terminal output. Logs go to stderr through `tracing`;
//! everything here is the human-facing report on stdout.

use colored::Colorize;

/// Check line: passed (green checkmark).
pub fn check_ok(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Check line: observation (cyan bullet).
pub fn check_info(msg: &str) {
    println!("  {} {}", "\u{2022}".bright_cyan(), msg);
}

/// Check line: failed (red cross).
pub fn check_fail(msg: &str) {
    println!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Brand banner with a subtitle.
pub fn banner(subtitle: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), "fabcheck".bold());
    println!("     {}", subtitle.dimmed());
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value);
}

/// Key-value with green value.
pub fn kv_ok(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value.bright_green());
}

/// Key-value with red value.
pub fn kv_fail(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value.bright_red());
}

/// Print a success message.
pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Print an error message.
pub fn error(msg: &str) {
    println!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Red error + yellow "fix:" suggestion.
pub fn error_with_fix(msg: &str, fix: &str) {
    println!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
    println!("    {} {}", "fix:".bright_yellow(), fix);
}

/// Empty line.
pub fn blank() {
    println!();
}
