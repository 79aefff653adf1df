// src/utils/log.rs

//! Console report helpers with server-style formatting.
//!
//! Diagnostics go through the `log` facade; these helpers print the
//! operator-facing reports (status tables, run summaries) to stdout.

use chrono::Local;

/// Prefix a line with a local timestamp.
fn format_line(message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("[{}] {}", timestamp, message)
}

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    println!("{}", format_line(&border));
    println!("{}", format_line(&format!("  {}", title)));
    println!("{}", format_line(&border));
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    println!("{}", format_line(&format!("    {}", message)));
}

/// Print a multi-line block (such as a statistics table) verbatim.
pub fn block(text: &str) {
    for line in text.lines() {
        println!("{}", format_line(line));
    }
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("{}", format_line(&format!("[SUMMARY] {}", title)));
    for (key, value) in items {
        println!("{}", format_line(&format!("    {}: {}", key, value)));
    }
}
