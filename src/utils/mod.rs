//! Utility functions and helpers.

pub mod log;

/// Join a remote directory and an entry name with exactly one `/`.
pub fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Boxed statistics table: a title row, then one right-aligned count per row.
pub fn format_report_table(title: &str, rows: &[(usize, &str)]) -> String {
    let header = format!("| {title}");
    let lines: Vec<String> = rows
        .iter()
        .map(|(count, label)| format!("|{count:7} {label}"))
        .collect();

    let width = lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(header.chars().count()))
        .max()
        .unwrap_or_default()
        + 2;
    let rule = "-".repeat(width);

    let mut out = format!("{rule}\n{header}");
    out.push_str(&" ".repeat(width - header.chars().count() - 1));
    out.push_str("|\n");
    out.push_str(&rule);
    out.push('\n');
    for line in &lines {
        out.push_str(line);
        out.push_str(&" ".repeat(width - line.chars().count() - 1));
        out.push_str("|\n");
    }
    out.push_str(&rule);
    out.push('\n');
    out
}
