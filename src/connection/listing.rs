//! Parsers turning raw directory listings into leaf [`Node`]s.
//!
//! - Long listings (`ls -l` style), as served by FTP `LIST` and by `ls` over SSH
//! - Auto-indexed HTML pages, as served by Apache/nginx directory indexes

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::{DIRECTORY_PLACEHOLDER_SIZE, Node, NodeKind, is_valid_name};

/// Parser for `ls -l` style lines, with classic or full-iso dates.
#[derive(Debug, Clone)]
pub struct LongListingParser {
    classic: Regex,
    full_iso: Regex,
}

impl LongListingParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            classic: Regex::new(
                r"^([-dlbcps])\S{9,10}\s+\d+\s+(?:\S+\s+){1,2}(\d+)\s+([A-Za-z]{3})\s+(\d{1,2})\s+(\d{1,2}:\d{2}|\d{4})\s+(.+)$",
            )?,
            full_iso: Regex::new(
                r"^([-dlbcps])\S{9,10}\s+\d+\s+(?:\S+\s+){1,2}(\d+)\s+(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}(?:\.\d+)?\s+[+-]\d{4})\s+(.+)$",
            )?,
        })
    }

    /// Parse a whole listing; lines that are not entries are skipped.
    pub fn parse(&self, listing: &str, now: DateTime<Utc>) -> Vec<Node> {
        listing
            .lines()
            .filter(|line| !line.trim().is_empty() && !line.starts_with("total "))
            .filter_map(|line| {
                let node = self.parse_line(line, now);
                if node.is_none() {
                    log::debug!("Skipping unrecognized listing line: {line}");
                }
                node
            })
            .filter(|node| node.name != "." && node.name != "..")
            .collect()
    }

    pub fn parse_line(&self, line: &str, now: DateTime<Utc>) -> Option<Node> {
        let line = line.trim_end();

        if let Some(caps) = self.full_iso.captures(line) {
            let stamp = caps[3].split_whitespace().collect::<Vec<_>>().join(" ");
            let modified = DateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.f %z")
                .ok()?
                .with_timezone(&Utc);
            return Some(make_node(&caps[1], &caps[4], caps[2].parse().ok()?, modified));
        }

        let caps = self.classic.captures(line)?;
        let modified = classic_date(&caps[3], &caps[4], &caps[5], now)?;
        Some(make_node(&caps[1], &caps[6], caps[2].parse().ok()?, modified))
    }
}

fn make_node(type_flag: &str, raw_name: &str, size: u64, modified: DateTime<Utc>) -> Node {
    let kind = if type_flag == "d" {
        NodeKind::Directory
    } else {
        NodeKind::File
    };
    // Symlinks are listed as `name -> target`
    let name = match (type_flag, raw_name.split_once(" -> ")) {
        ("l", Some((name, _))) => name,
        _ => raw_name,
    };

    Node {
        name: name.to_string(),
        kind,
        size: Some(size),
        modified_at: Some(modified),
        children: Vec::new(),
    }
}

/// `Oct 3 10:09` (this year, or last year if that lands in the future) or `Oct 3 2005`.
fn classic_date(month: &str, day: &str, time_or_year: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match time_or_year.split_once(':') {
        Some((hour, minute)) => {
            let at = |year: i32| {
                NaiveDate::parse_from_str(&format!("{day} {month} {year}"), "%d %b %Y")
                    .ok()?
                    .and_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)
                    .map(|dt| dt.and_utc())
            };
            let candidate = at(now.year())?;
            if candidate > now + Duration::days(1) {
                at(now.year() - 1)
            } else {
                Some(candidate)
            }
        }
        None => NaiveDate::parse_from_str(&format!("{day} {month} {time_or_year}"), "%d %b %Y")
            .ok()?
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc()),
    }
}

/// Parser for auto-indexed HTML directory pages.
#[derive(Debug)]
pub struct AutoindexParser {
    anchor: Selector,
    size_token: Regex,
    date: Regex,
}

impl AutoindexParser {
    pub fn new() -> Result<Self> {
        let Ok(anchor) = Selector::parse("a[href]") else {
            return Err(AppError::config("invalid anchor selector"));
        };
        Ok(Self {
            anchor,
            size_token: Regex::new(r"(?:^|\s)(\d+(?:\.\d+)?)([kKMG]?)\s*$")?,
            date: Regex::new(r"(\d{2}-[A-Za-z]{3}-\d{4} \d{2}:\d{2})|(\d{4}-\d{2}-\d{2} \d{2}:\d{2})")?,
        })
    }

    /// Parse an index page line by line.
    ///
    /// A row ending in `/` is a directory; any other row is a file only if it
    /// ends with a size token. Rows with an unreadable date get `now`.
    pub fn parse(&self, body: &str, now: DateTime<Utc>) -> Vec<Node> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for line in body.lines() {
            if !line.to_ascii_lowercase().contains("href") {
                continue;
            }
            if let Some(node) = self.parse_line(line, now) {
                if seen.insert(node.name.clone()) {
                    nodes.push(node);
                }
            }
        }
        nodes
    }

    fn parse_line(&self, line: &str, now: DateTime<Utc>) -> Option<Node> {
        let fragment = Html::parse_fragment(line);
        let text: String = fragment.root_element().text().collect();
        if text.to_ascii_lowercase().contains("parent directory") {
            return None;
        }

        let anchor = fragment
            .select(&self.anchor)
            .find(|a| a.value().attr("href").is_some_and(is_entry_href))?;
        let href = anchor.value().attr("href")?;
        let anchor_text: String = anchor.text().collect();

        let rest = match text.find(anchor_text.as_str()) {
            Some(pos) if !anchor_text.is_empty() => &text[pos + anchor_text.len()..],
            _ => text.as_str(),
        };

        let is_dir = href.ends_with('/');
        let name = decode_href(href.trim_end_matches('/'));
        if !is_valid_name(&name) {
            log::debug!("Skipping index entry with unusable name '{}'", name.escape_debug());
            return None;
        }

        let modified = self.parse_date(rest, now);
        if is_dir {
            return Some(Node {
                name,
                kind: NodeKind::Directory,
                size: Some(DIRECTORY_PLACEHOLDER_SIZE),
                modified_at: Some(modified),
                children: Vec::new(),
            });
        }

        let caps = self.size_token.captures(rest.trim_end())?;
        let value: f64 = caps[1].parse().ok()?;
        let multiplier: f64 = match &caps[2] {
            "k" | "K" => 1024.0,
            "M" => 1024.0 * 1024.0,
            "G" => 1024.0 * 1024.0 * 1024.0,
            _ => 1.0,
        };

        Some(Node::file(
            name,
            Some((value * multiplier).round() as u64),
            Some(modified),
        ))
    }

    fn parse_date(&self, rest: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let parsed = self.date.captures(rest).and_then(|caps| {
            if let Some(m) = caps.get(1) {
                NaiveDateTime::parse_from_str(m.as_str(), "%d-%b-%Y %H:%M").ok()
            } else {
                caps.get(2)
                    .and_then(|m| NaiveDateTime::parse_from_str(m.as_str(), "%Y-%m-%d %H:%M").ok())
            }
        });
        match parsed {
            Some(dt) => dt.and_utc(),
            None => {
                log::warn!("Unparseable date in index row '{}', using now", rest.trim());
                now
            }
        }
    }
}

/// Relative links to entries; sort links, anchors, parents and absolute URLs are not entries.
fn is_entry_href(href: &str) -> bool {
    !(href.is_empty()
        || href.starts_with('?')
        || href.starts_with('#')
        || href.starts_with('/')
        || href.starts_with("../")
        || href == ".."
        || href.contains("://"))
}

/// Percent-decode an href into a file name.
fn decode_href(href: &str) -> String {
    percent_decode_str(href).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parses_classic_ftp_lines() {
        let parser = LongListingParser::new().unwrap();
        let listing = "total 12\r\n\
            drwxr-xr-x    2 ftp      ftp          4096 Oct 03  2005 i586\r\n\
            -rw-r--r--    1 ftp      ftp         12345 Jun 01 10:09 foo.rpm\r\n\
            lrwxrwxrwx    1 ftp      ftp             7 Jan 02  2020 current -> 2024.0\r\n\
            -rw-r--r--    1 ftp      ftp             1 Dec 24 08:00 future\r\n";

        let nodes = parser.parse(listing, now());
        assert_eq!(nodes.len(), 4);

        assert_eq!(nodes[0].name, "i586");
        assert_eq!(nodes[0].kind, NodeKind::Directory);
        assert_eq!(
            nodes[0].modified_at,
            Some(Utc.with_ymd_and_hms(2005, 10, 3, 0, 0, 0).unwrap())
        );

        assert_eq!(nodes[1].name, "foo.rpm");
        assert_eq!(nodes[1].size, Some(12345));
        assert_eq!(
            nodes[1].modified_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 9, 0).unwrap())
        );

        assert_eq!(nodes[2].name, "current");
        assert_eq!(nodes[2].kind, NodeKind::File);

        // A year-less date in the future belongs to last year
        assert_eq!(
            nodes[3].modified_at,
            Some(Utc.with_ymd_and_hms(2023, 12, 24, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parses_full_iso_lines() {
        let parser = LongListingParser::new().unwrap();
        let listing = "total 8\n\
            drwxr-xr-x 2 root root 4096 2005-10-03 10:09:12.000000000 +0200 my dir\n\
            -rw-r--r-- 1 root root   42 2024-01-31 23:59:59.123456789 +0000 a.txt\n\
            drwxr-xr-x 2 root root 4096 2005-10-03 10:09:12.000000000 +0200 .\n";

        let nodes = parser.parse(listing, now());
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "my dir");
        assert!(nodes[0].is_dir());
        assert_eq!(
            nodes[0].modified_at,
            Some(Utc.with_ymd_and_hms(2005, 10, 3, 8, 9, 12).unwrap())
        );
        assert_eq!(nodes[1].size, Some(42));
    }

    #[test]
    fn test_ignores_garbage_lines() {
        let parser = LongListingParser::new().unwrap();
        assert!(parser.parse_line("ls: cannot access", now()).is_none());
    }

    const APACHE_PRE: &str = r#"<html><body><h1>Index of /pub</h1><pre><img src="/icons/blank.gif" alt="Icon "> <a href="?C=N;O=D">Name</a>                    <a href="?C=M;O=A">Last modified</a>      <a href="?C=S;O=A">Size</a>
<hr><img src="/icons/back.gif" alt="[PARENTDIR]"> <a href="/">Parent Directory</a>                             -
<img src="/icons/folder.gif" alt="[DIR]"> <a href="i586/">i586/</a>                   03-Oct-2005 10:09    -
<img src="/icons/unknown.gif" alt="[   ]"> <a href="foo.rpm">foo.rpm</a>                 03-Oct-2005 10:09   12k
<img src="/icons/unknown.gif" alt="[   ]"> <a href="big.iso">big.iso</a>                 2005-10-04 11:00  3.5M
<img src="/icons/unknown.gif" alt="[   ]"> <a href="raw.bin">raw.bin</a>                 bad-date           512
<img src="/icons/unknown.gif" alt="[   ]"> <a href="notes%20v2.txt">notes v2.txt</a>    03-Oct-2005 10:09
<hr></pre></body></html>"#;

    #[test]
    fn test_parses_apache_index() {
        let parser = AutoindexParser::new().unwrap();
        let nodes = parser.parse(APACHE_PRE, now());
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();

        assert_eq!(names, vec!["i586", "foo.rpm", "big.iso", "raw.bin"]);

        assert!(nodes[0].is_dir());
        assert_eq!(nodes[0].size, Some(DIRECTORY_PLACEHOLDER_SIZE));

        assert_eq!(nodes[1].size, Some(12 * 1024));
        assert_eq!(
            nodes[1].modified_at,
            Some(Utc.with_ymd_and_hms(2005, 10, 3, 10, 9, 0).unwrap())
        );

        assert_eq!(nodes[2].size, Some((3.5 * 1024.0 * 1024.0) as u64));
        assert_eq!(
            nodes[2].modified_at,
            Some(Utc.with_ymd_and_hms(2005, 10, 4, 11, 0, 0).unwrap())
        );

        // Unreadable date falls back to now
        assert_eq!(nodes[3].size, Some(512));
        assert_eq!(nodes[3].modified_at, Some(now()));
    }

    #[test]
    fn test_parses_table_index_rows() {
        let parser = AutoindexParser::new().unwrap();
        let body = r#"<table>
<tr><td valign="top"><img src="/icons/back.gif" alt="[PARENTDIR]"></td><td><a href="/pub/">Parent Directory</a></td><td>&nbsp;</td><td align="right">  - </td></tr>
<tr><td valign="top"><img src="/icons/folder.gif" alt="[DIR]"></td><td><a href="SRPMS/">SRPMS/</a></td><td align="right">2024-05-01 09:30  </td><td align="right">  - </td></tr>
<tr><td valign="top"><img src="/icons/unknown.gif" alt="[   ]"></td><td><a href="hdlist.cz">hdlist.cz</a></td><td align="right">2024-05-01 09:31  </td><td align="right">1.2K</td></tr>
</table>"#;

        let nodes = parser.parse(body, now());
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "SRPMS");
        assert!(nodes[0].is_dir());
        assert_eq!(nodes[1].name, "hdlist.cz");
        assert_eq!(nodes[1].size, Some(1229));
    }

    #[test]
    fn test_decodes_percent_escapes() {
        assert_eq!(decode_href("notes%20v2.txt"), "notes v2.txt");
        assert_eq!(decode_href("100%"), "100%");
        assert_eq!(decode_href("a%2"), "a%2");
    }

    #[test]
    fn test_skips_names_that_decode_to_several_segments() {
        let parser = AutoindexParser::new().unwrap();
        let body = r#"<pre>
<a href="a%2Fb.txt">a/b.txt</a>        03-Oct-2005 10:09   12K
<a href="nul%00.txt">nul.txt</a>       03-Oct-2005 10:09   12K
<a href="%2E%2E/">../</a>              03-Oct-2005 10:09    -
<a href="plain.txt">plain.txt</a>      03-Oct-2005 10:09   12K
</pre>"#;

        let names: Vec<String> = parser.parse(body, now()).into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["plain.txt"]);
    }
}
