//! `My Clippings.txt` parsing.
//!
//! The device appends every highlight, note and bookmark to one plain-text
//! file shared by all books:
//!
//! ```text
//! The Pragmatic Programmer (Hunt, Andrew)
//! - Your Highlight on page 12 | Location 180-183 | Added on Monday, March 4, 2024 9:15:02 PM
//!
//! Care about your craft.
//! ==========
//! ```
//!
//! A stanza whose metadata cannot be read is skipped with a warning. A
//! missing `==========` line fails the whole file with
//! [`FormatError::MissingSeparator`]: either the last stanza never reaches
//! one (the file is cut off), or a second metadata line shows up inside a
//! stanza (two stanzas ran together).

use crate::error::FormatError;
use crate::model::{AnnotationKind, RawAnnotationRecord, SourceFormat};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Line that terminates every stanza.
pub const SEPARATOR: &str = "==========";

static RE_TITLE_AUTHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s*\(([^)]+)\)$").unwrap());

static RE_KIND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^-\s*your\s+(highlight|note|bookmark)\b").unwrap());

static RE_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bpage\s+(\d+)(?:\s*-\s*(\d+))?").unwrap());

static RE_LOCATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blocation\s+(\d+)(?:\s*-\s*(\d+))?").unwrap());

static RE_ADDED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)added on\s+(.+)$").unwrap());

/// Layouts the device has used for the `Added on` field.
const DATE_FORMATS: &[&str] = &[
    "%A, %B %d, %Y %I:%M:%S %p",
    "%A, %B %d, %Y at %I:%M:%S %p",
    "%A, %d %B %Y %H:%M:%S",
    "%B %d, %Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%Y-%m-%d %H:%M:%S",
];

/// One parsed stanza.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClippingEntry {
    pub title: String,
    pub author: Option<String>,
    pub kind: AnnotationKind,
    /// 1-based page number as printed (first page of a range).
    pub page: usize,
    /// Location range, when printed.
    pub location: Option<(u32, u32)>,
    pub added: Option<NaiveDateTime>,
    /// Highlighted passage or note body; empty for bookmarks.
    pub text: String,
    /// 1-based line number of the stanza's title line.
    pub line: usize,
}

impl ClippingEntry {
    /// Convert to the shared record shape (0-based page, no position).
    pub fn to_record(&self) -> RawAnnotationRecord {
        let mut record = RawAnnotationRecord::new(
            self.kind,
            self.page.saturating_sub(1),
            SourceFormat::Clippings,
        );
        let body = Some(self.text.clone()).filter(|t| !t.is_empty());
        match self.kind {
            AnnotationKind::Highlight => record.text = body,
            AnnotationKind::Note => record.note = body,
            AnnotationKind::Bookmark => {}
        }
        record.timestamp = self.added.map(|d| d.and_utc());
        record
    }
}

/// Parse the full contents of a clippings file.
pub fn parse_clippings(content: &str) -> Result<Vec<ClippingEntry>, FormatError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut entries = Vec::new();
    let mut stanza: Vec<&str> = Vec::new();
    let mut stanza_line = 1;

    for (idx, line) in content.lines().enumerate() {
        if line.trim() == SEPARATOR {
            if let Some(entry) = parse_stanza(&stanza, stanza_line) {
                entries.push(entry);
            }
            stanza.clear();
            stanza_line = idx + 2;
        } else {
            if RE_KIND.is_match(line.trim()) && stanza.iter().any(|l| RE_KIND.is_match(l.trim())) {
                let first = stanza.iter().position(|l| !l.trim().is_empty()).unwrap_or(0);
                return Err(FormatError::MissingSeparator {
                    line: stanza_line + first,
                });
            }
            stanza.push(line);
        }
    }

    if stanza.iter().any(|l| !l.trim().is_empty()) {
        let first = stanza.iter().position(|l| !l.trim().is_empty()).unwrap_or(0);
        return Err(FormatError::MissingSeparator {
            line: stanza_line + first,
        });
    }

    debug!("Parsed {} clippings", entries.len());
    Ok(entries)
}

/// Keep the entries whose title mentions `name` (case-insensitive).
///
/// Sideloaded PDFs show up under their file stem, sometimes with the
/// device's own suffixes, so a substring match is used.
pub fn filter_by_title<'a>(entries: &'a [ClippingEntry], name: &str) -> Vec<&'a ClippingEntry> {
    let needle = name.to_lowercase();
    entries
        .iter()
        .filter(|e| e.title.to_lowercase().contains(&needle))
        .collect()
}

/// Parse one stanza; `None` (with a warning) when it is malformed.
fn parse_stanza(lines: &[&str], first_line: usize) -> Option<ClippingEntry> {
    let start = lines.iter().position(|l| !l.trim().is_empty())?;
    let lines = &lines[start..];
    let line = first_line + start;

    let title_line = lines[0].trim().trim_start_matches('\u{feff}');
    let Some(meta) = lines.get(1).map(|l| l.trim()) else {
        warn!("Clipping at line {line} has no metadata line; skipped");
        return None;
    };

    let Some(kind) = RE_KIND.captures(meta).and_then(|c| match c[1].to_lowercase().as_str() {
        "highlight" => Some(AnnotationKind::Highlight),
        "note" => Some(AnnotationKind::Note),
        "bookmark" => Some(AnnotationKind::Bookmark),
        _ => None,
    }) else {
        warn!("Clipping at line {line}: unreadable metadata {meta:?}; skipped");
        return None;
    };

    let Some(page) = RE_PAGE
        .captures(meta)
        .and_then(|c| c[1].parse::<usize>().ok())
        .filter(|p| *p >= 1)
    else {
        warn!("Clipping at line {line} has no page number; skipped");
        return None;
    };

    let location = RE_LOCATION.captures(meta).and_then(|c| {
        let from = c[1].parse::<u32>().ok()?;
        let to = c
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(from);
        Some((from, to))
    });

    let added = RE_ADDED.captures(meta).and_then(|c| parse_date(c[1].trim()));

    let (title, author) = match RE_TITLE_AUTHOR.captures(title_line) {
        Some(c) => (c[1].trim().to_string(), Some(c[2].trim().to_string())),
        None => (title_line.to_string(), None),
    };

    let text = lines[2..]
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    Some(ClippingEntry {
        title,
        author,
        kind,
        page,
        location,
        added,
        text,
        line,
    })
}

/// Parse an `Added on` value with any of the known layouts.
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let parsed = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok());
    if parsed.is_none() {
        debug!("Unrecognised clipping date {s:?}");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const SAMPLE: &str = "\u{feff}Learning Rust (Doe, Jane)
- Your Highlight on page 5 | Location 70-71 | Added on Monday, January 1, 2024 10:00:00 AM

The quick brown fox jumps over the lazy dog.
==========
Learning Rust (Doe, Jane)
- Your Note on page 5 | Location 71 | Added on Monday, January 1, 2024 10:01:00 AM

check this
==========
Learning Rust (Doe, Jane)
- Your Bookmark on page 9-10 | Added on Tuesday, January 2, 2024 8:30:00 PM


==========
";

    #[test]
    fn parses_three_kinds() {
        let entries = parse_clippings(SAMPLE).unwrap();
        assert_eq!(entries.len(), 3);

        let h = &entries[0];
        assert_eq!(h.title, "Learning Rust");
        assert_eq!(h.author.as_deref(), Some("Doe, Jane"));
        assert_eq!(h.kind, AnnotationKind::Highlight);
        assert_eq!(h.page, 5);
        assert_eq!(h.location, Some((70, 71)));
        assert_eq!(h.text, "The quick brown fox jumps over the lazy dog.");
        let added = h.added.unwrap();
        assert_eq!((added.year(), added.month(), added.day()), (2024, 1, 1));
        assert_eq!(added.hour(), 10);

        assert_eq!(entries[1].kind, AnnotationKind::Note);
        assert_eq!(entries[1].location, Some((71, 71)));

        let b = &entries[2];
        assert_eq!(b.kind, AnnotationKind::Bookmark);
        assert_eq!(b.page, 9);
        assert!(b.text.is_empty());
        assert_eq!(b.added.unwrap().hour(), 20);
    }

    #[test]
    fn records_use_zero_based_pages() {
        let entries = parse_clippings(SAMPLE).unwrap();
        let h = entries[0].to_record();
        assert_eq!(h.page, 4);
        assert_eq!(h.source, SourceFormat::Clippings);
        assert!(h.start.is_none());
        assert!(h.text.is_some());
        let n = entries[1].to_record();
        assert_eq!(n.note.as_deref(), Some("check this"));
        assert!(n.text.is_none());
    }

    #[test]
    fn malformed_stanza_is_skipped() {
        let input = "Book (A)
- Something unexpected

text
==========
Book (A)
- Your Highlight on page 2 | Added on Monday, January 1, 2024 10:00:00 AM

kept
==========
";
        let entries = parse_clippings(input).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "kept");
    }

    #[test]
    fn location_only_stanza_is_skipped() {
        let input = "Book (A)
- Your Highlight on Location 100-101 | Added on Monday, January 1, 2024 10:00:00 AM

no page
==========
";
        assert!(parse_clippings(input).unwrap().is_empty());
    }

    #[test]
    fn missing_separator_is_fatal() {
        let input = "Book (A)
- Your Highlight on page 2 | Added on Monday, January 1, 2024 10:00:00 AM

first
==========
Book (A)
- Your Highlight on page 3 | Added on Monday, January 1, 2024 10:00:00 AM

cut off here";
        let err = parse_clippings(input).unwrap_err();
        assert_eq!(err, FormatError::MissingSeparator { line: 6 });
    }

    #[test]
    fn run_together_stanzas_are_fatal() {
        let input = "Book (A)
- Your Highlight on page 2 | Added on Monday, January 1, 2024 10:00:00 AM

first
Book (A)
- Your Note on page 3 | Added on Monday, January 1, 2024 10:01:00 AM

second
==========
";
        let err = parse_clippings(input).unwrap_err();
        assert_eq!(err, FormatError::MissingSeparator { line: 1 });
    }

    #[test]
    fn trailing_blank_lines_are_fine() {
        let input = "Book (A)
- Your Highlight on page 2

x
==========


";
        assert_eq!(parse_clippings(input).unwrap().len(), 1);
    }

    #[test]
    fn title_without_author() {
        let input = "notes-final
- your highlight on page 1

lower-case metadata
==========
";
        let entries = parse_clippings(input).unwrap();
        assert_eq!(entries[0].title, "notes-final");
        assert_eq!(entries[0].author, None);
    }

    #[test]
    fn date_layouts() {
        assert!(parse_date("Monday, March 4, 2024 9:15:02 PM").is_some());
        assert!(parse_date("Monday, March 4, 2024 at 9:15:02 PM").is_some());
        assert!(parse_date("03/04/2024 09:15:02 PM").is_some());
        assert!(parse_date("2024-03-04 21:15:02").is_some());
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn filter_by_title_is_case_insensitive() {
        let entries = parse_clippings(SAMPLE).unwrap();
        assert_eq!(filter_by_title(&entries, "learning rust").len(), 3);
        assert!(filter_by_title(&entries, "Other").is_empty());
    }
}
