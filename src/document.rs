//! Read-only page lookups consumed by the pipeline.
//!
//! The core never talks to a PDF library directly. It asks a
//! [`DocumentSource`] for a page's visible region and its glyphs, keyed by
//! page index. [`InMemoryDocument`] is the one implementation the pipeline
//! runs against: the pdfium adapter ([`crate::pipeline::pdf`]) fills one
//! from a real file, and tests lay out synthetic pages with
//! [`PageText::layout`].

use crate::error::AnnotateError;
use crate::model::PageGeometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Page lookups needed by the coordinate mapper and the text locator.
pub trait DocumentSource: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;

    /// Visible region of `page` (0-based).
    fn page_geometry(&self, page: usize) -> Result<PageGeometry, AnnotateError>;

    /// Glyphs of `page` (0-based) in reading order.
    fn page_text(&self, page: usize) -> Result<PageText, AnnotateError>;
}

/// One glyph with its box in visible-region point space (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageChar {
    pub ch: char,
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    /// Physical text line, counted from 0 in reading order.
    pub line: usize,
}

/// All glyphs of one page in reading order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page: usize,
    pub chars: Vec<PageChar>,
}

impl PageText {
    /// Build a page from glyph boxes in reading order, assigning line
    /// numbers: a glyph starts a new line when its vertical centre falls
    /// outside the previous glyph's box, or when the source emitted an
    /// explicit line break.
    ///
    /// Line-break and other control characters are dropped; they only
    /// separate lines.
    pub fn from_glyphs(page: usize, glyphs: impl IntoIterator<Item = (char, f32, f32, f32, f32)>) -> Self {
        let mut chars: Vec<PageChar> = Vec::new();
        let mut line = 0usize;
        let mut pending_break = false;
        for (ch, left, top, right, bottom) in glyphs {
            if ch == '\n' || ch == '\r' {
                pending_break = true;
                continue;
            }
            if ch.is_control() {
                continue;
            }
            if let Some(prev) = chars.last() {
                let center = (top + bottom) / 2.0;
                let off_line = !ch.is_whitespace()
                    && !prev.ch.is_whitespace()
                    && (center < prev.top || center > prev.bottom);
                if pending_break || off_line {
                    line += 1;
                }
            }
            pending_break = false;
            chars.push(PageChar {
                ch,
                left,
                top,
                right,
                bottom,
                line,
            });
        }
        Self { page, chars }
    }

    /// Lay out `text` in a fixed-pitch grid: one glyph per `char_width`
    /// points, one line per `\n`, starting at `(left, top)`.
    pub fn layout(page: usize, text: &str, left: f32, top: f32, char_width: f32, line_height: f32) -> Self {
        let glyph_height = line_height * 0.75;
        let mut chars = Vec::new();
        for (line, row) in text.split('\n').enumerate() {
            let y = top + line as f32 * line_height;
            for (col, ch) in row.chars().enumerate() {
                let x = left + col as f32 * char_width;
                chars.push(PageChar {
                    ch,
                    left: x,
                    top: y,
                    right: x + char_width,
                    bottom: y + glyph_height,
                    line,
                });
            }
        }
        Self { page, chars }
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Raw text with `\n` between lines.
    pub fn raw_text(&self) -> String {
        let mut out = String::with_capacity(self.chars.len());
        for (i, c) in self.chars.iter().enumerate() {
            if i > 0 && self.chars[i - 1].line != c.line {
                out.push('\n');
            }
            out.push(c.ch);
        }
        out
    }
}

/// A fully loaded document held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocument {
    page_count: usize,
    pages: BTreeMap<usize, (PageGeometry, PageText)>,
}

impl InMemoryDocument {
    /// An empty document with `page_count` pages, none loaded yet.
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            pages: BTreeMap::new(),
        }
    }

    /// Add (or replace) a loaded page.
    pub fn insert_page(&mut self, geometry: PageGeometry, text: PageText) {
        self.page_count = self.page_count.max(geometry.page + 1);
        self.pages.insert(geometry.page, (geometry, text));
    }

    /// Builder-style [`Self::insert_page`].
    pub fn with_page(mut self, geometry: PageGeometry, text: PageText) -> Self {
        self.insert_page(geometry, text);
        self
    }

    /// Indices of the pages that are loaded.
    pub fn loaded_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.pages.keys().copied()
    }

    fn get(&self, page: usize) -> Result<&(PageGeometry, PageText), AnnotateError> {
        self.pages.get(&page).ok_or_else(|| AnnotateError::PageReadFailed {
            page: page + 1,
            detail: if page < self.page_count {
                "page was not loaded".to_string()
            } else {
                format!("document has {} pages", self.page_count)
            },
        })
    }
}

impl DocumentSource for InMemoryDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_geometry(&self, page: usize) -> Result<PageGeometry, AnnotateError> {
        self.get(page).map(|(g, _)| *g)
    }

    fn page_text(&self, page: usize) -> Result<PageText, AnnotateError> {
        self.get(page).map(|(_, t)| t.clone())
    }
}
