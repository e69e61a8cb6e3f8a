//! Data model shared by every pipeline stage.
//!
//! The types form a chain, each stage wrapping the previous one's output:
//!
//! ```text
//! RawAnnotationRecord ─▶ MappedAnnotation ─▶ LocatedAnnotation ─▶ ResolvedAnnotation
//!   (device units)         (points, clamped)   (+ per-line quads)    (after unification)
//! ```
//!
//! Raw records are immutable once parsed. Everything downstream is derived
//! and recomputed on every run; nothing is ever written back to the device.
//!
//! Point-space coordinates use a top-left origin relative to the page's
//! visible region (y grows downwards), matching the device's own convention.
//! Converting to the PDF's bottom-left user space is the placement sink's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three annotation shapes the reader records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Note,
    Bookmark,
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationKind::Highlight => write!(f, "highlight"),
            AnnotationKind::Note => write!(f, "note"),
            AnnotationKind::Bookmark => write!(f, "bookmark"),
        }
    }
}

/// Which on-disk layout a record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceFormat {
    /// Annotations nested inside an `annotation.cache.object`.
    KrdsCache,
    /// Annotation objects stored directly at the top level of the store.
    KrdsFlat,
    /// The plain-text `My Clippings.txt` export.
    Clippings,
}

/// A rectangle in device units: hundredths of an inch, measured from the
/// top-left corner of the full original page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One annotation exactly as the reader recorded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAnnotationRecord {
    pub kind: AnnotationKind,
    /// 0-based page index.
    pub page: usize,
    /// First glyph box of the span, or the bookmark point. `None` for
    /// clippings entries, which carry no position at all.
    pub start: Option<DeviceRect>,
    /// Last glyph box of the span. `None` for bookmarks and clippings.
    pub end: Option<DeviceRect>,
    /// The highlighted passage, when known.
    pub text: Option<String>,
    /// The note body (notes only).
    pub note: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: SourceFormat,
}

impl RawAnnotationRecord {
    /// A record with only a kind, a page and a source; fields are filled in
    /// by the readers.
    pub fn new(kind: AnnotationKind, page: usize, source: SourceFormat) -> Self {
        Self {
            kind,
            page,
            start: None,
            end: None,
            text: None,
            note: None,
            timestamp: None,
            source,
        }
    }

    /// Recorded text, or `None` when absent or blank.
    pub fn recorded_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// The visible region of a page, in points.
///
/// `offset_*` is the position of the visible (crop) box relative to the full
/// original (media) box, measured from its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub page: usize,
    pub offset_x: f32,
    pub offset_y: f32,
    pub width: f32,
    pub height: f32,
}

impl PageGeometry {
    /// A page whose visible region is the whole page.
    pub fn full(page: usize, width: f32, height: f32) -> Self {
        Self {
            page,
            offset_x: 0.0,
            offset_y: 0.0,
            width,
            height,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        (0.0..=self.width).contains(&p.x) && (0.0..=self.height).contains(&p.y)
    }
}

/// A point in page space (top-left origin, points).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// True when both axes are within `tolerance` of `other`.
    pub fn near(&self, other: Point, tolerance: f32) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.y - other.y).abs() <= tolerance
    }

    pub fn distance(&self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// A four-corner polygon covering one line of matched text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub ul: Point,
    pub ur: Point,
    pub ll: Point,
    pub lr: Point,
}

impl Quad {
    /// Axis-aligned quad from its edges.
    pub fn from_edges(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            ul: Point::new(left, top),
            ur: Point::new(right, top),
            ll: Point::new(left, bottom),
            lr: Point::new(right, bottom),
        }
    }

    /// `(left, top, right, bottom)` of the quad's bounding box.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        let xs = [self.ul.x, self.ur.x, self.ll.x, self.lr.x];
        let ys = [self.ul.y, self.ur.y, self.ll.y, self.lr.y];
        (
            xs.iter().copied().fold(f32::INFINITY, f32::min),
            ys.iter().copied().fold(f32::INFINITY, f32::min),
            xs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            ys.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        )
    }

    pub fn top_left(&self) -> Point {
        let (l, t, _, _) = self.bounds();
        Point::new(l, t)
    }
}

/// A raw record with its device positions converted to points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedAnnotation {
    pub record: RawAnnotationRecord,
    /// Top-left of the first glyph (or the bookmark point).
    pub start: Option<Point>,
    /// Top-left of the last glyph. Equal to `start` for notes and bookmarks.
    pub end: Option<Point>,
    /// Extent of the first glyph box; at least 1pt for highlights.
    pub width: f32,
    pub height: f32,
}

impl MappedAnnotation {
    pub fn kind(&self) -> AnnotationKind {
        self.record.kind
    }

    pub fn page(&self) -> usize {
        self.record.page
    }
}

/// How the text locator found a passage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Prefix { len: usize },
    Fuzzy { score: f32 },
    /// Built from the recorded start/end points without any text.
    Position,
}

/// A mapped annotation plus the quads it covers, one per text line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedAnnotation {
    pub mapped: MappedAnnotation,
    /// Empty when the annotation could not be located (or is point-shaped).
    pub quads: Vec<Quad>,
    pub matched_by: Option<MatchKind>,
}

impl LocatedAnnotation {
    /// The point the annotation is anchored at: the first quad's corner when
    /// located, else the mapped start.
    pub fn anchor(&self) -> Option<Point> {
        self.quads
            .first()
            .map(Quad::top_left)
            .or(self.mapped.start)
    }
}

/// The final unit handed to a placement sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAnnotation {
    pub kind: AnnotationKind,
    pub page: usize,
    pub quads: Vec<Quad>,
    pub anchor: Point,
    /// Highlighted passage (highlights only).
    pub text: Option<String>,
    /// Note text: the note body for notes, merged note(s) for highlights.
    pub comment: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: SourceFormat,
    pub matched_by: Option<MatchKind>,
}

/// An annotation whose recorded text could not be found on its page.
///
/// Not an error: reported so callers can show what was missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlocatedAnnotation {
    pub kind: AnnotationKind,
    pub page: usize,
    pub text: String,
    /// A slice of the page's normalized text near the expected position.
    pub context: String,
}
