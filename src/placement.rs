//! Placement sinks: where resolved annotations end up.
//!
//! The pipeline never writes a PDF itself. It hands every
//! [`ResolvedAnnotation`] to a [`PlacementSink`] through [`place_all`]:
//!
//! ```text
//! ResolvedAnnotation ─▶ place_all ─┬─▶ JsonPlacementSink   (serialisable list)
//!                                  └─▶ PdfiumPlacementSink (annotated PDF copy)
//! ```
//!
//! Coordinates handed to a sink are in points, top-left origin, relative to
//! the page's visible region. Converting to PDF user space is the sink's job.

use crate::config::HighlightColor;
use crate::error::AnnotateError;
use crate::model::{AnnotationKind, Point, Quad, ResolvedAnnotation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Receives annotations to place on a document.
pub trait PlacementSink {
    /// A highlight spanning `quads` (one per text line).
    fn place_highlight(
        &mut self,
        page: usize,
        quads: &[Quad],
        color: HighlightColor,
        comment: Option<&str>,
    ) -> Result<(), AnnotateError>;

    /// A standalone note at `at`.
    fn place_note(&mut self, page: usize, at: Point, text: &str) -> Result<(), AnnotateError>;

    /// A bookmark at `at`.
    fn place_bookmark(&mut self, page: usize, at: Point, label: &str) -> Result<(), AnnotateError>;
}

/// Counts returned by [`place_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementSummary {
    pub highlights: usize,
    pub notes: usize,
    pub bookmarks: usize,
    /// Highlights without quads, which cannot be drawn.
    pub skipped: usize,
}

/// Hand every resolved annotation to `sink`, in order.
///
/// Stops at the first sink error.
pub fn place_all(
    sink: &mut dyn PlacementSink,
    resolved: &[ResolvedAnnotation],
    color: HighlightColor,
) -> Result<PlacementSummary, AnnotateError> {
    let mut summary = PlacementSummary::default();
    for r in resolved {
        match r.kind {
            AnnotationKind::Highlight => {
                if r.quads.is_empty() {
                    warn!("Page {}: highlight has no quads, not placed", r.page + 1);
                    summary.skipped += 1;
                    continue;
                }
                sink.place_highlight(r.page, &r.quads, color, r.comment.as_deref())?;
                summary.highlights += 1;
            }
            AnnotationKind::Note => {
                sink.place_note(r.page, r.anchor, r.comment.as_deref().unwrap_or_default())?;
                summary.notes += 1;
            }
            AnnotationKind::Bookmark => {
                sink.place_bookmark(r.page, r.anchor, &bookmark_label(r))?;
                summary.bookmarks += 1;
            }
        }
    }
    debug!(
        "Placed {} highlight(s), {} note(s), {} bookmark(s)",
        summary.highlights, summary.notes, summary.bookmarks
    );
    Ok(summary)
}

fn bookmark_label(r: &ResolvedAnnotation) -> String {
    match r.timestamp {
        Some(ts) => format!("Bookmark (page {}, {})", r.page + 1, ts.format("%Y-%m-%d %H:%M")),
        None => format!("Bookmark (page {})", r.page + 1),
    }
}

// ── JSON sink ────────────────────────────────────────────────────────────

/// One placement call, as recorded by [`JsonPlacementSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Placement {
    Highlight {
        page: usize,
        quads: Vec<Quad>,
        color: HighlightColor,
        comment: Option<String>,
    },
    Note {
        page: usize,
        at: Point,
        text: String,
    },
    Bookmark {
        page: usize,
        at: Point,
        label: String,
    },
}

/// Records placements in memory; serialise with [`Self::to_json`].
#[derive(Debug, Clone, Default)]
pub struct JsonPlacementSink {
    pub placements: Vec<Placement>,
}

impl JsonPlacementSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty-printed JSON array of placements.
    pub fn to_json(&self) -> Result<String, AnnotateError> {
        serde_json::to_string_pretty(&self.placements)
            .map_err(|e| AnnotateError::Internal(format!("JSON serialisation failed: {e}")))
    }
}

impl PlacementSink for JsonPlacementSink {
    fn place_highlight(
        &mut self,
        page: usize,
        quads: &[Quad],
        color: HighlightColor,
        comment: Option<&str>,
    ) -> Result<(), AnnotateError> {
        self.placements.push(Placement::Highlight {
            page,
            quads: quads.to_vec(),
            color,
            comment: comment.map(str::to_string),
        });
        Ok(())
    }

    fn place_note(&mut self, page: usize, at: Point, text: &str) -> Result<(), AnnotateError> {
        self.placements.push(Placement::Note {
            page,
            at,
            text: text.to_string(),
        });
        Ok(())
    }

    fn place_bookmark(&mut self, page: usize, at: Point, label: &str) -> Result<(), AnnotateError> {
        self.placements.push(Placement::Bookmark {
            page,
            at,
            label: label.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceFormat;

    fn resolved(kind: AnnotationKind, quads: Vec<Quad>, comment: Option<&str>) -> ResolvedAnnotation {
        ResolvedAnnotation {
            kind,
            page: 2,
            anchor: quads.first().map(Quad::top_left).unwrap_or(Point::new(5.0, 6.0)),
            quads,
            text: None,
            comment: comment.map(str::to_string),
            timestamp: None,
            source: SourceFormat::KrdsCache,
            matched_by: None,
        }
    }

    #[test]
    fn places_each_kind() {
        let items = vec![
            resolved(
                AnnotationKind::Highlight,
                vec![Quad::from_edges(1.0, 2.0, 3.0, 4.0)],
                Some("c"),
            ),
            resolved(AnnotationKind::Note, vec![], Some("n")),
            resolved(AnnotationKind::Bookmark, vec![], None),
            resolved(AnnotationKind::Highlight, vec![], None),
        ];
        let mut sink = JsonPlacementSink::new();
        let summary = place_all(&mut sink, &items, HighlightColor::default()).unwrap();
        assert_eq!(
            summary,
            PlacementSummary {
                highlights: 1,
                notes: 1,
                bookmarks: 1,
                skipped: 1
            }
        );
        assert!(matches!(&sink.placements[1], Placement::Note { text, .. } if text == "n"));
        assert!(matches!(&sink.placements[2], Placement::Bookmark { label, .. } if label == "Bookmark (page 3)"));
    }

    #[test]
    fn json_is_tagged() {
        let mut sink = JsonPlacementSink::new();
        sink.place_note(0, Point::new(1.0, 2.0), "hi").unwrap();
        let json = sink.to_json().unwrap();
        assert!(json.contains("\"type\": \"note\""));
        assert!(json.contains("\"text\": \"hi\""));
    }
}
