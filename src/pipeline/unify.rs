//! Annotation unification: one resolved annotation per reading location.
//!
//! The device stores a note typed on a passage as a separate record sitting
//! on that passage, and re-syncs occasionally write the same record twice.
//! This stage runs once over the whole document, after every page has been
//! located:
//!
//! 1. **Duplicates** — same kind, same page, start within
//!    `duplicate_epsilon` on both axes collapse to the first record. Notes
//!    must also share their text; notes and bookmarks with different
//!    creation times are distinct records.
//! 2. **Conflicts** — two highlights at the same spot are both kept and
//!    reported as [`AnnotationIssue::UnificationConflict`].
//! 3. **Notes** — a note co-located with a highlight (see [`CoLocation`])
//!    becomes that highlight's comment; the nearest highlight wins. A note
//!    with no highlight stays standalone, unless an identical note already
//!    stands at the same spot.
//! 4. **Order** — stable sort by (page, y, x).
//!
//! Bookmarks pass through untouched.

use crate::config::{CoLocation, UnifyOptions};
use crate::error::AnnotationIssue;
use crate::model::{AnnotationKind, LocatedAnnotation, Point, ResolvedAnnotation};
use tracing::{debug, warn};

/// Output of [`unify`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Unification {
    pub resolved: Vec<ResolvedAnnotation>,
    pub issues: Vec<AnnotationIssue>,
    /// Notes folded into a highlight.
    pub merged_notes: usize,
    /// Records dropped as duplicates.
    pub duplicates: usize,
}

/// Merge, deduplicate and order located annotations.
pub fn unify(located: Vec<LocatedAnnotation>, opts: &UnifyOptions) -> Unification {
    let mut out = Unification::default();

    // ── Step 1: exact duplicates ─────────────────────────────────────────
    let mut kept: Vec<LocatedAnnotation> = Vec::with_capacity(located.len());
    for candidate in located {
        if kept.iter().any(|k| is_duplicate(k, &candidate, opts.duplicate_epsilon)) {
            debug!(
                "Page {}: duplicate {} dropped",
                candidate.mapped.page() + 1,
                candidate.mapped.kind()
            );
            out.duplicates += 1;
            continue;
        }
        kept.push(candidate);
    }

    let (highlights, rest): (Vec<_>, Vec<_>) = kept
        .into_iter()
        .partition(|l| l.mapped.kind() == AnnotationKind::Highlight);
    let (notes, bookmarks): (Vec<_>, Vec<_>) = rest
        .into_iter()
        .partition(|l| l.mapped.kind() == AnnotationKind::Note);

    // ── Step 2: highlight conflicts ──────────────────────────────────────
    let tolerance = opts.co_location.tolerance();
    for (i, a) in highlights.iter().enumerate() {
        for b in &highlights[i + 1..] {
            if a.mapped.page() != b.mapped.page() {
                continue;
            }
            if let (Some(pa), Some(pb)) = (start_of(a), start_of(b)) {
                if pa.near(pb, tolerance) {
                    warn!(
                        "Page {}: two highlights at ({:.2}, {:.2}); keeping both",
                        a.mapped.page() + 1,
                        pa.x,
                        pa.y
                    );
                    out.issues.push(AnnotationIssue::UnificationConflict {
                        page: a.mapped.page(),
                        x: pa.x,
                        y: pa.y,
                        other_x: pb.x,
                        other_y: pb.y,
                    });
                }
            }
        }
    }

    // ── Step 3: fold notes into highlights ───────────────────────────────
    let mut comments: Vec<Vec<String>> = vec![Vec::new(); highlights.len()];
    let mut standalone: Vec<LocatedAnnotation> = Vec::new();
    for note in notes {
        let target = note
            .mapped
            .start
            .and_then(|p| nearest_highlight(&highlights, note.mapped.page(), p, opts.co_location));
        match target {
            Some(h) => {
                if let Some(text) = note_text(&note) {
                    if !comments[h].iter().any(|c| c == text) {
                        comments[h].push(text.to_string());
                    }
                }
                out.merged_notes += 1;
            }
            None => {
                let twin = standalone.iter().any(|s| {
                    s.mapped.page() == note.mapped.page()
                        && note_text(s) == note_text(&note)
                        && match (s.mapped.start, note.mapped.start) {
                            (Some(a), Some(b)) => a.near(b, tolerance),
                            (None, None) => true,
                            _ => false,
                        }
                });
                if twin {
                    out.duplicates += 1;
                } else {
                    standalone.push(note);
                }
            }
        }
    }

    // ── Step 4: resolve and order ────────────────────────────────────────
    let mut resolved: Vec<ResolvedAnnotation> = Vec::new();
    for (h, notes) in highlights.into_iter().zip(comments) {
        let comment = (!notes.is_empty()).then(|| notes.join("\n\n"));
        resolved.push(resolve(h, comment));
    }
    for n in standalone {
        let comment = note_text(&n).map(str::to_string);
        resolved.push(resolve(n, comment));
    }
    for b in bookmarks {
        resolved.push(resolve(b, None));
    }
    resolved.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(a.anchor.y.total_cmp(&b.anchor.y))
            .then(a.anchor.x.total_cmp(&b.anchor.x))
    });

    out.resolved = resolved;
    out
}

/// Where a located annotation starts: its recorded position, else the
/// first matched quad.
fn start_of(l: &LocatedAnnotation) -> Option<Point> {
    l.mapped.start.or_else(|| l.anchor())
}

fn note_text(l: &LocatedAnnotation) -> Option<&str> {
    l.mapped.record.note.as_deref().filter(|t| !t.trim().is_empty())
}

/// Creation times match, or at least one of them is unknown.
fn same_time(a: &LocatedAnnotation, b: &LocatedAnnotation) -> bool {
    match (a.mapped.record.timestamp, b.mapped.record.timestamp) {
        (Some(ta), Some(tb)) => ta == tb,
        _ => true,
    }
}

fn is_duplicate(a: &LocatedAnnotation, b: &LocatedAnnotation, epsilon: f32) -> bool {
    if a.mapped.kind() != b.mapped.kind() || a.mapped.page() != b.mapped.page() {
        return false;
    }
    let same_place = match (start_of(a), start_of(b)) {
        (Some(pa), Some(pb)) => pa.near(pb, epsilon),
        (None, None) => true,
        _ => false,
    };
    if !same_place {
        return false;
    }
    match a.mapped.kind() {
        AnnotationKind::Note => note_text(a) == note_text(b) && same_time(a, b),
        AnnotationKind::Bookmark => same_time(a, b),
        AnnotationKind::Highlight if a.mapped.start.is_none() || b.mapped.start.is_none() => {
            a.mapped.record.recorded_text() == b.mapped.record.recorded_text()
        }
        _ => true,
    }
}

/// Index of the highlight on `page` that `p` is co-located with; the
/// closest one when several qualify.
fn nearest_highlight(highlights: &[LocatedAnnotation], page: usize, p: Point, policy: CoLocation) -> Option<usize> {
    highlights
        .iter()
        .enumerate()
        .filter(|(_, h)| h.mapped.page() == page)
        .filter_map(|(i, h)| {
            let start = start_of(h)?;
            let anchors: &[Option<Point>] = match policy {
                CoLocation::Exact { .. } => &[Some(start), None],
                CoLocation::Anchored { .. } => &[Some(start), h.mapped.end],
            };
            anchors
                .iter()
                .flatten()
                .filter(|a| p.near(**a, policy.tolerance()))
                .map(|a| a.distance(p))
                .min_by(f32::total_cmp)
                .map(|d| (i, d))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

fn resolve(l: LocatedAnnotation, comment: Option<String>) -> ResolvedAnnotation {
    let anchor = l.anchor().unwrap_or_default();
    let record = l.mapped.record;
    ResolvedAnnotation {
        kind: record.kind,
        page: record.page,
        quads: l.quads,
        anchor,
        text: match record.kind {
            AnnotationKind::Highlight => record.text,
            _ => None,
        },
        comment,
        timestamp: record.timestamp,
        source: record.source,
        matched_by: l.matched_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MappedAnnotation, Quad, RawAnnotationRecord, SourceFormat};
    use chrono::{DateTime, Utc};

    fn located(kind: AnnotationKind, page: usize, start: Point, end: Point) -> LocatedAnnotation {
        let record = RawAnnotationRecord::new(kind, page, SourceFormat::KrdsCache);
        let quads = if kind == AnnotationKind::Highlight {
            vec![Quad::from_edges(start.x, start.y, end.x, end.y)]
        } else {
            Vec::new()
        };
        LocatedAnnotation {
            mapped: MappedAnnotation {
                record,
                start: Some(start),
                end: Some(end),
                width: 5.0,
                height: 10.0,
            },
            quads,
            matched_by: None,
        }
    }

    fn note(page: usize, at: Point, text: &str) -> LocatedAnnotation {
        let mut n = located(AnnotationKind::Note, page, at, at);
        n.mapped.record.note = Some(text.into());
        n
    }

    fn highlight(page: usize, start: Point, end: Point, text: &str) -> LocatedAnnotation {
        let mut h = located(AnnotationKind::Highlight, page, start, end);
        h.mapped.record.text = Some(text.into());
        h
    }

    #[test]
    fn note_merges_into_co_located_highlight() {
        for policy in [
            CoLocation::Anchored { tolerance: 5.0 },
            CoLocation::Exact { tolerance: 0.15 },
        ] {
            let opts = UnifyOptions {
                co_location: policy,
                duplicate_epsilon: 0.15,
            };
            let items = vec![
                highlight(0, Point::new(99.9, 200.05), Point::new(150.0, 210.0), "the passage"),
                note(0, Point::new(100.0, 200.0), "my thought"),
                note(0, Point::new(100.0, 400.0), "elsewhere"),
            ];
            let u = unify(items, &opts);
            assert_eq!(u.resolved.len(), 2, "policy {policy:?}");
            assert_eq!(u.merged_notes, 1);
            let h = &u.resolved[0];
            assert_eq!(h.kind, AnnotationKind::Highlight);
            assert_eq!(h.text.as_deref(), Some("the passage"));
            assert_eq!(h.comment.as_deref(), Some("my thought"));
            assert_eq!(u.resolved[1].kind, AnnotationKind::Note);
            assert_eq!(u.resolved[1].comment.as_deref(), Some("elsewhere"));
        }
    }

    #[test]
    fn anchored_policy_matches_end_point() {
        let items = vec![
            highlight(0, Point::new(50.0, 100.0), Point::new(200.0, 130.0), "x"),
            note(0, Point::new(202.0, 131.0), "at the end"),
        ];
        let u = unify(items.clone(), &UnifyOptions::default());
        assert_eq!(u.resolved.len(), 1);

        let exact = UnifyOptions {
            co_location: CoLocation::Exact { tolerance: 0.15 },
            duplicate_epsilon: 0.15,
        };
        assert_eq!(unify(items, &exact).resolved.len(), 2);
    }

    #[test]
    fn several_notes_join_with_blank_line() {
        let items = vec![
            highlight(1, Point::new(10.0, 10.0), Point::new(90.0, 10.0), "x"),
            note(1, Point::new(10.0, 10.0), "first"),
            note(1, Point::new(10.5, 10.0), "second"),
        ];
        let u = unify(items, &UnifyOptions::default());
        assert_eq!(u.resolved.len(), 1);
        assert_eq!(u.resolved[0].comment.as_deref(), Some("first\n\nsecond"));
    }

    #[test]
    fn standalone_notes_kept_unless_identical() {
        let items = vec![
            note(0, Point::new(10.0, 10.0), "a"),
            note(0, Point::new(11.0, 10.0), "b"),
            note(0, Point::new(12.0, 10.0), "a"),
        ];
        let u = unify(items, &UnifyOptions::default());
        let texts: Vec<_> = u.resolved.iter().filter_map(|r| r.comment.as_deref()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(u.duplicates, 1);
    }

    #[test]
    fn exact_duplicates_collapse() {
        let items = vec![
            highlight(0, Point::new(10.0, 10.0), Point::new(50.0, 10.0), "x"),
            highlight(0, Point::new(10.1, 10.05), Point::new(50.0, 10.0), "x"),
        ];
        let u = unify(items, &UnifyOptions::default());
        assert_eq!(u.resolved.len(), 1);
        assert_eq!(u.duplicates, 1);
        assert!(u.issues.is_empty());
    }

    fn at_time(mut l: LocatedAnnotation, secs: i64) -> LocatedAnnotation {
        l.mapped.record.timestamp = DateTime::<Utc>::from_timestamp(1_704_103_200 + secs, 0);
        l
    }

    #[test]
    fn bookmarks_at_different_times_are_kept() {
        let page_only = |secs| {
            let mut b = at_time(located(AnnotationKind::Bookmark, 3, Point::default(), Point::default()), secs);
            b.mapped.start = None;
            b.mapped.end = None;
            b
        };
        let u = unify(vec![page_only(0), page_only(60), page_only(0)], &UnifyOptions::default());
        assert_eq!(u.resolved.len(), 2);
        assert_eq!(u.duplicates, 1);
    }

    #[test]
    fn notes_need_same_text_and_time_to_collapse() {
        let at = Point::new(40.0, 40.0);
        let items = vec![
            at_time(note(0, at, "same"), 0),
            at_time(note(0, at, "same"), 0),
            at_time(note(0, at, "same"), 30),
        ];
        let u = unify(items, &UnifyOptions::default());
        // The exact copy is a duplicate; the later one is still identical
        // text at the same spot and folds away as a standalone repeat.
        assert_eq!(u.resolved.len(), 1);
        assert_eq!(u.duplicates, 2);
    }

    #[test]
    fn co_located_highlights_conflict_and_both_kept() {
        let items = vec![
            highlight(0, Point::new(10.0, 10.0), Point::new(50.0, 10.0), "x"),
            highlight(0, Point::new(12.0, 11.0), Point::new(80.0, 10.0), "y"),
        ];
        let u = unify(items, &UnifyOptions::default());
        assert_eq!(u.resolved.len(), 2);
        assert!(matches!(
            u.issues.as_slice(),
            [AnnotationIssue::UnificationConflict { page: 0, .. }]
        ));
    }

    #[test]
    fn bookmarks_never_merge() {
        let items = vec![
            highlight(0, Point::new(0.0, 0.0), Point::new(50.0, 0.0), "x"),
            located(AnnotationKind::Bookmark, 0, Point::new(0.0, 0.0), Point::new(0.0, 0.0)),
        ];
        let u = unify(items, &UnifyOptions::default());
        assert_eq!(u.resolved.len(), 2);
        assert_eq!(u.merged_notes, 0);
    }

    #[test]
    fn output_is_sorted_by_page_then_position() {
        let items = vec![
            note(2, Point::new(5.0, 5.0), "c"),
            note(0, Point::new(300.0, 50.0), "b"),
            note(0, Point::new(10.0, 50.0), "a"),
            note(0, Point::new(400.0, 10.0), "top"),
        ];
        let u = unify(items, &UnifyOptions::default());
        let texts: Vec<_> = u.resolved.iter().filter_map(|r| r.comment.as_deref()).collect();
        assert_eq!(texts, vec!["top", "a", "b", "c"]);
    }

    #[test]
    fn deterministic() {
        let build = || {
            vec![
                highlight(0, Point::new(10.0, 10.0), Point::new(50.0, 10.0), "x"),
                note(0, Point::new(10.0, 10.0), "n"),
                note(1, Point::new(1.0, 1.0), "m"),
            ]
        };
        let opts = UnifyOptions::default();
        assert_eq!(unify(build(), &opts), unify(build(), &opts));
    }
}
