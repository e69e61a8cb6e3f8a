//! Integration tests for the recovery pipeline.
//!
//! Everything runs against in-memory pages (see `common`), so no pdfium
//! library and no PDF files are needed.

mod common;

use common::*;
use kindle2pdf::pipeline::krds;
use kindle2pdf::{
    place_all, read_annotations, resolve_annotations, resolve_annotations_concurrent, AnnotateConfig,
    AnnotateError, AnnotationIssue, AnnotationKind, AnnotationProgressCallback, AnnotationSources,
    DeviceRect, EmptyTextPolicy, FormatError, InMemoryDocument, JsonPlacementSink, MatchKind,
    PageGeometry, RawAnnotationRecord, SourceFormat,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// ── Fixtures ─────────────────────────────────────────────────────────────

const CLIPPINGS: &str = "\u{feff}book (Reader, A.)
- Your Highlight on page 1 | Location 10-11 | Added on Monday, January 1, 2024 10:00:00 AM

quick brown
==========
book (Reader, A.)
- Your Highlight on page 1 | Location 20-22 | Added on Monday, January 1, 2024 10:05:00 AM

lazy dog. Pack my box
==========
Unrelated Title (Someone)
- Your Highlight on page 1 | Location 5 | Added on Monday, January 1, 2024 09:00:00 AM

not for this PDF
==========
";

/// A cache-layout store for `book.pdf`: two highlights and a note on page
/// 1, a bookmark and a standalone note on page 2.
fn book_store() -> Vec<u8> {
    let mut b = StoreBuilder::new(1);
    b.cache(&[
        (
            1,
            vec![
                ("highlight", position(0, 4, 0), position(0, 14, 0), None),
                ("highlight", position(0, 35, 0), position(0, 10, 1), None),
            ],
        ),
        (
            2,
            vec![
                ("note", position(0, 4, 0), position(0, 4, 0), Some("remember this")),
                ("note", position(1, 5, 1), position(1, 5, 1), Some("vexing indeed")),
            ],
        ),
        (0, vec![("bookmark", "1 0 0 0".to_string(), String::new(), None)]),
    ]);
    b.build()
}

/// `dir/book.pdf` plus `dir/book.sdr/book.pds`.
fn book_dir(store: &[u8]) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let pdf = dir.path().join("book.pdf");
    fs::write(&pdf, b"%PDF-1.4\n").unwrap();
    let sdr = dir.path().join("book.sdr");
    fs::create_dir(&sdr).unwrap();
    fs::write(sdr.join("book.pds"), store).unwrap();
    (dir, pdf)
}

fn write_clippings(dir: &Path) -> PathBuf {
    let path = dir.join("My Clippings.txt");
    fs::write(&path, CLIPPINGS).unwrap();
    path
}

fn highlight_at(page: usize, start: (i32, i32), end: (i32, i32), text: Option<&str>) -> RawAnnotationRecord {
    let mut r = RawAnnotationRecord::new(AnnotationKind::Highlight, page, SourceFormat::KrdsCache);
    let (sx, sy) = device_xy(start.0, start.1);
    let (ex, ey) = device_xy(end.0, end.1);
    r.start = Some(DeviceRect {
        x: sx,
        y: sy,
        width: 10,
        height: 15,
    });
    r.end = Some(DeviceRect {
        x: ex,
        y: ey,
        width: 10,
        height: 15,
    });
    r.text = text.map(str::to_string);
    r
}

// ── End to end ───────────────────────────────────────────────────────────

#[test]
fn store_and_clippings_resolve_onto_pages() {
    let (dir, pdf) = book_dir(&book_store());
    let clippings = write_clippings(dir.path());
    let config = AnnotateConfig::default();

    let records = read_annotations(&pdf, &AnnotationSources::new().clippings(clippings), &config).unwrap();
    assert_eq!(records.len(), 5, "records: {records:#?}");

    let output = resolve_annotations(records, &letter_document(), &config).unwrap();
    assert!(output.unlocated.is_empty(), "unlocated: {:#?}", output.unlocated);
    assert!(output.issues.is_empty(), "issues: {:#?}", output.issues);
    assert_eq!(output.stats.merged_notes, 1);

    let kinds: Vec<(usize, AnnotationKind)> = output.resolved.iter().map(|r| (r.page, r.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (0, AnnotationKind::Highlight),
            (0, AnnotationKind::Highlight),
            (1, AnnotationKind::Bookmark),
            (1, AnnotationKind::Note),
        ]
    );

    let quick = &output.resolved[0];
    assert_eq!(quick.text.as_deref(), Some("quick brown"));
    assert_eq!(quick.comment.as_deref(), Some("remember this"));
    assert_eq!(quick.matched_by, Some(MatchKind::Exact));
    assert_eq!(quick.quads.len(), 1);
    let (l, t, r, b) = quick.quads[0].bounds();
    assert!(approx(l, x_at(4)) && approx(t, y_at(0)), "({l}, {t})");
    assert!(approx(r, x_at(15)) && approx(b, y_at(0) + 10.8), "({r}, {b})");

    let lazy = &output.resolved[1];
    assert_eq!(lazy.quads.len(), 2, "one quad per line");
    let (l0, t0, r0, _) = lazy.quads[0].bounds();
    let (l1, t1, r1, _) = lazy.quads[1].bounds();
    assert!(approx(l0, x_at(35)) && approx(t0, y_at(0)) && approx(r0, x_at(44)));
    assert!(approx(l1, x_at(0)) && approx(t1, y_at(1)) && approx(r1, x_at(11)));

    let note = &output.resolved[3];
    assert_eq!(note.comment.as_deref(), Some("vexing indeed"));
    assert!(approx(note.anchor.x, x_at(5)) && approx(note.anchor.y, y_at(1)));

    assert_eq!(output.stats.highlights, 2);
    assert_eq!(output.stats.notes, 1);
    assert_eq!(output.stats.bookmarks, 1);
}

#[test]
fn placements_follow_resolution_order() {
    let (dir, pdf) = book_dir(&book_store());
    let clippings = write_clippings(dir.path());
    let config = AnnotateConfig::default();
    let records = read_annotations(&pdf, &AnnotationSources::new().clippings(clippings), &config).unwrap();
    let output = resolve_annotations(records, &letter_document(), &config).unwrap();

    let mut sink = JsonPlacementSink::new();
    let summary = place_all(&mut sink, &output.resolved, config.highlight_color).unwrap();
    assert_eq!((summary.highlights, summary.notes, summary.bookmarks), (2, 1, 1));
    let json = sink.to_json().unwrap();
    assert!(json.contains("remember this"));
}

// ── Coordinates ──────────────────────────────────────────────────────────

#[test]
fn cropped_page_shifts_by_visible_region_offset() {
    // Same device positions, but the PDF hides the leftmost 40.1pt.
    let geometry = PageGeometry {
        page: 0,
        offset_x: 40.1,
        offset_y: 0.0,
        width: 531.8,
        height: 792.0,
    };
    let text = kindle2pdf::PageText::layout(0, PAGE_ONE, LEFT - 40.1, TOP, CHAR_WIDTH, LINE_HEIGHT);
    let doc = InMemoryDocument::new(1).with_page(geometry, text);

    let record = highlight_at(0, (4, 0), (8, 0), None);
    let output = resolve_annotations(vec![record], &doc, &AnnotateConfig::default()).unwrap();
    let h = &output.resolved[0];
    assert_eq!(h.matched_by, Some(MatchKind::Position));
    let (l, t, r, _) = h.quads[0].bounds();
    assert!(approx(l, x_at(4) - 40.1), "left {l}");
    assert!(approx(t, y_at(0)));
    assert!(approx(r, x_at(9) - 40.1), "right {r}");
}

#[test]
fn position_outside_visible_region_is_clamped_and_reported() {
    let doc = InMemoryDocument::new(1).with_page(
        PageGeometry {
            page: 0,
            offset_x: 40.1,
            offset_y: 0.0,
            width: 531.8,
            height: 792.0,
        },
        page(0, PAGE_ONE),
    );
    let mut bookmark = RawAnnotationRecord::new(AnnotationKind::Bookmark, 0, SourceFormat::KrdsFlat);
    bookmark.start = Some(DeviceRect {
        x: 10,
        y: 100,
        width: 0,
        height: 0,
    });
    let output = resolve_annotations(vec![bookmark], &doc, &AnnotateConfig::default()).unwrap();
    assert_eq!(output.resolved.len(), 1);
    assert_eq!(output.resolved[0].anchor.x, 0.0);
    assert!(matches!(
        output.issues.as_slice(),
        [AnnotationIssue::GeometryMismatch { page: 0, clamped_x, .. }] if *clamped_x == 0.0
    ));
}

// ── Text location ────────────────────────────────────────────────────────

#[test]
fn fuzzy_match_survives_typos() {
    let needle = "Pakc my box with five dozen liquor jugs now. Sphinx of black quartz, judge";
    let record = highlight_at(0, (0, 1), (28, 2), Some(needle));
    let output = resolve_annotations(vec![record], &letter_document(), &AnnotateConfig::default()).unwrap();
    assert!(output.unlocated.is_empty());
    let h = &output.resolved[0];
    assert!(matches!(h.matched_by, Some(MatchKind::Fuzzy { score }) if score >= 0.85));
    assert_eq!(h.quads.len(), 2);
    assert!(approx(h.quads[0].bounds().1, y_at(1)));
    assert!(approx(h.quads[1].bounds().1, y_at(2)));
}

#[test]
fn missing_text_is_reported_and_placed_at_recorded_span() {
    let highlight = highlight_at(0, (0, 2), (10, 2), Some("an entirely absent sentence"));
    let mut note = RawAnnotationRecord::new(AnnotationKind::Note, 0, SourceFormat::KrdsCache);
    note.start = highlight.start;
    note.end = highlight.start;
    note.note = Some("check the edition".into());

    let output = resolve_annotations(vec![highlight, note], &letter_document(), &AnnotateConfig::default()).unwrap();

    assert_eq!(output.unlocated.len(), 1);
    let u = &output.unlocated[0];
    assert_eq!(u.kind, AnnotationKind::Highlight);
    assert_eq!(u.text, "an entirely absent sentence");
    assert!(u.context.contains("Sphinx"), "context: {:?}", u.context);
    assert_eq!(output.stats.unlocated, 1);

    // Still placed from its device span, and the note folds into it.
    assert_eq!(output.resolved.len(), 1, "resolved: {:#?}", output.resolved);
    let h = &output.resolved[0];
    assert_eq!(h.kind, AnnotationKind::Highlight);
    assert_eq!(h.matched_by, Some(MatchKind::Position));
    assert_eq!(h.comment.as_deref(), Some("check the edition"));
    let (l, t, r, _) = h.quads[0].bounds();
    assert!(approx(l, x_at(0)) && approx(t, y_at(2)) && approx(r, x_at(11)), "({l}, {t}, {r})");
    assert_eq!(output.stats.merged_notes, 1);
}

#[test]
fn empty_text_policy_unlocated() {
    let record = highlight_at(0, (4, 0), (8, 0), None);
    let config = AnnotateConfig::builder()
        .empty_text(EmptyTextPolicy::Unlocated)
        .build()
        .unwrap();
    let output = resolve_annotations(vec![record], &letter_document(), &config).unwrap();
    assert!(output.resolved.is_empty());
    assert_eq!(output.unlocated.len(), 1);
}

// ── Page handling ────────────────────────────────────────────────────────

#[test]
fn records_past_last_page_are_skipped() {
    let record = RawAnnotationRecord::new(AnnotationKind::Bookmark, 7, SourceFormat::KrdsCache);
    let output = resolve_annotations(vec![record], &letter_document(), &AnnotateConfig::default()).unwrap();
    assert!(output.resolved.is_empty());
    assert_eq!(output.stats.skipped_records, 1);
    assert_eq!(
        output.issues,
        vec![AnnotationIssue::PageOutOfRange { page: 7, total: 2 }]
    );
}

#[test]
fn page_selection_limits_work() {
    let records = vec![
        highlight_at(0, (4, 0), (14, 0), Some("quick brown")),
        highlight_at(1, (13, 0), (17, 0), Some("quick daft")),
    ];
    let config = AnnotateConfig::builder()
        .pages(kindle2pdf::PageSelection::Single(2))
        .build()
        .unwrap();
    let output = resolve_annotations(records, &letter_document(), &config).unwrap();
    assert_eq!(output.resolved.len(), 1);
    assert_eq!(output.resolved[0].page, 1);
    assert_eq!(output.stats.skipped_records, 1);
}

// ── Determinism and concurrency ──────────────────────────────────────────

fn mixed_records() -> Vec<RawAnnotationRecord> {
    let mut note = RawAnnotationRecord::new(AnnotationKind::Note, 1, SourceFormat::KrdsCache);
    note.start = Some(DeviceRect {
        x: 340,
        y: 100,
        width: 0,
        height: 0,
    });
    note.end = note.start;
    note.note = Some("zebras!".into());
    vec![
        highlight_at(1, (24, 0), (29, 0), Some("zebras jump")),
        highlight_at(0, (4, 0), (14, 0), Some("quick brown")),
        note,
        highlight_at(0, (0, 2), (5, 2), Some("Sphinx")),
        highlight_at(1, (0, 1), (8, 1), None),
    ]
}

#[test]
fn same_input_same_output() {
    let config = AnnotateConfig::default();
    let a = resolve_annotations(mixed_records(), &letter_document(), &config).unwrap();
    let b = resolve_annotations(mixed_records(), &letter_document(), &config).unwrap();
    assert_eq!(a.resolved, b.resolved);
    assert_eq!(a.unlocated, b.unlocated);
    assert_eq!(a.issues, b.issues);
}

#[tokio::test]
async fn concurrent_matches_sequential() {
    let config = AnnotateConfig::builder().concurrency(3).build().unwrap();
    let sequential = resolve_annotations(mixed_records(), &letter_document(), &config).unwrap();
    let concurrent = resolve_annotations_concurrent(mixed_records(), Arc::new(letter_document()), &config)
        .await
        .unwrap();
    assert_eq!(sequential.resolved, concurrent.resolved);
    assert_eq!(sequential.unlocated, concurrent.unlocated);
    assert_eq!(sequential.stats.merged_notes, concurrent.stats.merged_notes);
    assert_eq!(concurrent.stats.merged_notes, 1);
}

#[derive(Default)]
struct Counter {
    started: AtomicUsize,
    pages: AtomicUsize,
    located: AtomicUsize,
    finished: AtomicUsize,
}

impl AnnotationProgressCallback for Counter {
    fn on_run_start(&self, _total_pages: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _page_num: usize, _total_pages: usize, located: usize, _unlocated: usize) {
        self.pages.fetch_add(1, Ordering::SeqCst);
        self.located.fetch_add(located, Ordering::SeqCst);
    }

    fn on_run_complete(&self, _resolved: usize, _unlocated: usize) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let counter = Arc::new(Counter::default());
    let config = AnnotateConfig::builder()
        .progress_callback(counter.clone() as Arc<dyn AnnotationProgressCallback>)
        .build()
        .unwrap();
    resolve_annotations_concurrent(mixed_records(), Arc::new(letter_document()), &config)
        .await
        .unwrap();
    assert_eq!(counter.started.load(Ordering::SeqCst), 1);
    assert_eq!(counter.pages.load(Ordering::SeqCst), 2);
    assert_eq!(counter.located.load(Ordering::SeqCst), 5);
    assert_eq!(counter.finished.load(Ordering::SeqCst), 1);
}

// ── Damaged input ────────────────────────────────────────────────────────

#[test]
fn truncated_store_fails_unless_best_effort() {
    let mut b = StoreBuilder::new(2);
    b.annotation("highlight", &position(0, 4, 0), &position(0, 14, 0), None);
    let mut bytes = b.build();
    // Second value starts but never finishes.
    bytes.extend_from_slice(&[0xFE, 0x00, 0x00, 0x40]);
    assert!(matches!(
        krds::parse_store(&bytes),
        Err(FormatError::Truncated { .. })
    ));

    let (_dir, pdf) = book_dir(&bytes);
    let strict = read_annotations(&pdf, &AnnotationSources::new(), &AnnotateConfig::default());
    assert!(matches!(strict, Err(AnnotateError::Format { .. })));

    let lenient = AnnotateConfig::builder().best_effort(true).build().unwrap();
    let records = read_annotations(&pdf, &AnnotationSources::new(), &lenient).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, SourceFormat::KrdsFlat);
}

#[test]
fn clippings_without_separator_are_rejected() {
    let dir = TempDir::new().unwrap();
    let pdf = dir.path().join("book.pdf");
    fs::write(&pdf, b"%PDF-1.4\n").unwrap();
    let clippings = dir.path().join("clips.txt");
    fs::write(
        &clippings,
        "book (A)\n- Your Highlight on page 1\n\nx\n==========\nbook (A)\n- Your Note on page 2\n\ndangling\n",
    )
    .unwrap();
    let err = read_annotations(
        &pdf,
        &AnnotationSources::new().clippings(&clippings),
        &AnnotateConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        AnnotateError::Format {
            source: FormatError::MissingSeparator { line: 6 },
            ..
        }
    ));
}
