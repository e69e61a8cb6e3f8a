//! Device-unit to point conversion.
//!
//! The reader measures positions in hundredths of an inch from the top-left
//! corner of the *full* original page. PDFs often display only a cropped
//! part of that page, so each point is shifted by the visible region's
//! offset:
//!
//! ```text
//! point = device / 100 × 72 − offset
//! ```
//!
//! The same formula (with a zero offset) converts widths and heights. There
//! is no axis flip: both systems grow downwards from the top-left corner.
//! Results are clamped into the visible region; a clamp is reported as an
//! [`AnnotationIssue::GeometryMismatch`] and never aborts the run.

use crate::error::AnnotationIssue;
use crate::model::{AnnotationKind, DeviceRect, MappedAnnotation, PageGeometry, Point, RawAnnotationRecord};
use tracing::debug;

/// Device units per inch.
pub const DEVICE_UNITS_PER_INCH: f32 = 100.0;
/// PDF points per inch.
pub const POINTS_PER_INCH: f32 = 72.0;
/// Smallest width/height given to a highlight.
pub const MIN_HIGHLIGHT_EXTENT: f32 = 1.0;

/// Convert a length in device units to points.
pub fn device_to_points(units: f32) -> f32 {
    units / DEVICE_UNITS_PER_INCH * POINTS_PER_INCH
}

/// Convert a device position to points relative to the visible region.
pub fn to_point(device_x: f32, device_y: f32, offset_x: f32, offset_y: f32) -> (f32, f32) {
    (
        device_to_points(device_x) - offset_x,
        device_to_points(device_y) - offset_y,
    )
}

/// Clamp `p` into `[0, width] × [0, height]`. The flag is true when the
/// point moved.
pub fn clamp_point(p: Point, geometry: &PageGeometry) -> (Point, bool) {
    let clamped = Point::new(
        p.x.clamp(0.0, geometry.width.max(0.0)),
        p.y.clamp(0.0, geometry.height.max(0.0)),
    );
    (clamped, clamped != p)
}

/// Map one rectangle's origin, recording an issue when it needed clamping.
fn map_origin(rect: DeviceRect, geometry: &PageGeometry, issues: &mut Vec<AnnotationIssue>) -> Point {
    let (x, y) = to_point(
        rect.x as f32,
        rect.y as f32,
        geometry.offset_x,
        geometry.offset_y,
    );
    let (clamped, moved) = clamp_point(Point::new(x, y), geometry);
    if moved {
        debug!(
            "Page {}: ({x:.2}, {y:.2}) clamped to ({:.2}, {:.2})",
            geometry.page + 1,
            clamped.x,
            clamped.y
        );
        issues.push(AnnotationIssue::GeometryMismatch {
            page: geometry.page,
            x,
            y,
            clamped_x: clamped.x,
            clamped_y: clamped.y,
        });
    }
    clamped
}

/// Resolve a record's device positions against its page's visible region.
///
/// Records without a position (clippings) keep `start`/`end` as `None`,
/// except bookmarks, which always get a point (the page's top-left corner
/// when nothing better is known).
pub fn map_record(record: &RawAnnotationRecord, geometry: &PageGeometry) -> (MappedAnnotation, Vec<AnnotationIssue>) {
    let mut issues = Vec::new();
    let start = record.start.map(|r| map_origin(r, geometry, &mut issues));

    let mapped = match record.kind {
        AnnotationKind::Bookmark => MappedAnnotation {
            record: record.clone(),
            start: Some(start.unwrap_or_default()),
            end: None,
            width: 0.0,
            height: 0.0,
        },
        AnnotationKind::Highlight | AnnotationKind::Note => {
            let end = record
                .end
                .map(|r| map_origin(r, geometry, &mut issues))
                .or(start);
            let (w, h) = record
                .start
                .map(|r| (device_to_points(r.width as f32), device_to_points(r.height as f32)))
                .unwrap_or((0.0, 0.0));
            let (w, h) = if record.kind == AnnotationKind::Highlight {
                (w.max(MIN_HIGHLIGHT_EXTENT), h.max(MIN_HIGHLIGHT_EXTENT))
            } else {
                (w.max(0.0), h.max(0.0))
            };
            MappedAnnotation {
                record: record.clone(),
                start,
                end,
                width: w,
                height: h,
            }
        }
    };
    (mapped, issues)
}
