//! Join clippings text onto store records.
//!
//! The binary store knows *where* each highlight is but not *what* it says;
//! the clippings export knows what it says but only which page it is on.
//! Within one page the device writes both in reading order, so the n-th
//! text-less highlight (ordered by device position) pairs with the n-th
//! highlight clipping (ordered by location).
//!
//! Clippings with no partner are kept as position-less records so the text
//! locator can still find them on their page.

use crate::model::{AnnotationKind, RawAnnotationRecord};
use crate::pipeline::clippings::ClippingEntry;
use std::collections::BTreeMap;
use tracing::debug;

/// Copy clippings text onto matching store records and append the clippings
/// that matched nothing.
pub fn attach_clipping_text(
    mut records: Vec<RawAnnotationRecord>,
    clippings: &[&ClippingEntry],
) -> Vec<RawAnnotationRecord> {
    // (page, kind) → indices of records still missing their body.
    let mut open: BTreeMap<(usize, AnnotationKind), Vec<usize>> = BTreeMap::new();
    for (i, r) in records.iter().enumerate() {
        let missing = match r.kind {
            AnnotationKind::Highlight => r.recorded_text().is_none(),
            AnnotationKind::Note => r.note.is_none(),
            AnnotationKind::Bookmark => false,
        };
        if missing {
            open.entry((r.page, r.kind)).or_default().push(i);
        }
    }
    for indices in open.values_mut() {
        indices.sort_by_key(|&i| records[i].start.map(|s| (s.y, s.x)).unwrap_or((i32::MAX, i32::MAX)));
        indices.reverse();
    }

    let mut ordered: Vec<&ClippingEntry> = clippings.to_vec();
    ordered.sort_by_key(|c| (c.page, c.location.map(|l| l.0).unwrap_or(u32::MAX), c.line));

    let mut extra = Vec::new();
    let mut filled = 0usize;
    for clip in ordered {
        let record = clip.to_record();
        if let Some(i) = open.get_mut(&(record.page, record.kind)).and_then(Vec::pop) {
            match record.kind {
                AnnotationKind::Highlight => records[i].text = record.text,
                AnnotationKind::Note => records[i].note = record.note,
                AnnotationKind::Bookmark => {}
            }
            filled += 1;
            continue;
        }
        if already_known(&records, &record) {
            continue;
        }
        extra.push(record);
    }

    debug!(
        "Clippings: {} joined onto store records, {} kept standalone",
        filled,
        extra.len()
    );
    records.extend(extra);
    records
}

/// True when a store record already carries what this clipping says.
fn already_known(records: &[RawAnnotationRecord], clip: &RawAnnotationRecord) -> bool {
    records
        .iter()
        .filter(|r| r.page == clip.page && r.kind == clip.kind)
        .any(|r| match clip.kind {
            AnnotationKind::Bookmark => true,
            AnnotationKind::Highlight => same_text(r.text.as_deref(), clip.text.as_deref()),
            AnnotationKind::Note => same_text(r.note.as_deref(), clip.note.as_deref()),
        })
}

fn same_text(a: Option<&str>, b: Option<&str>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a.trim() == b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceRect, SourceFormat};

    fn highlight(page: usize, x: i32, y: i32) -> RawAnnotationRecord {
        let mut r = RawAnnotationRecord::new(AnnotationKind::Highlight, page, SourceFormat::KrdsCache);
        r.start = Some(DeviceRect {
            x,
            y,
            width: 10,
            height: 10,
        });
        r.end = r.start;
        r
    }

    fn clip(kind: AnnotationKind, page: usize, loc: u32, text: &str) -> ClippingEntry {
        ClippingEntry {
            title: "Book".into(),
            author: None,
            kind,
            page: page + 1,
            location: Some((loc, loc)),
            added: None,
            text: text.into(),
            line: loc as usize,
        }
    }

    #[test]
    fn pairs_in_reading_order() {
        let records = vec![highlight(0, 100, 500), highlight(0, 100, 200)];
        let a = clip(AnnotationKind::Highlight, 0, 10, "upper");
        let b = clip(AnnotationKind::Highlight, 0, 20, "lower");
        let merged = attach_clipping_text(records, &[&b, &a]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text.as_deref(), Some("lower"));
        assert_eq!(merged[1].text.as_deref(), Some("upper"));
    }

    #[test]
    fn unmatched_clipping_is_kept() {
        let records = vec![highlight(0, 100, 200)];
        let a = clip(AnnotationKind::Highlight, 0, 10, "first");
        let b = clip(AnnotationKind::Highlight, 3, 90, "elsewhere");
        let merged = attach_clipping_text(records, &[&a, &b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].page, 3);
        assert_eq!(merged[1].source, SourceFormat::Clippings);
        assert!(merged[1].start.is_none());
    }

    #[test]
    fn known_note_is_not_duplicated() {
        let mut note = RawAnnotationRecord::new(AnnotationKind::Note, 2, SourceFormat::KrdsCache);
        note.note = Some("same".into());
        let c = clip(AnnotationKind::Note, 2, 5, "same");
        let merged = attach_clipping_text(vec![note], &[&c]);
        assert_eq!(merged.len(), 1);
    }
}
