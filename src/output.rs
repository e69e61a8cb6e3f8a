//! Output types returned by the recovery entry points.

use crate::error::AnnotationIssue;
use crate::model::{AnnotationKind, RawAnnotationRecord, ResolvedAnnotation, UnlocatedAnnotation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of a full recovery run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationOutput {
    /// Annotations ready for placement, ordered by (page, y, x).
    pub resolved: Vec<ResolvedAnnotation>,
    /// Annotations whose text could not be found on their page.
    pub unlocated: Vec<UnlocatedAnnotation>,
    /// Non-fatal anomalies (clamped coordinates, colliding highlights, …).
    pub issues: Vec<AnnotationIssue>,
    pub stats: AnnotationStats,
}

impl AnnotationOutput {
    /// Resolved annotations of one kind.
    pub fn of_kind(&self, kind: AnnotationKind) -> impl Iterator<Item = &ResolvedAnnotation> {
        self.resolved.iter().filter(move |r| r.kind == kind)
    }
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationStats {
    /// Pages in the PDF.
    pub total_pages: usize,
    /// Pages that carried at least one annotation and were processed.
    pub annotated_pages: usize,
    /// Records read from stores and clippings, after merging.
    pub records_read: usize,
    /// Records on pages outside the document or the page selection.
    pub skipped_records: usize,
    pub highlights: usize,
    pub notes: usize,
    pub bookmarks: usize,
    /// Annotations that went through the locator successfully.
    pub located: usize,
    pub unlocated: usize,
    /// Notes folded into a highlight's comment.
    pub merged_notes: usize,
    /// Records dropped as duplicates.
    pub duplicates: usize,
    pub total_duration_ms: u64,
    /// Time spent loading page text from the PDF.
    pub load_duration_ms: u64,
    /// Time spent locating text on pages.
    pub locate_duration_ms: u64,
}

impl AnnotationStats {
    /// Fill the per-kind counters from the resolved list.
    pub(crate) fn count_kinds(&mut self, resolved: &[ResolvedAnnotation]) {
        self.highlights = resolved.iter().filter(|r| r.kind == AnnotationKind::Highlight).count();
        self.notes = resolved.iter().filter(|r| r.kind == AnnotationKind::Note).count();
        self.bookmarks = resolved.iter().filter(|r| r.kind == AnnotationKind::Bookmark).count();
    }
}

/// What the annotation sources contain, without touching page text.
///
/// Returned by [`crate::inspect`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InspectReport {
    pub total_pages: usize,
    pub records: Vec<RawAnnotationRecord>,
    /// Record count per kind.
    pub by_kind: BTreeMap<AnnotationKind, usize>,
    /// Record count per 1-indexed page.
    pub by_page: BTreeMap<usize, usize>,
    /// Records that point past the last page.
    pub out_of_range: usize,
}

impl InspectReport {
    pub fn new(total_pages: usize, records: Vec<RawAnnotationRecord>) -> Self {
        let mut by_kind = BTreeMap::new();
        let mut by_page = BTreeMap::new();
        let mut out_of_range = 0;
        for r in &records {
            *by_kind.entry(r.kind).or_insert(0) += 1;
            *by_page.entry(r.page + 1).or_insert(0) += 1;
            if r.page >= total_pages {
                out_of_range += 1;
            }
        }
        Self {
            total_pages,
            records,
            by_kind,
            by_page,
            out_of_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceFormat;

    #[test]
    fn inspect_report_counts() {
        let records = vec![
            RawAnnotationRecord::new(AnnotationKind::Highlight, 0, SourceFormat::KrdsCache),
            RawAnnotationRecord::new(AnnotationKind::Highlight, 0, SourceFormat::KrdsCache),
            RawAnnotationRecord::new(AnnotationKind::Bookmark, 4, SourceFormat::KrdsCache),
        ];
        let report = InspectReport::new(3, records);
        assert_eq!(report.by_kind[&AnnotationKind::Highlight], 2);
        assert_eq!(report.by_page[&1], 2);
        assert_eq!(report.out_of_range, 1);
    }

    #[test]
    fn output_serializes() {
        let out = AnnotationOutput::default();
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"resolved\":[]"));
        assert!(json.contains("\"merged_notes\":0"));
    }
}
