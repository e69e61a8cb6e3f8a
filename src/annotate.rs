//! Recovery entry points: read sources, resolve against the PDF, write.
//!
//! ```text
//! stores + clippings ─▶ read_annotations ─▶ records
//! PDF ─▶ pdf::load_document ─▶ InMemoryDocument ─┐
//!                                               ▼
//!              resolve_annotations(_concurrent) ─▶ AnnotationOutput
//!                                               │
//!                        annotate_to_file ◀─────┘ (pdfium placement sink)
//! ```
//!
//! [`resolve_annotations`] is the synchronous core and never touches the
//! filesystem; everything above it is I/O glue.

use crate::config::{AnnotateConfig, LocateOptions};
use crate::document::{DocumentSource, PageText};
use crate::error::{AnnotateError, AnnotationIssue};
use crate::model::{AnnotationKind, LocatedAnnotation, RawAnnotationRecord, UnlocatedAnnotation};
use crate::output::{AnnotationOutput, AnnotationStats, InspectReport};
use crate::placement::PlacementSummary;
use crate::pipeline::clippings::{self, ClippingEntry};
use crate::pipeline::input::{self, StoreKind};
use crate::pipeline::locate::{self, NormalizedPage};
use crate::pipeline::{coords, krds, merge, pdf, unify};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where to read annotations from.
///
/// # Example
/// ```rust
/// use kindle2pdf::AnnotationSources;
///
/// let sources = AnnotationSources::new()
///     .store("book.sdr")
///     .clippings("My Clippings.txt");
/// assert_eq!(sources.stores.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AnnotationSources {
    /// Store files or directories to search. Empty means "look for a
    /// `<stem>.sdr` folder next to the PDF".
    pub stores: Vec<PathBuf>,
    /// Optional `My Clippings.txt` export.
    pub clippings: Option<PathBuf>,
}

impl AnnotationSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, path: impl Into<PathBuf>) -> Self {
        self.stores.push(path.into());
        self
    }

    pub fn clippings(mut self, path: impl Into<PathBuf>) -> Self {
        self.clippings = Some(path.into());
        self
    }
}

// ── Reading ──────────────────────────────────────────────────────────────

fn parse_krds(path: &Path, bytes: &[u8], best_effort: bool) -> Result<Vec<RawAnnotationRecord>, AnnotateError> {
    if best_effort {
        let parsed = krds::parse_store_lenient(bytes);
        if let Some(e) = parsed.error {
            warn!(
                "{}: {} (kept {} record(s) decoded before the error)",
                path.display(),
                e,
                parsed.records.len()
            );
        }
        return Ok(parsed.records);
    }
    krds::parse_store(bytes).map_err(|source| AnnotateError::Format {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_clippings_file(path: &Path, bytes: &[u8], best_effort: bool) -> Result<Vec<ClippingEntry>, AnnotateError> {
    let content = String::from_utf8_lossy(bytes);
    match clippings::parse_clippings(&content) {
        Ok(entries) => Ok(entries),
        Err(e) if best_effort => {
            warn!("{}: {}; clippings ignored", path.display(), e);
            Ok(Vec::new())
        }
        Err(source) => Err(AnnotateError::Format {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read every annotation source for `pdf_path` into raw records.
///
/// Store records come first, in file order; clippings text is then joined
/// onto store records that lack it (see [`merge::attach_clipping_text`]) and
/// the remaining clippings are appended. Only clippings whose title mentions
/// the PDF's file stem are used.
///
/// # Errors
/// Fatal on unreadable files and, unless `config.best_effort` is set, on
/// structurally broken stores or clippings.
pub fn read_annotations(
    pdf_path: &Path,
    sources: &AnnotationSources,
    config: &AnnotateConfig,
) -> Result<Vec<RawAnnotationRecord>, AnnotateError> {
    let mut records = Vec::new();
    let mut entries: Vec<ClippingEntry> = Vec::new();

    let store_paths = input::resolve_store_paths(pdf_path, &sources.stores)?;
    let clipping_paths = sources.clippings.iter().cloned();
    for path in store_paths.into_iter().chain(clipping_paths) {
        let source = input::load_source(&path)?;
        match source.kind {
            StoreKind::Krds => {
                let found = parse_krds(&path, &source.bytes, config.best_effort)?;
                info!("{}: {} record(s)", path.display(), found.len());
                records.extend(found);
            }
            StoreKind::Clippings => {
                let found = parse_clippings_file(&path, &source.bytes, config.best_effort)?;
                info!("{}: {} clipping(s)", path.display(), found.len());
                entries.extend(found);
            }
        }
    }

    if entries.is_empty() {
        return Ok(records);
    }
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relevant = clippings::filter_by_title(&entries, &stem);
    if relevant.is_empty() {
        warn!(
            "None of {} clipping(s) mention '{}' in their title",
            entries.len(),
            stem
        );
    }
    Ok(merge::attach_clipping_text(records, &relevant))
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Everything one page contributed.
struct PageOutcome {
    page: usize,
    located: Vec<LocatedAnnotation>,
    unlocated: Vec<UnlocatedAnnotation>,
    issues: Vec<AnnotationIssue>,
}

/// Records grouped by page, after dropping those outside the document or
/// the page selection.
struct Plan {
    pages: BTreeMap<usize, Vec<RawAnnotationRecord>>,
    issues: Vec<AnnotationIssue>,
    records_read: usize,
    skipped: usize,
}

fn plan(records: Vec<RawAnnotationRecord>, total_pages: usize, config: &AnnotateConfig) -> Plan {
    let selected: BTreeSet<usize> = config.pages.to_indices(total_pages).into_iter().collect();
    let records_read = records.len();
    let mut pages: BTreeMap<usize, Vec<RawAnnotationRecord>> = BTreeMap::new();
    let mut issues = Vec::new();
    let mut skipped = 0;
    for r in records {
        if r.page >= total_pages {
            warn!(
                "{} on page {} is past the last page ({})",
                r.kind,
                r.page + 1,
                total_pages
            );
            issues.push(AnnotationIssue::PageOutOfRange {
                page: r.page,
                total: total_pages,
            });
            skipped += 1;
        } else if !selected.contains(&r.page) {
            skipped += 1;
        } else {
            pages.entry(r.page).or_default().push(r);
        }
    }
    Plan {
        pages,
        issues,
        records_read,
        skipped,
    }
}

/// Pages a set of records needs loaded.
fn pages_needed(records: &[RawAnnotationRecord], total_pages: usize, config: &AnnotateConfig) -> Vec<usize> {
    let selected: BTreeSet<usize> = config.pages.to_indices(total_pages).into_iter().collect();
    let needed: BTreeSet<usize> = records
        .iter()
        .map(|r| r.page)
        .filter(|p| selected.contains(p))
        .collect();
    needed.into_iter().collect()
}

/// Map and locate every record of one page.
fn process_page(
    page: usize,
    records: Vec<RawAnnotationRecord>,
    doc: &dyn DocumentSource,
    opts: &LocateOptions,
) -> Result<PageOutcome, AnnotateError> {
    let geometry = doc.page_geometry(page)?;
    let text = if records.iter().any(|r| r.kind == AnnotationKind::Highlight) {
        doc.page_text(page)?
    } else {
        PageText {
            page,
            chars: Vec::new(),
        }
    };
    let normalized = NormalizedPage::new(&text);
    let strategies = locate::default_strategies(opts);

    let mut outcome = PageOutcome {
        page,
        located: Vec::with_capacity(records.len()),
        unlocated: Vec::new(),
        issues: Vec::new(),
    };
    for record in records {
        let (mapped, issues) = coords::map_record(&record, &geometry);
        outcome.issues.extend(issues);
        let fallback = mapped.clone();
        match locate::locate(mapped, &normalized, &strategies, opts) {
            Ok(l) => outcome.located.push(l),
            Err(u) => {
                warn!(
                    "Page {}: {} not located: {:?}",
                    page + 1,
                    u.kind,
                    u.text.chars().take(60).collect::<String>()
                );
                // Text not found, but the recorded span still places it.
                if let Some(l) = locate::position_fallback(fallback, &normalized) {
                    debug!("Page {}: placed at its recorded position instead", page + 1);
                    outcome.located.push(l);
                }
                outcome.unlocated.push(u);
            }
        }
    }
    Ok(outcome)
}

fn finish(plan_issues: Vec<AnnotationIssue>, mut outcomes: Vec<PageOutcome>, config: &AnnotateConfig, mut stats: AnnotationStats) -> AnnotationOutput {
    outcomes.sort_by_key(|o| o.page);

    let mut located = Vec::new();
    let mut unlocated = Vec::new();
    let mut issues = plan_issues;
    for o in outcomes {
        located.extend(o.located);
        unlocated.extend(o.unlocated);
        issues.extend(o.issues);
    }
    stats.located = located.len();
    stats.unlocated = unlocated.len();

    let unified = unify::unify(located, &config.unify_options());
    issues.extend(unified.issues);
    stats.merged_notes = unified.merged_notes;
    stats.duplicates = unified.duplicates;
    stats.count_kinds(&unified.resolved);

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(unified.resolved.len(), unlocated.len());
    }

    AnnotationOutput {
        resolved: unified.resolved,
        unlocated,
        issues,
        stats,
    }
}

fn report_page(config: &AnnotateConfig, o: &PageOutcome, total: usize) {
    if let Some(ref cb) = config.progress_callback {
        cb.on_page_complete(o.page + 1, total, o.located.len(), o.unlocated.len());
    }
}

/// Resolve raw records against a document, one page after another.
///
/// Pure apart from logging: the same records, document and configuration
/// always produce the same output.
pub fn resolve_annotations(
    records: Vec<RawAnnotationRecord>,
    doc: &dyn DocumentSource,
    config: &AnnotateConfig,
) -> Result<AnnotationOutput, AnnotateError> {
    let start = Instant::now();
    let plan = plan(records, doc.page_count(), config);
    let total = plan.pages.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    let opts = config.locate_options();
    let mut outcomes = Vec::with_capacity(total);
    for (page, records) in plan.pages {
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page + 1, total);
        }
        let outcome = process_page(page, records, doc, &opts)?;
        report_page(config, &outcome, total);
        outcomes.push(outcome);
    }

    let stats = AnnotationStats {
        total_pages: doc.page_count(),
        annotated_pages: total,
        records_read: plan.records_read,
        skipped_records: plan.skipped,
        locate_duration_ms: start.elapsed().as_millis() as u64,
        ..Default::default()
    };
    let mut output = finish(plan.issues, outcomes, config, stats);
    output.stats.total_duration_ms = start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Like [`resolve_annotations`], but locates up to `config.concurrency`
/// pages at once on blocking worker threads.
///
/// Produces exactly the same output as the sequential version: page
/// results are put back in page order before unification.
pub async fn resolve_annotations_concurrent(
    records: Vec<RawAnnotationRecord>,
    doc: Arc<dyn DocumentSource>,
    config: &AnnotateConfig,
) -> Result<AnnotationOutput, AnnotateError> {
    let start = Instant::now();
    let plan = plan(records, doc.page_count(), config);
    let total = plan.pages.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total);
    }

    let opts = config.locate_options();
    let results: Vec<Result<PageOutcome, AnnotateError>> = stream::iter(plan.pages.into_iter().map(|(page, records)| {
        let doc = Arc::clone(&doc);
        let config = config.clone();
        async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_start(page + 1, total);
            }
            let outcome = tokio::task::spawn_blocking(move || process_page(page, records, &*doc, &opts))
                .await
                .map_err(|e| AnnotateError::Internal(format!("Locate task panicked: {}", e)))??;
            report_page(&config, &outcome, total);
            Ok(outcome)
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;
    let outcomes = results.into_iter().collect::<Result<Vec<_>, _>>()?;

    let stats = AnnotationStats {
        total_pages: doc.page_count(),
        annotated_pages: total,
        records_read: plan.records_read,
        skipped_records: plan.skipped,
        locate_duration_ms: start.elapsed().as_millis() as u64,
        ..Default::default()
    };
    let mut output = finish(plan.issues, outcomes, config, stats);
    output.stats.total_duration_ms = start.elapsed().as_millis() as u64;
    Ok(output)
}

// ── End-to-end ───────────────────────────────────────────────────────────

/// Recover the annotations for a PDF.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(AnnotationOutput)` on success, even if some annotations could not be
/// located (check `output.unlocated`).
///
/// # Errors
/// Returns `Err(AnnotateError)` only for fatal errors:
/// - PDF or source file not found / permission denied
/// - Not a PDF, not an annotation store
/// - Malformed store (unless `best_effort`)
/// - Encrypted PDF without the right password
pub async fn annotate(
    pdf_path: impl AsRef<Path>,
    sources: &AnnotationSources,
    config: &AnnotateConfig,
) -> Result<AnnotationOutput, AnnotateError> {
    let total_start = Instant::now();
    let pdf_path = pdf_path.as_ref();
    info!("Recovering annotations for {}", pdf_path.display());

    // ── Step 1: Validate input ───────────────────────────────────────────
    input::check_pdf(pdf_path)?;

    // ── Step 2: Read annotation sources ──────────────────────────────────
    let records = read_annotations(pdf_path, sources, config)?;
    info!("Read {} annotation record(s)", records.len());

    // ── Step 3: Load the pages that carry annotations ────────────────────
    let load_start = Instant::now();
    let total_pages = pdf::page_count(pdf_path, config.password.as_deref()).await?;
    let needed = pages_needed(&records, total_pages, config);
    debug!("Loading {} of {} pages", needed.len(), total_pages);
    let doc = pdf::load_document(pdf_path, config.password.as_deref(), &needed).await?;
    let load_duration_ms = load_start.elapsed().as_millis() as u64;

    // ── Step 4: Locate and unify ─────────────────────────────────────────
    let mut output = resolve_annotations_concurrent(records, Arc::new(doc), config).await?;
    output.stats.load_duration_ms = load_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Recovered {} annotation(s) ({} unlocated) in {}ms",
        output.resolved.len(),
        output.unlocated.len(),
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Recover annotations and write an annotated copy of the PDF.
///
/// Uses atomic write (temp file in the target directory, then rename) to
/// prevent partial files.
pub async fn annotate_to_file(
    pdf_path: impl AsRef<Path>,
    sources: &AnnotationSources,
    output_path: impl AsRef<Path>,
    config: &AnnotateConfig,
) -> Result<(AnnotationOutput, PlacementSummary), AnnotateError> {
    let pdf_path = pdf_path.as_ref().to_path_buf();
    let path = output_path.as_ref().to_path_buf();
    let output = annotate(&pdf_path, sources, config).await?;

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AnnotateError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            parent.to_path_buf()
        }
        None => PathBuf::from("."),
    };

    // Removed on drop if anything below fails.
    let tmp = tempfile::Builder::new()
        .suffix(".pdf.tmp")
        .tempfile_in(&dir)
        .map_err(|e| AnnotateError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    let tmp_path = tmp.path().to_path_buf();
    let resolved = output.resolved.clone();
    let password = config.password.clone();
    let color = config.highlight_color;
    let summary = tokio::task::spawn_blocking(move || {
        pdf::write_annotated_blocking(&pdf_path, password.as_deref(), &resolved, color, &tmp_path)
    })
    .await
    .map_err(|e| AnnotateError::Internal(format!("Write task panicked: {}", e)))??;

    tmp.persist(&path).map_err(|e| AnnotateError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok((output, summary))
}

/// Synchronous wrapper around [`annotate`].
///
/// Creates a temporary tokio runtime internally.
pub fn annotate_sync(
    pdf_path: impl AsRef<Path>,
    sources: &AnnotationSources,
    config: &AnnotateConfig,
) -> Result<AnnotationOutput, AnnotateError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| AnnotateError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(annotate(pdf_path, sources, config))
}

/// List what the annotation sources contain without locating anything.
///
/// Needs pdfium only for the page count.
pub async fn inspect(
    pdf_path: impl AsRef<Path>,
    sources: &AnnotationSources,
    config: &AnnotateConfig,
) -> Result<InspectReport, AnnotateError> {
    let pdf_path = pdf_path.as_ref();
    input::check_pdf(pdf_path)?;
    let records = read_annotations(pdf_path, sources, config)?;
    let total_pages = pdf::page_count(pdf_path, config.password.as_deref()).await?;
    Ok(InspectReport::new(total_pages, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSelection;
    use crate::document::InMemoryDocument;
    use crate::model::{PageGeometry, SourceFormat};

    fn doc() -> InMemoryDocument {
        InMemoryDocument::new(3)
            .with_page(PageGeometry::full(0, 612.0, 792.0), PageText::layout(0, "alpha", 72.0, 72.0, 6.0, 14.0))
            .with_page(PageGeometry::full(2, 612.0, 792.0), PageText::layout(2, "gamma", 72.0, 72.0, 6.0, 14.0))
    }

    #[test]
    fn plan_drops_out_of_range_and_unselected() {
        let records = vec![
            RawAnnotationRecord::new(AnnotationKind::Bookmark, 0, SourceFormat::KrdsCache),
            RawAnnotationRecord::new(AnnotationKind::Bookmark, 2, SourceFormat::KrdsCache),
            RawAnnotationRecord::new(AnnotationKind::Bookmark, 9, SourceFormat::KrdsCache),
        ];
        let config = AnnotateConfig::builder().pages(PageSelection::Single(1)).build().unwrap();
        let p = plan(records, 3, &config);
        assert_eq!(p.pages.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(p.skipped, 2);
        assert_eq!(
            p.issues,
            vec![AnnotationIssue::PageOutOfRange { page: 9, total: 3 }]
        );
    }

    #[test]
    fn bookmark_pages_skip_text_loading() {
        // Page 2 has no highlight, so its text is never read; page 1 is not loaded at all.
        let d = doc();
        let r = RawAnnotationRecord::new(AnnotationKind::Bookmark, 2, SourceFormat::KrdsCache);
        let out = process_page(2, vec![r], &d, &LocateOptions::default()).unwrap();
        assert_eq!(out.located.len(), 1);
        assert!(process_page(1, vec![], &d, &LocateOptions::default()).is_err());
    }

    #[test]
    fn needed_pages_follow_selection() {
        let records = vec![
            RawAnnotationRecord::new(AnnotationKind::Note, 2, SourceFormat::KrdsCache),
            RawAnnotationRecord::new(AnnotationKind::Note, 0, SourceFormat::KrdsCache),
            RawAnnotationRecord::new(AnnotationKind::Note, 0, SourceFormat::KrdsCache),
        ];
        let all = AnnotateConfig::default();
        assert_eq!(pages_needed(&records, 3, &all), vec![0, 2]);
        let first = AnnotateConfig::builder().pages(PageSelection::Range(1, 2)).build().unwrap();
        assert_eq!(pages_needed(&records, 3, &first), vec![0]);
    }
}
