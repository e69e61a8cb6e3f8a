//! # kindle2pdf
//!
//! Recover e-reader highlights, notes and bookmarks and put them back on
//! the original PDF.
//!
//! ## Why this crate?
//!
//! When a PDF is read on a Kindle, the annotations never make it into the
//! file. They live in the device's own binary store (`<book>.sdr/*.pds`,
//! `*.pdt`) in device units, and in a plain-text `My Clippings.txt` export
//! that knows the words but not where they are. This crate decodes both,
//! maps every position onto the PDF's visible page region, finds the exact
//! glyphs of each highlighted passage, and merges notes into the highlights
//! they belong to, so any standard viewer shows them in place.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .pds/.pdt + My Clippings.txt
//!  │
//!  ├─ 1. Read     binary store + clippings → raw records
//!  ├─ 2. Merge    clippings text onto position-only records
//!  ├─ 3. Map      device units → points, crop-box corrected, clamped
//!  ├─ 4. Locate   exact → prefix → fuzzy text search → per-line quads
//!  ├─ 5. Unify    dedupe, fold notes into highlights, order by page/y/x
//!  └─ 6. Place    pdfium highlight/text annotations, or JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kindle2pdf::{annotate_to_file, AnnotateConfig, AnnotationSources};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sources = AnnotationSources::new().store("book.sdr");
//!     let config = AnnotateConfig::default();
//!     let (output, _) = annotate_to_file("book.pdf", &sources, "book.annotated.pdf", &config).await?;
//!     eprintln!(
//!         "{} placed, {} not found",
//!         output.resolved.len(),
//!         output.unlocated.len()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Using the core without pdfium
//!
//! [`resolve_annotations`] takes any [`DocumentSource`]; tests and other
//! PDF backends can feed it pages directly:
//!
//! ```rust
//! use kindle2pdf::{resolve_annotations, AnnotateConfig, InMemoryDocument, PageGeometry, PageText};
//!
//! let doc = InMemoryDocument::new(1).with_page(
//!     PageGeometry::full(0, 612.0, 792.0),
//!     PageText::layout(0, "Call me Ishmael.", 72.0, 72.0, 6.0, 14.0),
//! );
//! let output = resolve_annotations(Vec::new(), &doc, &AnnotateConfig::default()).unwrap();
//! assert!(output.resolved.is_empty());
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `kindle2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! kindle2pdf = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod annotate;
pub mod config;
pub mod document;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod placement;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use annotate::{
    annotate, annotate_sync, annotate_to_file, inspect, read_annotations, resolve_annotations,
    resolve_annotations_concurrent, AnnotationSources,
};
pub use config::{
    AnnotateConfig, AnnotateConfigBuilder, CoLocation, EmptyTextPolicy, HighlightColor, LocateOptions,
    PageSelection, UnifyOptions,
};
pub use document::{DocumentSource, InMemoryDocument, PageChar, PageText};
pub use error::{AnnotateError, AnnotationIssue, FormatError};
pub use model::{
    AnnotationKind, DeviceRect, LocatedAnnotation, MappedAnnotation, MatchKind, PageGeometry, Point, Quad,
    RawAnnotationRecord, ResolvedAnnotation, SourceFormat, UnlocatedAnnotation,
};
pub use output::{AnnotationOutput, AnnotationStats, InspectReport};
pub use placement::{place_all, JsonPlacementSink, Placement, PlacementSink, PlacementSummary};
pub use progress::{AnnotationProgressCallback, NoopProgressCallback, ProgressCallback};
