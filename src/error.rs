//! Error types for the kindle2pdf library.
//!
//! Three distinct types reflect three distinct failure modes:
//!
//! * [`AnnotateError`] — **Fatal**: the run cannot proceed at all (missing
//!   PDF, wrong password, unreadable store). Returned as
//!   `Err(AnnotateError)` from the top-level `annotate*` functions.
//!
//! * [`FormatError`] — **Fatal per file**: a store or clippings file is
//!   structurally broken. Wrapped in [`AnnotateError::Format`] by the
//!   orchestrator; in best-effort mode the records decoded before the
//!   failure point are still used.
//!
//! * [`AnnotationIssue`] — **Non-fatal**: a single annotation needed a
//!   coordinate clamp, or two highlights collided. Stored inside
//!   [`crate::output::AnnotationOutput`] so callers can report them after the
//!   run instead of losing the whole document to one odd record.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the kindle2pdf library.
///
/// Annotation-level anomalies use [`AnnotationIssue`] and are stored in
/// [`crate::output::AnnotationOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum AnnotateError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The file is neither a reader data store nor a clippings export.
    #[error("'{path}' is not an annotation store (.pds/.pdt) or a 'My Clippings.txt' export")]
    UnknownStore { path: PathBuf },

    /// A store or clippings file is structurally broken.
    #[error("Malformed annotation file '{path}': {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Failed to read page {page}: {detail}")]
    PageReadFailed { page: usize, detail: String },

    /// pdfium-render refused to create an annotation.
    #[error("Failed to place annotation on page {page}: {detail}")]
    PlacementFailed { page: usize, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read an input file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
You can:\n\
  • Install pdfium system-wide (libpdfium.so / libpdfium.dylib / pdfium.dll).\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structural failure while decoding a store or clippings file.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    /// The first eight bytes are not the reader data store signature.
    #[error("bad signature: expected 00 00 00 00 00 1A B1 26, found {found:02X?}")]
    BadSignature { found: Vec<u8> },

    /// The header version value is not `1`.
    #[error("unsupported store version {found}")]
    UnsupportedVersion { found: String },

    /// The buffer ended in the middle of a value.
    #[error("truncated at byte {offset}: need {needed} more byte(s)")]
    Truncated { offset: usize, needed: usize },

    /// A value tag outside the known datatype set.
    #[error("unknown datatype tag {tag} at byte {offset}")]
    UnknownDatatype { tag: i8, offset: usize },

    /// A boolean byte other than 0 or 1.
    #[error("invalid boolean byte {value} at byte {offset}")]
    InvalidBoolean { value: i8, offset: usize },

    /// String payload is not valid UTF-8.
    #[error("invalid UTF-8 string at byte {offset}")]
    InvalidUtf8 { offset: usize },

    /// A value of the wrong shape where the layout requires a specific one.
    #[error("expected {expected} in '{context}', found {found}")]
    UnexpectedValue {
        context: String,
        expected: &'static str,
        found: String,
    },

    /// A clippings stanza is not terminated by the `==========` separator.
    #[error("clippings stanza starting at line {line} is missing its '==========' separator")]
    MissingSeparator { line: usize },
}

/// A non-fatal anomaly for a single annotation.
///
/// Stored in [`crate::output::AnnotationOutput::issues`]. The run continues.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum AnnotationIssue {
    /// A mapped coordinate fell outside the visible region and was clamped.
    #[error("Page {page}: position ({x:.2}, {y:.2}) clamped to ({clamped_x:.2}, {clamped_y:.2})")]
    GeometryMismatch {
        page: usize,
        x: f32,
        y: f32,
        clamped_x: f32,
        clamped_y: f32,
    },

    /// Two highlights share the same location; both were kept.
    #[error("Page {page}: highlights at ({x:.2}, {y:.2}) and ({other_x:.2}, {other_y:.2}) are co-located; both kept")]
    UnificationConflict {
        page: usize,
        x: f32,
        y: f32,
        other_x: f32,
        other_y: f32,
    },

    /// A record points at a page the document does not have.
    #[error("Page {page} is out of range (document has {total} pages); record skipped")]
    PageOutOfRange { page: usize, total: usize },
}

impl AnnotationIssue {
    /// 0-based page the issue refers to.
    pub fn page(&self) -> usize {
        match self {
            AnnotationIssue::GeometryMismatch { page, .. }
            | AnnotationIssue::UnificationConflict { page, .. }
            | AnnotationIssue::PageOutOfRange { page, .. } => *page,
        }
    }
}
