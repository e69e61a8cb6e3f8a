//! pdfium adapter: page geometry and glyphs in, annotations out.
//!
//! ## Coordinate spaces
//!
//! pdfium reports everything in PDF user space: bottom-left origin, y grows
//! upwards, relative to the media box. The pipeline works top-left, y down,
//! relative to the crop box (the visible region). Reading converts
//!
//! ```text
//! x' = x − crop.left        y' = crop.top − y
//! ```
//!
//! and placement applies the inverse.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with internal global state; every call happens on
//! a blocking-pool thread so Tokio workers never stall on it.

use crate::config::HighlightColor;
use crate::document::{InMemoryDocument, PageText};
use crate::error::AnnotateError;
use crate::model::{PageGeometry, Point, Quad, ResolvedAnnotation};
use crate::placement::{place_all, PlacementSink, PlacementSummary};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming a pdfium shared library (or its directory).
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Side length, in points, of the icon rectangle of a placed note.
const NOTE_ICON_SIZE: f32 = 18.0;

/// Bind to pdfium: `$PDFIUM_LIB_PATH` first, then the working directory,
/// then the system library search path.
pub fn bind_pdfium() -> Result<Pdfium, AnnotateError> {
    let explicit = std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from);
    let bindings = match explicit {
        Some(path) => {
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(&lib).map_err(|e| {
                AnnotateError::PdfiumBindingFailed(format!("{}: {:?}", lib.display(), e))
            })?
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| AnnotateError::PdfiumBindingFailed(format!("{:?}", e)))?,
    };
    Ok(Pdfium::new(bindings))
}

/// Open a PDF, telling password problems apart from corruption.
fn open<'a>(pdfium: &'a Pdfium, pdf_path: &Path, password: Option<&'a str>) -> Result<PdfDocument<'a>, AnnotateError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                AnnotateError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                AnnotateError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            AnnotateError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn page_at<'a>(document: &PdfDocument<'a>, idx: usize) -> Result<PdfPage<'a>, AnnotateError> {
    let index = u16::try_from(idx).map_err(|_| AnnotateError::PageReadFailed {
        page: idx + 1,
        detail: "page index exceeds pdfium's limit".into(),
    })?;
    document.pages().get(index).map_err(|e| AnnotateError::PageReadFailed {
        page: idx + 1,
        detail: format!("{:?}", e),
    })
}

// ── Reading ──────────────────────────────────────────────────────────────

/// Visible (crop) and full (media) boxes of a page as
/// `(left, bottom, right, top)` in user space.
struct PageBoxes {
    media: (f32, f32, f32, f32),
    crop: (f32, f32, f32, f32),
}

fn rect_edges(r: &PdfRect) -> (f32, f32, f32, f32) {
    (r.left().value, r.bottom().value, r.right().value, r.top().value)
}

fn page_boxes(page: &PdfPage) -> PageBoxes {
    let fallback = (0.0, 0.0, page.width().value, page.height().value);
    let boundaries = page.boundaries();
    let media = boundaries
        .media()
        .map(|b| rect_edges(&b.bounds))
        .unwrap_or(fallback);
    let crop = boundaries.crop().map(|b| rect_edges(&b.bounds)).unwrap_or(media);
    PageBoxes { media, crop }
}

fn geometry_of(idx: usize, boxes: &PageBoxes) -> PageGeometry {
    let (m_left, _, _, m_top) = boxes.media;
    let (c_left, c_bottom, c_right, c_top) = boxes.crop;
    PageGeometry {
        page: idx,
        offset_x: c_left - m_left,
        offset_y: m_top - c_top,
        width: c_right - c_left,
        height: c_top - c_bottom,
    }
}

fn read_page(document: &PdfDocument, idx: usize) -> Result<(PageGeometry, PageText), AnnotateError> {
    let page = page_at(document, idx)?;
    let boxes = page_boxes(&page);
    let geometry = geometry_of(idx, &boxes);
    let (c_left, _, _, c_top) = boxes.crop;

    let text = page.text().map_err(|e| AnnotateError::PageReadFailed {
        page: idx + 1,
        detail: format!("{:?}", e),
    })?;
    let glyphs: Vec<(char, f32, f32, f32, f32)> = text
        .chars()
        .iter()
        .filter_map(|c| {
            let ch = c.unicode_char()?;
            let bounds = c.loose_bounds().ok()?;
            let (l, b, r, t) = rect_edges(&bounds);
            Some((ch, l - c_left, c_top - t, r - c_left, c_top - b))
        })
        .collect();
    let page_text = PageText::from_glyphs(idx, glyphs);
    debug!(
        "Page {}: {} glyph(s), visible {:.1}×{:.1} at ({:.1}, {:.1})",
        idx + 1,
        page_text.chars.len(),
        geometry.width,
        geometry.height,
        geometry.offset_x,
        geometry.offset_y
    );
    Ok((geometry, page_text))
}

/// Load the geometry and glyphs of `pages` (0-based) into memory.
///
/// Pages past the end of the document are skipped with a warning.
pub fn load_document_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    pages: &[usize],
) -> Result<InMemoryDocument, AnnotateError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, pdf_path, password)?;
    let total_pages = document.pages().len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let mut doc = InMemoryDocument::new(total_pages);
    for &idx in pages {
        if idx >= total_pages {
            warn!(
                "Skipping page {} (out of range, total={})",
                idx + 1,
                total_pages
            );
            continue;
        }
        let (geometry, text) = read_page(&document, idx)?;
        doc.insert_page(geometry, text);
    }
    Ok(doc)
}

/// Async wrapper around [`load_document_blocking`].
pub async fn load_document(
    pdf_path: &Path,
    password: Option<&str>,
    pages: &[usize],
) -> Result<InMemoryDocument, AnnotateError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);
    let pages = pages.to_vec();
    tokio::task::spawn_blocking(move || load_document_blocking(&path, password.as_deref(), &pages))
        .await
        .map_err(|e| AnnotateError::Internal(format!("Load task panicked: {}", e)))?
}

/// Number of pages in a PDF.
pub async fn page_count(pdf_path: &Path, password: Option<&str>) -> Result<usize, AnnotateError> {
    let path = pdf_path.to_path_buf();
    let password = password.map(str::to_string);
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = open(&pdfium, &path, password.as_deref())?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| AnnotateError::Internal(format!("Page count task panicked: {}", e)))?
}

// ── Writing ──────────────────────────────────────────────────────────────

/// Writes annotations into an open pdfium document.
pub struct PdfiumPlacementSink<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumPlacementSink<'a> {
    pub fn new(document: PdfDocument<'a>) -> Self {
        Self { document }
    }

    /// Save the annotated document.
    pub fn save(self, path: &Path) -> Result<(), AnnotateError> {
        self.document
            .save_to_file(path)
            .map_err(|e| AnnotateError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: std::io::Error::other(format!("{:?}", e)),
            })
    }

    /// The page plus its crop box's top-left corner in user space.
    fn page(&self, idx: usize) -> Result<(PdfPage<'a>, f32, f32), AnnotateError> {
        let page = page_at(&self.document, idx)?;
        let (c_left, _, _, c_top) = page_boxes(&page).crop;
        Ok((page, c_left, c_top))
    }

    fn place_icon(&mut self, idx: usize, at: Point, text: &str) -> Result<(), AnnotateError> {
        let (mut page, c_left, c_top) = self.page(idx)?;
        let failed = |e: PdfiumError| AnnotateError::PlacementFailed {
            page: idx + 1,
            detail: format!("{:?}", e),
        };
        let mut annotation = page
            .annotations_mut()
            .create_text_annotation(text)
            .map_err(failed)?;
        let left = c_left + at.x;
        let top = c_top - at.y;
        annotation
            .set_bounds(PdfRect::new_from_values(top - NOTE_ICON_SIZE, left, top, left + NOTE_ICON_SIZE))
            .map_err(failed)?;
        Ok(())
    }
}

impl PlacementSink for PdfiumPlacementSink<'_> {
    fn place_highlight(
        &mut self,
        idx: usize,
        quads: &[Quad],
        color: HighlightColor,
        comment: Option<&str>,
    ) -> Result<(), AnnotateError> {
        let (mut page, c_left, c_top) = self.page(idx)?;
        let failed = |e: PdfiumError| AnnotateError::PlacementFailed {
            page: idx + 1,
            detail: format!("{:?}", e),
        };
        let mut annotation = page
            .annotations_mut()
            .create_highlight_annotation()
            .map_err(failed)?;

        let (mut min_l, mut min_b) = (f32::INFINITY, f32::INFINITY);
        let (mut max_r, mut max_t) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for quad in quads {
            let (l, t, r, b) = quad.bounds();
            let rect = PdfRect::new_from_values(c_top - b, c_left + l, c_top - t, c_left + r);
            annotation
                .attachment_points_mut()
                .create_attachment_point_at_end(PdfQuadPoints::from_rect(&rect))
                .map_err(failed)?;
            min_l = min_l.min(c_left + l);
            min_b = min_b.min(c_top - b);
            max_r = max_r.max(c_left + r);
            max_t = max_t.max(c_top - t);
        }
        annotation
            .set_bounds(PdfRect::new_from_values(min_b, min_l, max_t, max_r))
            .map_err(failed)?;
        annotation
            .set_stroke_color(PdfColor::new(color.r, color.g, color.b, color.a))
            .map_err(failed)?;
        if let Some(text) = comment {
            annotation.set_contents(text).map_err(failed)?;
        }
        Ok(())
    }

    fn place_note(&mut self, idx: usize, at: Point, text: &str) -> Result<(), AnnotateError> {
        self.place_icon(idx, at, text)
    }

    fn place_bookmark(&mut self, idx: usize, at: Point, label: &str) -> Result<(), AnnotateError> {
        self.place_icon(idx, at, label)
    }
}

/// Open `pdf_path`, place every resolved annotation and save the result to
/// `output_path`.
pub fn write_annotated_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    resolved: &[ResolvedAnnotation],
    color: HighlightColor,
    output_path: &Path,
) -> Result<PlacementSummary, AnnotateError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, pdf_path, password)?;
    let mut sink = PdfiumPlacementSink::new(document);
    let summary = place_all(&mut sink, resolved, color)?;
    sink.save(output_path)?;
    info!(
        "Wrote {} annotation(s) to {}",
        summary.highlights + summary.notes + summary.bookmarks,
        output_path.display()
    );
    Ok(summary)
}
