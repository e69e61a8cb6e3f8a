//! Progress-callback trait for per-page location events.
//!
//! Inject an [`Arc<dyn AnnotationProgressCallback>`] via
//! [`crate::config::AnnotateConfigBuilder::progress_callback`] to receive
//! events as the pipeline locates each page's annotations.
//!
//! # Example
//!
//! ```rust
//! use kindle2pdf::{AnnotationProgressCallback, AnnotateConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     located: Arc<AtomicUsize>,
//! }
//!
//! impl AnnotationProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, located: usize, unlocated: usize) {
//!         self.located.fetch_add(located, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} located, {} missed", page_num, total_pages, located, unlocated);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     located: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = AnnotateConfig::builder()
//!     .progress_callback(counter as Arc<dyn AnnotationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it locates each page's annotations.
///
/// Implementations must be `Send + Sync`: pages are located concurrently on
/// blocking worker threads, so `on_page_start` and `on_page_complete` may be
/// called from different threads at once. All methods default to no-ops.
pub trait AnnotationProgressCallback: Send + Sync {
    /// Called once before any page is located.
    ///
    /// # Arguments
    /// * `total_pages` — number of pages that carry at least one annotation
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page's text is loaded.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages being processed
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when all annotations of a page have been through the locator.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages being processed
    /// * `located`     — annotations with quads or a placement point
    /// * `unlocated`   — annotations whose text was not found
    fn on_page_complete(&self, page_num: usize, total_pages: usize, located: usize, unlocated: usize) {
        let _ = (page_num, total_pages, located, unlocated);
    }

    /// Called once after unification.
    ///
    /// # Arguments
    /// * `resolved`  — annotations ready for placement
    /// * `unlocated` — annotations reported as unlocated
    fn on_run_complete(&self, resolved: usize, unlocated: usize) {
        let _ = (resolved, unlocated);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl AnnotationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::AnnotateConfig`].
pub type ProgressCallback = Arc<dyn AnnotationProgressCallback>;
