//! Configuration types for annotation recovery.
//!
//! All recovery behaviour is controlled through [`AnnotateConfig`], built via
//! its [`AnnotateConfigBuilder`]. The pure pipeline stages never read the
//! whole config; they receive the narrow option structs
//! ([`LocateOptions`], [`UnifyOptions`]) derived from it, so each stage can be
//! tested with explicit thresholds and no hidden module-level constants.

use crate::error::AnnotateError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for one annotation recovery run.
///
/// Built via [`AnnotateConfig::builder()`] or using
/// [`AnnotateConfig::default()`].
///
/// # Example
/// ```rust
/// use kindle2pdf::{AnnotateConfig, CoLocation};
///
/// let config = AnnotateConfig::builder()
///     .co_location(CoLocation::Exact { tolerance: 0.15 })
///     .fuzzy_threshold(0.9)
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnnotateConfig {
    /// Rule deciding when a note sits "on" a highlight. Default:
    /// [`CoLocation::Anchored`] with a 5pt tolerance.
    pub co_location: CoLocation,

    /// Two records of the same kind on the same page whose start points are
    /// within this many points on both axes are duplicates. Default: 0.15.
    pub duplicate_epsilon: f32,

    /// Minimum similarity (0–1) a fuzzy window must reach. Default: 0.85.
    pub fuzzy_threshold: f32,

    /// Fuzzy matching only runs for normalized text longer than this many
    /// characters. Default: 50.
    ///
    /// Short strings produce too many accidental near-matches on a dense page.
    pub fuzzy_min_len: usize,

    /// Prefix retries are only attempted with prefixes of at least this many
    /// characters. Default: 12.
    pub prefix_min_len: usize,

    /// What to do with a highlight that has no recorded text. Default:
    /// [`EmptyTextPolicy::UsePosition`].
    pub empty_text: EmptyTextPolicy,

    /// Number of pages located concurrently. Default: 4.
    pub concurrency: usize,

    /// Colour of placed highlight annotations. Default: yellow.
    pub highlight_color: HighlightColor,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: All pages.
    pub pages: PageSelection,

    /// Keep the records decoded before a structural store error instead of
    /// failing the run. Default: false.
    pub best_effort: bool,

    /// Characters of page text kept on each side of the expected position in
    /// unlocated-annotation diagnostics. Default: 60.
    pub context_chars: usize,

    /// Optional progress callback, invoked per page.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            co_location: CoLocation::default(),
            duplicate_epsilon: 0.15,
            fuzzy_threshold: 0.85,
            fuzzy_min_len: 50,
            prefix_min_len: 12,
            empty_text: EmptyTextPolicy::default(),
            concurrency: 4,
            highlight_color: HighlightColor::default(),
            password: None,
            pages: PageSelection::default(),
            best_effort: false,
            context_chars: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnnotateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotateConfig")
            .field("co_location", &self.co_location)
            .field("duplicate_epsilon", &self.duplicate_epsilon)
            .field("fuzzy_threshold", &self.fuzzy_threshold)
            .field("fuzzy_min_len", &self.fuzzy_min_len)
            .field("prefix_min_len", &self.prefix_min_len)
            .field("empty_text", &self.empty_text)
            .field("concurrency", &self.concurrency)
            .field("highlight_color", &self.highlight_color)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pages", &self.pages)
            .field("best_effort", &self.best_effort)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn AnnotationProgressCallback>"),
            )
            .finish()
    }
}

impl AnnotateConfig {
    /// Create a new builder for `AnnotateConfig`.
    pub fn builder() -> AnnotateConfigBuilder {
        AnnotateConfigBuilder {
            config: Self::default(),
        }
    }

    /// Options consumed by [`crate::pipeline::locate`].
    pub fn locate_options(&self) -> LocateOptions {
        LocateOptions {
            fuzzy_threshold: self.fuzzy_threshold,
            fuzzy_min_len: self.fuzzy_min_len,
            prefix_min_len: self.prefix_min_len,
            empty_text: self.empty_text,
            context_chars: self.context_chars,
        }
    }

    /// Options consumed by [`crate::pipeline::unify`].
    pub fn unify_options(&self) -> UnifyOptions {
        UnifyOptions {
            co_location: self.co_location,
            duplicate_epsilon: self.duplicate_epsilon,
        }
    }
}

/// Builder for [`AnnotateConfig`].
#[derive(Debug)]
pub struct AnnotateConfigBuilder {
    config: AnnotateConfig,
}

impl AnnotateConfigBuilder {
    pub fn co_location(mut self, policy: CoLocation) -> Self {
        self.config.co_location = policy;
        self
    }

    pub fn duplicate_epsilon(mut self, eps: f32) -> Self {
        self.config.duplicate_epsilon = eps.max(0.0);
        self
    }

    pub fn fuzzy_threshold(mut self, t: f32) -> Self {
        self.config.fuzzy_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn fuzzy_min_len(mut self, n: usize) -> Self {
        self.config.fuzzy_min_len = n;
        self
    }

    pub fn prefix_min_len(mut self, n: usize) -> Self {
        self.config.prefix_min_len = n.max(1);
        self
    }

    pub fn empty_text(mut self, policy: EmptyTextPolicy) -> Self {
        self.config.empty_text = policy;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn highlight_color(mut self, color: HighlightColor) -> Self {
        self.config.highlight_color = color;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn best_effort(mut self, v: bool) -> Self {
        self.config.best_effort = v;
        self
    }

    pub fn context_chars(mut self, n: usize) -> Self {
        self.config.context_chars = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnnotateConfig, AnnotateError> {
        let c = &self.config;
        if !(0.0..=1.0).contains(&c.fuzzy_threshold) {
            return Err(AnnotateError::InvalidConfig(format!(
                "Fuzzy threshold must be 0–1, got {}",
                c.fuzzy_threshold
            )));
        }
        let tol = c.co_location.tolerance();
        if !tol.is_finite() || tol < 0.0 {
            return Err(AnnotateError::InvalidConfig(format!(
                "Co-location tolerance must be a non-negative number, got {tol}"
            )));
        }
        if c.concurrency == 0 {
            return Err(AnnotateError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Stage options ────────────────────────────────────────────────────────

/// Thresholds for the text locator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocateOptions {
    pub fuzzy_threshold: f32,
    pub fuzzy_min_len: usize,
    pub prefix_min_len: usize,
    pub empty_text: EmptyTextPolicy,
    pub context_chars: usize,
}

impl Default for LocateOptions {
    fn default() -> Self {
        AnnotateConfig::default().locate_options()
    }
}

/// Tolerances for the unifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnifyOptions {
    pub co_location: CoLocation,
    pub duplicate_epsilon: f32,
}

impl Default for UnifyOptions {
    fn default() -> Self {
        AnnotateConfig::default().unify_options()
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// When a note counts as attached to a highlight.
///
/// The reader stores a note at the position of the passage it annotates, but
/// two regimes show up in real stores: notes recorded at exactly the
/// highlight's start, and notes recorded at the highlight's end glyph with a
/// few points of drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CoLocation {
    /// Note point within `tolerance` (both axes) of the highlight's start
    /// or end point. (default, 5pt)
    Anchored { tolerance: f32 },
    /// Note point within `tolerance` (both axes) of the highlight's start
    /// point only.
    Exact { tolerance: f32 },
}

impl Default for CoLocation {
    fn default() -> Self {
        CoLocation::Anchored { tolerance: 5.0 }
    }
}

impl CoLocation {
    pub fn tolerance(&self) -> f32 {
        match self {
            CoLocation::Anchored { tolerance } | CoLocation::Exact { tolerance } => *tolerance,
        }
    }
}

/// Handling of highlights that carry no recorded text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmptyTextPolicy {
    /// Build per-line quads from the page glyphs between the recorded start
    /// and end points. (default)
    #[default]
    UsePosition,
    /// Report the highlight as unlocated.
    Unlocated,
}

/// RGBA colour for placed highlights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Default for HighlightColor {
    fn default() -> Self {
        Self {
            r: 255,
            g: 235,
            b: 59,
            a: 255,
        }
    }
}

/// Specifies which pages of the PDF receive annotations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// All pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
