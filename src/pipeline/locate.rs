//! Text location: find a highlight's recorded text among a page's glyphs.
//!
//! ## Data Flow
//!
//! ```text
//! PageText ──▶ NormalizedPage (built once per page, reused per annotation)
//!                   │
//! recorded text ──▶ normalize ──▶ ExactMatch ─▶ PrefixMatch ─▶ FuzzyMatch
//!                                      first success wins │
//!                                                         ▼
//!                          char range ──▶ one quad per physical line
//! ```
//!
//! Each strategy is an independent [`MatchStrategy`]; [`default_strategies`]
//! assembles the chain from [`LocateOptions`]. A failed match is not an
//! error: the annotation comes back as an [`UnlocatedAnnotation`] carrying the
//! recorded text and the page text around where it was expected.
//!
//! Quads are built per line because a wrapped highlight can start to the
//! right of where it ends (`start.x > end.x`); a single bounding box would
//! cover unrelated text on the lines in between.

use crate::config::{EmptyTextPolicy, LocateOptions};
use crate::document::{PageChar, PageText};
use crate::model::{AnnotationKind, LocatedAnnotation, MappedAnnotation, MatchKind, Point, Quad, UnlocatedAnnotation};
use crate::pipeline::normalize::{normalize, normalize_traced, TracedText};
use std::ops::Range;
use tracing::debug;

/// Horizontal slack, in points, when selecting glyphs by recorded position.
const POSITION_SLACK: f32 = 0.5;

/// A horizontal gap wider than this many glyph widths separates columns.
const COLUMN_GAP: f32 = 3.0;

/// How far, in points, a recorded point may sit outside a column's line.
const COLUMN_SLACK: f32 = 3.0;

// ── Normalized page ──────────────────────────────────────────────────────

/// A page's normalized text with a trace back to its glyphs.
///
/// Build once per page; every lookup is read-only, so one instance can
/// serve all annotations of the page.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    page: usize,
    glyphs: Vec<PageChar>,
    traced: TracedText,
    text: String,
    /// Byte offset of every char of `text`, plus `text.len()` at the end.
    byte_offsets: Vec<usize>,
}

impl NormalizedPage {
    pub fn new(page_text: &PageText) -> Self {
        let glyphs = page_text.chars.clone();
        let mut stream = Vec::with_capacity(glyphs.len() + 64);
        for (i, g) in glyphs.iter().enumerate() {
            if i > 0 && glyphs[i - 1].line != g.line {
                stream.push(('\n', None));
            }
            stream.push((g.ch, Some(i)));
        }
        let traced = normalize_traced(stream);
        let text = traced.text();
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        byte_offsets.push(text.len());
        Self {
            page: page_text.page,
            glyphs,
            traced,
            text,
            byte_offsets,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// The normalized page text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Normalized length in characters.
    pub fn len(&self) -> usize {
        self.traced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traced.is_empty()
    }

    pub fn chars(&self) -> &[char] {
        &self.traced.chars
    }

    fn char_index_of_byte(&self, byte: usize) -> usize {
        self.byte_offsets.partition_point(|&b| b < byte)
    }

    /// Every occurrence of an already-normalized needle, as char ranges.
    pub fn find_all(&self, needle: &str) -> Vec<Range<usize>> {
        if needle.is_empty() {
            return Vec::new();
        }
        let needle_chars = needle.chars().count();
        let mut out = Vec::new();
        let mut from = 0;
        while let Some(pos) = self.text[from..].find(needle) {
            let byte = from + pos;
            let start = self.char_index_of_byte(byte);
            out.push(start..start + needle_chars);
            // Advance one char so overlapping occurrences are found too.
            from = self.byte_offsets[start + 1];
            if from >= self.text.len() {
                break;
            }
        }
        out
    }

    /// Quads of every occurrence of `substring` (normalized first).
    pub fn search_quads(&self, substring: &str) -> Vec<Vec<Quad>> {
        self.find_all(&normalize(substring))
            .into_iter()
            .map(|r| self.quads_for_range(r))
            .filter(|q| !q.is_empty())
            .collect()
    }

    /// Top-left corner of the first glyph in a char range.
    pub fn range_origin(&self, range: &Range<usize>) -> Option<Point> {
        self.traced.origins[range.start.min(self.len())..range.end.min(self.len())]
            .iter()
            .flatten()
            .next()
            .map(|&g| Point::new(self.glyphs[g].left, self.glyphs[g].top))
    }

    /// One quad per physical line covered by the char range.
    pub fn quads_for_range(&self, range: Range<usize>) -> Vec<Quad> {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        let mut glyphs: Vec<usize> = self.traced.origins[start..end].iter().flatten().copied().collect();
        glyphs.dedup();
        quads_from_glyphs(&self.glyphs, glyphs)
    }

    /// Normalized index of the glyph closest to `p`.
    pub fn index_near(&self, p: Point) -> Option<usize> {
        self.traced
            .origins
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.map(|g| (i, g)))
            .min_by(|(_, a), (_, b)| {
                let da = Point::new(self.glyphs[*a].left, self.glyphs[*a].top).distance(p);
                let db = Point::new(self.glyphs[*b].left, self.glyphs[*b].top).distance(p);
                da.total_cmp(&db)
            })
            .map(|(i, _)| i)
    }

    /// Up to `radius` chars of normalized text on each side of `center`.
    pub fn context_around(&self, center: usize, radius: usize) -> String {
        let chars = self.chars();
        let center = center.min(chars.len());
        let from = center.saturating_sub(radius);
        let to = (center + radius).min(chars.len());
        chars[from..to].iter().collect()
    }

    /// Per-line quads covering the glyphs between two recorded points:
    /// the start line from `start.x` rightwards, whole lines in between,
    /// and the end line up to the glyph at `end.x`.
    ///
    /// Lines are split at column gutters, so on a multi-column page each
    /// point snaps to the line of its own column. `line_height_hint` is the
    /// recorded glyph height, used to pick the line whose centre is nearest
    /// each point.
    pub fn quads_between(&self, start: Point, end: Point, line_height_hint: f32) -> Vec<Quad> {
        let (boxes, owner) = line_boxes(&self.glyphs);
        if boxes.is_empty() {
            return Vec::new();
        }
        let nearest = |p: Point| -> usize {
            let y = p.y + line_height_hint / 2.0;
            let in_column: Vec<usize> = (0..boxes.len())
                .filter(|&i| boxes[i].x_gap(p.x) <= COLUMN_SLACK)
                .collect();
            let pool = if in_column.is_empty() {
                (0..boxes.len()).collect()
            } else {
                in_column
            };
            let cost = |i: usize| (boxes[i].center() - y).abs() + boxes[i].x_gap(p.x);
            pool.into_iter()
                .min_by(|&a, &b| cost(a).total_cmp(&cost(b)))
                .unwrap_or(0)
        };
        let (mut first, mut last) = (nearest(start), nearest(end));
        let (mut start, mut end) = (start, end);
        if first > last {
            std::mem::swap(&mut first, &mut last);
            std::mem::swap(&mut start, &mut end);
        }

        // Lines in between must share a column with either end; other
        // columns' lines can interleave in reading order.
        let keep_box = |b: usize| {
            b == first || b == last || boxes[b].overlaps_x(&boxes[first]) || boxes[b].overlaps_x(&boxes[last])
        };
        let selected = self.glyphs.iter().enumerate().filter(|&(i, g)| {
            let Some(b) = owner[i] else {
                return false;
            };
            if b < first || b > last || !keep_box(b) {
                return false;
            }
            let after_start = b > first || g.right > start.x + POSITION_SLACK;
            let before_end = b < last || g.left < end.x + POSITION_SLACK;
            after_start && before_end
        });
        quads_from_glyphs(&self.glyphs, selected.map(|(i, _)| i).collect())
    }
}

/// One run of glyphs on a physical line, bounded by column gutters.
struct LineBox {
    line: usize,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl LineBox {
    fn center(&self) -> f32 {
        (self.top + self.bottom) / 2.0
    }

    /// Horizontal distance from `x` to the box; zero inside it.
    fn x_gap(&self, x: f32) -> f32 {
        if x < self.left {
            self.left - x
        } else if x > self.right {
            x - self.right
        } else {
            0.0
        }
    }

    fn overlaps_x(&self, other: &LineBox) -> bool {
        self.left < other.right && other.left < self.right
    }
}

/// Line boxes in reading order, plus the box each glyph belongs to
/// (`None` for whitespace).
///
/// A glyph joins an existing box of its line unless the horizontal gap to
/// it is wider than [`COLUMN_GAP`] glyph widths, which starts a new column.
fn line_boxes(glyphs: &[PageChar]) -> (Vec<LineBox>, Vec<Option<usize>>) {
    let mut boxes: Vec<LineBox> = Vec::new();
    let mut owner = vec![None; glyphs.len()];
    for (i, g) in glyphs.iter().enumerate() {
        if g.ch.is_whitespace() {
            continue;
        }
        let gutter = (g.right - g.left).max(1.0) * COLUMN_GAP;
        let joined = boxes.iter().rposition(|b| {
            b.line == g.line && g.left - b.right <= gutter && b.left - g.right <= gutter
        });
        let b = match joined {
            Some(b) => {
                let lb = &mut boxes[b];
                lb.left = lb.left.min(g.left);
                lb.top = lb.top.min(g.top);
                lb.right = lb.right.max(g.right);
                lb.bottom = lb.bottom.max(g.bottom);
                b
            }
            None => {
                boxes.push(LineBox {
                    line: g.line,
                    left: g.left,
                    top: g.top,
                    right: g.right,
                    bottom: g.bottom,
                });
                boxes.len() - 1
            }
        };
        owner[i] = Some(b);
    }
    (boxes, owner)
}

/// Group glyph indices by line (in first-seen order) and box each group.
/// Whitespace glyphs never widen a quad.
fn quads_from_glyphs(glyphs: &[PageChar], indices: Vec<usize>) -> Vec<Quad> {
    let mut groups: Vec<(usize, f32, f32, f32, f32)> = Vec::new();
    for i in indices {
        let g = &glyphs[i];
        if g.ch.is_whitespace() {
            continue;
        }
        match groups.iter_mut().find(|(line, ..)| *line == g.line) {
            Some((_, l, t, r, b)) => {
                *l = l.min(g.left);
                *t = t.min(g.top);
                *r = r.max(g.right);
                *b = b.max(g.bottom);
            }
            None => groups.push((g.line, g.left, g.top, g.right, g.bottom)),
        }
    }
    groups
        .into_iter()
        .map(|(_, l, t, r, b)| Quad::from_edges(l, t, r, b))
        .collect()
}

// ── Strategies ───────────────────────────────────────────────────────────

/// A successful match: a char range of the normalized page and how it was
/// found.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub range: Range<usize>,
    pub kind: MatchKind,
}

/// One step of the matching chain.
pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Find `needle` (already normalized) on `page`. `near` is the expected
    /// position, used to choose between several candidates.
    fn find(&self, page: &NormalizedPage, needle: &str, near: Option<Point>) -> Option<TextMatch>;
}

/// Of several ranges, the one whose first glyph is nearest `near` (or the
/// first one when no position is known).
fn closest(page: &NormalizedPage, ranges: Vec<Range<usize>>, near: Option<Point>) -> Option<Range<usize>> {
    let Some(p) = near else {
        return ranges.into_iter().next();
    };
    ranges.into_iter().min_by(|a, b| {
        let da = page.range_origin(a).map_or(f32::INFINITY, |o| o.distance(p));
        let db = page.range_origin(b).map_or(f32::INFINITY, |o| o.distance(p));
        da.total_cmp(&db)
    })
}

/// Exact substring match; the occurrence nearest the recorded position
/// wins when the text appears more than once.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl MatchStrategy for ExactMatch {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn find(&self, page: &NormalizedPage, needle: &str, near: Option<Point>) -> Option<TextMatch> {
        closest(page, page.find_all(needle), near).map(|range| TextMatch {
            range,
            kind: MatchKind::Exact,
        })
    }
}

/// Retry with progressively shorter prefixes (50 chars, 30 chars, 5 words,
/// 3 words), extending a hit to the recorded text's length.
#[derive(Debug, Clone, Copy)]
pub struct PrefixMatch {
    /// Character prefixes shorter than this are never tried. Word prefixes
    /// only need their full word count.
    pub min_len: usize,
}

impl PrefixMatch {
    /// Candidate prefixes of `needle`, longest first.
    pub fn prefixes(&self, needle: &str) -> Vec<String> {
        let total = needle.chars().count();
        let by_chars = |n: usize| needle.chars().take(n).collect::<String>().trim_end().to_string();
        let by_words = |n: usize| needle.split(' ').take(n).collect::<Vec<_>>().join(" ");

        let words = needle.split(' ').count();

        let mut out: Vec<String> = Vec::new();
        let chars = [by_chars(50), by_chars(30)]
            .into_iter()
            .filter(|c| c.chars().count() >= self.min_len);
        let word_prefixes = [5, 3].into_iter().filter(|&n| words > n).map(by_words);
        for candidate in chars.chain(word_prefixes) {
            if candidate.chars().count() < total && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }
}

impl MatchStrategy for PrefixMatch {
    fn name(&self) -> &'static str {
        "prefix"
    }

    fn find(&self, page: &NormalizedPage, needle: &str, near: Option<Point>) -> Option<TextMatch> {
        let total = needle.chars().count();
        self.prefixes(needle).into_iter().find_map(|prefix| {
            let hit = closest(page, page.find_all(&prefix), near)?;
            let len = prefix.chars().count();
            Some(TextMatch {
                range: hit.start..(hit.start + total).min(page.len()),
                kind: MatchKind::Prefix { len },
            })
        })
    }
}

/// Sliding-window edit-distance match for long passages.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyMatch {
    /// Minimum similarity (0–1) to accept.
    pub threshold: f32,
    /// Only texts longer than this many chars are tried.
    pub min_len: usize,
}

impl MatchStrategy for FuzzyMatch {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn find(&self, page: &NormalizedPage, needle: &str, near: Option<Point>) -> Option<TextMatch> {
        let needle: Vec<char> = needle.chars().collect();
        let n = needle.len();
        if n <= self.min_len || page.is_empty() {
            return None;
        }
        let chars = page.chars();
        // Windows start at word boundaries only.
        let starts = (0..chars.len()).filter(|&i| i == 0 || chars[i - 1] == ' ');

        let distance_to = |start: usize, p: Point| {
            page.range_origin(&(start..start + 1))
                .map_or(f32::INFINITY, |o| o.distance(p))
        };

        // Widest edit distance that still scores at least `threshold`. The
        // epsilon absorbs f32 rounding of thresholds like 0.85.
        let max_edits = ((1.0 - f64::from(self.threshold)) * n as f64 + 1e-4).floor() as usize;
        let mut best: Option<(usize, usize)> = None; // (distance, start)
        let mut budget = max_edits;
        for s in starts {
            let window = &chars[s..(s + n).min(chars.len())];
            let Some(d) = bounded_levenshtein(&needle, window, budget) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((bd, _)) if d < bd => true,
                Some((bd, bs)) if d == bd => near.is_some_and(|p| distance_to(s, p) < distance_to(bs, p)),
                _ => false,
            };
            if better {
                best = Some((d, s));
                budget = d;
            }
        }

        let (d, s) = best?;
        if d > max_edits {
            return None;
        }
        let score = 1.0 - d as f32 / n as f32;
        Some(TextMatch {
            range: s..(s + n).min(chars.len()),
            kind: MatchKind::Fuzzy { score },
        })
    }
}

/// The default chain: exact, then prefixes, then fuzzy.
pub fn default_strategies(opts: &LocateOptions) -> Vec<Box<dyn MatchStrategy>> {
    vec![
        Box::new(ExactMatch),
        Box::new(PrefixMatch {
            min_len: opts.prefix_min_len,
        }),
        Box::new(FuzzyMatch {
            threshold: opts.fuzzy_threshold,
            min_len: opts.fuzzy_min_len,
        }),
    ]
}

// ── Edit distance ────────────────────────────────────────────────────────

/// Levenshtein distance between two char slices.
pub fn levenshtein(a: &[char], b: &[char]) -> usize {
    bounded_levenshtein(a, b, usize::MAX).unwrap_or(usize::MAX)
}

/// Levenshtein distance, or `None` as soon as it must exceed `max`.
fn bounded_levenshtein(a: &[char], b: &[char], max: usize) -> Option<usize> {
    if a.len().abs_diff(b.len()) > max {
        return None;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        let mut row_min = cur[0];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
            row_min = row_min.min(cur[j + 1]);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    let d = prev[b.len()];
    (d <= max).then_some(d)
}

/// `1 − distance / longer length`, on normalized text.
pub fn similarity(a: &str, b: &str) -> f32 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f32 / longest as f32
}

// ── Entry point ──────────────────────────────────────────────────────────

/// Locate one mapped annotation on its page.
///
/// Notes and bookmarks are point-shaped and pass through without quads.
/// Highlights go through the strategy chain; a highlight without recorded
/// text follows [`LocateOptions::empty_text`].
pub fn locate(
    mapped: MappedAnnotation,
    page: &NormalizedPage,
    strategies: &[Box<dyn MatchStrategy>],
    opts: &LocateOptions,
) -> Result<LocatedAnnotation, UnlocatedAnnotation> {
    if mapped.kind() != AnnotationKind::Highlight {
        return Ok(LocatedAnnotation {
            mapped,
            quads: Vec::new(),
            matched_by: None,
        });
    }

    let needle = mapped.record.recorded_text().map(normalize).unwrap_or_default();
    if needle.is_empty() {
        return locate_by_position(mapped, page, opts);
    }

    for strategy in strategies {
        let Some(m) = strategy.find(page, &needle, mapped.start) else {
            continue;
        };
        let quads = page.quads_for_range(m.range.clone());
        if quads.is_empty() {
            continue;
        }
        debug!(
            "Page {}: {} match for {:?} → {} quad(s)",
            page.page() + 1,
            strategy.name(),
            truncate(&needle, 40),
            quads.len()
        );
        return Ok(LocatedAnnotation {
            mapped,
            quads,
            matched_by: Some(m.kind),
        });
    }

    Err(unlocated(&mapped, page, needle, opts))
}

fn locate_by_position(
    mapped: MappedAnnotation,
    page: &NormalizedPage,
    opts: &LocateOptions,
) -> Result<LocatedAnnotation, UnlocatedAnnotation> {
    if opts.empty_text == EmptyTextPolicy::UsePosition {
        if let (Some(start), Some(end)) = (mapped.start, mapped.end) {
            let quads = page.quads_between(start, end, mapped.height);
            if !quads.is_empty() {
                return Ok(LocatedAnnotation {
                    mapped,
                    quads,
                    matched_by: Some(MatchKind::Position),
                });
            }
        }
    }
    Err(unlocated(&mapped, page, String::new(), opts))
}

/// Quads from the recorded start and end points of a highlight whose text
/// was not found, so it can still be placed (and pick up its notes).
///
/// `None` for anything but a highlight with recorded text and both points,
/// or when no glyph lies between the points.
pub fn position_fallback(mapped: MappedAnnotation, page: &NormalizedPage) -> Option<LocatedAnnotation> {
    if mapped.kind() != AnnotationKind::Highlight || mapped.record.recorded_text().is_none() {
        return None;
    }
    let (start, end) = (mapped.start?, mapped.end?);
    let quads = page.quads_between(start, end, mapped.height);
    if quads.is_empty() {
        return None;
    }
    Some(LocatedAnnotation {
        mapped,
        quads,
        matched_by: Some(MatchKind::Position),
    })
}

fn unlocated(mapped: &MappedAnnotation, page: &NormalizedPage, text: String, opts: &LocateOptions) -> UnlocatedAnnotation {
    let center = mapped.start.and_then(|p| page.index_near(p)).unwrap_or(0);
    UnlocatedAnnotation {
        kind: mapped.kind(),
        page: mapped.page(),
        text: if text.is_empty() {
            mapped.record.text.clone().unwrap_or_default()
        } else {
            text
        },
        context: page.context_around(center, opts.context_chars),
    }
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
