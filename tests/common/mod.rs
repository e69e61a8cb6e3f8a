//! Fixture helpers shared by the integration tests.
//!
//! Pages are laid out on a grid that lines up with whole device units:
//! 7.2pt per character is 10 device units, 14.4pt per line is 20, and the
//! text block starts one inch (100 device units) from the top-left corner.

#![allow(dead_code)]

use kindle2pdf::{InMemoryDocument, PageGeometry, PageText};

pub const LEFT: f32 = 72.0;
pub const TOP: f32 = 72.0;
pub const CHAR_WIDTH: f32 = 7.2;
pub const LINE_HEIGHT: f32 = 14.4;

pub const PAGE_ONE: &str = "The quick brown fox jumps over the lazy dog.\n\
Pack my box with five dozen liquor jugs now.\n\
Sphinx of black quartz, judge my vow today.";

pub const PAGE_TWO: &str = "How vexingly quick daft zebras jump around.\n\
The five boxing wizards jump quickly again.";

/// A glyph page on the fixture grid.
pub fn page(idx: usize, text: &str) -> PageText {
    PageText::layout(idx, text, LEFT, TOP, CHAR_WIDTH, LINE_HEIGHT)
}

/// A US Letter document with [`PAGE_ONE`] and [`PAGE_TWO`].
pub fn letter_document() -> InMemoryDocument {
    InMemoryDocument::new(2)
        .with_page(PageGeometry::full(0, 612.0, 792.0), page(0, PAGE_ONE))
        .with_page(PageGeometry::full(1, 612.0, 792.0), page(1, PAGE_TWO))
}

/// Device-unit origin of the glyph at `(col, line)`.
pub fn device_xy(col: i32, line: i32) -> (i32, i32) {
    (100 + 10 * col, 100 + 20 * line)
}

/// Full position string for the glyph at `(col, line)` of `page`.
pub fn position(page: usize, col: i32, line: i32) -> String {
    let (x, y) = device_xy(col, line);
    format!("{page} 0 0 0 {x} {y} 10 15")
}

/// Point-space edge of column `col`.
pub fn x_at(col: i32) -> f32 {
    LEFT + CHAR_WIDTH * col as f32
}

/// Point-space top of line `line`.
pub fn y_at(line: i32) -> f32 {
    TOP + LINE_HEIGHT * line as f32
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 0.01
}

// ── Store encoder ────────────────────────────────────────────────────────

const SIGNATURE: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x1A, 0xB1, 0x26];

/// Builds reader data store bytes value by value.
pub struct StoreBuilder {
    bytes: Vec<u8>,
}

impl StoreBuilder {
    /// A store declaring `count` top-level values.
    pub fn new(count: i32) -> Self {
        let mut b = Self {
            bytes: SIGNATURE.to_vec(),
        };
        b.int(1).int(count);
        b
    }

    pub fn int(&mut self, v: i32) -> &mut Self {
        self.bytes.push(1);
        self.bytes.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn long(&mut self, v: i64) -> &mut Self {
        self.bytes.push(2);
        self.bytes.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn raw_utf(&mut self, s: &str) -> &mut Self {
        if s.is_empty() {
            self.bytes.push(1);
        } else {
            self.bytes.push(0);
            self.bytes.extend_from_slice(&(s.len() as u16).to_be_bytes());
            self.bytes.extend_from_slice(s.as_bytes());
        }
        self
    }

    pub fn utf(&mut self, s: &str) -> &mut Self {
        self.bytes.push(3);
        self.raw_utf(s)
    }

    pub fn begin(&mut self, name: &str) -> &mut Self {
        self.bytes.push(0xFE);
        self.raw_utf(name)
    }

    pub fn end(&mut self) -> &mut Self {
        self.bytes.push(0xFF);
        self
    }

    /// One `annotation.personal.<kind>` object.
    pub fn annotation(&mut self, kind: &str, start: &str, end: &str, note: Option<&str>) -> &mut Self {
        self.begin(&format!("annotation.personal.{kind}"))
            .utf(start)
            .utf(end)
            .long(1_704_103_200_000)
            .long(1_704_103_200_000)
            .utf("0");
        if let Some(n) = note {
            self.utf(n);
        }
        self.end()
    }

    /// An `annotation.cache.object` holding one tree per `(type id, items)`.
    pub fn cache(&mut self, trees: &[(i32, Vec<(&str, String, String, Option<&str>)>)]) -> &mut Self {
        self.begin("annotation.cache.object").int(trees.len() as i32);
        for (type_id, items) in trees {
            self.int(*type_id)
                .begin("saved.avl.interval.tree")
                .int(items.len() as i32);
            for (kind, start, end, note) in items {
                self.annotation(kind, start, end, *note);
            }
            self.end();
        }
        self.end()
    }

    pub fn build(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}
