//! Reader data store (`.pds` / `.pdt`) decoding.
//!
//! The device keeps per-document state in a small big-endian, tag-prefixed
//! serialisation:
//!
//! ```text
//! 00 00 00 00 00 1A B1 26   signature
//! <int 1>                   format version
//! <int N>                   number of top-level values
//! value × N
//!
//! value  := tag:i8 payload
//!   0  bool   (1 byte, 0 | 1)        5  i16
//!   1  i32                           6  f32
//!   2  i64                           7  i8
//!   3  utf    (bool empty, u16 len,  9  char (1 byte)
//!              UTF-8 bytes)         -2  object: utf name, value*, -1
//! ```
//!
//! Annotations live in one of two layouts, and a store may contain both:
//!
//! * **cache** — `annotation.cache.object` holds an integer count followed by
//!   `(type id, saved.avl.interval.tree)` pairs; each tree holds a count and
//!   that many `annotation.personal.*` objects.
//! * **flat** — `annotation.personal.*` objects appear directly at the top
//!   level.
//!
//! Decoding is an explicit state machine over a byte cursor rather than a
//! recursive descent, so a structural failure can still hand back every value
//! closed before the failure point (best-effort mode).

use crate::error::FormatError;
use crate::model::{AnnotationKind, DeviceRect, RawAnnotationRecord, SourceFormat};
use byteorder::{BigEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use std::io::{Cursor, Read};
use tracing::{debug, warn};

/// First eight bytes of every store.
pub const SIGNATURE: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x1A, 0xB1, 0x26];

const TAG_BOOLEAN: i8 = 0;
const TAG_INT: i8 = 1;
const TAG_LONG: i8 = 2;
const TAG_UTF: i8 = 3;
const TAG_DOUBLE: i8 = 4;
const TAG_SHORT: i8 = 5;
const TAG_FLOAT: i8 = 6;
const TAG_BYTE: i8 = 7;
const TAG_CHAR: i8 = 9;
const TAG_OBJECT_BEGIN: i8 = -2;
const TAG_OBJECT_END: i8 = -1;

const CACHE_OBJECT: &str = "annotation.cache.object";
const INTERVAL_TREE: &str = "saved.avl.interval.tree";
const PERSONAL_PREFIX: &str = "annotation.personal.";

/// A decoded store value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Long(i64),
    Utf(String),
    Double(f64),
    Short(i16),
    Float(f32),
    Byte(i8),
    Char(char),
    Object { name: String, values: Vec<Value> },
}

impl Value {
    /// Integer payload of any integral variant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            Value::Short(v) => Some(i64::from(*v)),
            Value::Byte(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf(s) => Some(s),
            _ => None,
        }
    }

    /// `(name, values)` when this is an object.
    pub fn as_object(&self) -> Option<(&str, &[Value])> {
        match self {
            Value::Object { name, values } => Some((name, values)),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Value::Object { name, .. } => format!("object '{name}'"),
            other => format!("{other:?}"),
        }
    }
}

/// Result of a best-effort parse.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreParse {
    /// Every record that could be recovered.
    pub records: Vec<RawAnnotationRecord>,
    /// The structural error that stopped decoding, if any.
    pub error: Option<FormatError>,
}

/// True when `bytes` starts with the store signature.
pub fn has_signature(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE)
}

/// Decode the raw top-level values of a store.
pub fn decode_store(bytes: &[u8]) -> Result<Vec<Value>, FormatError> {
    match decode_partial(bytes) {
        (values, None) => Ok(values),
        (_, Some(e)) => Err(e),
    }
}

/// Parse a store into annotation records, failing on any structural error.
pub fn parse_store(bytes: &[u8]) -> Result<Vec<RawAnnotationRecord>, FormatError> {
    let values = decode_store(bytes)?;
    Ok(extract_records(&values))
}

/// Parse a store, keeping the records decoded before a structural error.
pub fn parse_store_lenient(bytes: &[u8]) -> StoreParse {
    let (values, error) = decode_partial(bytes);
    if let Some(ref e) = error {
        warn!("Store decoding stopped early: {e}; keeping partial data");
    }
    StoreParse {
        records: extract_records(&values),
        error,
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────

/// One object whose end tag has not been read yet.
struct Frame {
    name: String,
    values: Vec<Value>,
}

struct Decoder<'a> {
    cur: Cursor<&'a [u8]>,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            cur: Cursor::new(bytes),
        }
    }

    fn offset(&self) -> usize {
        self.cur.position() as usize
    }

    fn remaining(&self) -> usize {
        self.cur.get_ref().len().saturating_sub(self.offset())
    }

    fn need(&self, n: usize) -> Result<(), FormatError> {
        let have = self.remaining();
        if have < n {
            return Err(FormatError::Truncated {
                offset: self.offset(),
                needed: n - have,
            });
        }
        Ok(())
    }

    fn read_i8(&mut self) -> Result<i8, FormatError> {
        self.need(1)?;
        self.cur.read_i8().map_err(|_| self.truncated(1))
    }

    fn peek_i8(&self) -> Result<i8, FormatError> {
        self.need(1)?;
        Ok(self.cur.get_ref()[self.offset()] as i8)
    }

    fn truncated(&self, needed: usize) -> FormatError {
        FormatError::Truncated {
            offset: self.offset(),
            needed,
        }
    }

    fn read_bool(&mut self) -> Result<bool, FormatError> {
        let offset = self.offset();
        match self.read_i8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(FormatError::InvalidBoolean { value, offset }),
        }
    }

    fn read_utf(&mut self) -> Result<String, FormatError> {
        if self.read_bool()? {
            return Ok(String::new());
        }
        self.need(2)?;
        let len = self.cur.read_u16::<BigEndian>().map_err(|_| self.truncated(2))? as usize;
        self.need(len)?;
        let offset = self.offset();
        let mut buf = vec![0u8; len];
        self.cur.read_exact(&mut buf).map_err(|_| self.truncated(len))?;
        String::from_utf8(buf).map_err(|_| FormatError::InvalidUtf8 { offset })
    }

    /// Decode the payload of a scalar tag.
    fn read_scalar(&mut self, tag: i8, tag_offset: usize) -> Result<Value, FormatError> {
        let value = match tag {
            TAG_BOOLEAN => Value::Bool(self.read_bool()?),
            TAG_INT => {
                self.need(4)?;
                Value::Int(self.cur.read_i32::<BigEndian>().map_err(|_| self.truncated(4))?)
            }
            TAG_LONG => {
                self.need(8)?;
                Value::Long(self.cur.read_i64::<BigEndian>().map_err(|_| self.truncated(8))?)
            }
            TAG_UTF => Value::Utf(self.read_utf()?),
            TAG_DOUBLE => {
                self.need(8)?;
                Value::Double(self.cur.read_f64::<BigEndian>().map_err(|_| self.truncated(8))?)
            }
            TAG_SHORT => {
                self.need(2)?;
                Value::Short(self.cur.read_i16::<BigEndian>().map_err(|_| self.truncated(2))?)
            }
            TAG_FLOAT => {
                self.need(4)?;
                Value::Float(self.cur.read_f32::<BigEndian>().map_err(|_| self.truncated(4))?)
            }
            TAG_BYTE => Value::Byte(self.read_i8()?),
            TAG_CHAR => {
                self.need(1)?;
                Value::Char(char::from(self.cur.read_u8().map_err(|_| self.truncated(1))?))
            }
            tag => {
                return Err(FormatError::UnknownDatatype {
                    tag,
                    offset: tag_offset,
                })
            }
        };
        Ok(value)
    }

    fn read_integer(&mut self, context: &str) -> Result<i64, FormatError> {
        let tag_offset = self.offset();
        let tag = self.read_i8()?;
        let value = self.read_scalar(tag, tag_offset)?;
        value.as_i64().ok_or_else(|| FormatError::UnexpectedValue {
            context: context.to_string(),
            expected: "an integer",
            found: value.describe(),
        })
    }
}

/// Decode a store, returning every completed top-level value plus the error
/// that stopped decoding (if any). Objects still open at the failure point
/// are closed with whatever children they had.
fn decode_partial(bytes: &[u8]) -> (Vec<Value>, Option<FormatError>) {
    if !has_signature(bytes) {
        return (
            Vec::new(),
            Some(FormatError::BadSignature {
                found: bytes.iter().take(SIGNATURE.len()).copied().collect(),
            }),
        );
    }

    let mut dec = Decoder::new(bytes);
    dec.cur.set_position(SIGNATURE.len() as u64);

    match dec.read_integer("header") {
        Ok(1) => {}
        Ok(v) => {
            return (
                Vec::new(),
                Some(FormatError::UnsupportedVersion {
                    found: v.to_string(),
                }),
            )
        }
        Err(e) => return (Vec::new(), Some(e)),
    }
    let count = match dec.read_integer("value count") {
        Ok(n) => n.max(0) as usize,
        Err(e) => return (Vec::new(), Some(e)),
    };

    let mut top: Vec<Value> = Vec::with_capacity(count.min(1024));
    let mut stack: Vec<Frame> = Vec::new();

    let result = (|| -> Result<(), FormatError> {
        while top.len() < count || !stack.is_empty() {
            if !stack.is_empty() && dec.peek_i8()? == TAG_OBJECT_END {
                dec.read_i8()?;
                if let Some(frame) = stack.pop() {
                    let obj = Value::Object {
                        name: frame.name,
                        values: frame.values,
                    };
                    push_value(&mut stack, &mut top, obj);
                }
                continue;
            }

            let tag_offset = dec.offset();
            let tag = dec.read_i8()?;
            if tag == TAG_OBJECT_BEGIN {
                let name = dec.read_utf()?;
                stack.push(Frame {
                    name,
                    values: Vec::new(),
                });
            } else {
                let value = dec.read_scalar(tag, tag_offset)?;
                push_value(&mut stack, &mut top, value);
            }
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            if dec.remaining() > 0 {
                warn!("Store has {} bytes of trailing data", dec.remaining());
            }
            (top, None)
        }
        Err(e) => {
            // Close every open object into its parent.
            while let Some(frame) = stack.pop() {
                let obj = Value::Object {
                    name: frame.name,
                    values: frame.values,
                };
                push_value(&mut stack, &mut top, obj);
            }
            (top, Some(e))
        }
    }
}

fn push_value(stack: &mut [Frame], top: &mut Vec<Value>, value: Value) {
    match stack.last_mut() {
        Some(frame) => frame.values.push(value),
        None => top.push(value),
    }
}

// ── Record extraction ────────────────────────────────────────────────────

/// Annotation class name for a cache type id.
fn class_for_type_id(id: i64) -> Option<&'static str> {
    Some(match id {
        0 => "annotation.personal.bookmark",
        1 => "annotation.personal.highlight",
        2 => "annotation.personal.note",
        3 => "annotation.personal.clip_article",
        10 => "annotation.personal.handwritten_note",
        11 => "annotation.personal.sticky_note",
        13 => "annotation.personal.underline",
        _ => return None,
    })
}

/// Map an annotation class name to the kinds this crate handles.
fn kind_for_class(name: &str) -> Option<AnnotationKind> {
    match name.strip_prefix(PERSONAL_PREFIX)? {
        "bookmark" => Some(AnnotationKind::Bookmark),
        "highlight" | "underline" => Some(AnnotationKind::Highlight),
        "note" => Some(AnnotationKind::Note),
        _ => None,
    }
}

/// Walk decoded top-level values and collect annotation records from both
/// layouts, in order of appearance.
pub fn extract_records(values: &[Value]) -> Vec<RawAnnotationRecord> {
    let mut records = Vec::new();
    for value in values {
        let Some((name, children)) = value.as_object() else {
            continue;
        };
        if name == CACHE_OBJECT {
            extract_cache(children, &mut records);
        } else if name.starts_with(PERSONAL_PREFIX) {
            if let Some(r) = decode_annotation(name, children, SourceFormat::KrdsFlat) {
                records.push(r);
            }
        } else {
            debug!("Skipping store object '{name}'");
        }
    }
    records
}

fn extract_cache(children: &[Value], out: &mut Vec<RawAnnotationRecord>) {
    let mut it = children.iter();
    let Some(count) = it.next().and_then(Value::as_i64) else {
        warn!("'{CACHE_OBJECT}' has no entry count; skipped");
        return;
    };
    for _ in 0..count.max(0) {
        let (Some(type_id), Some(tree)) = (it.next(), it.next()) else {
            warn!("'{CACHE_OBJECT}' ended before its declared {count} entries");
            return;
        };
        let Some(type_id) = type_id.as_i64() else {
            warn!("'{CACHE_OBJECT}' entry type is {}; skipped", type_id.describe());
            continue;
        };
        let Some(class) = class_for_type_id(type_id) else {
            debug!("Unknown annotation type id {type_id}; skipped");
            continue;
        };
        let Some((tree_name, items)) = tree.as_object() else {
            warn!("'{class}' entry is not an object; skipped");
            continue;
        };
        if tree_name != INTERVAL_TREE {
            warn!("Expected '{INTERVAL_TREE}', found '{tree_name}'; skipped");
            continue;
        }
        // items = [count, annotation objects...]
        for item in items.iter().skip(1) {
            match item.as_object() {
                Some((name, fields)) if name == class => {
                    if let Some(r) = decode_annotation(name, fields, SourceFormat::KrdsCache) {
                        out.push(r);
                    }
                }
                Some((name, _)) => debug!("'{name}' inside '{class}' tree; skipped"),
                None => {}
            }
        }
    }
}

/// Decode one `annotation.personal.*` object into a record.
///
/// Fields are positional: start position, end position, creation time,
/// last modification time, template, then the note body for notes.
fn decode_annotation(class: &str, fields: &[Value], source: SourceFormat) -> Option<RawAnnotationRecord> {
    let Some(kind) = kind_for_class(class) else {
        debug!("Unsupported annotation class '{class}'; skipped");
        return None;
    };
    let required = if kind == AnnotationKind::Note { 6 } else { 5 };
    if fields.len() < required {
        warn!(
            "'{class}' has {} of {required} fields; skipped",
            fields.len()
        );
        return None;
    }

    let start_str = fields.first().and_then(Value::as_str);
    let Some((page, start)) = start_str.and_then(parse_position) else {
        warn!("'{class}' has an unreadable start position {start_str:?}; skipped");
        return None;
    };
    let end = fields
        .get(1)
        .and_then(Value::as_str)
        .and_then(parse_position)
        .and_then(|(_, rect)| rect);

    let timestamp = fields
        .get(2)
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    let mut record = RawAnnotationRecord::new(kind, page, source);
    record.timestamp = timestamp;
    match kind {
        AnnotationKind::Bookmark => {
            record.start = start.map(|r| DeviceRect {
                width: 0,
                height: 0,
                ..r
            });
        }
        AnnotationKind::Highlight => {
            record.start = start;
            record.end = end.or(start);
        }
        AnnotationKind::Note => {
            record.start = start;
            record.end = end.or(start);
            record.note = fields
                .get(5)
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.is_empty());
        }
    }
    Some(record)
}

/// Parse `"page seq char_pos unknown x y width height"`.
///
/// The short form (at least four integers, used by bookmarks) carries only
/// the page. Returns `None` when the page itself is unreadable.
pub fn parse_position(s: &str) -> Option<(usize, Option<DeviceRect>)> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    let nums: Vec<i64> = parts.iter().map(|p| p.parse::<i64>()).collect::<Result<_, _>>().ok()?;
    let page = usize::try_from(nums[0]).ok()?;
    if nums.len() < 8 {
        return Some((page, None));
    }
    let rect = DeviceRect {
        x: i32::try_from(nums[4]).ok()?,
        y: i32::try_from(nums[5]).ok()?,
        width: i32::try_from(nums[6]).ok()?,
        height: i32::try_from(nums[7]).ok()?,
    };
    Some((page, Some(rect)))
}
