//! Pipeline stages for annotation recovery.
//!
//! Each submodule implements exactly one transformation step. All stages
//! except [`input`] and [`pdf`] are pure functions over in-memory data, so
//! each is testable on its own with synthetic pages and hand-built stores.
//!
//! ## Data Flow
//!
//! ```text
//! krds ──────┐
//!            ├─▶ merge ─▶ coords ─▶ locate ─▶ unify
//! clippings ─┘              ▲          ▲
//!                           └── pdf ───┘  (geometry, glyphs)
//! ```
//!
//! 1. [`input`]     — validate the PDF, find and classify store files
//! 2. [`krds`]      — decode the binary reader data store
//! 3. [`clippings`] — parse the `My Clippings.txt` export
//! 4. [`merge`]     — join clippings text onto position-only store records
//! 5. [`coords`]    — device units to points, visible-region correction
//! 6. [`normalize`] / [`locate`] — find each highlight's passage on its page
//!    and turn it into per-line quads
//! 7. [`unify`]     — deduplicate and fold notes into highlights
//! 8. [`pdf`]       — pdfium adapter; runs in `spawn_blocking` because
//!    pdfium is not async-safe

pub mod clippings;
pub mod coords;
pub mod input;
pub mod krds;
pub mod locate;
pub mod merge;
pub mod normalize;
pub mod pdf;
pub mod unify;
