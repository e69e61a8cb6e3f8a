//! Input resolution: turn user-supplied paths into readable sources.
//!
//! Three kinds of input reach the pipeline:
//!
//! * the PDF itself, validated by its `%PDF` magic bytes before pdfium ever
//!   sees it, so callers get a meaningful error rather than a pdfium crash;
//! * reader data stores (`.pds` / `.pdt`), given directly or found inside a
//!   directory, typically the `<book>.sdr/` folder the device keeps next to
//!   the document;
//! * a `My Clippings.txt` export.
//!
//! Store kind is decided by content, not extension: a KRDS signature wins,
//! then a clippings separator line.

use crate::error::AnnotateError;
use crate::pipeline::clippings::SEPARATOR;
use crate::pipeline::krds;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions the device uses for its data stores.
pub const STORE_EXTENSIONS: &[&str] = &["pds", "pdt"];

/// What a source file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Binary reader data store.
    Krds,
    /// Plain-text clippings export.
    Clippings,
}

/// A source file read into memory.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub path: PathBuf,
    pub kind: StoreKind,
    pub bytes: Vec<u8>,
}

/// Decide what `bytes` contain, if anything usable.
pub fn detect_kind(bytes: &[u8]) -> Option<StoreKind> {
    if krds::has_signature(bytes) {
        return Some(StoreKind::Krds);
    }
    let text = std::str::from_utf8(bytes).ok()?;
    text.lines()
        .any(|l| l.trim() == SEPARATOR)
        .then_some(StoreKind::Clippings)
}

/// Read a whole file, mapping I/O failures to [`AnnotateError`].
pub fn read_file(path: &Path) -> Result<Vec<u8>, AnnotateError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AnnotateError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => AnnotateError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => AnnotateError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

/// Read a source file and detect its kind.
pub fn load_source(path: &Path) -> Result<LoadedSource, AnnotateError> {
    let bytes = read_file(path)?;
    let kind = detect_kind(&bytes).ok_or_else(|| AnnotateError::UnknownStore {
        path: path.to_path_buf(),
    })?;
    debug!("{}: {:?}, {} bytes", path.display(), kind, bytes.len());
    Ok(LoadedSource {
        path: path.to_path_buf(),
        kind,
        bytes,
    })
}

/// Validate that `path` exists, is readable and starts with `%PDF`.
pub fn check_pdf(path: &Path) -> Result<(), AnnotateError> {
    if !path.exists() {
        return Err(AnnotateError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(AnnotateError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(AnnotateError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(AnnotateError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(())
}

fn is_store_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| STORE_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
}

/// Store files directly inside `dir`, sorted by name.
fn stores_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_store_file(p))
        .collect();
    found.sort();
    found
}

/// The `<stem>.sdr` folders that belong to `pdf` inside `dir`.
fn sidecar_dirs(dir: &Path, pdf: &Path) -> Vec<PathBuf> {
    let Some(stem) = pdf.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    // The device names the folder after the file, with or without ".pdf".
    let candidates = [format!("{stem}.sdr"), format!("{stem}.pdf.sdr")];
    candidates
        .iter()
        .map(|name| dir.join(name))
        .filter(|p| p.is_dir())
        .collect()
}

/// Find the data stores for `pdf` under `dir`.
///
/// Looks at `dir` itself, then at the `<stem>.sdr` folders inside it.
pub fn discover_stores(dir: &Path, pdf: &Path) -> Vec<PathBuf> {
    let mut found = stores_in(dir);
    for sdr in sidecar_dirs(dir, pdf) {
        found.extend(stores_in(&sdr));
    }
    found.dedup();
    found
}

/// Expand the user's `--store` arguments into store files.
///
/// Files are taken as given; directories are searched with
/// [`discover_stores`]. With no arguments, the PDF's own folder is searched
/// for a sidecar `<stem>.sdr`.
pub fn resolve_store_paths(pdf: &Path, inputs: &[PathBuf]) -> Result<Vec<PathBuf>, AnnotateError> {
    if inputs.is_empty() {
        let dir = pdf.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let found: Vec<PathBuf> = sidecar_dirs(dir, pdf).iter().flat_map(|d| stores_in(d)).collect();
        debug!("Auto-discovered {} store(s) next to {}", found.len(), pdf.display());
        return Ok(found);
    }

    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = discover_stores(input, pdf);
            debug!("{}: {} store(s)", input.display(), found.len());
            out.extend(found);
        } else if input.exists() {
            out.push(input.clone());
        } else {
            return Err(AnnotateError::FileNotFound { path: input.clone() });
        }
    }
    Ok(out)
}
