//! Filesystem naming conventions shared by every tool.
//!
//! ```text
//! <dir>/<stem>.<ext>                          original image
//! <dir>/preview/<stem>_p512.jpg               hash preview
//! <dir>/preview/<stem>_p2000.jpg              face preview
//! <dir>/fv/<file name>.fv.md.answer.md        face vector record
//! ```

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const PREVIEW_DIR: &str = "preview";
pub const FACE_VECTOR_DIR: &str = "fv";
pub const FACE_VECTOR_SUFFIX: &str = ".fv.md.answer.md";

static FINGERPRINT_PATTERN: OnceLock<Regex> = OnceLock::new();

fn fingerprint_pattern() -> &'static Regex {
    FINGERPRINT_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-fA-F0-9]{32}$").expect("fingerprint pattern is a valid regex")
    })
}

/// Preview renditions read by the tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    /// Input of the perceptual hashes.
    P512,
    /// Input of face detection.
    P2000,
}

impl PreviewKind {
    /// Longest-edge size in pixels.
    pub fn size(self) -> u32 {
        match self {
            PreviewKind::P512 => 512,
            PreviewKind::P2000 => 2000,
        }
    }
}

/// File name without its extension, lossily decoded.
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Directory holding `path`, or `.` for a bare file name.
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `<dir>/preview/<stem>_p<size>.jpg` for the given image.
pub fn preview_path(image: &Path, kind: PreviewKind) -> PathBuf {
    parent_dir(image)
        .join(PREVIEW_DIR)
        .join(format!("{}_p{}.jpg", stem(image), kind.size()))
}

/// `<dir>/fv/<file name>.fv.md.answer.md` for the given image.
pub fn face_vector_path(image: &Path) -> PathBuf {
    let file_name = image
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent_dir(image)
        .join(FACE_VECTOR_DIR)
        .join(format!("{file_name}{FACE_VECTOR_SUFFIX}"))
}

/// Underscore-separated segments of a stem. An empty stem has no segments.
pub fn split_stem(stem: &str) -> Vec<&str> {
    if stem.is_empty() {
        Vec::new()
    } else {
        stem.split('_').collect()
    }
}

pub fn is_fingerprint(segment: &str) -> bool {
    fingerprint_pattern().is_match(segment)
}

/// The trailing content fingerprint of a stem, if its last segment is one.
pub fn trailing_fingerprint(stem: &str) -> Option<&str> {
    split_stem(stem).last().copied().filter(|s| is_fingerprint(s))
}

/// Stem after hashing: `<colorhash>_<averagehash>[_<fingerprint>]`.
pub fn hashed_stem(color_hash: &str, average_hash: &str, fingerprint: Option<&str>) -> String {
    let mut parts = vec![color_hash, average_hash];
    if let Some(fp) = fingerprint {
        parts.push(fp);
    }
    parts.join("_")
}

/// Original extension including the leading dot, case preserved. Empty when
/// the file has none.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}
