//! Target resolution: command-line inputs to image file paths.
//!
//! Directories are expanded one level deep. Ordering follows the inputs, then
//! the directory listing order; overlapping inputs are not deduplicated.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Extensions (lowercase, without the dot) accepted as original photos.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "nef", "heic"];

/// Whether the path carries one of [`IMAGE_EXTENSIONS`], case-insensitively.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Lazily expand `inputs` into absolute paths of image files.
///
/// Missing inputs are warned about and skipped. Directory listing failures
/// are logged and never abort the remaining inputs.
pub fn resolve_targets<I, P>(inputs: I) -> impl Iterator<Item = PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    inputs
        .into_iter()
        .flat_map(|input| expand_input(input.as_ref()))
}

fn expand_input(input: &Path) -> Box<dyn Iterator<Item = PathBuf>> {
    if !input.exists() {
        tracing::warn!(path = %input.display(), "path not found");
        return Box::new(std::iter::empty());
    }

    if input.is_file() {
        return Box::new(accept_file(input).into_iter());
    }

    match fs::read_dir(input) {
        Ok(entries) => {
            let dir = input.to_path_buf();
            Box::new(entries.filter_map(move |entry| match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if path.is_file() {
                        accept_file(&path)
                    } else {
                        None
                    }
                }
                Err(err) => {
                    tracing::error!(dir = %dir.display(), error = %err, "failed reading directory entry");
                    None
                }
            }))
        }
        Err(err) => {
            tracing::error!(dir = %input.display(), error = %err, "failed listing directory");
            Box::new(std::iter::empty())
        }
    }
}

fn accept_file(path: &Path) -> Option<PathBuf> {
    if !is_image_file(path) {
        tracing::debug!(path = %path.display(), "skipping non-image file");
        return None;
    }
    match absolute(path) {
        Ok(abs) => Some(abs),
        Err(err) => {
            tracing::error!(path = %path.display(), error = %err, "failed resolving absolute path");
            None
        }
    }
}

/// Absolute form of `path` with `.` components dropped. Symlinks and `..`
/// are left alone.
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_is_image_file_case_insensitive() {
        for name in ["a.jpg", "a.JPG", "a.jpeg", "a.JpEg", "a.nef", "a.NEF", "a.heic", "a.HEIC"] {
            assert!(is_image_file(Path::new(name)), "{name} should be accepted");
        }
    }

    #[test]
    fn test_is_image_file_rejects_other_extensions() {
        for name in ["a.png", "a.mov", "a.jpg.txt", "a", ".DS_Store", "a.tif", "jpg"] {
            assert!(!is_image_file(Path::new(name)), "{name} should be rejected");
        }
    }

    #[test]
    fn test_resolve_file_inputs_in_order() {
        let dir = tempdir().unwrap();
        let b = dir.path().join("b.jpg");
        let a = dir.path().join("a.NEF");
        let txt = dir.path().join("notes.txt");
        touch(&b);
        touch(&a);
        touch(&txt);

        let targets: Vec<PathBuf> = resolve_targets([&b, &txt, &a]).collect();
        assert_eq!(targets, vec![b, a]);
    }

    #[test]
    fn test_resolve_skips_missing_paths() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.jpg");
        touch(&present);
        let missing = dir.path().join("missing.jpg");

        let targets: Vec<PathBuf> = resolve_targets([&missing, &present]).collect();
        assert_eq!(targets, vec![present]);
    }

    #[test]
    fn test_resolve_directory_is_shallow() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("top.jpg"));
        touch(&dir.path().join("top.png"));
        let nested = dir.path().join("preview").join("deeper");
        fs::create_dir_all(&nested).unwrap();
        touch(&dir.path().join("preview").join("top_p512.jpg"));
        touch(&nested.join("deep.jpg"));

        let targets: Vec<PathBuf> = resolve_targets([dir.path()]).collect();
        assert_eq!(targets, vec![dir.path().join("top.jpg")]);
    }

    #[test]
    fn test_resolve_does_not_deduplicate() {
        let dir = tempdir().unwrap();
        let img = dir.path().join("one.heic");
        touch(&img);

        let targets: Vec<PathBuf> = resolve_targets([dir.path(), img.as_path()]).collect();
        assert_eq!(targets, vec![img.clone(), img]);
    }

    #[test]
    fn test_resolve_relative_inputs_from_current_dir() {
        let dir = tempdir().unwrap();
        let cwd = dir.path().canonicalize().unwrap();
        touch(&cwd.join("a.jpg"));

        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(&cwd).unwrap();
        let resolved: Vec<PathBuf> = resolve_targets([".", "a.jpg", "./a.jpg"]).collect();
        std::env::set_current_dir(previous).unwrap();

        let expected = cwd.join("a.jpg");
        assert_eq!(resolved, vec![expected.clone(), expected.clone(), expected]);
    }

    #[test]
    fn test_absolute_drops_current_dir_components() {
        assert_eq!(
            absolute(Path::new("/photos/./2024/./a.jpg")).unwrap(),
            PathBuf::from("/photos/2024/a.jpg")
        );
        assert_eq!(absolute(Path::new("/photos/a.jpg")).unwrap(), PathBuf::from("/photos/a.jpg"));
    }
}
