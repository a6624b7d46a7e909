//! Hash-based renaming.
//!
//! Renames an original photo to `<colorhash>_<averagehash>[_<fingerprint>]`
//! computed from its `p512` preview. A trailing 32-hex fingerprint in the old
//! name survives every rename; the other segments are replaced.

use std::fs;
use std::path::Path;

use crate::batch::{self, FileOutcome, MissingPreview, ProcessError};
use crate::hashing::ImageHasher;
use crate::naming::{self, PreviewKind};

/// Per-file hash renamer.
pub struct HashRenamer<H> {
    hasher: H,
    missing_preview: MissingPreview,
    dry_run: bool,
}

impl<H: ImageHasher> HashRenamer<H> {
    /// Renamer that skips files without a preview.
    pub fn new(hasher: H) -> Self {
        Self {
            hasher,
            missing_preview: MissingPreview::Skip,
            dry_run: false,
        }
    }

    pub fn with_missing_preview(mut self, policy: MissingPreview) -> Self {
        self.missing_preview = policy;
        self
    }

    /// Log the renames that would happen without touching any file.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Stem the file should carry, computed from its preview.
    fn expected_stem(&self, preview: &Path, current_stem: &str) -> Result<String, ProcessError> {
        let (color_hash, average_hash) = {
            let image = image::open(preview).map_err(|source| ProcessError::Image {
                path: preview.to_path_buf(),
                source,
            })?;
            (self.hasher.color_hash(&image), self.hasher.average_hash(&image))
        };

        Ok(naming::hashed_stem(
            &color_hash,
            &average_hash,
            naming::trailing_fingerprint(current_stem),
        ))
    }

    pub fn process(&self, path: &Path) -> Result<FileOutcome, ProcessError> {
        let preview = naming::preview_path(path, PreviewKind::P512);
        if !preview.is_file() {
            return batch::missing_preview(self.missing_preview, path, &preview);
        }

        let stem = naming::stem(path);
        let expected = self.expected_stem(&preview, &stem)?;
        if stem == expected {
            tracing::info!(path = %path.display(), "filename already correct");
            return Ok(FileOutcome::Unchanged);
        }

        let destination = naming::parent_dir(path).join(format!("{expected}{}", naming::dotted_extension(path)));
        if destination == path {
            tracing::info!(path = %path.display(), "no changes required");
            return Ok(FileOutcome::Unchanged);
        }
        if destination.exists() {
            return Err(ProcessError::DestinationExists(destination));
        }

        if self.dry_run {
            tracing::info!(from = %path.display(), to = %destination.display(), "would rename");
        } else {
            fs::rename(path, &destination).map_err(|e| ProcessError::io(path, e))?;
            tracing::info!(from = %path.display(), to = %destination.display(), "renamed");
        }
        Ok(FileOutcome::Renamed(destination))
    }
}
