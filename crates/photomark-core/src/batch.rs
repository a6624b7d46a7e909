//! Batch driver: runs a per-file processor over resolved targets.
//!
//! Each file is isolated behind its own `Result`; a failure is logged and
//! counted, and the batch moves on to the next file.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::faces::FaceError;

/// What to do when a target has no preview of the required size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPreview {
    /// Log at info level and report the file as skipped.
    Skip,
    /// Report the file as failed.
    Error,
}

/// Successful result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// The original file was renamed to this path.
    Renamed(PathBuf),
    /// A sidecar was written to this path.
    Written(PathBuf),
    /// The file already reflects its content; nothing was done.
    Unchanged,
    /// Processing was skipped for the given reason.
    Skipped(String),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("preview not found: {0}")]
    MissingPreview(PathBuf),
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face analysis failed: {0}")]
    Face(#[from] FaceError),
    #[error("rename target already exists: {0}")]
    DestinationExists(PathBuf),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize face vectors: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProcessError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ProcessError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Resolve the preview policy for a missing preview.
pub(crate) fn missing_preview(
    policy: MissingPreview,
    target: &Path,
    preview: &Path,
) -> Result<FileOutcome, ProcessError> {
    match policy {
        MissingPreview::Skip => {
            tracing::info!(
                path = %target.display(),
                preview = %preview.display(),
                "preview is missing, skipping"
            );
            Ok(FileOutcome::Skipped("preview missing".to_string()))
        }
        MissingPreview::Error => Err(ProcessError::MissingPreview(preview.to_path_buf())),
    }
}

/// Counters accumulated over one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    /// Files that finished without a failure.
    pub fn processed(&self) -> usize {
        self.succeeded + self.skipped
    }

    /// Process exit status for this batch: 0 when nothing failed, else 1.
    pub fn exit_code(&self) -> u8 {
        if self.failed == 0 {
            0
        } else {
            1
        }
    }

    fn record<E: fmt::Display>(&mut self, path: &Path, result: Result<FileOutcome, E>) {
        match result {
            Ok(FileOutcome::Skipped(reason)) => {
                tracing::debug!(path = %path.display(), reason = %reason, "skipped");
                self.skipped += 1;
            }
            Ok(outcome) => {
                tracing::debug!(path = %path.display(), ?outcome, "done");
                self.succeeded += 1;
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed processing file");
                self.failed += 1;
            }
        }
    }
}

/// Options for [`run_batch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Log `Processed X/Y` after every file.
    pub report_progress: bool,
}

/// Run `process` over every target in order.
pub fn run_batch<F, E>(targets: &[PathBuf], options: BatchOptions, mut process: F) -> BatchSummary
where
    F: FnMut(&Path) -> Result<FileOutcome, E>,
    E: fmt::Display,
{
    let mut summary = BatchSummary {
        total: targets.len(),
        ..Default::default()
    };

    for (i, path) in targets.iter().enumerate() {
        let result = process(path);
        summary.record(path, result);

        if options.report_progress {
            tracing::info!("Processed {}/{}", i + 1, targets.len());
        }
    }

    tracing::info!(
        processed = summary.processed(),
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        errors = summary.failed,
        "done"
    );

    summary
}
