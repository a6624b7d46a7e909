//! photomark-core: batch processing of photo folders.
//!
//! Resolves image targets from command-line inputs, then runs one of two
//! per-file pipelines against each target's pre-generated preview: renaming
//! by perceptual hash, or extracting face vectors (SCRFD detection and
//! ArcFace recognition via ONNX Runtime) into JSON sidecars.

pub mod alignment;
pub mod batch;
pub mod detector;
pub mod faces;
pub mod hashing;
pub mod naming;
pub mod recognizer;
pub mod renamer;
pub mod roster;
pub mod targets;
pub mod types;

pub use batch::{run_batch, BatchOptions, BatchSummary, FileOutcome, MissingPreview, ProcessError};
pub use detector::FaceDetector;
pub use faces::{FaceAnalyzer, FaceError, FaceVectorExtractor, FaceVectorRecord, OnnxFaceAnalyzer, Rotation};
pub use hashing::{ImageHasher, PerceptualHasher};
pub use recognizer::FaceRecognizer;
pub use renamer::HashRenamer;
pub use roster::{KnownFace, Roster, RosterError};
pub use targets::{is_image_file, resolve_targets};
pub use types::{BoundingBox, CosineMatcher, DistanceMatcher, Embedding, Matcher};
