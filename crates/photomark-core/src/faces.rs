//! Face vector extraction from `p2000` previews.
//!
//! The preview is searched for faces at successive rotations; the first
//! orientation that yields a face produces a [`FaceVectorRecord`], written as
//! JSON next to the original under `fv/`. With a [`Roster`] attached, every
//! detected face is also compared against the known faces.

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::batch::{self, FileOutcome, MissingPreview, ProcessError};
use crate::detector::{DetectorError, FaceDetector};
use crate::naming::{self, PreviewKind};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::roster::Roster;
use crate::types::{BoundingBox, Embedding, FaceLocation, Matcher};

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Capability to find faces and compute their encodings.
pub trait FaceAnalyzer {
    /// Face boxes in `image`, empty when there are none.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, FaceError>;
    /// One encoding per face, in the order of `faces`.
    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, FaceError>;
}

/// SCRFD detection plus ArcFace recognition.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path, intra_threads: usize) -> Result<Self, FaceError> {
        let detector = FaceDetector::load(&model_dir.join("det_10g.onnx"), intra_threads)?;
        let recognizer = FaceRecognizer::load(&model_dir.join("w600k_r50.onnx"), intra_threads)?;
        Ok(Self::new(detector, recognizer))
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, FaceError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, FaceError> {
        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(FaceError::from))
            .collect()
    }
}

/// Counter-clockwise rotation in quarter turns; rotated images are expanded
/// to fit, so 90 and 270 swap width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

/// Rotation list of the plain face vector tool.
pub const FULL_TURN: [Rotation; 4] = [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];
/// Rotation list of the face matching tool, which never tries 0 degrees.
pub const QUARTER_TURNS: [Rotation; 3] = [Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unsupported rotation {0}: expected one of 0, 90, 180, 270")]
pub struct RotationError(pub String);

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Rotate `image` counter-clockwise by this angle.
    pub fn apply(self, image: &RgbImage) -> RgbImage {
        match self {
            Rotation::Deg0 => image.clone(),
            Rotation::Deg90 => imageops::rotate270(image),
            Rotation::Deg180 => imageops::rotate180(image),
            Rotation::Deg270 => imageops::rotate90(image),
        }
    }
}

impl TryFrom<u32> for Rotation {
    type Error = RotationError;

    fn try_from(degrees: u32) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(RotationError(other.to_string())),
        }
    }
}

impl FromStr for Rotation {
    type Err = RotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let degrees: u32 = s.trim().parse().map_err(|_| RotationError(s.to_string()))?;
        Rotation::try_from(degrees)
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}

/// JSON sidecar describing the faces found in one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceVectorRecord {
    /// Rotation value being tried when the faces were found.
    pub rotation: u32,
    /// `[top, right, bottom, left]` per face.
    pub face_locations: Vec<FaceLocation>,
    pub face_encodings: Vec<Vec<f32>>,
    /// Known names matched by the detected faces; only written when a roster
    /// is in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_faces: Option<Vec<String>>,
}

/// Faces found at a given rotation.
#[derive(Debug, Clone)]
pub struct FaceScan {
    pub rotation: Rotation,
    pub width: u32,
    pub height: u32,
    pub faces: Vec<BoundingBox>,
    pub encodings: Vec<Embedding>,
}

/// Search for faces, trying `rotations` in order.
///
/// The first attempt always runs on the image as stored. After a failed
/// attempt at angle `a`, the working image is rotated by `a` on top of the
/// rotations already applied, and the next angle is tried.
pub fn scan_rotations<A>(
    analyzer: &mut A,
    image: RgbImage,
    rotations: &[Rotation],
) -> Result<Option<FaceScan>, FaceError>
where
    A: FaceAnalyzer + ?Sized,
{
    let mut current = image;
    for &rotation in rotations {
        let faces = analyzer.locate(&current)?;
        if !faces.is_empty() {
            let encodings = analyzer.encode(&current, &faces)?;
            return Ok(Some(FaceScan {
                rotation,
                width: current.width(),
                height: current.height(),
                faces,
                encodings,
            }));
        }
        tracing::trace!(%rotation, "no face at this rotation");
        current = rotation.apply(&current);
    }
    Ok(None)
}

/// Names of known faces matching any of `encodings`, one entry per match.
pub fn identify(roster: &Roster, matcher: &dyn Matcher, encodings: &[Embedding]) -> Vec<String> {
    let mut names = Vec::new();
    for probe in encodings {
        for known in roster.iter() {
            if matcher.is_match(&known.encoding, probe) {
                names.push(known.name.clone());
            }
        }
    }
    names
}

impl FaceScan {
    pub fn into_record(self, detected_faces: Option<Vec<String>>) -> FaceVectorRecord {
        FaceVectorRecord {
            rotation: self.rotation.degrees(),
            face_locations: self
                .faces
                .iter()
                .map(|f| f.location(self.width, self.height))
                .collect(),
            face_encodings: self.encodings.into_iter().map(|e| e.values).collect(),
            detected_faces,
        }
    }
}

/// Known-face identification attached to an extractor.
pub struct Identification {
    pub roster: Roster,
    pub matcher: Box<dyn Matcher>,
}

/// Per-file face vector processor.
pub struct FaceVectorExtractor<A> {
    analyzer: A,
    rotations: Vec<Rotation>,
    missing_preview: MissingPreview,
    identification: Option<Identification>,
}

impl<A: FaceAnalyzer> FaceVectorExtractor<A> {
    /// Plain extraction over all four rotations, failing on a missing preview.
    pub fn new(analyzer: A) -> Self {
        Self {
            analyzer,
            rotations: FULL_TURN.to_vec(),
            missing_preview: MissingPreview::Error,
            identification: None,
        }
    }

    pub fn with_rotations(mut self, rotations: Vec<Rotation>) -> Self {
        self.rotations = rotations;
        self
    }

    pub fn with_missing_preview(mut self, policy: MissingPreview) -> Self {
        self.missing_preview = policy;
        self
    }

    pub fn with_identification(mut self, roster: Roster, matcher: Box<dyn Matcher>) -> Self {
        self.identification = Some(Identification { roster, matcher });
        self
    }

    /// Detect faces in the target's preview and write the record.
    pub fn process(&mut self, path: &Path) -> Result<FileOutcome, ProcessError> {
        let preview = naming::preview_path(path, PreviewKind::P2000);
        if !preview.is_file() {
            return batch::missing_preview(self.missing_preview, path, &preview);
        }

        let Some(record) = self.extract(&preview)? else {
            tracing::info!(path = %path.display(), "no face detected");
            return Ok(FileOutcome::Skipped("no face detected".to_string()));
        };

        let output = naming::face_vector_path(path);
        write_record(&output, &record)?;
        tracing::info!(
            path = %path.display(),
            output = %output.display(),
            faces = record.face_locations.len(),
            rotation = record.rotation,
            "written face vectors"
        );
        Ok(FileOutcome::Written(output))
    }

    fn extract(&mut self, preview: &Path) -> Result<Option<FaceVectorRecord>, ProcessError> {
        let image = image::open(preview)
            .map_err(|source| ProcessError::Image {
                path: preview.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let Some(scan) = scan_rotations(&mut self.analyzer, image, &self.rotations)? else {
            return Ok(None);
        };

        let detected = self
            .identification
            .as_ref()
            .map(|id| identify(&id.roster, id.matcher.as_ref(), &scan.encodings));
        if let Some(names) = &detected {
            tracing::debug!(?names, "identified known faces");
        }
        Ok(Some(scan.into_record(detected)))
    }
}

fn write_record(output: &Path, record: &FaceVectorRecord) -> Result<(), ProcessError> {
    let json = serde_json::to_string(record)?;
    let dir: PathBuf = naming::parent_dir(output);
    fs::create_dir_all(&dir).map_err(|e| ProcessError::io(&dir, e))?;
    fs::write(output, json).map_err(|e| ProcessError::io(output, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::KnownFace;
    use crate::types::CosineMatcher;
    use image::Rgb;
    use tempfile::tempdir;

    /// Finds one face on the n-th `locate` call and records what it saw.
    struct StubAnalyzer {
        hit_on_call: Option<usize>,
        faces_per_hit: usize,
        calls: Vec<(u32, u32)>,
        encode_calls: usize,
        encoding: Vec<f32>,
    }

    impl StubAnalyzer {
        fn hit_on(call: usize) -> Self {
            Self {
                hit_on_call: Some(call),
                faces_per_hit: 1,
                calls: Vec::new(),
                encode_calls: 0,
                encoding: vec![1.0, 0.0, 0.0],
            }
        }

        fn never() -> Self {
            Self { hit_on_call: None, ..Self::hit_on(0) }
        }
    }

    impl FaceAnalyzer for StubAnalyzer {
        fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, FaceError> {
            let call = self.calls.len();
            self.calls.push(image.dimensions());
            if Some(call) == self.hit_on_call {
                Ok((0..self.faces_per_hit)
                    .map(|i| BoundingBox {
                        x: 1.0 + i as f32, y: 2.0, width: 3.0, height: 4.0,
                        confidence: 0.9, landmarks: None,
                    })
                    .collect())
            } else {
                Ok(Vec::new())
            }
        }

        fn encode(&mut self, _image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, FaceError> {
            self.encode_calls += 1;
            Ok(faces.iter().map(|_| Embedding::new(self.encoding.clone())).collect())
        }
    }

    fn landscape() -> RgbImage {
        RgbImage::from_pixel(6, 4, Rgb([10, 20, 30]))
    }

    fn write_preview(dir: &Path, stem: &str) {
        let preview_dir = dir.join("preview");
        fs::create_dir_all(&preview_dir).unwrap();
        landscape().save(preview_dir.join(format!("{stem}_p2000.jpg"))).unwrap();
    }

    #[test]
    fn test_rotation_parse() {
        assert_eq!("90".parse::<Rotation>(), Ok(Rotation::Deg90));
        assert_eq!(Rotation::try_from(270), Ok(Rotation::Deg270));
        assert!("45".parse::<Rotation>().is_err());
        assert!("left".parse::<Rotation>().is_err());
    }

    #[test]
    fn test_rotation_is_counter_clockwise() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, Rgb([255, 0, 0]));
        // the right-hand pixel ends up on top after a quarter turn to the left
        let rotated = Rotation::Deg90.apply(&img);
        assert_eq!(rotated.dimensions(), (1, 2));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([255, 0, 0]));

        let rotated = Rotation::Deg270.apply(&img);
        assert_eq!(rotated.get_pixel(0, 1), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_scan_reports_180_after_trying_0_and_90() {
        let mut stub = StubAnalyzer::hit_on(2);
        let scan = scan_rotations(&mut stub, landscape(), &FULL_TURN).unwrap().unwrap();

        assert_eq!(scan.rotation, Rotation::Deg180);
        // unrotated, then rotated by 0, then rotated by 90
        assert_eq!(stub.calls, vec![(6, 4), (6, 4), (4, 6)]);
        assert_eq!(stub.encode_calls, 1);
    }

    #[test]
    fn test_scan_first_attempt_is_unrotated_for_quarter_turns() {
        let mut stub = StubAnalyzer::hit_on(0);
        let scan = scan_rotations(&mut stub, landscape(), &QUARTER_TURNS).unwrap().unwrap();
        assert_eq!(scan.rotation, Rotation::Deg90);
        assert_eq!(stub.calls, vec![(6, 4)]);
    }

    #[test]
    fn test_scan_rotations_accumulate() {
        let mut stub = StubAnalyzer::never();
        assert!(scan_rotations(&mut stub, landscape(), &QUARTER_TURNS).unwrap().is_none());
        // as stored, +90, +90+180
        assert_eq!(stub.calls, vec![(6, 4), (4, 6), (4, 6)]);
        assert_eq!(stub.encode_calls, 0);
    }

    #[test]
    fn test_record_json_shape() {
        let scan = FaceScan {
            rotation: Rotation::Deg90,
            width: 100,
            height: 100,
            faces: vec![BoundingBox {
                x: 10.0, y: 20.0, width: 30.0, height: 40.0,
                confidence: 0.9, landmarks: None,
            }],
            encodings: vec![Embedding::new(vec![0.5, -0.25])],
        };
        let json = serde_json::to_value(scan.clone().into_record(None)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "rotation": 90,
                "face_locations": [[20, 40, 60, 10]],
                "face_encodings": [[0.5, -0.25]],
            })
        );

        let json = serde_json::to_value(scan.into_record(Some(vec!["alice".into()]))).unwrap();
        assert_eq!(json["detected_faces"], serde_json::json!(["alice"]));
    }

    #[test]
    fn test_identify_appends_each_match() {
        let roster = Roster::new(vec![
            KnownFace::new("alice", vec![1.0, 0.0]),
            KnownFace::new("bob", vec![0.0, 1.0]),
            KnownFace::new("alice-glasses", vec![0.9, 0.1]),
        ]);
        let probes = vec![Embedding::new(vec![1.0, 0.05]), Embedding::new(vec![-1.0, 0.0])];
        let names = identify(&roster, &CosineMatcher::default(), &probes);
        assert_eq!(names, vec!["alice".to_string(), "alice-glasses".to_string()]);
    }

    #[test]
    fn test_process_writes_sidecar() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("IMG_0001.jpg");
        fs::write(&target, b"original").unwrap();
        write_preview(dir.path(), "IMG_0001");

        let mut extractor = FaceVectorExtractor::new(StubAnalyzer::hit_on(0));
        let outcome = extractor.process(&target).unwrap();

        let output = dir.path().join("fv").join("IMG_0001.jpg.fv.md.answer.md");
        assert_eq!(outcome, FileOutcome::Written(output.clone()));
        let record: FaceVectorRecord = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(record.rotation, 0);
        assert_eq!(record.face_encodings, vec![vec![1.0, 0.0, 0.0]]);
        assert_eq!(record.detected_faces, None);
        // original untouched
        assert_eq!(fs::read(&target).unwrap(), b"original");
    }

    #[test]
    fn test_process_with_roster_records_names() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("IMG_0002.jpg");
        fs::write(&target, b"original").unwrap();
        write_preview(dir.path(), "IMG_0002");

        let roster = Roster::new(vec![KnownFace::new("alice", vec![1.0, 0.0, 0.0])]);
        let mut extractor = FaceVectorExtractor::new(StubAnalyzer::hit_on(1))
            .with_rotations(QUARTER_TURNS.to_vec())
            .with_identification(roster, Box::new(CosineMatcher::default()));
        extractor.process(&target).unwrap();

        let output = naming::face_vector_path(&target);
        let record: FaceVectorRecord = serde_json::from_str(&fs::read_to_string(output).unwrap()).unwrap();
        assert_eq!(record.rotation, 180);
        assert_eq!(record.detected_faces, Some(vec!["alice".to_string()]));
    }

    #[test]
    fn test_process_no_face_is_skipped_without_output() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("IMG_0003.jpg");
        fs::write(&target, b"x").unwrap();
        write_preview(dir.path(), "IMG_0003");

        let mut extractor = FaceVectorExtractor::new(StubAnalyzer::never());
        let outcome = extractor.process(&target).unwrap();
        assert!(matches!(outcome, FileOutcome::Skipped(_)));
        assert!(!dir.path().join("fv").exists());
    }

    #[test]
    fn test_process_missing_preview_follows_policy() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("IMG_0004.jpg");
        fs::write(&target, b"x").unwrap();

        let mut extractor = FaceVectorExtractor::new(StubAnalyzer::hit_on(0));
        let err = extractor.process(&target).unwrap_err();
        assert!(matches!(err, ProcessError::MissingPreview(_)));
        assert!(extractor.analyzer.calls.is_empty());

        let mut extractor = extractor.with_missing_preview(MissingPreview::Skip);
        assert!(matches!(extractor.process(&target).unwrap(), FileOutcome::Skipped(_)));
    }

    #[test]
    fn test_process_corrupt_preview_is_an_error() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("IMG_0005.jpg");
        fs::write(&target, b"x").unwrap();
        fs::create_dir_all(dir.path().join("preview")).unwrap();
        fs::write(dir.path().join("preview").join("IMG_0005_p2000.jpg"), b"not a jpeg").unwrap();

        let mut extractor = FaceVectorExtractor::new(StubAnalyzer::hit_on(0));
        assert!(matches!(extractor.process(&target), Err(ProcessError::Image { .. })));
    }
}
