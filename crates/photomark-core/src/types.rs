use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in pixels of the image the face was detected in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face location as `(top, right, bottom, left)` pixel edges.
pub type FaceLocation = (u32, u32, u32, u32);

impl BoundingBox {
    /// Edges of this box rounded to whole pixels and clamped to the image.
    pub fn location(&self, image_width: u32, image_height: u32) -> FaceLocation {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        (
            clamp(self.y, image_height),
            clamp(self.x + self.width, image_width),
            clamp(self.y + self.height, image_height),
            clamp(self.x, image_width),
        )
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine similarity in [-1, 1]. Zero when either vector is all zeros.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Tolerance-based comparison of a probe embedding against a known one.
pub trait Matcher {
    fn is_match(&self, known: &Embedding, probe: &Embedding) -> bool;
}

/// Match when the Euclidean distance is within `tolerance`.
///
/// The classic dlib-style comparison; 0.6 is the usual tolerance there.
#[derive(Debug, Clone, Copy)]
pub struct DistanceMatcher {
    pub tolerance: f32,
}

impl Default for DistanceMatcher {
    fn default() -> Self {
        Self { tolerance: 0.6 }
    }
}

impl Matcher for DistanceMatcher {
    fn is_match(&self, known: &Embedding, probe: &Embedding) -> bool {
        known.values.len() == probe.values.len()
            && known.euclidean_distance(probe) <= self.tolerance
    }
}

/// Match when cosine similarity reaches `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct CosineMatcher {
    pub threshold: f32,
}

impl Default for CosineMatcher {
    fn default() -> Self {
        Self { threshold: 0.40 }
    }
}

impl Matcher for CosineMatcher {
    fn is_match(&self, known: &Embedding, probe: &Embedding) -> bool {
        known.values.len() == probe.values.len() && known.similarity(probe) >= self.threshold
    }
}
