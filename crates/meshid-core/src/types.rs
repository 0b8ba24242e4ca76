use serde::{Deserialize, Serialize};

/// Number of points in a face-mesh landmark set.
pub const LANDMARK_COUNT: usize = 468;

/// Length of a landmark embedding: one (x, y, z) triple per mesh point.
pub const EMBEDDING_DIM: usize = LANDMARK_COUNT * 3;

/// Guards the L2 normalization in [`mapped_cosine`] against zero-norm vectors.
const NORM_EPSILON: f32 = 1e-10;

/// Axis-aligned face box in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// One face reported by a [`LandmarkDetector`](crate::detector::LandmarkDetector).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Mesh points in detector order. x and y are normalized to [0, 1] of the
    /// image width and height; z is on the same scale as x.
    pub landmarks: Option<Vec<[f32; 3]>>,
}

/// Standardized landmark embedding (1404-dimensional for a full face mesh).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Wrap raw values without validation. Callers that accept vectors from
    /// outside the extractor check [`is_full_size`](Self::is_full_size) first.
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Flatten a landmark set in point order and standardize it.
    ///
    /// Returns `None` when the flattened length is not [`EMBEDDING_DIM`].
    pub fn from_landmarks(landmarks: &[[f32; 3]]) -> Option<Self> {
        let flat: Vec<f32> = landmarks.iter().flatten().copied().collect();
        if flat.len() != EMBEDDING_DIM {
            return None;
        }
        Some(Self {
            values: standardize(flat),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full_size(&self) -> bool {
        self.values.len() == EMBEDDING_DIM
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Subtract the vector's own mean and divide by its own (population) standard
/// deviation. A constant vector only has its mean removed.
pub fn standardize(mut values: Vec<f32>) -> Vec<f32> {
    if values.is_empty() {
        return values;
    }

    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = variance.sqrt();

    for v in values.iter_mut() {
        let centered = *v as f64 - mean;
        let scaled = if std > 0.0 { centered / std } else { centered };
        *v = scaled as f32;
    }
    values
}

/// `(cos(a, b) + 1) / 2`, where each side is L2-normalized with a small epsilon
/// added to its norm.
pub fn mapped_cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let cos = dot / ((norm_a.sqrt() + NORM_EPSILON) * (norm_b.sqrt() + NORM_EPSILON));
    (cos + 1.0) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_and_std(values: &[f32]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn test_standardize_zero_mean_unit_std() {
        let raw: Vec<f32> = (0..EMBEDDING_DIM).map(|i| (i as f32 * 0.37).sin() * 5.0 + 2.0).collect();
        let (mean, std) = mean_and_std(&standardize(raw));
        assert!(mean.abs() < 1e-4, "mean = {mean}");
        assert!((std - 1.0).abs() < 1e-4, "std = {std}");
    }

    #[test]
    fn test_standardize_constant_vector_only_centers() {
        let out = standardize(vec![3.5; 8]);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_standardize_empty() {
        assert!(standardize(Vec::new()).is_empty());
    }

    #[test]
    fn test_from_landmarks_full_mesh() {
        let landmarks: Vec<[f32; 3]> = (0..LANDMARK_COUNT)
            .map(|i| [i as f32 / 468.0, 1.0 - i as f32 / 468.0, 0.01 * (i % 7) as f32])
            .collect();
        let emb = Embedding::from_landmarks(&landmarks).unwrap();
        assert_eq!(emb.len(), EMBEDDING_DIM);
        assert!(emb.is_full_size());
    }

    #[test]
    fn test_from_landmarks_partial_mesh_rejected() {
        let landmarks = vec![[0.5f32, 0.5, 0.0]; LANDMARK_COUNT - 1];
        assert!(Embedding::from_landmarks(&landmarks).is_none());
    }

    #[test]
    fn test_mapped_cosine_identical() {
        let a = [1.0, 2.0, 3.0];
        assert!((mapped_cosine(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mapped_cosine_orthogonal() {
        assert!((mapped_cosine(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mapped_cosine_opposite() {
        assert!(mapped_cosine(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_mapped_cosine_zero_vector() {
        // Epsilon keeps the result finite: cos = 0 -> 0.5.
        let sim = mapped_cosine(&[0.0, 0.0], &[1.0, 0.0]);
        assert!(sim.is_finite());
        assert!((sim - 0.5).abs() < 1e-6);
    }
}
