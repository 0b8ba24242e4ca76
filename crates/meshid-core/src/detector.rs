//! Face-mesh landmark detection.
//!
//! [`LandmarkDetector`] is the seam the extractor talks to. [`FaceMeshDetector`]
//! implements it with a 468-point face-mesh ONNX model run through ONNX Runtime.

use crate::types::{BoundingBox, DetectedFace, EMBEDDING_DIM};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const FACEMESH_INPUT_SIZE: u32 = 192;
const FACEMESH_PIXEL_SCALE: f32 = 255.0;
const FACEMESH_SCORE_LEN: usize = 1;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the face-mesh ONNX model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can find faces and their mesh landmarks in an RGB image.
pub trait LandmarkDetector {
    /// Detect faces, most confident first. An image with no face yields an
    /// empty list rather than an error.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    new_w: u32,
    new_h: u32,
}

fn letterbox(width: u32, height: u32) -> LetterboxInfo {
    let size = FACEMESH_INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, FACEMESH_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, FACEMESH_INPUT_SIZE);
    LetterboxInfo {
        scale,
        pad_x: ((FACEMESH_INPUT_SIZE - new_w) / 2) as f32,
        pad_y: ((FACEMESH_INPUT_SIZE - new_h) / 2) as f32,
        new_w,
        new_h,
    }
}

/// Face-mesh model wrapper.
pub struct FaceMeshDetector {
    session: Session,
    num_outputs: usize,
    min_confidence: f32,
}

impl FaceMeshDetector {
    /// Load the face-mesh ONNX model from the given path.
    ///
    /// `min_confidence` is the face-presence score below which a result is
    /// discarded as "no face".
    pub fn load(model_path: &str, min_confidence: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            min_confidence,
            "loaded face-mesh model"
        );

        if num_outputs < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "face-mesh model requires landmark and score outputs, got {num_outputs}"
            )));
        }

        Ok(Self {
            session,
            num_outputs,
            min_confidence,
        })
    }

    /// Letterbox the image into a 1×192×192×3 NHWC tensor scaled to [0, 1].
    fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
        let size = FACEMESH_INPUT_SIZE as usize;
        let lb = letterbox(image.width(), image.height());
        let resized = image::imageops::resize(image, lb.new_w, lb.new_h, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
        let (x0, y0) = (lb.pad_x as usize, lb.pad_y as usize);

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (x0 + x as usize, y0 + y as usize);
            for c in 0..3 {
                tensor[[0, ty, tx, c]] = pixel.0[c] as f32 / FACEMESH_PIXEL_SCALE;
            }
        }

        (tensor, lb)
    }
}

impl LandmarkDetector for FaceMeshDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, lb) = Self::preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Tell the outputs apart by size: exported models name them inconsistently.
        let mut raw_landmarks: Option<Vec<f32>> = None;
        let mut score_logit: Option<f32> = None;
        for idx in 0..self.num_outputs {
            let (_, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("output {idx}: {e}")))?;
            match data.len() {
                EMBEDDING_DIM if raw_landmarks.is_none() => raw_landmarks = Some(data.to_vec()),
                FACEMESH_SCORE_LEN if score_logit.is_none() => score_logit = Some(data[0]),
                _ => {}
            }
        }

        let raw = raw_landmarks.ok_or_else(|| {
            DetectorError::InferenceFailed(format!("no {EMBEDDING_DIM}-value landmark output"))
        })?;
        let score = sigmoid(score_logit.ok_or_else(|| {
            DetectorError::InferenceFailed("no face-presence score output".into())
        })?);

        if score < self.min_confidence {
            tracing::debug!(score, min = self.min_confidence, "face-mesh: no face");
            return Ok(Vec::new());
        }

        let landmarks = map_landmarks(&raw, &lb, image.width(), image.height());
        let bbox = landmark_bounds(&landmarks, image.width(), image.height(), score);

        Ok(vec![DetectedFace {
            bbox,
            landmarks: Some(landmarks),
        }])
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Map model-space (x, y, z) triples back through the letterbox and normalize
/// by the source image size.
fn map_landmarks(raw: &[f32], lb: &LetterboxInfo, width: u32, height: u32) -> Vec<[f32; 3]> {
    let (w, h) = (width as f32, height as f32);
    raw.chunks_exact(3)
        .map(|p| {
            let x = (p[0] - lb.pad_x) / lb.scale;
            let y = (p[1] - lb.pad_y) / lb.scale;
            let z = p[2] / lb.scale;
            [x / w, y / h, z / w]
        })
        .collect()
}

/// Pixel-space box spanning all landmarks, clipped to the image.
fn landmark_bounds(landmarks: &[[f32; 3]], width: u32, height: u32, confidence: f32) -> BoundingBox {
    let (w, h) = (width as f32, height as f32);
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;

    for p in landmarks {
        min_x = min_x.min(p[0] * w);
        min_y = min_y.min(p[1] * h);
        max_x = max_x.max(p[0] * w);
        max_y = max_y.max(p[1] * h);
    }

    if !min_x.is_finite() {
        return BoundingBox { x: 0.0, y: 0.0, width: 0.0, height: 0.0, confidence };
    }

    let x1 = min_x.clamp(0.0, w);
    let y1 = min_y.clamp(0.0, h);
    let x2 = max_x.clamp(0.0, w);
    let y2 = max_y.clamp(0.0, h);

    BoundingBox {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
        confidence,
    }
}
