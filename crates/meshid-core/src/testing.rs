//! Test doubles shared by the unit tests in this crate.

use crate::detector::{DetectorError, LandmarkDetector};
use crate::store::{FaceStore, Identity, PhotoRecord, StoreError};
use crate::types::{BoundingBox, DetectedFace, EMBEDDING_DIM, LANDMARK_COUNT};
use image::{DynamicImage, RgbImage};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Uniform RGB image whose red channel carries `seed`.
pub(crate) fn solid_image(seed: u8, width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([seed, 40, 80])))
}

/// Deterministic full mesh; different seeds give weakly correlated shapes.
pub(crate) fn seed_landmarks(seed: u8) -> Vec<[f32; 3]> {
    let s = seed as f32 + 1.0;
    (0..LANDMARK_COUNT)
        .map(|i| {
            let t = i as f32;
            [
                ((t * 0.37 * s).sin() + 1.0) / 2.0,
                ((t * 0.23 * s + s).cos() + 1.0) / 2.0,
                (t * 0.11 * s).sin() * 0.1,
            ]
        })
        .collect()
}

pub(crate) fn face_at(x: f32, y: f32, width: f32, height: f32, landmarks: Vec<[f32; 3]>) -> DetectedFace {
    DetectedFace {
        bbox: BoundingBox {
            x,
            y,
            width,
            height,
            confidence: 0.9,
        },
        landmarks: Some(landmarks),
    }
}

/// Unit vector along axis `k`.
pub(crate) fn basis_vector(k: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[k] = 1.0;
    v
}

pub(crate) fn mixed_vector(seed: u32) -> Vec<f32> {
    (0..EMBEDDING_DIM)
        .map(|i| ((i as f32 + 1.0) * 0.618 * seed as f32).sin())
        .collect()
}

/// Replays canned detector responses in order; an exhausted script reports no faces.
pub(crate) struct ScriptedDetector {
    responses: VecDeque<Vec<DetectedFace>>,
    pub calls: usize,
}

impl ScriptedDetector {
    pub(crate) fn new(responses: Vec<Vec<DetectedFace>>) -> Self {
        Self {
            responses: responses.into(),
            calls: 0,
        }
    }
}

impl LandmarkDetector for ScriptedDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        self.calls += 1;
        Ok(self.responses.pop_front().unwrap_or_default())
    }
}

/// Derives one face from the red channel of the top-left pixel.
/// Red 0 means "no face"; red 255 makes the detector fail.
#[derive(Default)]
pub(crate) struct SeededDetector {
    pub calls: usize,
}

impl LandmarkDetector for SeededDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        self.calls += 1;
        let seed = image.get_pixel(0, 0).0[0];
        match seed {
            0 => Ok(Vec::new()),
            255 => Err(DetectorError::InferenceFailed("scripted failure".into())),
            _ => Ok(vec![face_at(
                0.0,
                0.0,
                image.width() as f32,
                image.height() as f32,
                seed_landmarks(seed),
            )]),
        }
    }
}

/// In-memory [`FaceStore`].
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub identities: Vec<Identity>,
    pub photos: BTreeMap<i64, PhotoRecord>,
    pub images: BTreeMap<i64, DynamicImage>,
    /// Identities whose photo listing fails.
    pub broken_identities: HashSet<i64>,
    pub saves: usize,
}

impl MemoryStore {
    pub(crate) fn add_identity(&mut self, id: i64, family: &str, given: &str) {
        self.identities.push(Identity {
            id,
            family_name: family.into(),
            given_name: given.into(),
        });
    }

    pub(crate) fn add_photo(&mut self, id: i64, identity_id: i64, embedding: Option<Vec<f32>>, image: Option<DynamicImage>) {
        self.photos.insert(
            id,
            PhotoRecord {
                id,
                identity_id,
                embedding,
            },
        );
        if let Some(image) = image {
            self.images.insert(id, image);
        }
    }
}

impl FaceStore for MemoryStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.identities.clone())
    }

    fn list_photos(&self, identity_id: i64) -> Result<Vec<PhotoRecord>, StoreError> {
        if self.broken_identities.contains(&identity_id) {
            return Err(StoreError::Backend("listing offline".into()));
        }
        Ok(self
            .photos
            .values()
            .filter(|p| p.identity_id == identity_id)
            .cloned()
            .collect())
    }

    fn fetch_image(&self, photo_id: i64) -> Result<DynamicImage, StoreError> {
        self.images
            .get(&photo_id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "photo", id: photo_id })
    }

    fn save_embedding(&mut self, photo_id: i64, embedding: &[f32]) -> Result<bool, StoreError> {
        self.saves += 1;
        match self.photos.get_mut(&photo_id) {
            Some(photo) => {
                photo.embedding = Some(embedding.to_vec());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
