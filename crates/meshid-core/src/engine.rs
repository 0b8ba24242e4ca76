//! The recognition engine: gallery ownership, training, store sync and matching.
//!
//! Everything here is synchronous and runs on the caller's thread. Mutating
//! operations take `&mut self`, so one engine cannot be trained and queried at
//! the same time.

use crate::config::{self, EngineConfig};
use crate::detector::LandmarkDetector;
use crate::extractor::{EmbeddingExtractor, FaceRegion, PixelBuffer};
use crate::gallery::Gallery;
use crate::matcher::{MappedCosineMatcher, Matcher, Recognition};
use crate::store::{FaceStore, IdentityInfo, PhotoRecord, StoreError};
use crate::types::{Embedding, EMBEDDING_DIM};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no face detected")]
    NotDetected,
    #[error("invalid embedding: expected {expected} values, got {actual}")]
    InvalidVector { expected: usize, actual: usize },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Whether the gallery has anything to match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Ready,
    NeedsTraining,
}

/// Snapshot of engine state for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub count: usize,
    pub unique_identities: usize,
    pub threshold: f32,
    pub detector_confidence: f32,
    pub vector_size: usize,
    pub cache_size: usize,
    pub status: ModelStatus,
}

/// Recognition result for one face in a multi-face image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecognition {
    pub region: FaceRegion,
    pub recognition: Recognition,
    /// 2D landmark points in full-image pixel coordinates, when requested and
    /// the face yielded an embedding.
    pub landmarks: Option<Vec<(i32, i32)>>,
}

/// Where a batch-trained photo's embedding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbeddingSource {
    Cache,
    Store,
    Extracted,
}

/// Owns the gallery, the per-photo extraction cache and the thresholds.
pub struct RecognitionEngine<D> {
    extractor: EmbeddingExtractor<D>,
    gallery: Gallery,
    cache: HashMap<i64, Embedding>,
    config: EngineConfig,
    matcher: MappedCosineMatcher,
}

impl<D: LandmarkDetector> RecognitionEngine<D> {
    pub fn new(detector: D, config: EngineConfig) -> Self {
        let config = EngineConfig::new(config.threshold, config.detector_confidence);
        tracing::info!(
            threshold = config.threshold,
            detector_confidence = config.detector_confidence,
            "recognition engine initialized"
        );
        Self {
            extractor: EmbeddingExtractor::new(detector),
            gallery: Gallery::new(),
            cache: HashMap::new(),
            config,
            matcher: MappedCosineMatcher,
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn extractor(&self) -> &EmbeddingExtractor<D> {
        &self.extractor
    }

    pub fn threshold(&self) -> f32 {
        self.config.threshold
    }

    pub fn cached_embedding(&self, photo_id: i64) -> Option<&Embedding> {
        self.cache.get(&photo_id)
    }

    // --- Extraction ---

    pub fn extract(&mut self, image: &DynamicImage) -> Option<Embedding> {
        self.extractor.extract(image)
    }

    pub fn extract_with_landmarks(&mut self, image: &DynamicImage) -> Option<(Embedding, Vec<(i32, i32)>)> {
        self.extractor.extract_with_landmarks(image)
    }

    // --- Recognition ---

    /// Best gallery match for `query` above the threshold, or `(None, 0.0, None)`.
    pub fn recognize(&self, query: &[f32]) -> Recognition {
        self.matcher.recognize(query, &self.gallery, self.config.threshold)
    }

    /// Extract the first face of `image` and recognize it. No face → no match.
    pub fn recognize_image(&mut self, image: &DynamicImage) -> Recognition {
        match self.extractor.extract(image) {
            Some(embedding) => self.recognize(embedding.as_slice()),
            None => Recognition::none(),
        }
    }

    /// Recognize every face the detector finds, each from its own padded crop.
    pub fn recognize_faces(&mut self, image: &DynamicImage, with_landmarks: bool) -> Vec<FaceRecognition> {
        let regions = self.extractor.detect_faces(image);
        let mut results = Vec::with_capacity(regions.len());

        for region in regions {
            let crop = image.crop_imm(region.x, region.y, region.width, region.height);

            let (embedding, landmarks) = if with_landmarks {
                match self.extractor.extract_with_landmarks(&crop) {
                    Some((embedding, points)) => {
                        let (dx, dy) = (region.x as i32, region.y as i32);
                        let points = points.into_iter().map(|(x, y)| (x + dx, y + dy)).collect();
                        (Some(embedding), Some(points))
                    }
                    None => (None, None),
                }
            } else {
                (self.extractor.extract(&crop), None)
            };

            let recognition = embedding
                .map(|e| self.recognize(e.as_slice()))
                .unwrap_or_default();

            results.push(FaceRecognition {
                region,
                recognition,
                landmarks,
            });
        }

        results
    }

    // --- Training ---

    pub fn train_from_image(
        &mut self,
        image: &DynamicImage,
        identity: &IdentityInfo,
        photo_id: Option<i64>,
    ) -> Result<(), EngineError> {
        let embedding = self.extractor.extract(image);
        self.train_extracted(embedding, identity, photo_id)
    }

    pub fn train_from_bytes(
        &mut self,
        bytes: &[u8],
        identity: &IdentityInfo,
        photo_id: Option<i64>,
    ) -> Result<(), EngineError> {
        let embedding = self.extractor.extract_from_bytes(bytes);
        self.train_extracted(embedding, identity, photo_id)
    }

    pub fn train_from_pixels(
        &mut self,
        pixels: &PixelBuffer<'_>,
        identity: &IdentityInfo,
        photo_id: Option<i64>,
    ) -> Result<(), EngineError> {
        let embedding = self.extractor.extract_from_pixels(pixels);
        self.train_extracted(embedding, identity, photo_id)
    }

    /// Enroll a vector computed elsewhere. The one training path that checks length.
    pub fn add_existing_embedding(
        &mut self,
        values: Vec<f32>,
        identity: &IdentityInfo,
        photo_id: Option<i64>,
    ) -> Result<(), EngineError> {
        if values.len() != EMBEDDING_DIM {
            tracing::warn!(
                expected = EMBEDDING_DIM,
                actual = values.len(),
                ?photo_id,
                "rejecting embedding of wrong length"
            );
            return Err(EngineError::InvalidVector {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        self.enroll(Embedding::new(values), identity, photo_id);
        Ok(())
    }

    /// Enroll every stored photo of one identity, reusing cached or stored
    /// embeddings before falling back to extraction. Returns how many photos
    /// ended up enrolled; individual failures are logged and skipped.
    pub fn batch_train_identity<S: FaceStore + ?Sized>(
        &mut self,
        identity_id: i64,
        display_name: &str,
        store: &mut S,
    ) -> usize {
        let photos = match store.list_photos(identity_id) {
            Ok(photos) => photos,
            Err(e) => {
                tracing::error!(identity_id, error = %e, "batch train: failed to list photos");
                return 0;
            }
        };

        let identity = IdentityInfo::new(Some(identity_id), display_name, "");
        let mut trained = 0;

        for photo in &photos {
            match self.train_photo(photo, &identity, store) {
                Ok(source) => {
                    trained += 1;
                    tracing::debug!(identity_id, photo_id = photo.id, ?source, "batch train: photo enrolled");
                }
                Err(e) => {
                    tracing::warn!(identity_id, photo_id = photo.id, error = %e, "batch train: skipping photo");
                }
            }
        }

        tracing::info!(
            identity_id,
            name = display_name,
            trained,
            photos = photos.len(),
            "batch trained identity"
        );
        trained
    }

    /// Replace the gallery and cache with every stored embedding.
    pub fn load_all<S: FaceStore + ?Sized>(&mut self, store: &S) -> usize {
        self.gallery.clear();
        self.cache.clear();

        let identities = match store.list_identities() {
            Ok(identities) => identities,
            Err(e) => {
                tracing::error!(error = %e, "load: failed to list identities");
                return 0;
            }
        };

        let mut loaded = 0;
        for identity in &identities {
            let photos = match store.list_photos(identity.id) {
                Ok(photos) => photos,
                Err(e) => {
                    tracing::warn!(identity_id = identity.id, error = %e, "load: skipping identity");
                    continue;
                }
            };

            let name = identity.display_name();
            for photo in photos {
                let Some(values) = photo.embedding else {
                    continue;
                };
                if values.len() != EMBEDDING_DIM {
                    tracing::warn!(
                        photo_id = photo.id,
                        len = values.len(),
                        "load: skipping stored embedding of wrong length"
                    );
                    continue;
                }

                let embedding = Embedding::new(values);
                self.cache.insert(photo.id, embedding.clone());
                self.gallery.insert(embedding, Some(identity.id), name.clone(), Some(photo.id));
                loaded += 1;
            }
        }

        tracing::info!(loaded, identities = identities.len(), "loaded embeddings from store");
        loaded
    }

    /// Drop the gallery entry and cache entry for `photo_id`.
    pub fn remove_by_photo_id(&mut self, photo_id: i64) -> bool {
        self.cache.remove(&photo_id);
        let removed = self.gallery.remove_by_photo_id(photo_id);
        if removed {
            tracing::info!(photo_id, "removed embedding");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.gallery.clear();
        self.cache.clear();
        tracing::info!("cleared all embeddings");
    }

    // --- Configuration & introspection ---

    /// Set the acceptance threshold, clamped to [0.1, 1.0].
    pub fn set_threshold(&mut self, threshold: f32) {
        self.config.threshold = config::clamp_threshold(threshold);
        tracing::info!(threshold = self.config.threshold, "recognition threshold set");
    }

    pub fn describe(&self) -> ModelInfo {
        let count = self.gallery.len();
        ModelInfo {
            count,
            unique_identities: self.gallery.unique_identity_count(),
            threshold: self.config.threshold,
            detector_confidence: self.config.detector_confidence,
            vector_size: EMBEDDING_DIM,
            cache_size: self.cache.len(),
            status: if count > 0 {
                ModelStatus::Ready
            } else {
                ModelStatus::NeedsTraining
            },
        }
    }

    // --- Internals ---

    fn train_extracted(
        &mut self,
        embedding: Option<Embedding>,
        identity: &IdentityInfo,
        photo_id: Option<i64>,
    ) -> Result<(), EngineError> {
        let Some(embedding) = embedding else {
            tracing::warn!(?photo_id, "no face detected for training");
            return Err(EngineError::NotDetected);
        };
        match photo_id {
            Some(id) => {
                self.enroll_cached(embedding, identity, id);
            }
            None => self.enroll(embedding, identity, None),
        }
        Ok(())
    }

    /// Append to the gallery unless the photo is already enrolled.
    fn enroll(&mut self, embedding: Embedding, identity: &IdentityInfo, photo_id: Option<i64>) {
        let name = identity.display_name();
        if let Some(id) = photo_id {
            if self.gallery.contains_photo_id(id) {
                tracing::debug!(photo_id = id, name = %name, "photo already enrolled");
                return;
            }
        }
        tracing::info!(name = %name, identity_id = ?identity.id, ?photo_id, "added embedding");
        self.gallery.insert(embedding, identity.id, name, photo_id);
    }

    /// Enroll a photo and cache its vector together. An already-enrolled photo
    /// keeps its gallery vector and the cache is set to that vector. Returns
    /// the vector the gallery now holds for the photo.
    fn enroll_cached(&mut self, embedding: Embedding, identity: &IdentityInfo, photo_id: i64) -> Embedding {
        let kept = match self.gallery.embedding_for_photo(photo_id) {
            Some(existing) => {
                tracing::debug!(photo_id, "photo already enrolled; keeping its embedding");
                existing.clone()
            }
            None => {
                self.enroll(embedding.clone(), identity, Some(photo_id));
                embedding
            }
        };
        self.cache.insert(photo_id, kept.clone());
        kept
    }

    fn train_photo<S: FaceStore + ?Sized>(
        &mut self,
        photo: &PhotoRecord,
        identity: &IdentityInfo,
        store: &mut S,
    ) -> Result<EmbeddingSource, EngineError> {
        if let Some(cached) = self.cache.get(&photo.id).cloned() {
            let kept = self.enroll_cached(cached, identity, photo.id);
            if photo.embedding.is_none() {
                save_best_effort(store, photo.id, &kept);
            }
            return Ok(EmbeddingSource::Cache);
        }

        if let Some(stored) = &photo.embedding {
            if stored.len() != EMBEDDING_DIM {
                return Err(EngineError::InvalidVector {
                    expected: EMBEDDING_DIM,
                    actual: stored.len(),
                });
            }
            self.enroll_cached(Embedding::new(stored.clone()), identity, photo.id);
            return Ok(EmbeddingSource::Store);
        }

        let image = store.fetch_image(photo.id)?;
        let embedding = self.extractor.extract(&image).ok_or(EngineError::NotDetected)?;
        let kept = self.enroll_cached(embedding, identity, photo.id);
        save_best_effort(store, photo.id, &kept);
        Ok(EmbeddingSource::Extracted)
    }
}

/// Write an embedding back to the store; failures are logged, not returned.
fn save_best_effort<S: FaceStore + ?Sized>(store: &mut S, photo_id: i64, embedding: &Embedding) {
    match store.save_embedding(photo_id, embedding.as_slice()) {
        Ok(true) => tracing::debug!(photo_id, "saved embedding to store"),
        Ok(false) => tracing::warn!(photo_id, "store has no photo row for embedding"),
        Err(e) => tracing::error!(photo_id, error = %e, "failed to save embedding"),
    }
}
