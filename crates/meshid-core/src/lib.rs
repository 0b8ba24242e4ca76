//! meshid-core — Face identification by landmark-geometry embeddings.
//!
//! A face-mesh landmark detector turns an image into 468 3D points, which are
//! flattened and standardized into a 1404-dimensional embedding. Embeddings are
//! enrolled into an in-memory gallery and matched by mapped cosine similarity.

pub mod config;
pub mod detector;
pub mod engine;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use detector::{DetectorError, FaceMeshDetector, LandmarkDetector};
pub use engine::{EngineError, FaceRecognition, ModelInfo, ModelStatus, RecognitionEngine};
pub use extractor::{EmbeddingExtractor, FaceRegion, PixelBuffer, PixelLayout};
pub use gallery::{Gallery, GalleryEntry};
pub use matcher::{MappedCosineMatcher, Matcher, Recognition};
pub use store::{FaceStore, Identity, IdentityInfo, PhotoRecord, StoreError};
pub use types::{BoundingBox, DetectedFace, Embedding, EMBEDDING_DIM, LANDMARK_COUNT};
