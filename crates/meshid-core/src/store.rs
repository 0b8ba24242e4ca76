//! Contract for the persistent store that holds identities, photos and their
//! previously computed embeddings.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A person record as the store holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub family_name: String,
    pub given_name: String,
}

impl Identity {
    pub fn display_name(&self) -> String {
        join_name(&self.family_name, &self.given_name)
    }
}

/// Who a training call enrolls. The id is absent for provisional entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub id: Option<i64>,
    pub family_name: String,
    pub given_name: String,
}

impl IdentityInfo {
    pub fn new(id: Option<i64>, family_name: impl Into<String>, given_name: impl Into<String>) -> Self {
        Self {
            id,
            family_name: family_name.into(),
            given_name: given_name.into(),
        }
    }

    /// "Family Given", each part trimmed, empty parts dropped.
    pub fn display_name(&self) -> String {
        join_name(&self.family_name, &self.given_name)
    }
}

impl From<&Identity> for IdentityInfo {
    fn from(identity: &Identity) -> Self {
        Self {
            id: Some(identity.id),
            family_name: identity.family_name.clone(),
            given_name: identity.given_name.clone(),
        }
    }
}

/// A stored photograph; `embedding` is set once one has been saved for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub identity_id: i64,
    pub embedding: Option<Vec<f32>>,
}

/// Read/write access to durable identities, photos and embeddings.
pub trait FaceStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    fn list_photos(&self, identity_id: i64) -> Result<Vec<PhotoRecord>, StoreError>;

    fn fetch_image(&self, photo_id: i64) -> Result<DynamicImage, StoreError>;

    /// Returns whether a photo row was updated.
    fn save_embedding(&mut self, photo_id: i64, embedding: &[f32]) -> Result<bool, StoreError>;
}

fn join_name(family: &str, given: &str) -> String {
    [family.trim(), given.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
