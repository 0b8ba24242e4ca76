//! Nearest-match recognition against the gallery.

use crate::gallery::Gallery;
use crate::types::{mapped_cosine, EMBEDDING_DIM};
use serde::{Deserialize, Serialize};

/// Outcome of matching one query embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub identity_id: Option<i64>,
    /// Mapped similarity of the accepted match in [0, 1]; 0.0 when nothing matched.
    pub confidence: f32,
    pub photo_id: Option<i64>,
}

impl Recognition {
    /// The "nobody" result: `(None, 0.0, None)`.
    pub const fn none() -> Self {
        Self {
            identity_id: None,
            confidence: 0.0,
            photo_id: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.identity_id.is_some() || self.photo_id.is_some()
    }
}

impl Default for Recognition {
    fn default() -> Self {
        Self::none()
    }
}

/// Strategy for comparing a query embedding against the gallery.
pub trait Matcher {
    fn recognize(&self, query: &[f32], gallery: &Gallery, threshold: f32) -> Recognition;
}

/// Linear-scan matcher over mapped cosine similarity.
///
/// A candidate wins only if it is strictly better than the running best and
/// strictly above the threshold, so the first of several equal scores is kept
/// and nothing at or below the threshold is ever reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappedCosineMatcher;

impl Matcher for MappedCosineMatcher {
    fn recognize(&self, query: &[f32], gallery: &Gallery, threshold: f32) -> Recognition {
        if query.is_empty() || gallery.is_empty() {
            return Recognition::none();
        }
        if query.len() != EMBEDDING_DIM {
            tracing::warn!(
                expected = EMBEDDING_DIM,
                actual = query.len(),
                "rejecting query embedding of wrong length"
            );
            return Recognition::none();
        }

        let mut best = Recognition::none();

        for entry in gallery {
            let similarity = mapped_cosine(query, entry.embedding.as_slice());
            if similarity > best.confidence && similarity > threshold {
                best = Recognition {
                    identity_id: entry.identity_id,
                    confidence: similarity,
                    photo_id: entry.photo_id,
                };
            }
        }

        tracing::debug!(
            identity_id = ?best.identity_id,
            photo_id = ?best.photo_id,
            confidence = best.confidence,
            "recognition result"
        );
        best
    }
}
