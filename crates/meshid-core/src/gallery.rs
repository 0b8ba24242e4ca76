//! In-memory gallery of enrolled embeddings.

use crate::types::Embedding;
use std::collections::HashSet;

/// One enrolled embedding and who it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub embedding: Embedding,
    /// Absent for provisional, same-session enrollments.
    pub identity_id: Option<i64>,
    pub display_name: String,
    /// Source photograph in the store; absent for ad-hoc entries.
    pub photo_id: Option<i64>,
}

/// Insertion-ordered collection of [`GalleryEntry`] records.
///
/// The gallery trusts its input: length validation and duplicate avoidance are
/// the caller's job.
#[derive(Debug, Default, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        embedding: Embedding,
        identity_id: Option<i64>,
        display_name: impl Into<String>,
        photo_id: Option<i64>,
    ) {
        self.entries.push(GalleryEntry {
            embedding,
            identity_id,
            display_name: display_name.into(),
            photo_id,
        });
    }

    /// Remove the earliest-inserted entry for `photo_id`. At most one entry is
    /// removed per call.
    pub fn remove_by_photo_id(&mut self, photo_id: i64) -> bool {
        match self.entries.iter().position(|e| e.photo_id == Some(photo_id)) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains_photo_id(&self, photo_id: i64) -> bool {
        self.entries.iter().any(|e| e.photo_id == Some(photo_id))
    }

    /// Embedding of the earliest entry for `photo_id`.
    pub fn embedding_for_photo(&self, photo_id: i64) -> Option<&Embedding> {
        self.entries
            .iter()
            .find(|e| e.photo_id == Some(photo_id))
            .map(|e| &e.embedding)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct identity ids, ignoring provisional entries.
    pub fn unique_identity_count(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|e| e.identity_id)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GalleryEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a GalleryEntry;
    type IntoIter = std::slice::Iter<'a, GalleryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
