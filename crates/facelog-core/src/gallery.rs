//! In-memory working set of reference embeddings.

use crate::types::{Embedding, GalleryEntry, Person, PersonId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalleryError {
    #[error("embedding has {actual} dimensions, gallery expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },
    #[error("identical embedding already enrolled for person {existing}")]
    DuplicateEmbedding { existing: PersonId },
}

/// Ordered (person, reference embedding) pairs with one fixed dimensionality.
///
/// The dimensionality is locked by the first entry.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    dim: Option<usize>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Number of distinct people with at least one entry.
    pub fn person_count(&self) -> usize {
        let mut ids: Vec<PersonId> = Vec::new();
        for entry in &self.entries {
            if !ids.contains(&entry.person.id) {
                ids.push(entry.person.id);
            }
        }
        ids.len()
    }

    /// Check that `embedding` is non-empty, finite, and has the gallery's
    /// dimensionality. NaN or infinite components cannot be stored as JSON
    /// numbers, so they never enter the gallery.
    pub fn check_dim(&self, embedding: &Embedding) -> Result<(), GalleryError> {
        if embedding.values.is_empty() {
            return Err(GalleryError::EmptyEmbedding);
        }
        if let Some(index) = embedding.values.iter().position(|v| !v.is_finite()) {
            return Err(GalleryError::NonFinite { index });
        }
        match self.dim {
            Some(expected) if expected != embedding.dim() => Err(GalleryError::DimensionMismatch {
                expected,
                actual: embedding.dim(),
            }),
            _ => Ok(()),
        }
    }

    /// Check that `embedding` could be appended for `person` without
    /// breaking the gallery invariants. Does not mutate.
    pub fn validate(&self, person: &PersonId, embedding: &Embedding) -> Result<(), GalleryError> {
        self.check_dim(embedding)?;
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.person.id != *person && e.embedding.values == embedding.values)
        {
            return Err(GalleryError::DuplicateEmbedding {
                existing: existing.person.id,
            });
        }
        Ok(())
    }

    /// Append one entry. Locks the dimensionality if this is the first one.
    pub fn append(&mut self, person: Person, embedding: Embedding) -> Result<(), GalleryError> {
        self.validate(&person.id, &embedding)?;
        self.dim.get_or_insert(embedding.dim());
        self.entries.push(GalleryEntry { person, embedding });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str) -> Person {
        Person {
            id: PersonId::new(),
            name: name.into(),
        }
    }

    #[test]
    fn test_first_entry_locks_dimension() {
        let mut gallery = Gallery::new();
        assert_eq!(gallery.dim(), None);

        gallery
            .append(person("alice"), Embedding::new(vec![1.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(gallery.dim(), Some(3));

        let err = gallery
            .append(person("bob"), Embedding::new(vec![1.0, 0.0]))
            .unwrap_err();
        assert_eq!(err, GalleryError::DimensionMismatch { expected: 3, actual: 2 });
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_check_dim_rejects_other_sizes() {
        let mut gallery = Gallery::new();
        gallery
            .append(person("alice"), Embedding::new(vec![0.5; 128]))
            .unwrap();
        assert!(gallery.check_dim(&Embedding::new(vec![0.25; 128])).is_ok());
        assert!(gallery.check_dim(&Embedding::new(vec![0.5; 512])).is_err());
        assert_eq!(
            gallery.check_dim(&Embedding::new(Vec::new())),
            Err(GalleryError::EmptyEmbedding)
        );
    }

    #[test]
    fn test_non_finite_components_rejected() {
        let mut gallery = Gallery::new();
        assert_eq!(
            gallery.check_dim(&Embedding::new(vec![f32::NAN, 0.5, 0.25])),
            Err(GalleryError::NonFinite { index: 0 })
        );
        let err = gallery
            .append(person("zed"), Embedding::new(vec![0.5, f32::INFINITY]))
            .unwrap_err();
        assert_eq!(err, GalleryError::NonFinite { index: 1 });
        assert!(gallery.is_empty());
        // A rejected first vector does not lock the dimensionality.
        assert_eq!(gallery.dim(), None);
    }

    #[test]
    fn test_duplicate_vector_under_other_person_rejected() {
        let mut gallery = Gallery::new();
        let alice = person("alice");
        gallery
            .append(alice.clone(), Embedding::new(vec![0.1, 0.2]))
            .unwrap();

        let err = gallery
            .append(person("mallory"), Embedding::new(vec![0.1, 0.2]))
            .unwrap_err();
        assert_eq!(err, GalleryError::DuplicateEmbedding { existing: alice.id });

        // Same vector enrolled twice for the same person is allowed.
        gallery.append(alice, Embedding::new(vec![0.1, 0.2])).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.person_count(), 1);
    }

    #[test]
    fn test_entries_keep_insertion_order() {
        let mut gallery = Gallery::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            gallery
                .append(person(name), Embedding::new(vec![i as f32, 1.0]))
                .unwrap();
        }
        let names: Vec<&str> = gallery.entries().iter().map(|e| e.person.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
