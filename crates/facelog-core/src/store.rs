//! Durable storage contract for people, reference embeddings and emotion events.

use crate::gallery::Gallery;
use crate::types::{Embedding, EmotionEvent, Person, PersonId};

/// Persistence capability consumed by the tracker and the enrollment tool.
///
/// Implementations must commit each call durably before returning `Ok`;
/// callers only update in-memory state after success.
pub trait FaceStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read every stored (person, embedding) pair in insertion order.
    ///
    /// Undecodable rows are skipped with a warning. An unreachable store is
    /// an error, never an empty gallery.
    fn load_gallery(&self) -> Result<Gallery, Self::Error>;

    /// Look up a person by (trimmed) name, creating one if absent.
    fn get_or_create_person(&mut self, name: &str) -> Result<Person, Self::Error>;

    /// Persist one reference embedding for an existing person.
    fn append_embedding(&mut self, person: &PersonId, embedding: &Embedding) -> Result<(), Self::Error>;

    /// Get-or-create `name` and append `embedding` for it as one atomic write.
    fn register(&mut self, name: &str, embedding: &Embedding) -> Result<Person, Self::Error>;

    /// Append one emotion event.
    fn record_event(&mut self, event: &EmotionEvent) -> Result<(), Self::Error>;
}

/// Trim a human-supplied name; `None` if nothing is left.
pub fn normalize_name(name: &str) -> Option<&str> {
    let trimmed = name.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
