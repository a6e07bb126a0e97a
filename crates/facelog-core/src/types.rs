use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Guard added to each vector norm so zero vectors score 0 instead of NaN.
pub const SIMILARITY_EPSILON: f32 = 1e-10;

/// Default cosine similarity required to accept a gallery match.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// Label logged when the analyzer returned an embedding but no emotion.
pub const UNKNOWN_EMOTION: &str = "unknown";

/// Opaque, unique person identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonId(Uuid);

impl PersonId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for PersonId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A known person. Names are unique and act as the identity key for registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
}

/// Face embedding vector (dimensionality fixed by the embedding model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, when known.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Each norm gets [`SIMILARITY_EPSILON`] added before dividing, so a
    /// zero vector compares as 0 against anything.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        dot / ((norm_a.sqrt() + SIMILARITY_EPSILON) * (norm_b.sqrt() + SIMILARITY_EPSILON))
    }
}

/// A detected face in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Left eye, right eye, nose, left and right mouth corner.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union; 0 when the union is empty.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let inter_w = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let inter_h =
            ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// One reference embedding owned by a person.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub person: Person,
    pub embedding: Embedding,
}

/// What the analyzer produced for a single frame.
///
/// A missing embedding means "no observation": the frame is not matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub embedding: Option<Embedding>,
    pub emotion: Option<String>,
}

impl Observation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(embedding: Embedding, emotion: impl Into<String>) -> Self {
        Self {
            embedding: Some(embedding),
            emotion: Some(emotion.into()),
        }
    }

    /// The emotion label to log, falling back to [`UNKNOWN_EMOTION`].
    pub fn emotion_label(&self) -> &str {
        self.emotion.as_deref().unwrap_or(UNKNOWN_EMOTION)
    }
}

/// Durable record of one accepted emotion reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionEvent {
    pub person: PersonId,
    pub emotion: String,
    /// Rendered by [`crate::clock::TimestampFormat`].
    pub detected_at: String,
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best entry [-1, 1], 0 for an empty gallery.
    pub similarity: f32,
    /// Gallery index of the best entry (set even when below threshold).
    pub best_index: Option<usize>,
    /// The matched person, only when `matched` is true.
    pub person: Option<Person>,
}

impl MatchResult {
    fn no_match(similarity: f32, best_index: Option<usize>) -> Self {
        Self {
            matched: false,
            similarity,
            best_index,
            person: None,
        }
    }
}

/// Strategy for comparing a query embedding against the gallery.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult;
}

/// Exhaustive cosine similarity matcher.
///
/// Linear scan over every entry. Only a strictly greater score replaces the
/// current best, so ties resolve to the earliest inserted entry. The
/// threshold is inclusive.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, query: &Embedding, gallery: &[GalleryEntry], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let sim = query.similarity(&entry.embedding);
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim >= threshold => MatchResult {
                matched: true,
                similarity: best_sim,
                best_index: Some(idx),
                person: Some(gallery[idx].person.clone()),
            },
            Some(idx) => MatchResult::no_match(best_sim, Some(idx)),
            None => MatchResult::no_match(0.0, None),
        }
    }
}
