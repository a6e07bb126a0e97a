//! Frame-by-frame recognition: match, register unknown faces, log emotions.
//!
//! The [`Tracker`] owns the gallery and the debounce state. Registration is
//! split in two so the caller never blocks capture while a human types a
//! name: [`Tracker::observe`] hands back a [`PendingRegistration`] for an
//! unknown face and [`Tracker::complete_registration`] finishes it once the
//! answer (or a skip) arrives.

use crate::clock::{Clock, SystemClock, TimestampFormat};
use crate::debounce::{cooldown_from_secs, DebouncedLogger, LogOutcome, DEFAULT_COOLDOWN_SECS};
use crate::gallery::{Gallery, GalleryError};
use crate::store::{normalize_name, FaceStore};
use crate::types::{
    CosineMatcher, Embedding, Matcher, Observation, Person, PersonId, DEFAULT_SIMILARITY_THRESHOLD,
};
use chrono::{DateTime, TimeDelta, Utc};

/// Matching and logging parameters.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum cosine similarity for a match (inclusive).
    pub similarity_threshold: f32,
    /// Minimum spacing between two events for the same person.
    pub cooldown: TimeDelta,
    pub timestamp_format: TimestampFormat,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            cooldown: cooldown_from_secs(DEFAULT_COOLDOWN_SECS),
            timestamp_format: TimestampFormat::Local,
        }
    }
}

/// An unknown face waiting for a name.
#[derive(Debug, Clone)]
pub struct PendingRegistration {
    pub embedding: Embedding,
    pub emotion: String,
    /// Best (rejected) similarity against the gallery at observation time.
    pub similarity: f32,
}

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// The analyzer produced no usable embedding.
    NoObservation,
    /// Known person; the emotion was logged or debounced.
    Matched {
        person: Person,
        similarity: f32,
        log: LogOutcome,
    },
    /// No gallery entry reached the threshold.
    Unknown(PendingRegistration),
}

/// Result of answering a [`PendingRegistration`].
#[derive(Debug, Clone)]
pub enum RegistrationOutcome {
    /// Person resolved (existing name reused or newly created), embedding
    /// appended, and the frame's emotion sent through the debounced logger.
    Registered { person: Person, log: LogOutcome },
    /// No name given; nothing changed.
    Skipped,
    /// The embedding cannot join the gallery; nothing changed.
    Rejected(GalleryError),
}

/// Owns the recognition state for one camera loop.
pub struct Tracker<C = SystemClock, M = CosineMatcher> {
    gallery: Gallery,
    matcher: M,
    threshold: f32,
    logger: DebouncedLogger<C>,
}

impl<C: Clock> Tracker<C, CosineMatcher> {
    pub fn new(gallery: Gallery, config: TrackerConfig, clock: C) -> Self {
        Self::with_matcher(gallery, config, clock, CosineMatcher)
    }
}

impl<C: Clock, M: Matcher> Tracker<C, M> {
    pub fn with_matcher(gallery: Gallery, config: TrackerConfig, clock: C, matcher: M) -> Self {
        Self {
            gallery,
            matcher,
            threshold: config.similarity_threshold,
            logger: DebouncedLogger::new(clock, config.cooldown, config.timestamp_format),
        }
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn last_logged(&self, person: &PersonId) -> Option<DateTime<Utc>> {
        self.logger.last_logged(person)
    }

    /// Match one observation and log its emotion if the face is known.
    ///
    /// Errors only come from the event write; the debounce state is then
    /// left as it was.
    pub fn observe<S: FaceStore>(
        &mut self,
        observation: Observation,
        store: &mut S,
    ) -> Result<FrameOutcome, S::Error> {
        let emotion = observation.emotion_label().to_string();
        let Some(embedding) = observation.embedding else {
            return Ok(FrameOutcome::NoObservation);
        };

        if let Err(err) = self.gallery.check_dim(&embedding) {
            tracing::warn!(error = %err, "discarding observation");
            return Ok(FrameOutcome::NoObservation);
        }

        let result = self
            .matcher
            .compare(&embedding, self.gallery.entries(), self.threshold);

        match result.person {
            Some(person) if result.matched => {
                tracing::debug!(person = %person.name, similarity = result.similarity, "matched");
                let log = self.logger.log(store, &person, &emotion)?;
                Ok(FrameOutcome::Matched {
                    person,
                    similarity: result.similarity,
                    log,
                })
            }
            _ => {
                tracing::debug!(similarity = result.similarity, "unknown face");
                Ok(FrameOutcome::Unknown(PendingRegistration {
                    embedding,
                    emotion,
                    similarity: result.similarity,
                }))
            }
        }
    }

    /// Answer a pending registration with a human-supplied name.
    ///
    /// An empty or whitespace-only name skips registration. Otherwise the
    /// person is resolved by name in the store (an existing person with that
    /// name is reused), the embedding is stored and appended to the gallery,
    /// and the pending emotion is logged subject to the cooldown.
    pub fn complete_registration<S: FaceStore>(
        &mut self,
        pending: PendingRegistration,
        name: Option<&str>,
        store: &mut S,
    ) -> Result<RegistrationOutcome, S::Error> {
        let Some(name) = name.and_then(normalize_name) else {
            tracing::info!("registration skipped");
            return Ok(RegistrationOutcome::Skipped);
        };

        if let Err(err) = self.gallery.check_dim(&pending.embedding) {
            tracing::warn!(error = %err, name, "registration rejected");
            return Ok(RegistrationOutcome::Rejected(err));
        }
        if let Some(existing) = self
            .gallery
            .entries()
            .iter()
            .find(|e| e.person.name != name && e.embedding.values == pending.embedding.values)
        {
            let err = GalleryError::DuplicateEmbedding {
                existing: existing.person.id,
            };
            tracing::warn!(error = %err, name, "registration rejected");
            return Ok(RegistrationOutcome::Rejected(err));
        }

        let person = store.register(name, &pending.embedding)?;
        if let Err(err) = self.gallery.append(person.clone(), pending.embedding) {
            tracing::warn!(error = %err, person = %person.id, "stored embedding not added to gallery");
            return Ok(RegistrationOutcome::Rejected(err));
        }
        tracing::info!(
            person = %person.id,
            name = %person.name,
            gallery = self.gallery.len(),
            "registered face"
        );

        let log = self.logger.log(store, &person, &pending.emotion)?;
        Ok(RegistrationOutcome::Registered { person, log })
    }
}
