//! Per-person rate limiting of emotion event writes.

use crate::clock::{Clock, TimestampFormat};
use crate::store::FaceStore;
use crate::types::{EmotionEvent, Person, PersonId};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;

/// Default minimum spacing between two events for the same person.
pub const DEFAULT_COOLDOWN_SECS: f64 = 1.0;

/// Convert a cooldown in (fractional) seconds, at millisecond resolution.
pub fn cooldown_from_secs(secs: f64) -> TimeDelta {
    TimeDelta::milliseconds((secs.max(0.0) * 1000.0).round() as i64)
}

/// What happened to one log request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    /// Event written with this rendered timestamp.
    Persisted { detected_at: String },
    /// Within the cooldown window; nothing written.
    Suppressed { elapsed: TimeDelta },
}

impl LogOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

/// Writes emotion events, at most one per person per cooldown window.
///
/// The last-write instants live only in memory and are lost on restart.
pub struct DebouncedLogger<C> {
    clock: C,
    cooldown: TimeDelta,
    format: TimestampFormat,
    last_logged: HashMap<PersonId, DateTime<Utc>>,
}

impl<C: Clock> DebouncedLogger<C> {
    pub fn new(clock: C, cooldown: TimeDelta, format: TimestampFormat) -> Self {
        Self {
            clock,
            cooldown,
            format,
            last_logged: HashMap::new(),
        }
    }

    /// Instant of the last persisted event for `person`, if any.
    pub fn last_logged(&self, person: &PersonId) -> Option<DateTime<Utc>> {
        self.last_logged.get(person).copied()
    }

    /// Persist `emotion` for `person` unless they were logged less than
    /// one cooldown ago.
    ///
    /// The debounce state only advances after the store accepted the write.
    pub fn log<S: FaceStore>(
        &mut self,
        store: &mut S,
        person: &Person,
        emotion: &str,
    ) -> Result<LogOutcome, S::Error> {
        let now = self.clock.now();

        if let Some(last) = self.last_logged.get(&person.id) {
            let elapsed = now.signed_duration_since(*last);
            if elapsed < self.cooldown {
                tracing::trace!(person = %person.name, ?elapsed, "debounced");
                return Ok(LogOutcome::Suppressed { elapsed });
            }
        }

        let detected_at = self.format.render(now);
        store.record_event(&EmotionEvent {
            person: person.id,
            emotion: emotion.to_string(),
            detected_at: detected_at.clone(),
        })?;
        self.last_logged.insert(person.id, now);

        tracing::info!(person = %person.name, emotion, %detected_at, "logged emotion");
        Ok(LogOutcome::Persisted { detected_at })
    }
}
