//! Loop state between the capture thread, the tracker and the name prompt.
//!
//! At most one unknown face waits for a name at a time. Replies carry the
//! ticket of the request they answer, and a reply for any other ticket is
//! ignored.

use crate::prompt::{PromptReply, PromptRequest};
use facelog_core::{
    Clock, FaceStore, FrameOutcome, LogOutcome, Observation, PendingRegistration,
    RegistrationOutcome, SystemClock, Tracker,
};
use tokio::sync::mpsc;

/// What one observation or prompt reply led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// No usable face in the frame.
    Idle,
    /// Known face; its emotion was written.
    Logged,
    /// Known face within the cooldown.
    Debounced,
    /// Unknown face; a name was requested under this ticket.
    Prompted(u64),
    /// Unknown face not offered for registration.
    Dropped,
    Registered,
    Skipped,
    Rejected,
    /// Reply for a ticket that is no longer pending.
    Stale,
    /// A store write failed.
    Failed,
}

pub struct Session<C: Clock = SystemClock> {
    tracker: Tracker<C>,
    pending: Option<(u64, PendingRegistration)>,
    next_ticket: u64,
    prompt_open: bool,
}

impl<C: Clock> Session<C> {
    pub fn new(tracker: Tracker<C>) -> Self {
        Self {
            tracker,
            pending: None,
            next_ticket: 0,
            prompt_open: true,
        }
    }

    pub fn tracker(&self) -> &Tracker<C> {
        &self.tracker
    }

    pub fn pending_ticket(&self) -> Option<u64> {
        self.pending.as_ref().map(|(ticket, _)| *ticket)
    }

    pub fn on_observation<S: FaceStore>(
        &mut self,
        observation: Observation,
        store: &mut S,
        prompt: &mpsc::Sender<PromptRequest>,
    ) -> Step {
        match self.tracker.observe(observation, store) {
            Ok(FrameOutcome::NoObservation) => Step::Idle,
            Ok(FrameOutcome::Matched {
                person,
                similarity,
                log,
            }) => {
                tracing::trace!(person = %person.name, similarity, "known face");
                report_log(&person.name, &log)
            }
            Ok(FrameOutcome::Unknown(registration)) => self.request_name(registration, prompt),
            Err(err) => {
                tracing::error!(error = %err, "failed to record emotion event");
                Step::Failed
            }
        }
    }

    fn request_name(
        &mut self,
        registration: PendingRegistration,
        prompt: &mpsc::Sender<PromptRequest>,
    ) -> Step {
        if self.pending.is_some() || !self.prompt_open {
            tracing::debug!("unknown face while a registration is pending; dropped");
            return Step::Dropped;
        }

        let ticket = self.next_ticket + 1;
        let request = PromptRequest {
            ticket,
            message: format!(
                "Unknown face ({}). Enter name, or leave empty to skip:",
                registration.emotion
            ),
        };
        match prompt.try_send(request) {
            Ok(()) => {
                self.next_ticket = ticket;
                self.pending = Some((ticket, registration));
                Step::Prompted(ticket)
            }
            Err(err) => {
                tracing::warn!(error = %err, "name prompt unavailable; registration skipped");
                Step::Dropped
            }
        }
    }

    pub fn on_reply<S: FaceStore>(&mut self, reply: PromptReply, store: &mut S) -> Step {
        let registration = match self.pending.take() {
            Some((ticket, registration)) if ticket == reply.ticket => registration,
            other => {
                tracing::debug!(ticket = reply.ticket, "stale prompt reply ignored");
                self.pending = other;
                return Step::Stale;
            }
        };

        match self
            .tracker
            .complete_registration(registration, reply.name.as_deref(), store)
        {
            Ok(RegistrationOutcome::Registered { person, log }) => {
                report_log(&person.name, &log);
                Step::Registered
            }
            Ok(RegistrationOutcome::Skipped) => Step::Skipped,
            Ok(RegistrationOutcome::Rejected(err)) => {
                tracing::warn!(error = %err, "face not registered");
                Step::Rejected
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to register face");
                Step::Failed
            }
        }
    }

    /// The prompt thread is gone: forget the pending face and stop asking.
    pub fn on_prompt_closed(&mut self) {
        tracing::warn!("name prompt exited; unknown faces will not be registered");
        self.prompt_open = false;
        self.pending = None;
    }

    pub fn prompt_open(&self) -> bool {
        self.prompt_open
    }
}

fn report_log(name: &str, log: &LogOutcome) -> Step {
    match log {
        LogOutcome::Persisted { detected_at } => {
            tracing::info!(person = name, at = %detected_at, "emotion logged");
            Step::Logged
        }
        LogOutcome::Suppressed { elapsed } => {
            tracing::debug!(
                person = name,
                elapsed_ms = elapsed.num_milliseconds(),
                "emotion debounced"
            );
            Step::Debounced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use facelog_core::{Embedding, ManualClock, TrackerConfig};
    use facelog_store::SqliteStore;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn face(values: [f32; 3], emotion: &str) -> Observation {
        Observation::new(Embedding::new(values.to_vec()), emotion)
    }

    fn session(clock: &ManualClock) -> (Session<&ManualClock>, SqliteStore) {
        let store = SqliteStore::open_in_memory().unwrap();
        let gallery = store.load_gallery().unwrap();
        let tracker = Tracker::new(gallery, TrackerConfig::default(), clock);
        (Session::new(tracker), store)
    }

    fn reply(ticket: u64, name: &str) -> PromptReply {
        PromptReply {
            ticket,
            name: Some(name.to_string()),
        }
    }

    #[test]
    fn test_second_unknown_while_pending_is_dropped() {
        let clock = ManualClock::new(start());
        let (mut session, mut store) = session(&clock);
        let (tx, mut rx) = mpsc::channel(4);

        let step = session.on_observation(face([1.0, 0.0, 0.0], "happy"), &mut store, &tx);
        assert_eq!(step, Step::Prompted(1));
        let request = rx.try_recv().unwrap();
        assert_eq!(request.ticket, 1);
        assert!(request.message.contains("happy"));

        let step = session.on_observation(face([0.0, 1.0, 0.0], "sad"), &mut store, &tx);
        assert_eq!(step, Step::Dropped);
        assert!(rx.try_recv().is_err());
        assert_eq!(session.pending_ticket(), Some(1));
    }

    #[test]
    fn test_stale_ticket_keeps_pending_registration() {
        let clock = ManualClock::new(start());
        let (mut session, mut store) = session(&clock);
        let (tx, _rx) = mpsc::channel(4);

        session.on_observation(face([1.0, 0.0, 0.0], "happy"), &mut store, &tx);
        assert_eq!(session.on_reply(reply(7, "Mallory"), &mut store), Step::Stale);
        assert_eq!(session.pending_ticket(), Some(1));
        assert!(store.list_people().unwrap().is_empty());

        assert_eq!(session.on_reply(reply(1, "Alice"), &mut store), Step::Registered);
        assert_eq!(session.pending_ticket(), None);
    }

    #[test]
    fn test_reply_registers_and_logs() {
        let clock = ManualClock::new(start());
        let (mut session, mut store) = session(&clock);
        let (tx, _rx) = mpsc::channel(4);

        session.on_observation(face([1.0, 0.0, 0.0], "happy"), &mut store, &tx);
        assert_eq!(session.on_reply(reply(1, "  Alice "), &mut store), Step::Registered);

        let people = store.list_people().unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].person.name, "Alice");
        assert_eq!(store.event_count().unwrap(), 1);
        assert_eq!(session.tracker().gallery().len(), 1);

        // Same face straight away is debounced, then logged after the cooldown.
        let step = session.on_observation(face([1.0, 0.0, 0.0], "sad"), &mut store, &tx);
        assert_eq!(step, Step::Debounced);
        clock.advance(TimeDelta::seconds(2));
        let step = session.on_observation(face([1.0, 0.0, 0.0], "sad"), &mut store, &tx);
        assert_eq!(step, Step::Logged);
        assert_eq!(store.event_count().unwrap(), 2);
    }

    #[test]
    fn test_skip_frees_the_slot() {
        let clock = ManualClock::new(start());
        let (mut session, mut store) = session(&clock);
        let (tx, mut rx) = mpsc::channel(4);

        session.on_observation(face([1.0, 0.0, 0.0], "happy"), &mut store, &tx);
        assert_eq!(session.on_reply(reply(1, ""), &mut store), Step::Skipped);
        assert_eq!(session.pending_ticket(), None);

        let step = session.on_observation(face([1.0, 0.0, 0.0], "happy"), &mut store, &tx);
        assert_eq!(step, Step::Prompted(2));
        assert_eq!(rx.try_recv().unwrap().ticket, 1);
        assert_eq!(rx.try_recv().unwrap().ticket, 2);
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn test_closed_prompt_stops_registration() {
        let clock = ManualClock::new(start());
        let (mut session, mut store) = session(&clock);
        let (tx, _rx) = mpsc::channel(4);

        session.on_observation(face([1.0, 0.0, 0.0], "happy"), &mut store, &tx);
        session.on_prompt_closed();
        assert!(!session.prompt_open());
        assert_eq!(session.pending_ticket(), None);

        let step = session.on_observation(face([0.0, 1.0, 0.0], "sad"), &mut store, &tx);
        assert_eq!(step, Step::Dropped);
        assert_eq!(session.on_reply(reply(1, "Alice"), &mut store), Step::Stale);
    }

    #[test]
    fn test_unsendable_prompt_leaves_nothing_pending() {
        let clock = ManualClock::new(start());
        let (mut session, mut store) = session(&clock);
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let step = session.on_observation(face([1.0, 0.0, 0.0], "happy"), &mut store, &tx);
        assert_eq!(step, Step::Dropped);
        assert_eq!(session.pending_ticket(), None);
    }

    #[test]
    fn test_no_face_is_idle() {
        let clock = ManualClock::new(start());
        let (mut session, mut store) = session(&clock);
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(session.on_observation(Observation::none(), &mut store, &tx), Step::Idle);
    }
}
