//! Session registry: the authoritative map of active sessions.
//!
//! The registry is owned by the engine thread, so every check-then-act
//! sequence on it is atomic with respect to other requests. Slots are
//! claimed with [`SessionRegistry::reserve`] before any slow work starts and
//! are either committed or released afterwards, which keeps the cap exact
//! while resolutions run off-thread.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use mirrortv_encoder::SessionId;
use mirrortv_ipc::{ClientId, Roster, SessionState, SessionSummary, TargetDescriptor};

use crate::{EngineError, EngineResult};

/// A claimed slot for a client whose session is still being set up.
#[must_use = "a reservation must be committed or released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    client_id: ClientId,
}

impl Reservation {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }
}

/// One active capture session and the encoder it exclusively owns.
#[derive(Debug)]
pub struct Session<P> {
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub target: TargetDescriptor,
    pub display_label: String,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    state: SessionState,
    process: P,
}

impl<P> Session<P> {
    pub fn new(
        client_id: ClientId,
        session_id: SessionId,
        target: TargetDescriptor,
        display_label: String,
        output_dir: PathBuf,
        process: P,
    ) -> Self {
        Self {
            client_id,
            session_id,
            target,
            display_label,
            output_dir,
            started_at: Utc::now(),
            state: SessionState::Starting,
            process,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut P {
        &mut self.process
    }

    /// Move to `next` if the transition is legal. Returns whether the state
    /// changed.
    pub fn transition_to(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            debug!(
                client_id = %self.client_id,
                current = self.state.name(),
                requested = next.name(),
                "Ignoring state transition"
            );
            return false;
        }

        debug!(
            client_id = %self.client_id,
            previous = self.state.name(),
            current = next.name(),
            "Session state transition"
        );
        self.state = next;
        true
    }

    /// Serializable view as of `now`.
    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        let elapsed = now.signed_duration_since(self.started_at).num_milliseconds();

        SessionSummary {
            client_id: self.client_id.clone(),
            window_id: self.target.resolved_id.clone(),
            window_title: self.target.requested.clone(),
            display_label: self.display_label.clone(),
            state: self.state,
            started_at: self.started_at,
            duration_ms: u64::try_from(elapsed).unwrap_or(0),
        }
    }
}

/// Map of client id to session, plus in-flight reservations.
#[derive(Debug)]
pub struct SessionRegistry<P> {
    sessions: HashMap<ClientId, Session<P>>,
    pending: HashSet<ClientId>,
    max_sessions: usize,
}

impl<P> SessionRegistry<P> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            pending: HashSet::new(),
            max_sessions,
        }
    }

    /// Claim a slot for `client_id`.
    ///
    /// Fails with [`EngineError::DuplicateSession`] if the client already
    /// has a session or a reservation, and with
    /// [`EngineError::CapacityExceeded`] if sessions plus reservations are
    /// at the cap. Duplicate detection takes precedence.
    pub fn reserve(&mut self, client_id: &ClientId) -> EngineResult<Reservation> {
        if self.is_claimed(client_id) {
            return Err(EngineError::DuplicateSession(client_id.clone()));
        }

        if self.occupied() >= self.max_sessions {
            return Err(EngineError::CapacityExceeded {
                max: self.max_sessions,
            });
        }

        self.pending.insert(client_id.clone());
        Ok(Reservation {
            client_id: client_id.clone(),
        })
    }

    /// Turn a reservation into a registered session.
    pub fn commit(&mut self, reservation: Reservation, session: Session<P>) {
        if reservation.client_id != session.client_id {
            warn!(
                reserved = %reservation.client_id,
                session = %session.client_id,
                "Reservation committed for a different client"
            );
            self.pending.remove(&reservation.client_id);
        }

        self.pending.remove(&session.client_id);
        self.sessions.insert(session.client_id.clone(), session);
    }

    /// Give a reservation back without registering anything.
    pub fn release(&mut self, reservation: Reservation) {
        self.pending.remove(&reservation.client_id);
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&Session<P>> {
        self.sessions.get(client_id)
    }

    pub fn get_mut(&mut self, client_id: &ClientId) -> Option<&mut Session<P>> {
        self.sessions.get_mut(client_id)
    }

    /// Whether `client_id` has a registered session or a reservation.
    pub fn is_claimed(&self, client_id: &ClientId) -> bool {
        self.sessions.contains_key(client_id) || self.pending.contains(client_id)
    }

    /// Remove the session for `client_id`, but only if it is still the
    /// incarnation identified by `session_id`.
    pub fn remove(&mut self, client_id: &ClientId, session_id: SessionId) -> Option<Session<P>> {
        match self.sessions.get(client_id) {
            Some(session) if session.session_id == session_id => self.sessions.remove(client_id),
            _ => None,
        }
    }

    /// Remove every session, for final teardown.
    pub fn drain(&mut self) -> Vec<Session<P>> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    /// Snapshot of the registered client ids.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.sessions.keys().cloned().collect()
    }

    /// Summaries ordered by start time, then client id.
    pub fn summaries(&self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        let mut summaries: Vec<_> = self.sessions.values().map(|s| s.summary(now)).collect();
        summaries.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.client_id.as_str().cmp(b.client_id.as_str()))
        });
        summaries
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.summaries(Utc::now()), self.max_sessions)
    }

    /// Registered sessions, excluding reservations.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions plus reservations.
    pub fn occupied(&self) -> usize {
        self.sessions.len() + self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(client: &str, session_id: SessionId) -> Session<()> {
        Session::new(
            ClientId::from(client),
            session_id,
            TargetDescriptor::new("Window", None),
            client.to_string(),
            PathBuf::from("stream"),
            (),
        )
    }

    #[test]
    fn test_reserve_commit_release() {
        let mut registry = SessionRegistry::new(2);
        let a = ClientId::from("a");

        let reservation = registry.reserve(&a).unwrap();
        assert_eq!(registry.occupied(), 1);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_claimed(&a));

        registry.commit(reservation, session("a", 1));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.occupied(), 1);

        let b = registry.reserve(&ClientId::from("b")).unwrap();
        registry.release(b);
        assert_eq!(registry.occupied(), 1);
    }

    #[test]
    fn test_duplicate_wins_over_capacity() {
        let mut registry = SessionRegistry::new(1);
        let a = ClientId::from("a");
        let reservation = registry.reserve(&a).unwrap();
        registry.commit(reservation, session("a", 1));

        assert!(matches!(
            registry.reserve(&a),
            Err(EngineError::DuplicateSession(id)) if id == a
        ));
        assert!(matches!(
            registry.reserve(&ClientId::from("b")),
            Err(EngineError::CapacityExceeded { max: 1 })
        ));
    }

    #[test]
    fn test_reservations_count_against_cap() {
        let mut registry: SessionRegistry<()> = SessionRegistry::new(2);
        let _a = registry.reserve(&ClientId::from("a")).unwrap();
        let _b = registry.reserve(&ClientId::from("b")).unwrap();

        assert!(matches!(
            registry.reserve(&ClientId::from("c")),
            Err(EngineError::CapacityExceeded { max: 2 })
        ));
        assert!(matches!(
            registry.reserve(&ClientId::from("a")),
            Err(EngineError::DuplicateSession(_))
        ));
    }

    #[test]
    fn test_remove_ignores_stale_session_id() {
        let mut registry = SessionRegistry::new(4);
        let a = ClientId::from("a");
        let reservation = registry.reserve(&a).unwrap();
        registry.commit(reservation, session("a", 7));

        assert!(registry.remove(&a, 6).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&a, 7).is_some());
        assert!(registry.remove(&a, 7).is_none());
    }

    #[test]
    fn test_transitions_are_forward_only() {
        let mut s = session("a", 1);
        assert!(s.transition_to(SessionState::Running));
        assert!(s.transition_to(SessionState::Stopping));
        assert!(!s.transition_to(SessionState::Running));
        assert!(s.transition_to(SessionState::Terminated));
        assert!(!s.transition_to(SessionState::Stopping));
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn test_summaries_are_ordered_and_non_negative() {
        let mut registry = SessionRegistry::new(4);
        let mut late = session("b", 2);
        let mut early = session("c", 3);
        let mut tie = session("a", 1);
        let base = Utc::now();
        early.started_at = base - chrono::Duration::seconds(5);
        tie.started_at = base;
        late.started_at = base;

        for s in [late, early, tie] {
            let reservation = registry.reserve(&s.client_id.clone()).unwrap();
            registry.commit(reservation, s);
        }

        let summaries = registry.summaries(base - chrono::Duration::seconds(10));
        let order: Vec<_> = summaries.iter().map(|s| s.client_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert!(summaries.iter().all(|s| s.duration_ms == 0));

        let roster = registry.roster();
        assert_eq!(roster.total, 3);
        assert_eq!(roster.max, 4);
    }
}
