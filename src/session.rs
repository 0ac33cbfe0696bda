//! One authoring session: the draft state tree plus the bookkeeping the
//! calling layer needs around it.
//!
//! The session owns:
//!   - the `QuestionBlock`, mutated only through `dispatch` (the reducer)
//!   - a fetch guard: per (scope, fetch kind) generation counters so a response
//!     that lands after a newer selector change is dropped instead of applied
//!   - the set of Detail entries with a generation call in flight
//!   - the last generation failure, kept until dismissed or a retry succeeds
//!
//! Sessions are shared as `Arc<Mutex<Session>>`; callers never hold the lock
//! across a backend call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::{DetailId, QuestionBlock, Scope};
use crate::error::{Error, Result};
use crate::reducer::{reduce, Action};

pub type SessionHandle = Arc<Mutex<Session>>;

/// User identity handed over by the identity provider at session creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Remote lookups whose responses can go stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Subtopics,
    AlgoVariables,
    Quantifiables,
    Queryables,
    InputVariables,
    SubQuestionQueryables,
    QueryVariables,
    Questions,
    Generation(DetailId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub scope: Scope,
    pub kind: FetchKind,
}

impl FetchKey {
    pub fn new(scope: Scope, kind: FetchKind) -> Self {
        Self { scope, kind }
    }
}

/// Handle of one issued request; only the newest ticket per key is current.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    key: FetchKey,
    generation: u64,
    epoch: u64,
}

#[derive(Debug, Default)]
struct FetchGuard {
    counters: HashMap<FetchKey, u64>,
    /// Bumped when the draft is replaced.
    epoch: u64,
}

impl FetchGuard {
    fn issue(&mut self, key: FetchKey) -> Ticket {
        let generation = self.counters.entry(key).or_insert(0);
        *generation += 1;
        Ticket { key, generation: *generation, epoch: self.epoch }
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.epoch == self.epoch && self.counters.get(&ticket.key) == Some(&ticket.generation)
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Supersede every outstanding ticket whose scope matches `stale`.
    fn invalidate_where(&mut self, stale: impl Fn(Scope) -> bool) {
        for (key, generation) in self.counters.iter_mut() {
            if stale(key.scope) {
                *generation += 1;
            }
        }
    }
}

/// Sub-question scopes at or after `index` are renumbered by its removal.
fn shifted_by_removal(scope: Scope, index: usize) -> bool {
    matches!(scope, Scope::Sub(j) if j >= index)
}

/// Retryable failure of the last generation call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationFailure {
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_id: Option<DetailId>,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct InFlight {
    pub scope: Scope,
    pub detail_id: DetailId,
}

/// What clients see after every command.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub question: QuestionBlock,
    pub in_flight: Vec<InFlight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<GenerationFailure>,
}

#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub identity: Identity,
    /// Set when the draft re-opens an existing question for editing.
    pub question_id: Option<String>,
    state: QuestionBlock,
    guard: FetchGuard,
    in_flight: HashMap<(Scope, DetailId), Ticket>,
    last_error: Option<GenerationFailure>,
    /// Last time the owner looked the session up.
    pub touched: Instant,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            question_id: None,
            state: QuestionBlock::default(),
            guard: FetchGuard::default(),
            in_flight: HashMap::new(),
            last_error: None,
            touched: Instant::now(),
        }
    }

    /// Re-open a persisted draft (`state` blob stored with the question).
    pub fn hydrate(identity: Identity, blob: Value, question_id: Option<String>) -> Result<Self> {
        let mut state: QuestionBlock = serde_json::from_value(blob)
            .map_err(|e| Error::validation(format!("invalid persisted state: {e}")))?;
        state.loading = false;
        let mut session = Self::new(identity);
        session.state = state;
        session.question_id = question_id;
        Ok(session)
    }

    pub fn into_handle(self) -> SessionHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> &QuestionBlock {
        &self.state
    }

    pub fn dispatch(&mut self, action: Action) {
        match &action {
            // Sub-question scopes are positional; outstanding tickets for the
            // removed one and its successors would otherwise land on a neighbour.
            &Action::RemoveSubQuestion(index) if index < self.state.sub_questions.len() => {
                self.guard.invalidate_where(|scope| shifted_by_removal(scope, index));
                self.in_flight.retain(|(scope, _), _| !shifted_by_removal(*scope, index));
            }
            Action::Reset => {
                self.guard.bump_epoch();
                self.in_flight.clear();
            }
            _ => {}
        }
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, action);
    }

    pub fn issue(&mut self, scope: Scope, kind: FetchKind) -> Ticket {
        self.guard.issue(FetchKey::new(scope, kind))
    }

    /// Supersede outstanding requests for a key without issuing a new one.
    pub fn invalidate(&mut self, scope: Scope, kind: FetchKind) {
        self.guard.issue(FetchKey::new(scope, kind));
    }

    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.guard.is_current(ticket)
    }

    pub fn begin_generation(&mut self, scope: Scope, detail: DetailId) -> Result<Ticket> {
        if self.in_flight.contains_key(&(scope, detail)) {
            return Err(Error::InFlight);
        }
        let ticket = self.issue(scope, FetchKind::Generation(detail));
        self.in_flight.insert((scope, detail), ticket);
        Ok(ticket)
    }

    /// Release the slot claimed with `ticket`. A slot re-claimed since then
    /// (after a reset or a renumbering) is left alone.
    pub fn end_generation(&mut self, ticket: &Ticket) {
        let FetchKind::Generation(detail) = ticket.key.kind else {
            return;
        };
        let slot = (ticket.key.scope, detail);
        if self.in_flight.get(&slot) == Some(ticket) {
            self.in_flight.remove(&slot);
        }
    }

    #[cfg(test)]
    pub fn is_generating(&self, scope: Scope, detail: DetailId) -> bool {
        self.in_flight.contains_key(&(scope, detail))
    }

    /// A call is running on behalf of this draft.
    pub fn is_busy(&self) -> bool {
        self.state.loading || !self.in_flight.is_empty()
    }

    pub fn last_error(&self) -> Option<&GenerationFailure> {
        self.last_error.as_ref()
    }

    pub fn set_last_error(&mut self, failure: GenerationFailure) {
        self.last_error = Some(failure);
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    /// Blob stored with the question so the draft can be re-opened later.
    pub fn persisted_state(&self) -> Value {
        serde_json::to_value(&self.state).unwrap_or(Value::Null)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut in_flight: Vec<InFlight> = self
            .in_flight
            .keys()
            .map(|(scope, detail_id)| InFlight { scope: *scope, detail_id: *detail_id })
            .collect();
        in_flight.sort_by_key(|f| f.detail_id);
        SessionSnapshot {
            id: self.id,
            owner: self.identity.user_id.clone(),
            question_id: self.question_id.clone(),
            question: self.state.clone(),
            in_flight,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_identity() -> Identity {
    Identity { user_id: "u-1".into(), display_name: Some("Tester".into()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::QuestionField;

    #[test]
    fn newer_ticket_supersedes_older_one() {
        let mut s = Session::new(test_identity());
        let old = s.issue(Scope::Outer, FetchKind::AlgoVariables);
        let new = s.issue(Scope::Outer, FetchKind::AlgoVariables);
        assert!(!s.is_current(&old));
        assert!(s.is_current(&new));

        s.issue(Scope::Outer, FetchKind::Quantifiables);
        assert!(s.is_current(&new));
    }

    #[test]
    fn tickets_are_independent_per_key() {
        let mut s = Session::new(test_identity());
        let vars = s.issue(Scope::Outer, FetchKind::AlgoVariables);
        s.issue(Scope::Outer, FetchKind::Queryables);
        s.issue(Scope::Sub(0), FetchKind::AlgoVariables);
        assert!(s.is_current(&vars));
    }

    #[test]
    fn removing_a_sub_question_invalidates_outstanding_tickets() {
        let mut s = Session::new(test_identity());
        s.dispatch(Action::AddSubQuestion);
        s.dispatch(Action::AddSubQuestion);
        let t = s.issue(Scope::Sub(1), FetchKind::QueryVariables);
        s.dispatch(Action::RemoveSubQuestion(0));
        assert!(!s.is_current(&t));
        // a fresh ticket for the renumbered scope is current again
        let fresh = s.issue(Scope::Sub(0), FetchKind::QueryVariables);
        assert!(s.is_current(&fresh));
    }

    #[test]
    fn removing_a_sub_question_spares_outer_and_earlier_scopes() {
        let mut s = Session::new(test_identity());
        s.dispatch(Action::AddSubQuestion);
        s.dispatch(Action::AddSubQuestion);
        let outer = s.begin_generation(Scope::Outer, DetailId(0)).unwrap();
        let questions = s.issue(Scope::Outer, FetchKind::Questions);
        let first = s.issue(Scope::Sub(0), FetchKind::QueryVariables);
        s.begin_generation(Scope::Sub(1), DetailId(0)).unwrap();

        s.dispatch(Action::RemoveSubQuestion(1));
        assert!(s.is_current(&outer));
        assert!(s.is_current(&questions));
        assert!(s.is_current(&first));
        assert!(s.is_generating(Scope::Outer, DetailId(0)));
        assert!(!s.is_generating(Scope::Sub(1), DetailId(0)));
        assert_eq!(s.begin_generation(Scope::Outer, DetailId(0)), Err(Error::InFlight));
    }

    #[test]
    fn out_of_range_removal_touches_nothing() {
        let mut s = Session::new(test_identity());
        s.dispatch(Action::AddSubQuestion);
        let t = s.issue(Scope::Sub(0), FetchKind::Queryables);
        s.dispatch(Action::RemoveSubQuestion(3));
        assert!(s.is_current(&t));
    }

    #[test]
    fn second_generation_for_same_detail_is_refused() {
        let mut s = Session::new(test_identity());
        let first = s.begin_generation(Scope::Outer, DetailId(0)).unwrap();
        assert_eq!(s.begin_generation(Scope::Outer, DetailId(0)), Err(Error::InFlight));
        assert!(s.begin_generation(Scope::Outer, DetailId(1)).is_ok());
        s.end_generation(&first);
        assert!(s.begin_generation(Scope::Outer, DetailId(0)).is_ok());
    }

    #[test]
    fn late_release_leaves_a_reclaimed_slot_alone() {
        let mut s = Session::new(test_identity());
        s.dispatch(Action::AddSubQuestion);
        s.dispatch(Action::AddSubQuestion);
        let old = s.begin_generation(Scope::Sub(1), DetailId(0)).unwrap();
        s.dispatch(Action::RemoveSubQuestion(0));
        s.dispatch(Action::AddSubQuestion);
        s.begin_generation(Scope::Sub(1), DetailId(0)).unwrap();

        s.end_generation(&old);
        assert!(s.is_generating(Scope::Sub(1), DetailId(0)));
    }

    #[test]
    fn hydrate_round_trips_persisted_state() {
        let mut s = Session::new(test_identity());
        s.dispatch(Action::SetField(QuestionField::Description("Draft".into())));
        s.dispatch(Action::AddSubQuestion);
        s.dispatch(Action::SetField(QuestionField::Loading(true)));

        let back = Session::hydrate(test_identity(), s.persisted_state(), Some("q9".into())).unwrap();
        assert_eq!(back.state().description, "Draft");
        assert_eq!(back.state().sub_questions.len(), 1);
        assert!(!back.state().loading);
        assert_eq!(back.question_id.as_deref(), Some("q9"));
    }

    #[test]
    fn hydrate_rejects_garbage() {
        let err = Session::hydrate(test_identity(), Value::String("nope".into()), None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
