//! Per-session attendance state and the recognition step.
//!
//! A session moves between `Idle` (gate open) and `Cooldown` (gate closed)
//! as matches are recorded, and ends in `Finalized` once the absentee sweep
//! has run. `SessionState` is owned by whoever drives the session and is
//! passed explicitly into every step.

use crate::cooldown::{CooldownGate, CooldownScope};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::roster::Roster;
use crate::types::{AttendanceRecord, ObservedFace};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Cooldown,
    Finalized,
}

/// Mutable state of one running session. Lost on restart.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    recorded: HashSet<String>,
    /// Recording order, for status display.
    order: Vec<String>,
    last_match: Option<NaiveDateTime>,
    finalized: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session with identities already recorded present by an earlier run.
    ///
    /// Resumed identities do not close the cooldown gate.
    pub fn resume<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::new();
        for identity in identities {
            let identity = identity.into();
            if state.recorded.insert(identity.clone()) {
                state.order.push(identity);
            }
        }
        state
    }

    pub fn is_recorded(&self, identity: &str) -> bool {
        self.recorded.contains(identity)
    }

    /// Identities recorded present, in the order they were recorded.
    pub fn recorded(&self) -> &[String] {
        &self.order
    }

    pub fn recorded_count(&self) -> usize {
        self.order.len()
    }

    pub fn last_match(&self) -> Option<NaiveDateTime> {
        self.last_match
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    /// Record `identity` present at `now`. Returns false if it was already recorded.
    fn record(&mut self, identity: &str, now: NaiveDateTime) -> bool {
        if !self.recorded.insert(identity.to_string()) {
            return false;
        }
        self.order.push(identity.to_string());
        self.last_match = Some(now);
        true
    }

    /// Current phase of the session state machine under `gate`.
    pub fn phase(&self, gate: &CooldownGate, now: NaiveDateTime) -> SessionPhase {
        if self.finalized {
            SessionPhase::Finalized
        } else if gate.scope == CooldownScope::PerIdentity || gate.is_open(now, self.last_match) {
            SessionPhase::Idle
        } else {
            SessionPhase::Cooldown
        }
    }
}

/// Result of one recognition step.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StepOutcome {
    /// Present records emitted by this step, in emission order.
    pub records: Vec<AttendanceRecord>,
    /// Observations skipped because their embedding could not be compared.
    pub skipped: usize,
    /// True when the step did nothing because the gate was closed or the session finalized.
    pub gated: bool,
}

/// Matches observed faces and decides which of them produce present records.
#[derive(Debug, Clone)]
pub struct Recognizer<M = EuclideanMatcher> {
    matcher: M,
    gate: CooldownGate,
}

impl Default for Recognizer {
    fn default() -> Self {
        Self::new(EuclideanMatcher::default(), CooldownGate::default())
    }
}

impl<M: Matcher> Recognizer<M> {
    pub fn new(matcher: M, gate: CooldownGate) -> Self {
        Self { matcher, gate }
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    /// Run one recognition step over the faces seen in a sampled frame.
    ///
    /// Under a global cooldown at most one present record is emitted per
    /// step: the first successful match closes the gate for the rest of it.
    /// Under a per-identity cooldown the gate never closes; a recorded
    /// identity is never re-matched for the rest of the session.
    pub fn process_observations(
        &self,
        observations: &[ObservedFace],
        roster: &Roster,
        state: &mut SessionState,
        now: NaiveDateTime,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::default();

        if state.is_finalized()
            || (self.gate.scope == CooldownScope::Global && !self.gate.is_open(now, state.last_match))
        {
            outcome.gated = true;
            return outcome;
        }

        for (i, face) in observations.iter().enumerate() {
            let recorded = |identity: &str| state.is_recorded(identity);
            let found = match self.matcher.find_in_session(&face.embedding, roster, &recorded) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(observation = i, error = %e, "skipping observation");
                    outcome.skipped += 1;
                    continue;
                }
            };
            let Some(found) = found else {
                continue;
            };
            if state.is_recorded(&found.identity) {
                continue;
            }
            let Some(student) = roster.get(&found.identity) else {
                continue;
            };

            state.record(&student.identity, now);
            tracing::info!(
                name = %student.identity,
                roll = %student.roll,
                distance = found.distance,
                "recorded student"
            );
            outcome.records.push(AttendanceRecord::present(student, now));

            if self.gate.scope == CooldownScope::Global {
                break;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::TieBreak;
    use crate::types::{Embedding, StudentRecord};
    use chrono::{NaiveDate, TimeDelta};

    fn t(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    fn class() -> Roster {
        Roster::new(vec![
            StudentRecord {
                identity: "Alice".into(),
                roll: "1".into(),
                embedding: Embedding::new(vec![0.0, 0.0]),
            },
            StudentRecord {
                identity: "Bob".into(),
                roll: "2".into(),
                embedding: Embedding::new(vec![5.0, 0.0]),
            },
        ])
        .unwrap()
    }

    fn recognizer() -> Recognizer {
        Recognizer::default()
    }

    fn alice() -> ObservedFace {
        ObservedFace::new(vec![0.1, 0.0])
    }

    fn bob() -> ObservedFace {
        ObservedFace::new(vec![5.1, 0.0])
    }

    #[test]
    fn test_match_emits_present_and_closes_gate() {
        let roster = class();
        let mut state = SessionState::new();
        let rec = recognizer();

        let out = rec.process_observations(&[alice()], &roster, &mut state, t(0));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].identity, "Alice");
        assert!(out.records[0].present);
        assert!(state.is_recorded("Alice"));
        assert_eq!(state.last_match(), Some(t(0)));
        assert_eq!(state.phase(rec.gate(), t(1)), SessionPhase::Cooldown);
        assert_eq!(state.phase(rec.gate(), t(10)), SessionPhase::Idle);
    }

    #[test]
    fn test_global_gate_suppresses_other_identities() {
        let roster = class();
        let mut state = SessionState::new();
        let rec = recognizer();

        rec.process_observations(&[alice()], &roster, &mut state, t(0));
        let out = rec.process_observations(&[bob()], &roster, &mut state, t(3));
        assert!(out.gated);
        assert!(out.records.is_empty());
        assert!(!state.is_recorded("Bob"));
        assert_eq!(state.last_match(), Some(t(0)));
    }

    #[test]
    fn test_global_gate_one_record_per_step() {
        let roster = class();
        let mut state = SessionState::new();
        let out = recognizer().process_observations(&[alice(), bob()], &roster, &mut state, t(0));
        assert_eq!(out.records.len(), 1);
        assert_eq!(state.recorded(), &["Alice".to_string()]);
    }

    #[test]
    fn test_per_identity_scope_records_everyone_in_view() {
        let roster = class();
        let mut state = SessionState::new();
        let rec = Recognizer::new(
            EuclideanMatcher::default(),
            CooldownGate::from_secs(10, CooldownScope::PerIdentity),
        );
        let out = rec.process_observations(&[alice(), bob()], &roster, &mut state, t(0));
        let names: Vec<_> = out.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_per_identity_scope_ignores_recent_match_of_others() {
        let roster = class();
        let mut state = SessionState::new();
        let rec = Recognizer::new(
            EuclideanMatcher::default(),
            CooldownGate::from_secs(10, CooldownScope::PerIdentity),
        );
        rec.process_observations(&[alice()], &roster, &mut state, t(0));
        let out = rec.process_observations(&[alice(), bob()], &roster, &mut state, t(1));
        assert!(!out.gated);
        let names: Vec<_> = out.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(names, vec!["Bob"]);
        assert_eq!(state.recorded_count(), 2);
        assert_eq!(state.phase(rec.gate(), t(2)), SessionPhase::Idle);
    }

    #[test]
    fn test_first_in_roster_order_records_next_unrecorded_candidate() {
        // Both entries sit within tolerance of the observed face.
        let roster = Roster::new(vec![
            StudentRecord {
                identity: "Alice".into(),
                roll: "1".into(),
                embedding: Embedding::new(vec![0.0, 0.0]),
            },
            StudentRecord {
                identity: "Amy".into(),
                roll: "2".into(),
                embedding: Embedding::new(vec![0.4, 0.0]),
            },
        ])
        .unwrap();
        let mut state = SessionState::resume(["Alice"]);
        let rec = Recognizer::new(
            EuclideanMatcher::new(0.6, TieBreak::FirstInRosterOrder),
            CooldownGate::default(),
        );
        let out = rec.process_observations(&[alice()], &roster, &mut state, t(0));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].identity, "Amy");

        // Nearest resolves the same face to the recorded student instead.
        let mut state = SessionState::resume(["Alice"]);
        let out = recognizer().process_observations(&[alice()], &roster, &mut state, t(0));
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_identity_never_recorded_twice() {
        let roster = class();
        let mut state = SessionState::new();
        let rec = recognizer();

        rec.process_observations(&[alice()], &roster, &mut state, t(0));
        let out = rec.process_observations(&[alice(), alice()], &roster, &mut state, t(60));
        assert!(out.records.is_empty());
        assert!(!out.gated);
        assert_eq!(state.recorded_count(), 1);
        // A repeat sighting does not restart the cooldown.
        assert_eq!(state.last_match(), Some(t(0)));
    }

    #[test]
    fn test_recorded_match_does_not_consume_step() {
        let roster = class();
        let mut state = SessionState::new();
        let rec = recognizer();

        rec.process_observations(&[alice()], &roster, &mut state, t(0));
        let out = rec.process_observations(&[alice(), bob()], &roster, &mut state, t(10));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].identity, "Bob");
    }

    #[test]
    fn test_no_match_leaves_state_untouched() {
        let roster = class();
        let mut state = SessionState::new();
        let stranger = ObservedFace::new(vec![2.5, 2.5]);
        let out = recognizer().process_observations(&[stranger], &roster, &mut state, t(0));
        assert!(out.records.is_empty());
        assert_eq!(state.last_match(), None);
        assert_eq!(state.recorded_count(), 0);
    }

    #[test]
    fn test_dimension_mismatch_skips_observation_only() {
        let roster = class();
        let mut state = SessionState::new();
        let bad = ObservedFace::new(vec![0.0, 0.0, 0.0]);
        let out = recognizer().process_observations(&[bad, bob()], &roster, &mut state, t(0));
        assert_eq!(out.skipped, 1);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].identity, "Bob");
    }

    #[test]
    fn test_finalized_session_ignores_observations() {
        let roster = class();
        let mut state = SessionState::new();
        state.mark_finalized();
        let rec = recognizer();
        let out = rec.process_observations(&[alice()], &roster, &mut state, t(0));
        assert!(out.gated);
        assert_eq!(state.phase(rec.gate(), t(0)), SessionPhase::Finalized);
    }

    #[test]
    fn test_resumed_identities_are_not_rerecorded() {
        let roster = class();
        let mut state = SessionState::resume(["Alice"]);
        let rec = Recognizer::new(
            EuclideanMatcher::new(0.6, TieBreak::FirstInRosterOrder),
            CooldownGate::default(),
        );
        assert_eq!(state.phase(rec.gate(), t(0)), SessionPhase::Idle);
        let out = rec.process_observations(&[alice()], &roster, &mut state, t(0));
        assert!(out.records.is_empty());
    }
}
