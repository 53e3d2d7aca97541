//! A running attendance session with guaranteed absentee finalization.
//!
//! `AttendanceSession` owns the roster, the session state and the ledger for
//! the lifetime of one run. Dropping it without calling
//! [`finalize`](AttendanceSession::finalize) still runs the absentee sweep,
//! so early returns, propagated errors and panics all leave a complete ledger.

use crate::clock::{Clock, SystemClock};
use crate::ledger::{DailyLedger, LedgerError};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::roster::Roster;
use crate::session::{Recognizer, SessionPhase, SessionState, StepOutcome};
use crate::types::ObservedFace;
use serde::Serialize;

/// Final tally of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub roster: usize,
    pub present: Vec<String>,
    pub absent: Vec<String>,
}

pub struct AttendanceSession<M: Matcher = EuclideanMatcher, C: Clock = SystemClock> {
    roster: Roster,
    state: SessionState,
    recognizer: Recognizer<M>,
    ledger: DailyLedger,
    clock: C,
    frames: u64,
    sampled: u64,
}

impl<M: Matcher, C: Clock> AttendanceSession<M, C> {
    /// Start a fresh session.
    pub fn start(roster: Roster, recognizer: Recognizer<M>, ledger: DailyLedger, clock: C) -> Self {
        Self::with_state(roster, SessionState::new(), recognizer, ledger, clock)
    }

    /// Start a session seeded with identities already present in today's ledger.
    pub fn resume(
        roster: Roster,
        recognizer: Recognizer<M>,
        ledger: DailyLedger,
        clock: C,
    ) -> Result<Self, LedgerError> {
        let today = clock.now().date();
        let already: Vec<String> = ledger
            .present_identities(today)?
            .into_iter()
            .filter(|id| roster.contains(id))
            .collect();
        tracing::info!(
            date = %today,
            already_present = already.len(),
            "resuming from ledger"
        );
        let state = SessionState::resume(already);
        Ok(Self::with_state(roster, state, recognizer, ledger, clock))
    }

    fn with_state(
        roster: Roster,
        state: SessionState,
        recognizer: Recognizer<M>,
        ledger: DailyLedger,
        clock: C,
    ) -> Self {
        tracing::info!(
            students = roster.len(),
            ledger = %ledger.dir().display(),
            cooldown_secs = recognizer.gate().period.num_seconds(),
            scope = ?recognizer.gate().scope,
            "attendance session started"
        );
        Self {
            roster,
            state,
            recognizer,
            ledger,
            clock,
            frames: 0,
            sampled: 0,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase(self.recognizer.gate(), self.clock.now())
    }

    /// Frames submitted so far, and how many of them were sampled.
    pub fn frame_counts(&self) -> (u64, u64) {
        (self.frames, self.sampled)
    }

    /// Submit one frame cycle. Unsampled frames pass through untouched.
    ///
    /// Present records are appended to the ledger as they are emitted. If an
    /// append fails the in-memory state still counts the student as recorded;
    /// the first write error is returned after the remaining records are tried.
    pub fn submit(
        &mut self,
        sampled: bool,
        observations: &[ObservedFace],
    ) -> Result<StepOutcome, LedgerError> {
        self.frames += 1;
        if !sampled {
            return Ok(StepOutcome::default());
        }
        self.sampled += 1;

        let now = self.clock.now();
        let outcome =
            self.recognizer
                .process_observations(observations, &self.roster, &mut self.state, now);

        let mut first_err = None;
        for record in &outcome.records {
            if let Err(e) = self.ledger.append_present(record) {
                tracing::error!(name = %record.identity, error = %e, "present record lost");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Run the absentee sweep and end the session.
    pub fn finalize(mut self) -> Result<SessionSummary, LedgerError> {
        self.sweep()
    }

    fn sweep(&mut self) -> Result<SessionSummary, LedgerError> {
        let now = self.clock.now();
        let absent = self
            .ledger
            .finalize_absentees(&self.roster, &mut self.state, now)?;
        Ok(SessionSummary {
            roster: self.roster.len(),
            present: self.state.recorded().to_vec(),
            absent: absent.into_iter().map(|r| r.identity).collect(),
        })
    }
}

impl<M: Matcher, C: Clock> Drop for AttendanceSession<M, C> {
    fn drop(&mut self) {
        if self.state.is_finalized() {
            return;
        }
        tracing::warn!("session ended without finalize; running absentee sweep");
        if let Err(e) = self.sweep() {
            tracing::error!(error = %e, "absentee sweep failed");
        }
    }
}
