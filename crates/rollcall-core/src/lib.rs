//! rollcall-core — Attendance decision engine.
//!
//! Matches observed face embeddings against a roster, throttles recording
//! with a cooldown gate, and keeps an append-only daily attendance ledger
//! whose absentees are swept when the session ends.

pub mod attendance;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod ledger;
pub mod matcher;
pub mod roster;
pub mod session;
pub mod types;

pub use attendance::{AttendanceSession, SessionSummary};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use cooldown::{CooldownGate, CooldownScope};
pub use ledger::{DailyLedger, DailyReport, LedgerError};
pub use matcher::{EuclideanMatcher, MatchError, MatchResult, Matcher, TieBreak};
pub use roster::{load_roster, PrecomputedEmbedder, ReferenceEmbedder, Roster, RosterError};
pub use session::{Recognizer, SessionPhase, SessionState, StepOutcome};
pub use types::{AttendanceRecord, BoundingBox, Embedding, ObservedFace, StudentRecord};
