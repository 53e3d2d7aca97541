//! Time-based throttle on match-driven ledger writes.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COOLDOWN_SECS: u64 = 10;

/// What a recorded match closes the gate for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownScope {
    /// Any match closes the gate for everyone until the period elapses.
    #[default]
    Global,
    /// No cross-identity throttle. A recorded identity is never matched again
    /// in the session, so the period has nothing left to gate.
    PerIdentity,
}

/// Stateless gate decision; the timestamps live in `SessionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownGate {
    pub period: TimeDelta,
    pub scope: CooldownScope,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::from_secs(DEFAULT_COOLDOWN_SECS, CooldownScope::default())
    }
}

impl CooldownGate {
    pub fn new(period: TimeDelta, scope: CooldownScope) -> Self {
        Self { period, scope }
    }

    pub fn from_secs(secs: u64, scope: CooldownScope) -> Self {
        let period = i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Self::new(period, scope)
    }

    /// True when no match has been recorded yet or `period` has elapsed since `last`.
    pub fn is_open(&self, now: NaiveDateTime, last: Option<NaiveDateTime>) -> bool {
        match last {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.period,
        }
    }

    /// Instant at which a gate closed at `last` opens again.
    pub fn reopens_at(&self, last: NaiveDateTime) -> NaiveDateTime {
        last.checked_add_signed(self.period)
            .unwrap_or(NaiveDateTime::MAX)
    }
}
