//! Match an observed face embedding against the roster.

use crate::roster::Roster;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distance tolerance for a positive match on 128-d normalized embeddings.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding has {actual} dimensions, roster uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Which candidate wins when several roster entries fall within tolerance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Smallest distance; equal distances go to the lexically smaller identity.
    #[default]
    Nearest,
    /// First candidate in roster order. Inside a session, candidates already
    /// recorded present are passed over.
    FirstInRosterOrder,
}

/// A roster entry accepted as the identity of an observed face.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity: String,
    pub distance: f32,
}

/// Strategy for resolving an observed embedding to a roster identity.
pub trait Matcher {
    fn find(&self, probe: &Embedding, roster: &Roster) -> Result<Option<MatchResult>, MatchError>;

    /// Match during a running session, where `recorded` reports identities
    /// already marked present. The default ignores `recorded`.
    fn find_in_session(
        &self,
        probe: &Embedding,
        roster: &Roster,
        recorded: &dyn Fn(&str) -> bool,
    ) -> Result<Option<MatchResult>, MatchError> {
        let _ = recorded;
        self.find(probe, roster)
    }
}

/// Euclidean-distance matcher with a fixed tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EuclideanMatcher {
    pub tolerance: f32,
    pub tie_break: TieBreak,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            tie_break: TieBreak::default(),
        }
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32, tie_break: TieBreak) -> Self {
        Self {
            tolerance,
            tie_break,
        }
    }
}

impl EuclideanMatcher {
    fn scan(
        &self,
        probe: &Embedding,
        roster: &Roster,
        passed_over: &dyn Fn(&str) -> bool,
    ) -> Result<Option<MatchResult>, MatchError> {
        if let Some(expected) = roster.dim() {
            if probe.dim() != expected {
                return Err(MatchError::DimensionMismatch {
                    expected,
                    actual: probe.dim(),
                });
            }
        }

        let mut best: Option<MatchResult> = None;

        for student in roster {
            // Dimensionality is uniform across the roster and checked above.
            let Some(distance) = probe.euclidean_distance(&student.embedding) else {
                continue;
            };
            // NaN comes from non-finite components and never matches.
            if distance.is_nan() || distance > self.tolerance {
                continue;
            }
            if passed_over(&student.identity) {
                continue;
            }

            let candidate = MatchResult {
                identity: student.identity.clone(),
                distance,
            };

            match self.tie_break {
                TieBreak::FirstInRosterOrder => return Ok(Some(candidate)),
                TieBreak::Nearest => {
                    let better = match &best {
                        None => true,
                        Some(prev) => {
                            distance < prev.distance
                                || (distance == prev.distance && candidate.identity < prev.identity)
                        }
                    };
                    if better {
                        best = Some(candidate);
                    }
                }
            }
        }

        Ok(best)
    }
}

impl Matcher for EuclideanMatcher {
    fn find(&self, probe: &Embedding, roster: &Roster) -> Result<Option<MatchResult>, MatchError> {
        self.scan(probe, roster, &|_| false)
    }

    /// `Nearest` always scans the full roster, so a recorded student's face
    /// resolves to that student and never to a neighbour. `FirstInRosterOrder`
    /// takes the first unrecorded candidate.
    fn find_in_session(
        &self,
        probe: &Embedding,
        roster: &Roster,
        recorded: &dyn Fn(&str) -> bool,
    ) -> Result<Option<MatchResult>, MatchError> {
        match self.tie_break {
            TieBreak::Nearest => self.find(probe, roster),
            TieBreak::FirstInRosterOrder => self.scan(probe, roster, recorded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StudentRecord;

    fn roster(entries: &[(&str, Vec<f32>)]) -> Roster {
        Roster::new(
            entries
                .iter()
                .map(|(name, values)| StudentRecord {
                    identity: name.to_string(),
                    roll: "0".into(),
                    embedding: Embedding::new(values.clone()),
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_single_candidate_within_tolerance() {
        let r = roster(&[("Alice", vec![0.0, 0.0]), ("Bob", vec![5.0, 5.0])]);
        let probe = Embedding::new(vec![0.3, 0.0]);
        let result = EuclideanMatcher::default().find(&probe, &r).unwrap().unwrap();
        assert_eq!(result.identity, "Alice");
        assert!((result.distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_no_candidate_beyond_tolerance() {
        let r = roster(&[("Alice", vec![0.0, 0.0]), ("Bob", vec![5.0, 5.0])]);
        let probe = Embedding::new(vec![2.0, 2.0]);
        assert_eq!(EuclideanMatcher::default().find(&probe, &r).unwrap(), None);
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let r = roster(&[("Alice", vec![0.0])]);
        let probe = Embedding::new(vec![0.5]);
        let m = EuclideanMatcher::new(0.5, TieBreak::Nearest);
        assert!(m.find(&probe, &r).unwrap().is_some());
    }

    #[test]
    fn test_nearest_prefers_closer_candidate() {
        // Both within tolerance, closer one comes second in roster order.
        let r = roster(&[("Far", vec![0.5]), ("Near", vec![0.1])]);
        let probe = Embedding::new(vec![0.0]);
        let result = EuclideanMatcher::default().find(&probe, &r).unwrap().unwrap();
        assert_eq!(result.identity, "Near");
    }

    #[test]
    fn test_first_in_roster_order() {
        let r = roster(&[("Far", vec![0.5]), ("Near", vec![0.1])]);
        let probe = Embedding::new(vec![0.0]);
        let m = EuclideanMatcher::new(DEFAULT_TOLERANCE, TieBreak::FirstInRosterOrder);
        assert_eq!(m.find(&probe, &r).unwrap().unwrap().identity, "Far");
    }

    #[test]
    fn test_first_in_roster_order_passes_over_recorded() {
        let r = roster(&[("Far", vec![0.5]), ("Near", vec![0.1])]);
        let probe = Embedding::new(vec![0.0]);
        let m = EuclideanMatcher::new(DEFAULT_TOLERANCE, TieBreak::FirstInRosterOrder);
        let found = m.find_in_session(&probe, &r, &|id| id == "Far").unwrap();
        assert_eq!(found.unwrap().identity, "Near");
        assert_eq!(m.find_in_session(&probe, &r, &|_| true).unwrap(), None);
    }

    #[test]
    fn test_nearest_keeps_recorded_best_match() {
        let r = roster(&[("Far", vec![0.5]), ("Near", vec![0.1])]);
        let probe = Embedding::new(vec![0.0]);
        let found = EuclideanMatcher::default()
            .find_in_session(&probe, &r, &|id| id == "Near")
            .unwrap();
        assert_eq!(found.unwrap().identity, "Near");
    }

    #[test]
    fn test_nan_embedding_never_matches() {
        let r = roster(&[("Alice", vec![0.0, 0.0]), ("Bob", vec![9.0, 9.0])]);
        let probe = Embedding::new(vec![f32::NAN, 0.0]);
        for tie_break in [TieBreak::Nearest, TieBreak::FirstInRosterOrder] {
            let m = EuclideanMatcher::new(DEFAULT_TOLERANCE, tie_break);
            assert_eq!(m.find(&probe, &r).unwrap(), None);
        }
    }

    #[test]
    fn test_overflowed_component_never_matches() {
        let r = roster(&[("Alice", vec![f32::INFINITY, 0.0])]);
        let probe = Embedding::new(vec![f32::INFINITY, 0.0]);
        assert_eq!(EuclideanMatcher::default().find(&probe, &r).unwrap(), None);
    }

    #[test]
    fn test_equidistant_tie_is_deterministic() {
        let r = roster(&[("Zoe", vec![0.2]), ("Adam", vec![-0.2])]);
        let probe = Embedding::new(vec![0.0]);
        let m = EuclideanMatcher::default();
        let first = m.find(&probe, &r).unwrap().unwrap();
        for _ in 0..10 {
            assert_eq!(m.find(&probe, &r).unwrap().unwrap(), first);
        }
        assert_eq!(first.identity, "Adam");
    }

    #[test]
    fn test_dimension_mismatch() {
        let r = roster(&[("Alice", vec![0.0, 0.0])]);
        let probe = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(
            EuclideanMatcher::default().find(&probe, &r),
            Err(MatchError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_empty_roster() {
        let probe = Embedding::new(vec![0.0]);
        assert_eq!(EuclideanMatcher::default().find(&probe, &Roster::default()).unwrap(), None);
    }
}
