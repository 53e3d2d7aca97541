use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Bounding box of an observed face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

/// Face embedding vector (128-dimensional for the default provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to `other`, or `None` when the dimensionality differs.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// A known student and their reference embedding. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub identity: String,
    pub roll: String,
    pub embedding: Embedding,
}

/// A face seen in one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedFace {
    #[serde(default)]
    pub location: Option<BoundingBox>,
    pub embedding: Embedding,
}

impl ObservedFace {
    pub fn new(embedding: impl Into<Embedding>) -> Self {
        Self {
            location: None,
            embedding: embedding.into(),
        }
    }
}

/// One line-group of the daily ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: String,
    pub roll: String,
    pub present: bool,
    pub timestamp: NaiveDateTime,
}

impl AttendanceRecord {
    pub fn present(student: &StudentRecord, timestamp: NaiveDateTime) -> Self {
        Self {
            identity: student.identity.clone(),
            roll: student.roll.clone(),
            present: true,
            timestamp,
        }
    }

    pub fn absent(student: &StudentRecord, timestamp: NaiveDateTime) -> Self {
        Self {
            present: false,
            ..Self::present(student, timestamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a.clone()), Some(0.0));
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        let d = a.euclidean_distance(&b).unwrap();
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let e = Embedding::new(vec![0.5, -0.25]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-0.25]");
    }

    #[test]
    fn test_observed_face_location_optional() {
        let face: ObservedFace = serde_json::from_str(r#"{"embedding":[1.0,2.0]}"#).unwrap();
        assert!(face.location.is_none());
        assert_eq!(face.embedding.dim(), 2);
    }

    #[test]
    fn test_absent_record_copies_student_fields() {
        let student = StudentRecord {
            identity: "Alice".into(),
            roll: "1".into(),
            embedding: Embedding::new(vec![0.0]),
        };
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let rec = AttendanceRecord::absent(&student, ts);
        assert_eq!(rec.identity, "Alice");
        assert_eq!(rec.roll, "1");
        assert!(!rec.present);
    }
}
