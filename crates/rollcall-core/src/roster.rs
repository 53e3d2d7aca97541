//! Student roster: identities, roll numbers and reference embeddings.
//!
//! The roster is built once before a session starts and is immutable for
//! the session's lifetime. Entries keep the order in which they were loaded;
//! that order is the iteration order seen by the matcher.

use crate::types::{Embedding, StudentRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed student info {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("duplicate identity in roster: {0}")]
    DuplicateIdentity(String),
    #[error("no face found in reference {0}")]
    NoFace(PathBuf),
    #[error("embedding for {0} has no dimensions")]
    EmptyEmbedding(String),
    #[error("embedding for {identity} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        identity: String,
        expected: usize,
        actual: usize,
    },
}

/// Ordered, identity-unique set of known students.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    students: Vec<StudentRecord>,
    index: HashMap<String, usize>,
}

impl Roster {
    /// Build a roster, rejecting duplicate identities, empty embeddings and
    /// mixed dimensionality.
    pub fn new(students: Vec<StudentRecord>) -> Result<Self, RosterError> {
        let mut index = HashMap::with_capacity(students.len());
        let expected = students.first().map(|s| s.embedding.dim());

        for (i, student) in students.iter().enumerate() {
            if student.embedding.dim() == 0 {
                return Err(RosterError::EmptyEmbedding(student.identity.clone()));
            }
            if let Some(expected) = expected {
                if student.embedding.dim() != expected {
                    return Err(RosterError::DimensionMismatch {
                        identity: student.identity.clone(),
                        expected,
                        actual: student.embedding.dim(),
                    });
                }
            }
            if index.insert(student.identity.clone(), i).is_some() {
                return Err(RosterError::DuplicateIdentity(student.identity.clone()));
            }
        }

        Ok(Self { students, index })
    }

    pub fn get(&self, identity: &str) -> Option<&StudentRecord> {
        self.index.get(identity).map(|&i| &self.students[i])
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.index.contains_key(identity)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StudentRecord> {
        self.students.iter()
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Embedding dimensionality shared by every entry (`None` for an empty roster).
    pub fn dim(&self) -> Option<usize> {
        self.students.first().map(|s| s.embedding.dim())
    }
}

impl<'a> IntoIterator for &'a Roster {
    type Item = &'a StudentRecord;
    type IntoIter = std::slice::Iter<'a, StudentRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.students.iter()
    }
}

/// Parsed contents of one student info file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentInfo {
    pub name: String,
    pub roll: String,
    pub reference: PathBuf,
}

impl StudentInfo {
    /// Parse the three-line `key: value` format (name, roll, image).
    pub fn parse(path: &Path, contents: &str) -> Result<Self, RosterError> {
        let mut lines = contents.lines();
        let mut field = |label: &str| -> Result<String, RosterError> {
            let line = lines.next().ok_or_else(|| RosterError::Malformed {
                path: path.to_path_buf(),
                reason: format!("missing {label} line"),
            })?;
            let (_, value) = line.split_once(':').ok_or_else(|| RosterError::Malformed {
                path: path.to_path_buf(),
                reason: format!("{label} line has no ':' separator"),
            })?;
            let value = value.trim();
            if value.is_empty() {
                return Err(RosterError::Malformed {
                    path: path.to_path_buf(),
                    reason: format!("empty {label}"),
                });
            }
            Ok(value.to_string())
        };

        let name = field("name")?;
        let roll = field("roll")?;
        let reference = PathBuf::from(field("image")?);
        Ok(Self {
            name,
            roll,
            reference,
        })
    }
}

/// Source of reference embeddings for roster entries.
///
/// Implementations return every face found in the reference, in detection
/// order. The roster keeps the first one.
pub trait ReferenceEmbedder {
    fn embed_reference(&self, reference: &Path) -> Result<Vec<Embedding>, RosterError>;
}

/// Reads embeddings precomputed by an offline face-embedding tool.
///
/// The reference file is JSON: `{"faces": [[f32, ...], ...]}`.
#[derive(Debug, Default, Clone)]
pub struct PrecomputedEmbedder;

#[derive(Deserialize)]
struct PrecomputedFaces {
    faces: Vec<Embedding>,
}

impl ReferenceEmbedder for PrecomputedEmbedder {
    fn embed_reference(&self, reference: &Path) -> Result<Vec<Embedding>, RosterError> {
        let raw = std::fs::read_to_string(reference).map_err(|source| RosterError::Io {
            path: reference.to_path_buf(),
            source,
        })?;
        let parsed: PrecomputedFaces =
            serde_json::from_str(&raw).map_err(|e| RosterError::Malformed {
                path: reference.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(parsed.faces)
    }
}

/// Load every `*.txt` student info file in `info_dir`, in file-name order.
///
/// Relative reference paths are resolved against `info_dir`'s parent, the
/// working layout of a class folder (`students_info/`, `img/`, `record/`).
pub fn load_roster(info_dir: &Path, embedder: &dyn ReferenceEmbedder) -> Result<Roster, RosterError> {
    let io_err = |source| RosterError::Io {
        path: info_dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(info_dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.extension().is_some_and(|ext| ext == "txt") {
            paths.push(path);
        }
    }
    paths.sort();

    let base = info_dir.parent().unwrap_or_else(|| Path::new("."));
    let mut students = Vec::with_capacity(paths.len());

    for path in paths {
        let contents = std::fs::read_to_string(&path).map_err(|source| RosterError::Io {
            path: path.clone(),
            source,
        })?;
        let info = StudentInfo::parse(&path, &contents)?;
        let reference = if info.reference.is_absolute() {
            info.reference.clone()
        } else {
            base.join(&info.reference)
        };

        let embedding = embedder
            .embed_reference(&reference)?
            .into_iter()
            .next()
            .ok_or_else(|| RosterError::NoFace(reference.clone()))?;

        tracing::debug!(
            name = %info.name,
            roll = %info.roll,
            dim = embedding.dim(),
            "loaded roster entry"
        );

        students.push(StudentRecord {
            identity: info.name,
            roll: info.roll,
            embedding,
        });
    }

    let roster = Roster::new(students)?;
    tracing::info!(
        dir = %info_dir.display(),
        students = roster.len(),
        dim = ?roster.dim(),
        "roster loaded"
    );
    Ok(roster)
}
