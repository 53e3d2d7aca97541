//! Append-only, date-partitioned attendance ledger.
//!
//! One file per calendar day (`<dir>/YYYY-MM-DD.txt`). Each record is four
//! `key=value` lines:
//!
//! ```text
//! name=Alice
//! roll=1
//! present=true
//! date=2024-03-04 09:00:00
//! ```
//!
//! The ledger never rewrites or dedupes. Repeated runs on the same day may
//! append several records for one identity; [`DailyReport`] collapses them.

use crate::roster::Roster;
use crate::session::SessionState;
use crate::types::AttendanceRecord;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FILE_DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed ledger {path} at line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Serialize one record in the four-line ledger shape.
pub fn format_record(record: &AttendanceRecord) -> String {
    format!(
        "name={}\nroll={}\npresent={}\ndate={}\n",
        record.identity,
        record.roll,
        record.present,
        record.timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Parse a ledger file body back into records. Blank lines are ignored.
pub fn parse_records(path: &Path, contents: &str) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let lines: Vec<(usize, &str)> = contents
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end()))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    let malformed = |line: usize, reason: String| LedgerError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut records = Vec::with_capacity(lines.len() / 4);
    for chunk in lines.chunks(4) {
        if chunk.len() < 4 {
            return Err(malformed(chunk[0].0, "truncated record".into()));
        }

        let mut values = [""; 4];
        for ((line, text), (slot, key)) in chunk
            .iter()
            .zip(values.iter_mut().zip(["name", "roll", "present", "date"]))
        {
            let (k, v) = text
                .split_once('=')
                .ok_or_else(|| malformed(*line, format!("expected {key}=<value>")))?;
            if k != key {
                return Err(malformed(*line, format!("expected key {key}, found {k}")));
            }
            *slot = v;
        }

        let present = match values[2] {
            "true" => true,
            "false" => false,
            other => return Err(malformed(chunk[2].0, format!("invalid present flag {other}"))),
        };
        let timestamp = NaiveDateTime::parse_from_str(values[3], TIMESTAMP_FORMAT)
            .map_err(|e| malformed(chunk[3].0, format!("invalid date: {e}")))?;

        records.push(AttendanceRecord {
            identity: values[0].to_string(),
            roll: values[1].to_string(),
            present,
            timestamp,
        });
    }

    Ok(records)
}

/// Flat-file ledger rooted at a record directory.
#[derive(Debug, Clone)]
pub struct DailyLedger {
    dir: PathBuf,
}

impl DailyLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ledger file for the given calendar day.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.txt", date.format(FILE_DATE_FORMAT)))
    }

    /// Append one present record to the file of the record's own day.
    pub fn append_present(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        self.append(record.timestamp.date(), std::slice::from_ref(record))
    }

    /// Run the absentee sweep: one absent record, stamped `now`, for every
    /// roster identity not recorded present. Marks the session finalized
    /// before writing, so a failed write is not retried by a later sweep.
    pub fn finalize_absentees(
        &self,
        roster: &Roster,
        state: &mut SessionState,
        now: NaiveDateTime,
    ) -> Result<Vec<AttendanceRecord>, LedgerError> {
        if state.is_finalized() {
            tracing::debug!("session already finalized; skipping absentee sweep");
            return Ok(Vec::new());
        }
        state.mark_finalized();

        let absent: Vec<AttendanceRecord> = roster
            .iter()
            .filter(|s| !state.is_recorded(&s.identity))
            .map(|s| AttendanceRecord::absent(s, now))
            .collect();

        if !absent.is_empty() {
            self.append(now.date(), &absent)?;
        }
        tracing::info!(
            roster = roster.len(),
            present = state.recorded_count(),
            absent = absent.len(),
            path = %self.path_for(now.date()).display(),
            "absentees finalized"
        );
        Ok(absent)
    }

    /// All records written for `date`; a missing file reads as empty.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let path = self.path_for(date);
        match std::fs::read_to_string(&path) {
            Ok(contents) => parse_records(&path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(LedgerError::Io { path, source }),
        }
    }

    /// Identities already recorded present on `date`, in ledger order.
    pub fn present_identities(&self, date: NaiveDate) -> Result<Vec<String>, LedgerError> {
        let report = DailyReport::from_records(date, &self.read_day(date)?);
        Ok(report
            .entries
            .into_iter()
            .filter(|e| e.present)
            .map(|e| e.identity)
            .collect())
    }

    fn append(&self, date: NaiveDate, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        let path = self.path_for(date);
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let body: String = records.iter().map(format_record).collect();
        file.write_all(body.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        tracing::debug!(path = %path.display(), records = records.len(), "ledger append");
        Ok(())
    }
}

/// One identity's collapsed attendance for a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub identity: String,
    pub roll: String,
    pub present: bool,
    /// Timestamp of the earliest present record, or of the first record if never present.
    pub at: NaiveDateTime,
    /// Number of raw ledger records collapsed into this entry.
    pub records: usize,
}

/// Downstream view of a day's ledger with one entry per identity.
///
/// Any present record wins over absent records, so an absent sweep from an
/// earlier run does not hide a later sighting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub entries: Vec<ReportEntry>,
}

impl DailyReport {
    pub fn from_records(date: NaiveDate, records: &[AttendanceRecord]) -> Self {
        let mut entries: Vec<ReportEntry> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for rec in records {
            match index.get(rec.identity.as_str()) {
                Some(&i) => {
                    let entry = &mut entries[i];
                    entry.records += 1;
                    if rec.present && (!entry.present || rec.timestamp < entry.at) {
                        entry.present = true;
                        entry.at = rec.timestamp;
                        entry.roll = rec.roll.clone();
                    }
                }
                None => {
                    index.insert(rec.identity.as_str(), entries.len());
                    entries.push(ReportEntry {
                        identity: rec.identity.clone(),
                        roll: rec.roll.clone(),
                        present: rec.present,
                        at: rec.timestamp,
                        records: 1,
                    });
                }
            }
        }

        Self { date, entries }
    }

    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present).count()
    }

    pub fn absent_count(&self) -> usize {
        self.entries.len() - self.present_count()
    }
}
