use crate::cooldown::{CooldownGate, CooldownScope, DEFAULT_COOLDOWN_SECS};
use crate::matcher::{EuclideanMatcher, TieBreak, DEFAULT_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Attendance configuration.
///
/// Resolution order: built-in defaults, then the TOML file named by
/// `ROLLCALL_CONFIG` (if set), then individual `ROLLCALL_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of per-student info files.
    pub info_dir: PathBuf,
    /// Directory receiving one ledger file per day.
    pub record_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    /// Seconds the cooldown gate stays closed after a recorded match.
    pub cooldown_secs: u64,
    pub cooldown_scope: CooldownScope,
    pub tie_break: TieBreak,
    /// Every Nth frame is matched; the rest pass through.
    pub skip_frames: u32,
    /// Seed the session with students already present in today's ledger.
    pub resume_from_ledger: bool,
    /// JSON-lines frame feed from the embedding provider; stdin when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            info_dir: PathBuf::from("students_info"),
            record_dir: PathBuf::from("record"),
            tolerance: DEFAULT_TOLERANCE,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            cooldown_scope: CooldownScope::Global,
            tie_break: TieBreak::Nearest,
            skip_frames: 5,
            resume_from_ledger: false,
            feed: None,
        }
    }
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from `lookup`; unparsable values are ignored with a warning.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_INFO_DIR") {
            self.info_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_RECORD_DIR") {
            self.record_dir = PathBuf::from(v);
        }
        env_parse(&lookup, "ROLLCALL_TOLERANCE", &mut self.tolerance);
        env_parse(&lookup, "ROLLCALL_COOLDOWN_SECS", &mut self.cooldown_secs);
        env_parse(&lookup, "ROLLCALL_SKIP_FRAMES", &mut self.skip_frames);
        if let Some(v) = lookup("ROLLCALL_COOLDOWN_SCOPE") {
            match v.as_str() {
                "global" => self.cooldown_scope = CooldownScope::Global,
                "per-identity" => self.cooldown_scope = CooldownScope::PerIdentity,
                other => tracing::warn!(value = other, "ignoring unknown ROLLCALL_COOLDOWN_SCOPE"),
            }
        }
        if let Some(v) = lookup("ROLLCALL_TIE_BREAK") {
            match v.as_str() {
                "nearest" => self.tie_break = TieBreak::Nearest,
                "first-in-roster-order" => self.tie_break = TieBreak::FirstInRosterOrder,
                other => tracing::warn!(value = other, "ignoring unknown ROLLCALL_TIE_BREAK"),
            }
        }
        if let Some(v) = lookup("ROLLCALL_FEED") {
            self.feed = (v != "-").then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("ROLLCALL_RESUME_FROM_LEDGER") {
            self.resume_from_ledger = v != "0";
        }
        if self.skip_frames == 0 {
            tracing::warn!("skip_frames of 0 treated as 1");
            self.skip_frames = 1;
        }
    }

    pub fn matcher(&self) -> EuclideanMatcher {
        EuclideanMatcher::new(self.tolerance, self.tie_break)
    }

    pub fn cooldown(&self) -> CooldownGate {
        CooldownGate::from_secs(self.cooldown_secs, self.cooldown_scope)
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable value"),
        }
    }
}
