use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::reward::HomeostasisInputs;
use crate::task::scheduler::SchedulerState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subject state {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("subject state {path} is malformed: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// End-of-session totals, kept with the persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_day: u32,
    pub attempts: u64,
    pub valid: u64,
    pub correct: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_correct: Option<f64>,
    pub total_reward_ul: f64,
    pub reward_volume_ul: f64,
    pub duration_s: f64,
}

/// Everything carried from one session of a subject to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectState {
    pub scheduler: SchedulerState,
    #[serde(default)]
    pub total_attempts: u64,
    #[serde(default)]
    pub total_reward_ul: f64,
    #[serde(default)]
    pub session_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session: Option<SessionSummary>,
}

impl SubjectState {
    pub fn new(scheduler: SchedulerState) -> Self {
        Self {
            scheduler,
            total_attempts: 0,
            total_reward_ul: 0.0,
            session_count: 0,
            last_session: None,
        }
    }

    /// Homeostasis inputs for the coming session; `None` before the first.
    pub fn homeostasis_inputs(&self, weight_pct: f64) -> Option<HomeostasisInputs> {
        self.last_session.as_ref().map(|last| HomeostasisInputs {
            previous_volume_ul: self.scheduler.reward_volume_ul,
            weight_pct,
            previous_total_reward_ul: last.total_reward_ul,
            previous_attempts: last.attempts,
        })
    }

    pub fn record_session(&mut self, scheduler: SchedulerState, summary: SessionSummary) {
        self.scheduler = scheduler;
        self.total_attempts += summary.attempts;
        self.total_reward_ul += summary.total_reward_ul;
        self.session_count += 1;
        self.last_session = Some(summary);
    }
}

/// `<data_dir>/<subject>/state.json`, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct SubjectStore {
    dir: PathBuf,
}

impl SubjectStore {
    pub fn new(data_dir: impl AsRef<Path>, subject: &str) -> Self {
        Self {
            dir: data_dir.as_ref().join(subject),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    fn io_err(path: &Path, source: io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn load(&self) -> Result<Option<SubjectState>, StoreError> {
        let path = self.state_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(&path, e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Format {
                path: path.display().to_string(),
                source,
            })
    }

    /// Write to a sibling temp file, then rename over the old state.
    pub fn save(&self, state: &SubjectState) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(&self.dir, e))?;
        let path = self.state_path();
        let tmp = self.dir.join("state.json.tmp");
        let text = serde_json::to_string_pretty(state).map_err(|source| StoreError::Format {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::write(&tmp, text).map_err(|e| Self::io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::io_err(&path, e))
    }
}
