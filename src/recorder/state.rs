//! Capture session state
//!
//! Defines the session state machine and the per-cycle session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Current state of the capture controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// No capture in progress
    #[default]
    Idle,
    /// Start requested, waiting for the application to confirm
    Starting,
    /// Recording confirmed
    Active,
    /// Stop requested, waiting for the output file
    Stopping,
}

/// One in-flight recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    /// Session identifier
    pub id: Uuid,
    /// When the start request was issued; the application's file name is
    /// stamped at or shortly after this
    pub started_at: DateTime<Utc>,
    /// When the orchestrator plans to stop it
    pub expected_stop_at: DateTime<Utc>,
}

impl CaptureSession {
    pub fn new(duration: Duration) -> Self {
        let started_at = Utc::now();
        let expected_stop_at = started_at
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            id: Uuid::new_v4(),
            started_at,
            expected_stop_at,
        }
    }
}

/// How to find the recording when the application does not report a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    /// Directory the application writes recordings to
    pub recording_dir: Option<PathBuf>,
    /// Container extension, without the dot
    pub extension: String,
}

impl Default for ArtifactNaming {
    fn default() -> Self {
        Self {
            recording_dir: None,
            extension: "mkv".to_string(),
        }
    }
}

impl ArtifactNaming {
    /// OBS default file name: local start time as `%Y-%m-%d %H-%M-%S`
    pub fn resolve(&self, started_at: DateTime<Utc>) -> Option<PathBuf> {
        let dir = self.recording_dir.as_deref()?;
        let local = started_at.with_timezone(&chrono::Local);
        Some(file_in(dir, &local.format("%Y-%m-%d %H-%M-%S").to_string(), &self.extension))
    }

    /// Names the file may carry if the application stamped it up to
    /// `NAME_SLACK_SECS` after `started_at`, most likely first
    pub fn candidates(&self, started_at: DateTime<Utc>) -> Vec<PathBuf> {
        (0..=NAME_SLACK_SECS)
            .filter_map(|secs| self.resolve(started_at + chrono::Duration::seconds(secs)))
            .collect()
    }
}

const NAME_SLACK_SECS: i64 = 2;

fn file_in(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", stem, extension))
}
