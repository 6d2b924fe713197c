//! The Progress Store: one JSON record per job, colocated with job output.
//!
//! ## Why a file and not a database?
//!
//! The record is best-effort bookkeeping, not a source of truth — the actual
//! output artifacts are. A file next to the output survives server restarts,
//! is trivially inspectable, and is naturally scoped to the job directory so
//! the reconciliation sweep can reason about both together. Losing a write is
//! recoverable (status can be re-derived from the last artifact), which is
//! why every write here is logged-never-fatal.
//!
//! ## Read tolerance
//!
//! A poller can observe the file mid-flush: empty, or cut off half-way
//! through the JSON. [`read_record`] treats both as "absent — re-poll",
//! never as an error. The supervisor polls every second, so a torn read
//! costs one poll interval, not a failed job.

use crate::paths::PROGRESS_FILE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Lifecycle status of an extraction job.
///
/// `extracting → extracted → splitting → completed`, with `error` and
/// `cancelled` reachable from the in-progress states. `extracted` is the
/// resume point: the expensive OCR step is done and only the cheap split
/// step remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Extracting,
    Extracted,
    Splitting,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are never touched by the active worker again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// In-progress statuses imply a worker should be alive somewhere.
    ///
    /// `extracted` is deliberately *not* in-progress: it is parked, resumable
    /// work with no live process attached.
    pub fn is_in_progress(self) -> bool {
        matches!(self, JobStatus::Extracting | JobStatus::Splitting)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Extracting => "extracting",
            JobStatus::Extracted => "extracted",
            JobStatus::Splitting => "splitting",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The on-disk status document describing a single job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: JobStatus,
    /// 0–100. Monotonically non-decreasing within a single run.
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Pid of the worker that owns this record; how a restarted server
    /// rediscovers (and can kill) the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub updated_at: DateTime<Utc>,
    /// Intermediate artifact enabling resume of the final step only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_artifact: Option<PathBuf>,
}

/// Idempotently overwrite the job record in `dir`.
///
/// Preserves any `resume_artifact` already present on disk when the caller
/// does not supply a new one — the artifact pointer must survive the many
/// incremental status writes between `extracted` and `completed`.
///
/// Write failures are logged, never returned: see the module docs.
pub fn write_record(
    dir: &Path,
    status: JobStatus,
    progress: u8,
    message: &str,
    current_step: Option<&str>,
    pid: Option<u32>,
) {
    let existing_artifact = read_record(dir).and_then(|r| r.resume_artifact);
    write_record_full(dir, status, progress, message, current_step, pid, existing_artifact);
}

/// Like [`write_record`] but setting `resume_artifact` explicitly.
pub fn write_record_with_artifact(
    dir: &Path,
    status: JobStatus,
    progress: u8,
    message: &str,
    current_step: Option<&str>,
    pid: Option<u32>,
    resume_artifact: &Path,
) {
    write_record_full(
        dir,
        status,
        progress,
        message,
        current_step,
        pid,
        Some(resume_artifact.to_path_buf()),
    );
}

fn write_record_full(
    dir: &Path,
    status: JobStatus,
    progress: u8,
    message: &str,
    current_step: Option<&str>,
    pid: Option<u32>,
    resume_artifact: Option<PathBuf>,
) {
    let record = JobRecord {
        status,
        progress: progress.min(100),
        message: message.to_string(),
        current_step: current_step.map(str::to_string),
        pid,
        updated_at: Utc::now(),
        resume_artifact,
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Failed to create job dir {}: {e}", dir.display());
        return;
    }
    let path = dir.join(PROGRESS_FILE);
    match serde_json::to_string_pretty(&record) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                warn!("Failed to write job record {}: {e}", path.display());
            }
        }
        Err(e) => warn!("Failed to serialize job record: {e}"),
    }
}

/// Read the job record from `dir`, tolerating torn writes.
///
/// Returns `None` when the file is absent, empty, or not (yet) valid JSON —
/// all of which mean "nothing to report, re-poll later".
pub fn read_record(dir: &Path) -> Option<JobRecord> {
    let path = dir.join(PROGRESS_FILE);
    let content = std::fs::read_to_string(&path).ok()?;
    if content.trim().is_empty() {
        // A writer is mid-flush; the next poll will see the full record.
        return None;
    }
    match serde_json::from_str(&content) {
        Ok(record) => Some(record),
        Err(_) => None,
    }
}

/// Remove the job record. Best-effort; errors are logged, never fatal.
pub fn clear_record(dir: &Path) {
    let path = dir.join(PROGRESS_FILE);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to clear job record {}: {e}", path.display());
        }
    }
}
