//! The Process Supervisor: spawn, poll, cancel, and reconcile extraction
//! workers.
//!
//! ## Why a subprocess instead of an in-process task?
//!
//! OCR extraction loads gigabytes of models and can wedge on pathological
//! input. Running it in-process would make it uncancellable (no way to
//! preempt a stuck FFI call) and couple its memory to the server's. As a
//! separate OS process it is an opaque owned resource identified by pid:
//! liveness is a process-existence query, cancellation is a tree kill, and a
//! server restart can rediscover the worker through the pid persisted in the
//! Progress Record.
//!
//! ## The poll loop
//!
//! Supervisor and worker share nothing but the record file. The worker
//! writes; the supervisor re-reads on a fixed ~1 s interval and forwards
//! only *changed* records to the caller, which both deduplicates and keeps
//! forwarded progress monotonic within a run.

pub mod process;
pub mod reconcile;
pub mod stage;

use crate::config::SupervisorConfig;
use crate::error::BookmillError;
use crate::paths;
use crate::progress::{read_record, write_record, JobRecord, JobStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

/// One element of the caller-facing progress channel.
///
/// An extraction emits zero or more `Update`s followed by exactly one
/// `Done` sentinel.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Update(JobRecord),
    Done { success: bool },
}

/// Receives progress while an extraction runs.
///
/// Implementations must be `Send + Sync`; all methods default to no-ops so
/// callers only override what they care about. Forward the updates to a
/// channel, a websocket, a progress bar — the supervisor does not care.
pub trait ExtractProgressCallback: Send + Sync {
    /// A changed Progress Record was observed.
    fn on_update(&self, record: &JobRecord) {
        let _ = record;
    }

    /// The job finished (in any terminal state). Fired exactly once.
    fn on_done(&self, success: bool) {
        let _ = success;
    }
}

/// No-op callback for callers that only want the final result.
pub struct NoopExtractProgress;

impl ExtractProgressCallback for NoopExtractProgress {}

/// Supervises extraction worker subprocesses.
///
/// One instance per server; per-job state is the in-memory worker-handle map
/// plus whatever the Progress Store persists.
pub struct ExtractSupervisor {
    config: SupervisorConfig,
    /// Live worker handles: job id → pid. Transient — after a restart the
    /// persisted record's pid is the source of truth.
    active: Mutex<HashMap<String, u32>>,
}

impl ExtractSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Run an extraction job for `source` to completion, forwarding progress
    /// to `callback`.
    ///
    /// Enforces one active job per source: a second call while a
    /// non-terminal record with a live pid exists is rejected rather than
    /// racing a second writer onto the same record.
    ///
    /// If a previous run left an `extracted` record with a usable
    /// intermediate artifact, the spawned worker resumes at the splitting
    /// step and the expensive OCR pass is skipped entirely.
    pub async fn extract(
        &self,
        source: &Path,
        callback: &dyn ExtractProgressCallback,
    ) -> Result<JobRecord, BookmillError> {
        let result = self.extract_inner(source, callback).await;
        let success = matches!(&result, Ok(r) if r.status == JobStatus::Completed);
        callback.on_done(success);
        result
    }

    async fn extract_inner(
        &self,
        source: &Path,
        callback: &dyn ExtractProgressCallback,
    ) -> Result<JobRecord, BookmillError> {
        if !source.exists() {
            return Err(BookmillError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }

        let job = job_id(source);
        let output_dir = paths::output_dir_for(source);
        std::fs::create_dir_all(&output_dir).map_err(|e| BookmillError::OutputWriteFailed {
            path: output_dir.clone(),
            source: e,
        })?;

        // Single-writer guard: never let two workers share a record. The
        // in-memory handle covers the window where a resumed worker is alive
        // but the record still reads `extracted` (not in-progress).
        if let Some(&pid) = self.active.lock().unwrap().get(&job) {
            return Err(BookmillError::JobAlreadyActive { job, pid });
        }
        if let Some(existing) = read_record(&output_dir) {
            if existing.status.is_in_progress() {
                if let Some(pid) = existing.pid {
                    if process::pid_alive(pid) {
                        return Err(BookmillError::JobAlreadyActive { job, pid });
                    }
                }
                // Dead pid: stale record from a crashed run, safe to restart.
                warn!("Stale in-progress record with dead pid {:?} in {}; restarting", existing.pid, output_dir.display());
            }
        }

        let is_resume = read_record(&output_dir).is_some_and(|r| {
            r.status == JobStatus::Extracted
                && r.resume_artifact.as_ref().is_some_and(|a| a.exists())
        });

        if is_resume {
            info!("Found 'extracted' record for {job}; worker will resume from the split step");
        } else {
            write_record(
                &output_dir,
                JobStatus::Extracting,
                5,
                "Starting extraction process...",
                Some("Starting"),
                None,
            );
        }

        let program = self.worker_program()?;
        let mut child = Command::new(&program)
            .arg(source)
            .arg(&output_dir)
            .spawn()
            .map_err(|e| BookmillError::WorkerSpawnFailed {
                program: program.clone(),
                source: e,
            })?;

        let pid = child.id().unwrap_or_default();
        info!("Started extraction worker pid {pid} for {job}");

        if !is_resume {
            write_record(
                &output_dir,
                JobStatus::Extracting,
                5,
                "Worker started...",
                Some("Starting"),
                Some(pid),
            );
        }

        self.active.lock().unwrap().insert(job.clone(), pid);
        let result = self.poll_worker(&mut child, &output_dir, callback).await;
        self.active.lock().unwrap().remove(&job);
        result
    }

    /// Poll the record while the worker runs; interpret the exit.
    async fn poll_worker(
        &self,
        child: &mut tokio::process::Child,
        output_dir: &Path,
        callback: &dyn ExtractProgressCallback,
    ) -> Result<JobRecord, BookmillError> {
        let mut last_forwarded: Option<JobRecord> = None;

        let exit_status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return Err(BookmillError::Internal(format!("worker wait failed: {e}"))),
            }

            sleep(self.config.poll_interval).await;

            // Forward only changed records; torn reads surface as None and
            // are simply retried next interval.
            if let Some(record) = read_record(output_dir) {
                if last_forwarded.as_ref() != Some(&record) {
                    callback.on_update(&record);
                    last_forwarded = Some(record);
                }
            }
        };

        let mut final_record = read_record(output_dir);

        // A cancel writes its terminal record just after the kill completes;
        // if the exit was observed first, give that write one interval to
        // land before interpreting an in-progress record as a crash.
        if exit_status.code() != Some(0)
            && final_record
                .as_ref()
                .map(|r| r.status.is_in_progress())
                .unwrap_or(true)
        {
            sleep(self.config.poll_interval).await;
            final_record = read_record(output_dir);
        }

        if let Some(record) = &final_record {
            if last_forwarded.as_ref() != Some(record) {
                callback.on_update(record);
            }
        }

        let code = exit_status.code().unwrap_or(-1);
        match final_record {
            // Cancellation is terminal but not a failure.
            Some(record) if record.status == JobStatus::Cancelled => {
                info!("Worker exited after cancellation");
                Ok(record)
            }
            Some(record) if exit_status.success() => Ok(record),
            Some(record) => {
                error!("Worker failed with code {code}: {}", record.message);
                Err(BookmillError::WorkerFailed {
                    code,
                    message: record.message,
                })
            }
            None => {
                let message = last_forwarded
                    .map(|r| r.message)
                    .unwrap_or_else(|| "Extraction failed".to_string());
                error!("Worker exited with code {code} and no record: {message}");
                Err(BookmillError::WorkerFailed { code, message })
            }
        }
    }

    /// Run an extraction and consume its progress as a stream of
    /// [`ProgressEvent`]s, terminated by the `Done` sentinel.
    pub fn extract_stream(self: Arc<Self>, source: PathBuf) -> ReceiverStream<ProgressEvent> {
        struct ChannelCallback {
            tx: mpsc::Sender<ProgressEvent>,
        }

        impl ExtractProgressCallback for ChannelCallback {
            fn on_update(&self, record: &JobRecord) {
                let _ = self.tx.try_send(ProgressEvent::Update(record.clone()));
            }
            fn on_done(&self, success: bool) {
                let _ = self.tx.try_send(ProgressEvent::Done { success });
            }
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let callback = ChannelCallback { tx };
            if let Err(e) = self.extract(&source, &callback).await {
                warn!("Streamed extraction ended with error: {e}");
            }
        });
        ReceiverStream::new(rx)
    }

    /// Current status of the job for `source`, from the Progress Store.
    ///
    /// An in-progress record whose pid no longer exists is rewritten to a
    /// terminal `error` proactively — a record must never claim "extracting"
    /// with nobody extracting.
    pub fn status(&self, source: &Path) -> Option<JobRecord> {
        let output_dir = paths::output_dir_for(source);
        let record = read_record(&output_dir)?;

        if record.status.is_in_progress() {
            if let Some(pid) = record.pid {
                if !process::pid_alive(pid) {
                    let message = "Extraction process no longer exists";
                    warn!("Dead worker pid {pid} behind in-progress record; rewriting to error");
                    write_record(
                        &output_dir,
                        JobStatus::Error,
                        record.progress,
                        message,
                        record.current_step.as_deref(),
                        None,
                    );
                    return read_record(&output_dir);
                }
            }
        }

        Some(record)
    }

    /// Cancel the running job for `source`: kill the recorded worker's
    /// process tree (children first, grace period, then forceful kill) and
    /// write the terminal `cancelled` record.
    pub async fn cancel(&self, source: &Path) -> Result<(), BookmillError> {
        let output_dir = paths::output_dir_for(source);
        let record = read_record(&output_dir).ok_or_else(|| BookmillError::NoJobRecord {
            dir: output_dir.clone(),
        })?;
        let pid = record.pid.ok_or_else(|| BookmillError::NoWorkerPid {
            dir: output_dir.clone(),
        })?;

        match process::kill_tree(pid, self.config.kill_grace).await {
            Ok(()) => {
                write_record(
                    &output_dir,
                    JobStatus::Cancelled,
                    0,
                    "Extraction cancelled",
                    Some("Cancelled"),
                    None,
                );
                info!("Cancelled extraction for {}, killed pid {pid}", job_id(source));
                Ok(())
            }
            Err(e @ BookmillError::ProcessGone { .. }) => {
                write_record(
                    &output_dir,
                    JobStatus::Error,
                    0,
                    "Process no longer exists",
                    None,
                    None,
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Startup/shutdown reconciliation over all job directories under `root`.
    pub async fn reconcile(&self, root: &Path) -> usize {
        reconcile::sweep(root, self.config.kill_grace).await
    }

    /// Jobs with live workers currently supervised by this instance.
    pub fn active_jobs(&self) -> Vec<(String, u32)> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .map(|(job, &pid)| (job.clone(), pid))
            .collect()
    }

    fn worker_program(&self) -> Result<PathBuf, BookmillError> {
        if let Some(program) = &self.config.worker_program {
            return Ok(program.clone());
        }
        let exe = std::env::current_exe()
            .map_err(|e| BookmillError::Internal(format!("cannot locate current executable: {e}")))?;
        Ok(exe
            .parent()
            .map(|dir| dir.join("bookmill-worker"))
            .unwrap_or_else(|| PathBuf::from("bookmill-worker")))
    }
}

/// Job identifier derived from the source file (its stem).
fn job_id(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::write_record_with_artifact;
    use tempfile::TempDir;

    const DEAD_PID: u32 = u32::MAX - 7;

    fn supervisor() -> ExtractSupervisor {
        ExtractSupervisor::new(SupervisorConfig::default())
    }

    #[test]
    fn job_id_uses_stem() {
        assert_eq!(job_id(Path::new("/books/b/deep learning.pdf")), "deep learning");
    }

    #[tokio::test]
    async fn extract_rejects_missing_source() {
        let sup = supervisor();
        let err = sup
            .extract(Path::new("/definitely/not/here.pdf"), &NoopExtractProgress)
            .await;
        assert!(matches!(err, Err(BookmillError::SourceNotFound { .. })));
    }

    #[tokio::test]
    async fn extract_rejects_live_duplicate() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let output_dir = paths::output_dir_for(&source);
        std::fs::create_dir_all(&output_dir).unwrap();
        // Current process is definitely alive, so this record blocks.
        write_record(
            &output_dir,
            JobStatus::Extracting,
            50,
            "working",
            None,
            Some(std::process::id()),
        );

        let sup = supervisor();
        let err = sup.extract(&source, &NoopExtractProgress).await;
        assert!(matches!(err, Err(BookmillError::JobAlreadyActive { .. })));
    }

    #[test]
    fn status_rewrites_dead_pid_to_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let output_dir = paths::output_dir_for(&source);
        std::fs::create_dir_all(&output_dir).unwrap();
        write_record(
            &output_dir,
            JobStatus::Extracting,
            30,
            "Recognizing Layout: 5/50",
            Some("Recognizing Layout"),
            Some(DEAD_PID),
        );

        let sup = supervisor();
        let record = sup.status(&source).expect("record present");
        assert_eq!(record.status, JobStatus::Error);

        // The rewrite is persisted, not just reported.
        let on_disk = read_record(&output_dir).unwrap();
        assert_eq!(on_disk.status, JobStatus::Error);
    }

    #[test]
    fn status_leaves_extracted_alone() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let output_dir = paths::output_dir_for(&source);
        std::fs::create_dir_all(&output_dir).unwrap();
        let artifact = output_dir.join("book.md");
        std::fs::write(&artifact, "# C").unwrap();
        write_record_with_artifact(
            &output_dir,
            JobStatus::Extracted,
            80,
            "PDF extraction completed",
            None,
            Some(DEAD_PID),
            &artifact,
        );

        let sup = supervisor();
        let record = sup.status(&source).unwrap();
        assert_eq!(record.status, JobStatus::Extracted);
    }

    #[tokio::test]
    async fn cancel_without_record_fails() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let sup = supervisor();
        let err = sup.cancel(&source).await;
        assert!(matches!(err, Err(BookmillError::NoJobRecord { .. })));
    }

    #[tokio::test]
    async fn cancel_of_dead_pid_reports_gone_and_marks_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let output_dir = paths::output_dir_for(&source);
        std::fs::create_dir_all(&output_dir).unwrap();
        write_record(
            &output_dir,
            JobStatus::Extracting,
            10,
            "working",
            None,
            Some(DEAD_PID),
        );

        let sup = supervisor();
        let err = sup.cancel(&source).await;
        assert!(matches!(err, Err(BookmillError::ProcessGone { .. })));
        assert_eq!(read_record(&output_dir).unwrap().status, JobStatus::Error);
    }
}
