//! Error types for the bookmill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BookmillError`] — **Fatal**: the job cannot proceed at all (missing
//!   source file, worker would not spawn, checkpoint corruption). Returned as
//!   `Err(BookmillError)` from the top-level supervisor and translation
//!   entry points.
//!
//! * [`UnitError`] — **Non-fatal**: a single content unit misbehaved
//!   (validation failure, transient API error) but the job continues. Unit
//!   errors are logged and, per the degrade-and-continue policy, never abort
//!   a translation on their own.
//!
//! Cancellation is deliberately a [`BookmillError::Cancelled`] variant rather
//! than a status bool: callers map it to the terminal `cancelled` job status,
//! and checkpoints written before the cancellation point stay on disk.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the bookmill library.
///
/// Unit-level failures use [`UnitError`] and are logged rather than
/// propagated here.
#[derive(Debug, Error)]
pub enum BookmillError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source document was not found at the given path.
    #[error("Source file not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    // ── Job lifecycle errors ──────────────────────────────────────────────
    /// A non-terminal record with a live worker already exists for this job.
    #[error("Job '{job}' already has an active worker (pid {pid}).\nCancel it first or wait for it to finish.")]
    JobAlreadyActive { job: String, pid: u32 },

    /// No progress record exists where one was required (e.g. for cancel).
    #[error("No job record found in '{dir}'")]
    NoJobRecord { dir: PathBuf },

    /// The record exists but carries no worker pid.
    #[error("Job record in '{dir}' has no worker pid to act on")]
    NoWorkerPid { dir: PathBuf },

    /// The recorded worker process no longer exists.
    #[error("Worker process {pid} no longer exists")]
    ProcessGone { pid: u32 },

    /// The worker binary could not be spawned.
    #[error("Failed to spawn extraction worker '{program}': {source}")]
    WorkerSpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker exited non-zero without reaching a completed record.
    #[error("Extraction worker exited with code {code}: {message}")]
    WorkerFailed { code: i32, message: String },

    // ── OCR engine errors ─────────────────────────────────────────────────
    /// No OCR engine command is configured.
    #[error(
        "No OCR engine configured.\n\
         Set BOOKMILL_OCR_CMD to the extraction command, e.g.:\n\
         export BOOKMILL_OCR_CMD=\"marker_single\""
    )]
    EngineNotConfigured,

    /// The OCR engine process failed.
    #[error("OCR engine failed: {detail}")]
    EngineFailed { detail: String },

    /// The engine exited cleanly but left no primary text artifact.
    #[error("OCR engine produced no markdown artifact in '{dir}'")]
    ArtifactMissing { dir: PathBuf },

    // ── Transform errors ──────────────────────────────────────────────────
    /// The language-model service rejected or failed the call terminally.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A translation for the same job × language is already running here.
    #[error("Translation '{job}' is already running in this process")]
    TranslationAlreadyActive { job: String },

    /// The job was cancelled cooperatively. Checkpoints are preserved.
    #[error("Job '{job}' was cancelled")]
    Cancelled { job: String },

    /// A unit was marked complete but its checkpoint file is unreadable.
    ///
    /// The progress record and remaining checkpoints are discarded; the job
    /// must restart from unit 0 rather than merge a truncated document.
    #[error("Checkpoint for unit {index} is missing or unreadable at '{path}' — translation state discarded, restart required")]
    CheckpointCorrupted { index: usize, path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read an input document.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the external language-model service.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// HTTP 429 — caller should back off.
    #[error("LLM service rate limit exceeded")]
    RateLimited,

    /// The service rejected the request because the input was too large.
    #[error("LLM context length exceeded: {detail}")]
    ContextLength { detail: String },

    /// Any other non-success response.
    #[error("LLM API error (HTTP {status}): {detail}")]
    Api { status: u16, detail: String },

    /// Transport-level failure.
    #[error("LLM request failed: {0}")]
    Network(String),

    /// Response body did not match the expected shape.
    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether this error indicates the input exceeded the model's context.
    ///
    /// Providers are inconsistent about how they report this — some return a
    /// dedicated code, others a generic 400 with a prose message — so the
    /// detail text is also scanned for the usual phrasing.
    pub fn exceeds_context(&self) -> bool {
        match self {
            LlmError::ContextLength { .. } => true,
            LlmError::Api { detail, .. } => {
                let d = detail.to_lowercase();
                ["token", "length", "too long", "context", "maximum"]
                    .iter()
                    .any(|kw| d.contains(kw))
            }
            _ => false,
        }
    }
}

/// A non-fatal error for a single content unit.
///
/// Logged by the Transform Runner; the job proceeds to the next unit (or
/// degrade-accepts the last output) instead of failing wholesale.
#[derive(Debug, Clone, Error)]
pub enum UnitError {
    /// Validation kept failing; the last output was accepted anyway.
    #[error("Unit {index}: validation failed {attempts} times, accepting last output")]
    ValidationExhausted { index: usize, attempts: u32 },

    /// The unit was truncated to fit the model context.
    #[error("Unit {index}: input truncated to {chars} chars after context-length rejection")]
    Truncated { index: usize, chars: usize },
}
