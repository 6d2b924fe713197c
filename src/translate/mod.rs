//! The Transform Runner: chunked, resumable, cancellable translation.
//!
//! ## Execution model
//!
//! Units are processed **strictly sequentially** — never two at once. Later
//! units benefit from terminology the model has already settled into, and
//! more importantly the checkpoint written after each unit is the unit of
//! resumption: sequential order means "resume" is exactly "skip the indices
//! in `completed_unit_ids`".
//!
//! ## Cancellation
//!
//! Cooperative, via a process-wide flag map keyed by job id with explicit
//! set / check / clear operations ([`TranslationEngine::request_cancel`]).
//! The flag is checked at two points: before starting each unit, and between
//! tokens while consuming the model's incremental output stream. An
//! in-flight call is never aborted preemptively; checkpoints already written
//! always survive.
//!
//! ## Degrade-and-continue
//!
//! When a unit's output fails validation `max_retries + 1` times, the last
//! output is accepted anyway and the degradation logged. This is a
//! deliberate availability-over-correctness tradeoff: one stubborn unit must
//! not strand a multi-hour job.

pub mod checkpoint;
pub mod validate;

use crate::config::TranslateConfig;
use crate::error::{BookmillError, UnitError};
use crate::images;
use crate::lang::{detect_language, Lang};
use crate::llm::{ChatClient, ChatOptions};
use crate::paths::{self, unit_file};
use crate::prompts::{domain_detection_prompt, translation_system_prompt, translation_user_prompt};
use crate::segment::{segment, UNIT_SEPARATOR};
use crate::split;
use checkpoint::{
    cleanup_units, clear_progress, load_progress, load_unit, save_progress, save_unit,
    TranslationProgress,
};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use validate::validate_output;

pub use checkpoint::progress_percent;

/// Receives coarse progress updates while a document translates.
///
/// All methods have default no-op implementations, in the same spirit as the
/// extraction supervisor's callback: callers forward updates to whatever
/// channel their application uses without the library knowing about it.
pub trait TranslateProgressCallback: Send + Sync {
    fn on_progress(&self, percent: u8, message: &str) {
        let _ = (percent, message);
    }
}

/// Default no-op callback.
pub struct NoopTranslateProgress;

impl TranslateProgressCallback for NoopTranslateProgress {}

/// Rescales an inner callback into a sub-range of the overall job, so the
/// unit loop can report 0–100 while the document-level flow maps that into
/// its own 3–85 band (the remainder covers image fixing and splitting).
struct ScaledProgress<'a> {
    inner: &'a dyn TranslateProgressCallback,
    base: u8,
    span: u8,
}

impl TranslateProgressCallback for ScaledProgress<'_> {
    fn on_progress(&self, percent: u8, message: &str) {
        let scaled = self.base as u16 + (percent as u16 * self.span as u16) / 100;
        self.inner.on_progress(scaled.min(100) as u8, message);
    }
}

/// Result of a whole-document translation.
#[derive(Debug)]
pub struct TranslationOutput {
    /// The assembled translated document.
    pub document: PathBuf,
    /// Chapters produced by the final split step (0 when the source was
    /// already in the target language).
    pub chapters: usize,
}

/// Drives content units through the external transform with per-unit
/// checkpointing. One engine instance serves the whole process; per-job
/// state lives in the flag maps, keyed by job id.
pub struct TranslationEngine {
    client: Arc<dyn ChatClient>,
    /// Model label recorded in progress records (resume diagnostics only —
    /// the client already knows what it talks to).
    model: String,
    config: TranslateConfig,
    cancelled: Arc<Mutex<HashSet<String>>>,
    active: Arc<Mutex<HashSet<String>>>,
}

/// Releases the per-job "active" slot on every exit path.
struct ActiveGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.key);
    }
}

impl TranslationEngine {
    pub fn new(client: Arc<dyn ChatClient>, model: impl Into<String>, config: TranslateConfig) -> Self {
        Self {
            client,
            model: model.into(),
            config,
            cancelled: Arc::new(Mutex::new(HashSet::new())),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    // ── Cancellation flags ───────────────────────────────────────────────

    /// Request cooperative cancellation of the given job.
    pub fn request_cancel(&self, job_id: &str) {
        info!("Cancellation requested for job '{job_id}'");
        self.cancelled.lock().unwrap().insert(job_id.to_string());
    }

    /// Whether cancellation has been requested for the given job.
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.cancelled.lock().unwrap().contains(job_id)
    }

    /// Clear the cancellation flag (called when a new run starts).
    pub fn clear_cancel(&self, job_id: &str) {
        self.cancelled.lock().unwrap().remove(job_id);
    }

    // ── Domain detection ─────────────────────────────────────────────────

    /// Detect the document's content domain with a single-shot model call.
    ///
    /// Failures fall back to `"general"` — a missing domain hint degrades
    /// terminology quality, which is not worth failing a job over.
    pub async fn detect_domain(&self, content: &str) -> String {
        info!("Detecting document domain...");
        let sample = truncate_at_boundary(content, self.config.domain_sample_chars);
        let prompt = domain_detection_prompt(sample);
        let options = ChatOptions {
            temperature: self.config.temperature,
            max_tokens: Some(64),
        };

        match self.client.complete("", &prompt, &options).await {
            Ok(response) => {
                let domain = response
                    .trim()
                    .trim_matches(|c| c == '"' || c == '\'')
                    .to_lowercase();
                info!("Detected domain: {domain}");
                if domain.is_empty() {
                    "general".to_string()
                } else {
                    domain
                }
            }
            Err(e) => {
                warn!("Domain detection failed, using 'general': {e}");
                "general".to_string()
            }
        }
    }

    // ── Whole-document flow ──────────────────────────────────────────────

    /// Translate a markdown document into `target_dir`, then rewrite image
    /// references, carry over the `images/` assets, and split the result
    /// into chapters.
    ///
    /// Resumable: re-invoking after an interruption reuses every checkpointed
    /// unit and the cached domain. Exactly one translation per
    /// (job × language) may run at a time in this process.
    pub async fn translate_document(
        &self,
        source_md: &Path,
        target_dir: &Path,
        target: Lang,
        job_id: &str,
        callback: &dyn TranslateProgressCallback,
    ) -> Result<TranslationOutput, BookmillError> {
        let key = format!("{job_id}:{}", target.code());
        if !self.active.lock().unwrap().insert(key.clone()) {
            return Err(BookmillError::TranslationAlreadyActive { job: key });
        }
        let _guard = ActiveGuard {
            set: Arc::clone(&self.active),
            key,
        };

        info!("Starting translation: {} -> {}", source_md.display(), target.code());
        let content =
            std::fs::read_to_string(source_md).map_err(|e| BookmillError::ReadFailed {
                path: source_md.to_path_buf(),
                source: e,
            })?;

        let source = detect_language(&content);
        info!("Source language: {}", source.code());
        if source == target {
            info!("Source already in target language, skipping");
            return Ok(TranslationOutput {
                document: source_md.to_path_buf(),
                chapters: 0,
            });
        }

        std::fs::create_dir_all(target_dir).map_err(|e| BookmillError::OutputWriteFailed {
            path: target_dir.to_path_buf(),
            source: e,
        })?;

        // Domain: cached from an interrupted run when available, otherwise
        // one detection call.
        let domain = match load_progress(target_dir, target).map(|p| p.domain) {
            Some(d) if !d.is_empty() => {
                info!("Using saved domain: {d}");
                callback.on_progress(2, &format!("Using saved domain: {d}"));
                d
            }
            _ => {
                callback.on_progress(1, "Detecting document domain...");
                self.detect_domain(&content).await
            }
        };

        callback.on_progress(3, "Starting translation...");
        let scaled = ScaledProgress {
            inner: callback,
            base: 3,
            span: 82,
        };
        let translated = self
            .translate_content(&content, source, target, &domain, target_dir, job_id, &scaled)
            .await?;

        // Assemble the output document next to its checkpoints.
        let stem = source_md
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target_path = paths::shorten_path(
            &target_dir.join(format!("{stem}_{}.md", target.code())),
        );
        std::fs::write(&target_path, &translated).map_err(|e| BookmillError::OutputWriteFailed {
            path: target_path.clone(),
            source: e,
        })?;
        info!("Saved translated document: {}", target_path.display());

        callback.on_progress(85, "Fixing image paths...");
        images::rewrite_image_paths(&target_path, "images")?;

        // Carry the extraction's image assets across so relative references
        // resolve in the translated tree too.
        if let Some(source_dir) = source_md.parent() {
            let source_images = source_dir.join("images");
            let target_images = target_dir.join("images");
            if source_images.is_dir() && !target_images.exists() {
                copy_dir(&source_images, &target_images)?;
            }
        }

        callback.on_progress(90, "Splitting chapters...");
        let chapters = split::split_document(&target_path, target_dir)?;

        callback.on_progress(100, &format!("Translation completed. Generated {chapters} chapters."));
        info!("Translation completed, {chapters} chapters created");

        Ok(TranslationOutput {
            document: target_path,
            chapters,
        })
    }

    // ── Unit loop ────────────────────────────────────────────────────────

    /// Translate `content` unit by unit with per-unit checkpointing, and
    /// return the merged document.
    ///
    /// See the module docs for the resume, cancellation, and
    /// degrade-and-continue semantics.
    pub async fn translate_content(
        &self,
        content: &str,
        source: Lang,
        target: Lang,
        domain: &str,
        target_dir: &Path,
        job_id: &str,
        callback: &dyn TranslateProgressCallback,
    ) -> Result<String, BookmillError> {
        self.clear_cancel(job_id);

        if source == target {
            return Ok(content.to_string());
        }

        let units = segment(content, self.config.max_unit_chars);
        let total = units.len();
        info!(
            "Translating {total} units from {} to {}",
            source.code(),
            target.code()
        );

        // Resume only when the stored segmentation still matches; a changed
        // unit count means the indices no longer line up with the content.
        let mut progress = match load_progress(target_dir, target) {
            Some(p) if p.total_units == total => {
                if !p.completed_unit_ids.is_empty() {
                    info!(
                        "Resuming: {}/{} units done",
                        p.completed_unit_ids.len(),
                        total
                    );
                }
                p
            }
            Some(p) => {
                warn!(
                    "Stored unit count {} != recomputed {total}; discarding and restarting",
                    p.total_units
                );
                clear_progress(target_dir, target);
                cleanup_units(target_dir, p.total_units.max(total));
                TranslationProgress::new(total, domain, &self.model, source, target)
            }
            None => TranslationProgress::new(total, domain, &self.model, source, target),
        };

        let effective_domain = if progress.domain.is_empty() {
            domain.to_string()
        } else {
            progress.domain.clone()
        };

        for (i, unit) in units.iter().enumerate() {
            if progress.completed_unit_ids.contains(&i) {
                continue;
            }
            if self.is_cancelled(job_id) {
                info!("Cancelled before unit {}/{total}", i + 1);
                save_progress(target_dir, target, &progress);
                return Err(BookmillError::Cancelled {
                    job: job_id.to_string(),
                });
            }

            callback.on_progress(
                ((i * 100) / total) as u8,
                &format!("Translating... ({}/{total})", i + 1),
            );

            let output = match self
                .transform_unit(unit, i, source, target, &effective_domain, job_id)
                .await
            {
                Ok(out) => out,
                Err(e @ BookmillError::Cancelled { .. }) => {
                    info!("Cancelled during unit {}/{total}", i + 1);
                    save_progress(target_dir, target, &progress);
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            save_unit(target_dir, i, &output).map_err(|e| BookmillError::OutputWriteFailed {
                path: unit_file(target_dir, i),
                source: e,
            })?;
            progress.completed_unit_ids.insert(i);
            save_progress(target_dir, target, &progress);
        }

        info!("All {total} units completed, merging...");
        self.merge_units(target_dir, target, total, callback)
    }

    /// Concatenate unit checkpoints in index order and clear all state.
    ///
    /// A unit file missing despite being marked complete is corruption: the
    /// record and remaining checkpoints are discarded so the next run starts
    /// from unit 0, rather than silently producing a truncated document.
    fn merge_units(
        &self,
        target_dir: &Path,
        target: Lang,
        total: usize,
        callback: &dyn TranslateProgressCallback,
    ) -> Result<String, BookmillError> {
        let mut parts: Vec<String> = Vec::with_capacity(total);
        for i in 0..total {
            match load_unit(target_dir, i) {
                Some(content) => parts.push(content),
                None => {
                    error!("Unit {i} marked complete but its checkpoint is unreadable; discarding translation state");
                    clear_progress(target_dir, target);
                    cleanup_units(target_dir, total);
                    return Err(BookmillError::CheckpointCorrupted {
                        index: i,
                        path: unit_file(target_dir, i),
                    });
                }
            }
        }

        let merged = parts.join(UNIT_SEPARATOR);
        cleanup_units(target_dir, total);
        clear_progress(target_dir, target);
        callback.on_progress(100, "Translation completed");
        Ok(merged)
    }

    /// Run one unit through the transform with validation, bounded retries,
    /// one-shot truncation on context overflow, and degrade-accept.
    async fn transform_unit(
        &self,
        unit: &str,
        index: usize,
        source: Lang,
        target: Lang,
        domain: &str,
        job_id: &str,
    ) -> Result<String, BookmillError> {
        let system = translation_system_prompt(domain, source, target);
        let options = ChatOptions {
            temperature: self.config.temperature,
            max_tokens: None,
        };

        let mut input = unit;
        let mut truncated = false;
        let mut last_output = String::new();
        let mut attempt: u32 = 0;

        while attempt <= self.config.max_retries {
            let user = translation_user_prompt(source, target, input);

            match self.stream_once(&system, &user, &options, job_id).await {
                Ok(output) => {
                    if validate_output(&output, target) {
                        return Ok(output);
                    }
                    warn!("Unit {} validation failed, attempt {}", index + 1, attempt + 1);
                    last_output = output;
                    attempt += 1;
                }
                Err(e @ BookmillError::Cancelled { .. }) => return Err(e),
                Err(BookmillError::Llm(e)) if e.exceeds_context() && !truncated => {
                    // Resource exhaustion: shrink once and retry without
                    // consuming a validation attempt.
                    let degraded = UnitError::Truncated {
                        index,
                        chars: self.config.truncate_chars,
                    };
                    warn!("{degraded}");
                    input = truncate_at_boundary(unit, self.config.truncate_chars);
                    truncated = true;
                }
                Err(BookmillError::Llm(e)) if e.exceeds_context() => {
                    // Still too large after the one-shot truncation: terminal.
                    return Err(BookmillError::Llm(e));
                }
                Err(BookmillError::Llm(e)) => {
                    warn!("Unit {} transform failed (attempt {}): {e}", index + 1, attempt + 1);
                    if attempt >= self.config.max_retries {
                        return Err(BookmillError::Llm(e));
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        // Retry budget exhausted on validation failures: accept the best
        // available output and move on.
        let degraded = UnitError::ValidationExhausted {
            index,
            attempts: attempt,
        };
        error!("{degraded}");
        Ok(last_output)
    }

    /// One streaming call, assembled into a full response.
    ///
    /// The incremental stream is consumed token by token — not because the
    /// tokens are needed separately, but so a cancellation raised mid-call
    /// takes effect at the next token instead of after the full response.
    async fn stream_once(
        &self,
        system: &str,
        user: &str,
        options: &ChatOptions,
        job_id: &str,
    ) -> Result<String, BookmillError> {
        let mut stream = self
            .client
            .complete_stream(system, user, options)
            .await
            .map_err(BookmillError::Llm)?;

        let mut output = String::new();
        while let Some(item) = stream.next().await {
            if self.is_cancelled(job_id) {
                return Err(BookmillError::Cancelled {
                    job: job_id.to_string(),
                });
            }
            output.push_str(&item.map_err(BookmillError::Llm)?);
        }
        Ok(output)
    }
}

/// Language availability for one extraction: the artifact's source language
/// plus which target languages have completed or in-flight translations.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageInfo {
    pub source_lang: Lang,
    /// Languages with readable chapters (the source language always counts).
    pub available: Vec<Lang>,
    /// In-flight translation progress per language, 0–100.
    pub in_flight: Vec<(Lang, u8)>,
}

/// Inspect an extraction's artifact and its sibling translation directories.
pub fn language_info(artifact: &Path) -> Result<LanguageInfo, BookmillError> {
    let content = std::fs::read_to_string(artifact).map_err(|e| BookmillError::ReadFailed {
        path: artifact.to_path_buf(),
        source: e,
    })?;
    let source_lang = detect_language(truncate_at_boundary(&content, 2000));

    let extraction_dir = artifact.parent().unwrap_or_else(|| Path::new(""));
    let mut available = vec![source_lang];
    let mut in_flight = Vec::new();

    for lang in [Lang::Zh, Lang::En] {
        if lang == source_lang {
            continue;
        }
        let dir = paths::translation_dir(extraction_dir, lang.code());
        if split::count_chapters(&dir) > 0 {
            available.push(lang);
        }
        let percent = progress_percent(&dir, lang);
        if percent > 0 {
            in_flight.push((lang, percent));
        }
    }

    Ok(LanguageInfo {
        source_lang,
        available,
        in_flight,
    })
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Recursively copy a directory (used to carry `images/` into the
/// translation tree).
fn copy_dir(from: &Path, to: &Path) -> Result<(), BookmillError> {
    std::fs::create_dir_all(to).map_err(|e| BookmillError::OutputWriteFailed {
        path: to.to_path_buf(),
        source: e,
    })?;
    let entries = std::fs::read_dir(from).map_err(|e| BookmillError::ReadFailed {
        path: from.to_path_buf(),
        source: e,
    })?;
    for entry in entries.flatten() {
        let src = entry.path();
        let dst = to.join(entry.file_name());
        if src.is_dir() {
            copy_dir(&src, &dst)?;
        } else {
            std::fs::copy(&src, &dst).map_err(|e| BookmillError::OutputWriteFailed {
                path: dst.clone(),
                source: e,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "好好好好好"; // 3 bytes each
        let t = truncate_at_boundary(s, 7);
        assert_eq!(t, "好好");
        assert_eq!(truncate_at_boundary("abc", 10), "abc");
        assert_eq!(truncate_at_boundary("abcdef", 3), "abc");
    }

    #[test]
    fn language_info_reports_translations() {
        let dir = tempfile::TempDir::new().unwrap();
        let extraction = dir.path().join("mybook");
        std::fs::create_dir_all(&extraction).unwrap();
        let artifact = extraction.join("mybook.md");
        std::fs::write(&artifact, "# Title\n\nAn English book about systems.").unwrap();

        // Completed Chinese translation: chapters exist.
        let zh_dir = dir.path().join("mybook_zh");
        std::fs::create_dir_all(&zh_dir).unwrap();
        std::fs::write(zh_dir.join("01_标题.md"), "# 标题").unwrap();

        // And a (fictional) half-done run left a record behind too.
        let mut half = TranslationProgress::new(2, "general", "m", Lang::En, Lang::Zh);
        half.completed_unit_ids.insert(0);
        save_progress(&zh_dir, Lang::Zh, &half);

        let info = language_info(&artifact).unwrap();
        assert_eq!(info.source_lang, Lang::En);
        assert!(info.available.contains(&Lang::En));
        assert!(info.available.contains(&Lang::Zh));
        assert_eq!(info.in_flight, vec![(Lang::Zh, 50)]);
    }

    #[test]
    fn scaled_progress_maps_band() {
        struct Capture(std::sync::Mutex<Vec<u8>>);
        impl TranslateProgressCallback for Capture {
            fn on_progress(&self, percent: u8, _message: &str) {
                self.0.lock().unwrap().push(percent);
            }
        }

        let capture = Capture(std::sync::Mutex::new(Vec::new()));
        let scaled = ScaledProgress {
            inner: &capture,
            base: 3,
            span: 82,
        };
        scaled.on_progress(0, "a");
        scaled.on_progress(50, "b");
        scaled.on_progress(100, "c");

        let seen = capture.0.lock().unwrap();
        assert_eq!(*seen, vec![3, 44, 85]);
    }
}
