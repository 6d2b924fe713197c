//! The extraction worker's run loop.
//!
//! This is the code the `bookmill-worker` binary executes in its own OS
//! process: resume check, OCR engine invocation with progress relaying,
//! image-asset collection, chapter splitting, and the terminal record. It
//! lives in the library (rather than the binary) so the whole sequence is
//! unit-testable with a stand-in engine.
//!
//! ## Record ladder
//!
//! `extracting 0` → engine stages 25–85 → `extracted 85` (with the artifact
//! path, the resume point) → `splitting 90` → `completed 100`. Progress
//! never regresses within a run; a resumed run starts at the split step and
//! only writes 90 and 100.

use crate::error::BookmillError;
use crate::images;
use crate::ocr::OcrEngine;
use crate::paths;
use crate::progress::{read_record, write_record, write_record_with_artifact, JobStatus};
use crate::split;
use crate::supervisor::stage::StageParser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Run one extraction job to completion, writing Progress Records as the
/// supervisor (and any later resume) expects them.
///
/// On error the terminal `error` record is written before returning, so the
/// supervisor's final read always finds an explanation.
pub async fn run_worker(source: &Path, output_dir: &Path) -> Result<(), BookmillError> {
    match run_worker_inner(source, output_dir).await {
        Ok(()) => Ok(()),
        Err(e) => {
            write_record(
                output_dir,
                JobStatus::Error,
                0,
                &format!("Extraction failed: {e}"),
                Some("Error"),
                Some(std::process::id()),
            );
            Err(e)
        }
    }
}

async fn run_worker_inner(source: &Path, output_dir: &Path) -> Result<(), BookmillError> {
    let pid = std::process::id();
    info!("Worker starting: {} -> {}", source.display(), output_dir.display());

    if !source.exists() {
        return Err(BookmillError::SourceNotFound {
            path: source.to_path_buf(),
        });
    }
    std::fs::create_dir_all(output_dir).map_err(|e| BookmillError::OutputWriteFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    // Resume check: an `extracted` record with a live artifact means the
    // expensive OCR pass already happened — go straight to splitting.
    let artifact = match resumable_artifact(output_dir) {
        Some(artifact) => {
            info!("Resuming from split step, artifact: {}", artifact.display());
            artifact
        }
        None => extract_with_engine(source, output_dir, pid).await?,
    };

    let fixed = images::rewrite_image_paths(&artifact, "images")?;
    if fixed > 0 {
        info!("Fixed {fixed} image paths");
    }

    write_record(
        output_dir,
        JobStatus::Splitting,
        90,
        "Splitting into chapters...",
        Some("Splitting"),
        Some(pid),
    );
    let chapters = split::split_document(&artifact, output_dir)?;

    write_record(
        output_dir,
        JobStatus::Completed,
        100,
        &format!("Extraction completed! Created {chapters} chapters."),
        Some("Completed"),
        None,
    );
    info!("Worker done, created {chapters} chapters");
    Ok(())
}

/// The resume artifact from a prior run, when it still exists on disk.
fn resumable_artifact(output_dir: &Path) -> Option<PathBuf> {
    let record = read_record(output_dir)?;
    if record.status != JobStatus::Extracted {
        return None;
    }
    match record.resume_artifact {
        Some(artifact) if artifact.exists() => Some(artifact),
        Some(artifact) => {
            warn!(
                "Resume artifact {} missing; falling back to full extraction",
                artifact.display()
            );
            None
        }
        None => None,
    }
}

/// Run the OCR engine, relaying its stage progress into the Progress Store,
/// and normalise its output into the canonical artifact location.
async fn extract_with_engine(
    source: &Path,
    output_dir: &Path,
    pid: u32,
) -> Result<PathBuf, BookmillError> {
    // Never below the supervisor's initial 5: forwarded progress must not
    // regress within a run.
    write_record(
        output_dir,
        JobStatus::Extracting,
        5,
        "Starting extraction...",
        Some("Starting"),
        Some(pid),
    );

    let engine = OcrEngine::from_env()?;
    write_record(
        output_dir,
        JobStatus::Extracting,
        10,
        "Launching OCR engine...",
        Some("Loading Models"),
        Some(pid),
    );

    let mut parser = StageParser::new();
    let raw_artifact = engine
        .run(source, output_dir, |line| {
            if let Some(update) = parser.parse_line(line) {
                write_record(
                    output_dir,
                    JobStatus::Extracting,
                    update.percent,
                    &update.message(),
                    Some(update.stage),
                    Some(pid),
                );
            }
        })
        .await?;

    write_record(
        output_dir,
        JobStatus::Extracting,
        85,
        "Saving markdown output...",
        Some("Saving"),
        Some(pid),
    );

    // Canonical artifact location, including the path-length fallback — the
    // same derivation resume lookups use, so they find it again.
    let artifact = paths::artifact_path(output_dir, source);
    if raw_artifact != artifact {
        std::fs::rename(&raw_artifact, &artifact).map_err(|e| BookmillError::OutputWriteFailed {
            path: artifact.clone(),
            source: e,
        })?;
    }

    let moved = collect_image_assets(output_dir)?;
    if moved > 0 {
        info!("Collected {moved} image assets into images/");
    }

    write_record_with_artifact(
        output_dir,
        JobStatus::Extracted,
        85,
        &format!(
            "PDF extraction completed: {}",
            artifact.file_name().unwrap_or_default().to_string_lossy()
        ),
        Some("Extracted"),
        Some(pid),
        &artifact,
    );

    Ok(artifact)
}

/// Move engine-emitted image files from the directory root into `images/`,
/// the fixed location the markdown references point at after rewriting.
fn collect_image_assets(output_dir: &Path) -> Result<usize, BookmillError> {
    const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

    let entries = std::fs::read_dir(output_dir).map_err(|e| BookmillError::ReadFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let mut moved = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if !is_image {
            continue;
        }

        let images_dir = output_dir.join("images");
        std::fs::create_dir_all(&images_dir).map_err(|e| BookmillError::OutputWriteFailed {
            path: images_dir.clone(),
            source: e,
        })?;
        let dest = images_dir.join(entry.file_name());
        std::fs::rename(&path, &dest).map_err(|e| BookmillError::OutputWriteFailed {
            path: dest.clone(),
            source: e,
        })?;
        moved += 1;
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resumable_artifact_requires_extracted_status_and_file() {
        let dir = TempDir::new().unwrap();
        assert!(resumable_artifact(dir.path()).is_none());

        let artifact = dir.path().join("book.md");
        write_record_with_artifact(
            dir.path(),
            JobStatus::Extracted,
            85,
            "done",
            None,
            None,
            &artifact,
        );
        // Record says extracted but the file is gone.
        assert!(resumable_artifact(dir.path()).is_none());

        std::fs::write(&artifact, "# C").unwrap();
        assert_eq!(resumable_artifact(dir.path()), Some(artifact));
    }

    #[test]
    fn collect_moves_only_images() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("_page_1_f.jpeg"), b"img").unwrap();
        std::fs::write(dir.path().join("_page_2_f.PNG"), b"img").unwrap();
        std::fs::write(dir.path().join("book.md"), "text").unwrap();

        let moved = collect_image_assets(dir.path()).unwrap();
        assert_eq!(moved, 2);
        assert!(dir.path().join("images/_page_1_f.jpeg").exists());
        assert!(dir.path().join("images/_page_2_f.PNG").exists());
        assert!(dir.path().join("book.md").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_resumes_from_extracted_without_engine() {
        // No BOOKMILL_OCR_CMD configured: the run only succeeds because the
        // resume path never touches the engine.
        std::env::remove_var(crate::ocr::OCR_CMD_ENV);

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF").unwrap();
        let output_dir = dir.path().join("book");
        std::fs::create_dir_all(&output_dir).unwrap();

        let artifact = output_dir.join("book.md");
        std::fs::write(&artifact, "# One\nalpha\n\n# Two\nbeta").unwrap();
        write_record_with_artifact(
            &output_dir,
            JobStatus::Extracted,
            85,
            "PDF extraction completed",
            Some("Extracted"),
            None,
            &artifact,
        );

        run_worker(&source, &output_dir).await.unwrap();

        let record = read_record(&output_dir).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert!(output_dir.join("01_One.md").exists());
        assert!(output_dir.join("02_Two.md").exists());
    }

    #[tokio::test]
    async fn worker_failure_writes_error_record() {
        std::env::remove_var(crate::ocr::OCR_CMD_ENV);

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF").unwrap();
        let output_dir = dir.path().join("book");

        // No resume state and no engine configured: the worker must fail
        // and leave an error record behind.
        let err = run_worker(&source, &output_dir).await;
        assert!(err.is_err());
        let record = read_record(&output_dir).unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert!(record.message.contains("Extraction failed"));
    }
}
