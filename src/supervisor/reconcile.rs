//! The Reconciliation Sweep: run at server startup and shutdown.
//!
//! A crash (or plain `kill -9` of the server) can leave job directories
//! claiming to be mid-extraction with nobody actually working on them, and
//! possibly with an orphaned worker still burning CPU. The sweep walks every
//! job directory and restores the invariant "an in-progress record implies a
//! live, supervised worker":
//!
//! * `extracting` / `splitting` records: kill the recorded process tree if
//!   it is still alive, delete the record, and delete the output directory
//!   when it holds no usable chapters.
//! * `extracted` records are **preserved** — the expensive OCR result is
//!   safely resumable work, not an orphan.
//! * Terminal records (`completed`, `error`, `cancelled`) are left alone.
//! * Unreadable or empty records with no recognisable status are removed.

use crate::paths::PROGRESS_FILE;
use crate::progress::{clear_record, read_record};
use crate::supervisor::process::{kill_tree, pid_alive};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Sweep all job directories under `root` (layout: `root/<book>/<job dir>`).
///
/// Returns the number of stale in-progress jobs cleaned up.
pub async fn sweep(root: &Path, kill_grace: Duration) -> usize {
    let mut cleaned = 0;

    let Ok(books) = std::fs::read_dir(root) else {
        return 0;
    };

    for book_entry in books.flatten() {
        let book_dir = book_entry.path();
        if !book_dir.is_dir() {
            continue;
        }

        let Ok(subdirs) = std::fs::read_dir(&book_dir) else {
            continue;
        };

        for sub_entry in subdirs.flatten() {
            let job_dir = sub_entry.path();
            if !job_dir.is_dir() || !job_dir.join(PROGRESS_FILE).exists() {
                continue;
            }

            let Some(record) = read_record(&job_dir) else {
                // Empty or corrupt record with no owner: remove it.
                info!("Removing unreadable job record in {}", job_dir.display());
                clear_record(&job_dir);
                continue;
            };

            if !record.status.is_in_progress() {
                // Terminal records and resumable `extracted` work survive.
                continue;
            }

            info!(
                "Found stale in-progress job in {} (status {})",
                job_dir.display(),
                record.status
            );

            if let Some(pid) = record.pid {
                if pid_alive(pid) {
                    info!("Killing orphaned worker pid {pid}");
                    if let Err(e) = kill_tree(pid, kill_grace).await {
                        warn!("Failed to kill orphaned worker {pid}: {e}");
                    }
                }
            }

            clear_record(&job_dir);

            if markdown_count(&job_dir) <= 1 {
                // Nothing beyond (at most) the untouched intermediate
                // artifact: the directory is unrecoverable partial output.
                info!("Removing incomplete output dir {}", job_dir.display());
                if let Err(e) = std::fs::remove_dir_all(&job_dir) {
                    warn!("Failed to remove output dir {}: {e}", job_dir.display());
                }
            }

            cleaned += 1;
        }
    }

    if cleaned > 0 {
        info!("Reconciliation sweep cleaned {cleaned} stale job(s)");
    }
    cleaned
}

/// Number of markdown files in a job directory — the "usable chapters"
/// heuristic. One file is just the intermediate artifact; two or more means
/// split chapters exist and the directory is worth keeping.
fn markdown_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    let name = e.file_name();
                    let name = name.to_string_lossy();
                    !name.starts_with('.') && name.ends_with(".md")
                })
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{write_record, write_record_with_artifact, JobStatus};
    use tempfile::TempDir;

    const DEAD_PID: u32 = u32::MAX - 7;

    fn job_dir(root: &Path, book: &str, job: &str) -> std::path::PathBuf {
        let dir = root.join(book).join(job);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn removes_stale_extracting_job() {
        let root = TempDir::new().unwrap();
        let dir = job_dir(root.path(), "book-a", "doc");
        write_record(
            &dir,
            JobStatus::Extracting,
            40,
            "Recognizing Text: 10/50",
            None,
            Some(DEAD_PID),
        );

        let cleaned = sweep(root.path(), Duration::from_millis(100)).await;
        assert_eq!(cleaned, 1);
        assert!(!dir.exists(), "incomplete output dir should be removed");
    }

    #[tokio::test]
    async fn preserves_extracted_resume_state() {
        let root = TempDir::new().unwrap();
        let dir = job_dir(root.path(), "book-b", "doc");
        let artifact = dir.join("doc.md");
        std::fs::write(&artifact, "# Chapter\ncontent").unwrap();
        write_record_with_artifact(
            &dir,
            JobStatus::Extracted,
            80,
            "PDF extraction completed",
            None,
            Some(DEAD_PID),
            &artifact,
        );

        let cleaned = sweep(root.path(), Duration::from_millis(100)).await;
        assert_eq!(cleaned, 0);
        assert!(artifact.exists(), "intermediate artifact must survive");
        assert!(read_record(&dir).is_some(), "record must survive");
    }

    #[tokio::test]
    async fn keeps_directories_with_chapters() {
        let root = TempDir::new().unwrap();
        let dir = job_dir(root.path(), "book-c", "doc");
        std::fs::write(dir.join("doc.md"), "source").unwrap();
        std::fs::write(dir.join("01_Intro.md"), "ch").unwrap();
        std::fs::write(dir.join("02_Body.md"), "ch").unwrap();
        write_record(&dir, JobStatus::Splitting, 85, "Splitting", None, Some(DEAD_PID));

        let cleaned = sweep(root.path(), Duration::from_millis(100)).await;
        assert_eq!(cleaned, 1);
        assert!(dir.exists(), "dir with chapters is kept");
        assert!(read_record(&dir).is_none(), "stale record still removed");
    }

    #[tokio::test]
    async fn removes_unreadable_record() {
        let root = TempDir::new().unwrap();
        let dir = job_dir(root.path(), "book-d", "doc");
        std::fs::write(dir.join(PROGRESS_FILE), "").unwrap();

        sweep(root.path(), Duration::from_millis(100)).await;
        assert!(!dir.join(PROGRESS_FILE).exists());
    }

    #[tokio::test]
    async fn leaves_terminal_records_alone() {
        let root = TempDir::new().unwrap();
        let dir = job_dir(root.path(), "book-e", "doc");
        write_record(&dir, JobStatus::Completed, 100, "done", None, None);

        let cleaned = sweep(root.path(), Duration::from_millis(100)).await;
        assert_eq!(cleaned, 0);
        assert!(read_record(&dir).is_some());
    }
}
