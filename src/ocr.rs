//! External OCR engine invocation.
//!
//! The extraction engine is an external collaborator: a command invoked with
//! the source file and the output directory, expected to leave a primary
//! markdown artifact (plus image assets) in that directory and to print
//! stage/percentage progress lines while it runs. The worker taps those
//! lines (split on both `\n` and `\r` — progress bars redraw with carriage
//! returns) and feeds them to the caller, which typically routes them
//! through [`crate::supervisor::stage::StageParser`] into the Progress
//! Store.

use crate::error::BookmillError;
use crate::paths;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Environment variable naming the engine command (program plus any fixed
/// leading arguments, whitespace-separated). The source path and output
/// directory are appended per invocation.
pub const OCR_CMD_ENV: &str = "BOOKMILL_OCR_CMD";

/// A configured OCR engine command.
#[derive(Debug, Clone)]
pub struct OcrEngine {
    program: String,
    args: Vec<String>,
}

impl OcrEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Configure from [`OCR_CMD_ENV`].
    pub fn from_env() -> Result<Self, BookmillError> {
        let raw = std::env::var(OCR_CMD_ENV).unwrap_or_default();
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(BookmillError::EngineNotConfigured)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Run the engine for `source` into `output_dir`, feeding each stderr
    /// line to `on_line`, and return the primary markdown artifact it left.
    pub async fn run(
        &self,
        source: &Path,
        output_dir: &Path,
        mut on_line: impl FnMut(&str),
    ) -> Result<PathBuf, BookmillError> {
        info!("Running OCR engine: {} {:?}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(source)
            .arg(output_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BookmillError::EngineFailed {
                detail: format!("failed to spawn '{}': {e}", self.program),
            })?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BookmillError::Internal("engine stderr not captured".into()))?;

        // Progress lines arrive as a byte stream that respects neither line
        // nor UTF-8 boundaries; carry partial lines between reads and split
        // on both newline and carriage return.
        let mut carry = String::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stderr
                .read(&mut chunk)
                .await
                .map_err(|e| BookmillError::EngineFailed {
                    detail: format!("engine output read failed: {e}"),
                })?;
            if n == 0 {
                break;
            }
            carry.push_str(&String::from_utf8_lossy(&chunk[..n]));

            while let Some(pos) = carry.find(['\n', '\r']) {
                let line: String = carry.drain(..=pos).collect();
                let line = line.trim_end_matches(['\n', '\r']);
                if !line.trim().is_empty() {
                    on_line(line);
                }
            }
        }
        if !carry.trim().is_empty() {
            on_line(carry.trim_end());
        }

        let status = child.wait().await.map_err(|e| BookmillError::EngineFailed {
            detail: format!("engine wait failed: {e}"),
        })?;
        if !status.success() {
            return Err(BookmillError::EngineFailed {
                detail: format!("engine exited with code {:?}", status.code()),
            });
        }

        find_artifact(output_dir, source)
    }
}

/// Locate the primary markdown artifact the engine left in `output_dir`.
///
/// Checks the expected `<stem>.md` (including its hash-shortened form)
/// first, then falls back to any non-chapter markdown file.
pub fn find_artifact(output_dir: &Path, source: &Path) -> Result<PathBuf, BookmillError> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let plain = output_dir.join(format!("{stem}.md"));
    if plain.exists() {
        return Ok(plain);
    }
    let shortened = paths::artifact_path(output_dir, source);
    if shortened.exists() {
        return Ok(shortened);
    }

    // Engines occasionally name the output after their own conventions;
    // accept any markdown file that is not a split chapter.
    let entries = std::fs::read_dir(output_dir).map_err(|e| BookmillError::ReadFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if path.is_file()
            && name.ends_with(".md")
            && !name.starts_with('.')
            && !is_chapter_name(&name)
        {
            debug!("Using engine artifact {}", path.display());
            return Ok(path);
        }
    }

    Err(BookmillError::ArtifactMissing {
        dir: output_dir.to_path_buf(),
    })
}

fn is_chapter_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 3 && bytes[0].is_ascii_digit() && bytes[1].is_ascii_digit() && bytes[2] == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn find_artifact_prefers_expected_stem() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("book.md"), "a").unwrap();
        std::fs::write(dir.path().join("other.md"), "b").unwrap();

        let found = find_artifact(dir.path(), Path::new("/x/book.pdf")).unwrap();
        assert_eq!(found, dir.path().join("book.md"));
    }

    #[test]
    fn find_artifact_falls_back_to_any_markdown() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("output.md"), "a").unwrap();
        std::fs::write(dir.path().join("01_Chapter.md"), "ch").unwrap();

        let found = find_artifact(dir.path(), Path::new("/x/book.pdf")).unwrap();
        assert_eq!(found, dir.path().join("output.md"));
    }

    #[test]
    fn find_artifact_reports_missing() {
        let dir = TempDir::new().unwrap();
        let err = find_artifact(dir.path(), Path::new("/x/book.pdf"));
        assert!(matches!(err, Err(BookmillError::ArtifactMissing { .. })));
    }

    #[test]
    fn from_env_requires_command() {
        // Temporarily clear the variable for this check.
        std::env::remove_var(OCR_CMD_ENV);
        assert!(matches!(
            OcrEngine::from_env(),
            Err(BookmillError::EngineNotConfigured)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_captures_lines_and_finds_artifact() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF").unwrap();

        // A stand-in engine: prints progress to stderr and writes book.md.
        let engine = OcrEngine::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo 'Recognizing Layout: 50%|#####| 25/50' >&2; printf '# T\\nbody\\n' > \"$2/book.md\"".to_string(),
                "engine".to_string(),
            ],
        );

        let mut lines = Vec::new();
        let artifact = engine
            .run(&source, dir.path(), |line| lines.push(line.to_string()))
            .await
            .unwrap();

        assert_eq!(artifact, dir.path().join("book.md"));
        assert!(lines.iter().any(|l| l.contains("Recognizing Layout")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_surfaces_engine_failure() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.pdf");
        std::fs::write(&source, b"%PDF").unwrap();

        let engine = OcrEngine::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
        let err = engine.run(&source, dir.path(), |_| {}).await;
        assert!(matches!(err, Err(BookmillError::EngineFailed { .. })));
    }
}
