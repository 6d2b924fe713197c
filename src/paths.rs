//! Job directory layout and the path-length fallback.
//!
//! Every path a job reads or writes is derived here, in one place. That
//! matters for one subtle reason: when a computed path exceeds the platform
//! path-length ceiling it is deterministically shortened with a content hash
//! of the original name — and resume logic must land on the *same* shortened
//! path on the second run. Deriving paths in two call sites with two copies
//! of the shortening rule is how resumes silently miss their artifacts, so
//! the rule lives only in [`shorten_path`] / [`shorten_dir`].

use std::path::{Path, PathBuf};
use tracing::info;

/// Progress record file name, colocated with job output.
pub const PROGRESS_FILE: &str = ".extract_progress.json";

/// Full-path ceiling before a file name is hash-shortened.
///
/// 200 leaves headroom under the 260-char limit of the most restrictive
/// mainstream filesystem configuration once a suffix and separators are
/// appended downstream.
pub const MAX_PATH_LEN: usize = 200;

/// Full-path ceiling before a directory name is hash-shortened.
pub const MAX_DIR_LEN: usize = 240;

/// Kept prefix of an over-long file stem; the hash is appended after it.
const KEPT_STEM_CHARS: usize = 50;

fn hash_stem(stem: &str, hex_chars: usize) -> String {
    let hex = blake3::hash(stem.as_bytes()).to_hex().to_string();
    hex[..hex_chars].to_string()
}

/// Shorten a file path whose total length exceeds [`MAX_PATH_LEN`].
///
/// The stem is truncated to its first 50 characters plus an 8-character hash
/// of the full original stem; parent directory and extension are preserved.
/// Paths within the limit are returned unchanged, so this is safe to apply
/// unconditionally at every site that computes an output file path.
pub fn shorten_path(path: &Path) -> PathBuf {
    if path.as_os_str().len() <= MAX_PATH_LEN {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let kept: String = stem.chars().take(KEPT_STEM_CHARS).collect();
    let short = parent.join(format!("{}_{}{}", kept, hash_stem(&stem, 8), suffix));
    info!(
        "Shortened over-long path: {:?} -> {:?}",
        path.file_name(),
        short.file_name()
    );
    short
}

/// Shorten a directory path whose total length exceeds [`MAX_DIR_LEN`].
///
/// The final component is replaced wholesale by a 12-character hash of the
/// original name. Applied when deriving job output directories so that the
/// supervisor, the worker, and any later resume all agree on the location.
pub fn shorten_dir(dir: &Path) -> PathBuf {
    if dir.as_os_str().len() <= MAX_DIR_LEN {
        return dir.to_path_buf();
    }

    let parent = dir.parent().unwrap_or_else(|| Path::new(""));
    let name = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let short = parent.join(hash_stem(&name, 12));
    info!("Shortened over-long directory: {:?} -> {:?}", name, short);
    short
}

/// The output directory for an extraction job, derived from the source file.
///
/// `books/foo/mybook.pdf` → `books/foo/mybook/`, hash-shortened if needed.
pub fn output_dir_for(source: &Path) -> PathBuf {
    let parent = source.parent().unwrap_or_else(|| Path::new(""));
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    shorten_dir(&parent.join(stem))
}

/// The primary markdown artifact path inside an extraction output directory.
pub fn artifact_path(output_dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    shorten_path(&output_dir.join(format!("{stem}.md")))
}

/// The target directory for a translation of the given extraction directory.
///
/// `books/foo/mybook/` + `zh` → `books/foo/mybook_zh/`.
pub fn translation_dir(extraction_dir: &Path, lang_code: &str) -> PathBuf {
    let parent = extraction_dir.parent().unwrap_or_else(|| Path::new(""));
    let name = extraction_dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    shorten_dir(&parent.join(format!("{name}_{lang_code}")))
}

/// Translation progress record path for a target language.
pub fn translation_progress_file(target_dir: &Path, lang_code: &str) -> PathBuf {
    target_dir.join(format!("translation_progress_{lang_code}.json"))
}

/// Checkpoint file path for one content unit.
pub fn unit_file(target_dir: &Path, index: usize) -> PathBuf {
    target_dir.join(format!("_unit_{index:03}.txt"))
}
