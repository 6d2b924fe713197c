//! Text-to-speech interface boundary.
//!
//! The synthesis engine itself is an external collaborator; the core's only
//! responsibilities here are the call seam ([`SpeechClient`]) and artifact
//! validation. Synthesis backends occasionally emit empty or truncated audio
//! (interrupted request, quota error rendered as a 0-byte body); treating
//! any artifact under [`MIN_AUDIO_BYTES`] as invalid — and deleting it so
//! the next request regenerates — keeps those from being served as
//! "cached" audio forever.

use crate::error::BookmillError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Smallest plausible audio artifact. Anything below this is a failed
/// synthesis, not a short one — even a one-word clip exceeds 1 KiB in any
/// real codec.
pub const MIN_AUDIO_BYTES: u64 = 1024;

/// The external text-to-speech engine.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// Synthesize `text` with the given voice into `output`.
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        output: &Path,
    ) -> Result<(), BookmillError>;
}

/// Return the cached audio artifact at `path` if it exists and is valid.
///
/// An undersized artifact is deleted on sight so it becomes eligible for
/// regeneration instead of masquerading as a cache hit.
pub fn cached_audio(path: &Path) -> Option<PathBuf> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > MIN_AUDIO_BYTES {
        return Some(path.to_path_buf());
    }

    warn!(
        "Removing invalid audio artifact ({} bytes): {}",
        meta.len(),
        path.display()
    );
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove invalid audio {}: {e}", path.display());
    }
    None
}

/// Delete an audio artifact (e.g. when its source chapter was regenerated).
/// Best-effort; errors are logged, never fatal.
pub fn remove_audio(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove audio {}: {e}", path.display());
        }
    }
}
