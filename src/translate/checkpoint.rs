//! The Chunk Checkpoint Store: per-unit output files plus a lightweight
//! index of completed unit ids.
//!
//! ## Why one file per unit?
//!
//! The alternative — one big JSON carrying all translated content — rewrites
//! the entire accumulated output on every checkpoint, turning an O(1) unit
//! completion into O(total translated so far) and putting megabytes of
//! finished work at risk from a single torn write. Separate unit files make
//! each checkpoint a small independent write, and the progress record stays
//! a few hundred bytes of indices and metadata.
//!
//! Unit files are immutable once written and owned exclusively by the
//! Transform Runner for the duration of the job; everything is deleted
//! together after a successful merge.

use crate::lang::Lang;
use crate::paths::{translation_progress_file, unit_file};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// Resume metadata for one translation job: which units are done, plus the
/// cached domain so resume skips the detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationProgress {
    pub total_units: usize,
    /// Sorted set of completed indices; invariant: every id < `total_units`.
    pub completed_unit_ids: BTreeSet<usize>,
    pub domain: String,
    pub model: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl TranslationProgress {
    pub fn new(
        total_units: usize,
        domain: impl Into<String>,
        model: impl Into<String>,
        source: Lang,
        target: Lang,
    ) -> Self {
        Self {
            total_units,
            completed_unit_ids: BTreeSet::new(),
            domain: domain.into(),
            model: model.into(),
            source_lang: source.code().to_string(),
            target_lang: target.code().to_string(),
        }
    }

    /// Record integrity: ids within range.
    fn is_well_formed(&self) -> bool {
        self.completed_unit_ids
            .iter()
            .all(|&id| id < self.total_units)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_unit_ids.len() == self.total_units
    }

    /// Percentage of units completed, 0–100.
    pub fn percent(&self) -> u8 {
        if self.total_units == 0 {
            return 0;
        }
        ((self.completed_unit_ids.len() * 100) / self.total_units) as u8
    }
}

/// Persist the progress record. Best-effort: a lost write costs one unit of
/// redone work on resume, not the job.
pub fn save_progress(target_dir: &Path, lang: Lang, progress: &TranslationProgress) {
    if let Err(e) = std::fs::create_dir_all(target_dir) {
        warn!("Failed to create translation dir {}: {e}", target_dir.display());
        return;
    }
    let path = translation_progress_file(target_dir, lang.code());
    match serde_json::to_string_pretty(progress) {
        Ok(json) => {
            if let Err(e) = std::fs::write(&path, json) {
                warn!("Failed to write translation progress {}: {e}", path.display());
            }
        }
        Err(e) => warn!("Failed to serialize translation progress: {e}"),
    }
}

/// Load the progress record, discarding anything malformed or out-of-range.
pub fn load_progress(target_dir: &Path, lang: Lang) -> Option<TranslationProgress> {
    let path = translation_progress_file(target_dir, lang.code());
    let content = std::fs::read_to_string(&path).ok()?;
    let progress: TranslationProgress = match serde_json::from_str(&content) {
        Ok(p) => p,
        Err(e) => {
            warn!("Discarding unreadable translation progress {}: {e}", path.display());
            return None;
        }
    };
    if !progress.is_well_formed() {
        warn!(
            "Discarding translation progress with out-of-range unit ids in {}",
            path.display()
        );
        return None;
    }
    Some(progress)
}

/// Remove the progress record.
pub fn clear_progress(target_dir: &Path, lang: Lang) {
    let path = translation_progress_file(target_dir, lang.code());
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Failed to remove translation progress {}: {e}", path.display());
        }
    }
}

/// Write one unit's validated output to its checkpoint file.
pub fn save_unit(target_dir: &Path, index: usize, content: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(target_dir)?;
    std::fs::write(unit_file(target_dir, index), content)
}

/// Read one unit's checkpoint, if present.
pub fn load_unit(target_dir: &Path, index: usize) -> Option<String> {
    std::fs::read_to_string(unit_file(target_dir, index)).ok()
}

/// Delete all unit checkpoint files after a successful merge (or when
/// discarding corrupt state).
pub fn cleanup_units(target_dir: &Path, total_units: usize) {
    for i in 0..total_units {
        let path = unit_file(target_dir, i);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove unit checkpoint {}: {e}", path.display());
            }
        }
    }
}

/// Current translation progress percentage for pollers, from the record
/// alone — cheap enough to call on every status request.
pub fn progress_percent(target_dir: &Path, lang: Lang) -> u8 {
    load_progress(target_dir, lang)
        .map(|p| p.percent())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(total: usize) -> TranslationProgress {
        TranslationProgress::new(total, "computer science", "gpt-4o-mini", Lang::En, Lang::Zh)
    }

    #[test]
    fn progress_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut p = sample(4);
        p.completed_unit_ids.insert(0);
        p.completed_unit_ids.insert(2);

        save_progress(dir.path(), Lang::Zh, &p);
        let loaded = load_progress(dir.path(), Lang::Zh).unwrap();
        assert_eq!(loaded, p);
        assert_eq!(loaded.percent(), 50);
    }

    #[test]
    fn out_of_range_ids_discard_record() {
        let dir = TempDir::new().unwrap();
        let mut p = sample(2);
        p.completed_unit_ids.insert(5); // invariant violation
        save_progress(dir.path(), Lang::Zh, &p);
        assert!(load_progress(dir.path(), Lang::Zh).is_none());
    }

    #[test]
    fn malformed_record_discarded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            translation_progress_file(dir.path(), "zh"),
            "{not json",
        )
        .unwrap();
        assert!(load_progress(dir.path(), Lang::Zh).is_none());
    }

    #[test]
    fn unit_round_trip_and_cleanup() {
        let dir = TempDir::new().unwrap();
        save_unit(dir.path(), 0, "第一单元").unwrap();
        save_unit(dir.path(), 1, "第二单元").unwrap();

        assert_eq!(load_unit(dir.path(), 0).as_deref(), Some("第一单元"));
        assert_eq!(load_unit(dir.path(), 1).as_deref(), Some("第二单元"));
        assert!(load_unit(dir.path(), 2).is_none());

        cleanup_units(dir.path(), 2);
        assert!(load_unit(dir.path(), 0).is_none());
        assert!(load_unit(dir.path(), 1).is_none());
    }

    #[test]
    fn percent_of_empty_record_is_zero() {
        assert_eq!(sample(0).percent(), 0);
        let dir = TempDir::new().unwrap();
        assert_eq!(progress_percent(dir.path(), Lang::Zh), 0);
    }

    #[test]
    fn complete_detection() {
        let mut p = sample(2);
        assert!(!p.is_complete());
        p.completed_unit_ids.insert(0);
        p.completed_unit_ids.insert(1);
        assert!(p.is_complete());
    }
}
