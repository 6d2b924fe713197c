//! Line-oriented OCR stage/progress parser.
//!
//! The extraction engine reports progress as console lines of the form
//! `Stage Name:  42%|████      | 21/50 [00:12<00:17]`. Each known stage owns
//! a band of the overall 0–100 job range, so "Recognizing Text at 30/50"
//! maps to a single overall percentage the Progress Store can record.
//!
//! Text scraping is the fallback protocol: an engine that exposes a real
//! progress callback should be wired straight to the Progress Store instead.
//! The parser is a standalone struct precisely so that swap stays local.

use once_cell::sync::Lazy;
use regex::Regex;

/// One engine stage and the band of overall progress it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpan {
    pub name: &'static str,
    pub start: u8,
    pub end: u8,
}

/// The known engine stages, in pipeline order.
///
/// The 0–25 band is reserved for engine startup (model loading) and 85–100
/// for the save/split steps the worker itself reports.
pub const STAGE_SPANS: &[StageSpan] = &[
    StageSpan { name: "Recognizing Layout", start: 25, end: 45 },
    StageSpan { name: "Running OCR", start: 45, end: 55 },
    StageSpan { name: "Detecting bboxes", start: 55, end: 65 },
    StageSpan { name: "Recognizing Text", start: 65, end: 75 },
    StageSpan { name: "Recognizing tables", start: 75, end: 85 },
];

static RE_PROGRESS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^:]+):\s*(\d+)%\|[^|]*\|\s*(\d+)/(\d+)").unwrap());

/// A parsed progress update, already mapped into the overall job range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageUpdate {
    pub stage: &'static str,
    /// Overall job percentage (within the stage's span).
    pub percent: u8,
    pub current: u64,
    pub total: u64,
}

impl StageUpdate {
    /// Progress-record message for this update.
    pub fn message(&self) -> String {
        format!("{}: {}/{}", self.stage, self.current, self.total)
    }
}

/// Stateful parser for the engine's output lines.
///
/// Throttles record writes: an update is only emitted every 5 items (or at
/// stage completion), because a 2000-item stage would otherwise rewrite the
/// progress file 2000 times for no observable benefit.
#[derive(Debug, Default)]
pub struct StageParser {
    last_percent: u8,
}

impl StageParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one output line; returns an update when the line is a progress
    /// line for a known stage and passes the write throttle.
    pub fn parse_line(&mut self, line: &str) -> Option<StageUpdate> {
        let caps = RE_PROGRESS_LINE.captures(line)?;
        let stage_name = caps.get(1)?.as_str().trim();
        let current: u64 = caps.get(3)?.as_str().parse().ok()?;
        let total: u64 = caps.get(4)?.as_str().parse().ok()?;

        let span = STAGE_SPANS
            .iter()
            .find(|s| stage_name.contains(s.name))?;

        if total == 0 {
            return None;
        }
        if current % 5 != 0 && current != total {
            return None;
        }

        let fraction = current as f64 / total as f64;
        let percent =
            (span.start as f64 + fraction * (span.end - span.start) as f64) as u8;

        // Progress within one run never regresses, even if the engine
        // re-prints an earlier stage's line.
        if percent < self.last_percent {
            return None;
        }
        self.last_percent = percent;

        Some(StageUpdate {
            stage: span.name,
            percent,
            current,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_stage_line() {
        let mut p = StageParser::new();
        let u = p
            .parse_line("Recognizing Layout:  20%|██        | 10/50 [00:05<00:20]")
            .expect("should parse");
        assert_eq!(u.stage, "Recognizing Layout");
        assert_eq!(u.current, 10);
        assert_eq!(u.total, 50);
        // 25 + 0.2 * 20 = 29
        assert_eq!(u.percent, 29);
        assert_eq!(u.message(), "Recognizing Layout: 10/50");
    }

    #[test]
    fn stage_completion_maps_to_span_end() {
        let mut p = StageParser::new();
        let u = p
            .parse_line("Recognizing tables: 100%|██████████| 8/8 [00:30<00:00]")
            .unwrap();
        assert_eq!(u.percent, 85);
    }

    #[test]
    fn throttles_off_interval_counts() {
        let mut p = StageParser::new();
        assert!(p.parse_line("Running OCR:  6%|          | 3/50").is_none());
        assert!(p.parse_line("Running OCR: 10%|█         | 5/50").is_some());
    }

    #[test]
    fn final_item_always_emitted() {
        let mut p = StageParser::new();
        // 7/7 is not divisible by 5 but is the completion line.
        assert!(p.parse_line("Detecting bboxes: 100%|███| 7/7").is_some());
    }

    #[test]
    fn unknown_stage_is_ignored() {
        let mut p = StageParser::new();
        assert!(p.parse_line("Downloading weights:  50%|█████     | 5/10").is_none());
    }

    #[test]
    fn non_progress_lines_are_ignored() {
        let mut p = StageParser::new();
        assert!(p.parse_line("").is_none());
        assert!(p.parse_line("loading model shards...").is_none());
        assert!(p.parse_line("warning: ratio 3/4 exceeded").is_none());
    }

    #[test]
    fn progress_never_regresses() {
        let mut p = StageParser::new();
        p.parse_line("Recognizing Text:  50%|█████     | 25/50").unwrap();
        // A stray re-print of an earlier stage must not roll progress back.
        assert!(p
            .parse_line("Recognizing Layout:  20%|██        | 10/50")
            .is_none());
    }

    #[test]
    fn zero_total_is_ignored() {
        let mut p = StageParser::new();
        assert!(p.parse_line("Running OCR: 0%|          | 0/0").is_none());
    }
}
