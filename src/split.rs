//! Chapter splitter: divide a markdown document into per-chapter files at
//! top-level headings.
//!
//! Output files are named `NN_<sanitized-heading>.md` — the numeric prefix
//! preserves reading order for directory listings, and the sanitized heading
//! keeps the files human-navigable. Content before the first top-level
//! heading (front matter, OCR preamble) is not emitted as a chapter.

use crate::error::BookmillError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::info;

static RE_TOP_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s+").unwrap());

/// Characters a heading must shed to become a portable file name.
static RE_FILENAME_INVALID: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());

/// Maximum kept length of the heading part of a chapter file name.
const MAX_FILENAME_CHARS: usize = 100;

/// Parse content into `(heading, section)` pairs split at top-level
/// headings. Each section includes its heading line.
pub fn parse_sections(content: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut current_heading: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();

    for line in content.lines() {
        if RE_TOP_HEADING.is_match(line) {
            if let Some(heading) = current_heading.take() {
                sections.push((heading, current_lines.join("\n")));
                current_lines.clear();
            }
            current_heading = Some(line.trim_start_matches('#').trim().to_string());
            current_lines.push(line);
        } else if current_heading.is_some() {
            current_lines.push(line);
        }
        // Lines before the first heading are preamble; skipped.
    }

    if let Some(heading) = current_heading {
        sections.push((heading, current_lines.join("\n")));
    }

    sections
}

/// Convert heading text into a safe file name component.
pub fn sanitize_filename(text: &str) -> String {
    let cleaned = RE_FILENAME_INVALID.replace_all(text, "");
    let trimmed = cleaned.trim();
    trimmed.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Split the markdown file at `input` into numbered chapter files inside
/// `output_dir`. Returns the number of chapters written.
///
/// A document with no top-level headings produces zero chapters — callers
/// treat that as "nothing to split", not an error.
pub fn split_document(input: &Path, output_dir: &Path) -> Result<usize, BookmillError> {
    let content = std::fs::read_to_string(input).map_err(|e| BookmillError::ReadFailed {
        path: input.to_path_buf(),
        source: e,
    })?;

    std::fs::create_dir_all(output_dir).map_err(|e| BookmillError::OutputWriteFailed {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let sections = parse_sections(&content);
    if sections.is_empty() {
        info!("No top-level headings in {}; nothing to split", input.display());
        return Ok(0);
    }

    for (idx, (heading, section)) in sections.iter().enumerate() {
        let filename = format!("{:02}_{}.md", idx + 1, sanitize_filename(heading));
        let path = output_dir.join(filename);
        std::fs::write(&path, section).map_err(|e| BookmillError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;
    }

    info!("Split {} into {} chapters", input.display(), sections.len());
    Ok(sections.len())
}

/// Count the chapter files (`NN_*.md`) currently present in a directory.
///
/// Used by the reconciliation sweep to decide whether a job directory holds
/// usable output worth preserving.
pub fn count_chapters(dir: &Path) -> usize {
    static RE_CHAPTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}_.*\.md$").unwrap());
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| {
                    e.file_name()
                        .to_str()
                        .map(|n| RE_CHAPTER.is_match(n))
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_sections_at_top_level_headings() {
        let content = "preamble\n\n# One\nbody one\n\n# Two\nbody two";
        let sections = parse_sections(content);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "One");
        assert!(sections[0].1.starts_with("# One"));
        assert!(sections[0].1.contains("body one"));
        assert_eq!(sections[1].0, "Two");
    }

    #[test]
    fn second_level_headings_do_not_split() {
        let content = "# Main\ntext\n## Sub\nmore";
        let sections = parse_sections(content);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].1.contains("## Sub"));
    }

    #[test]
    fn no_headings_yields_no_sections() {
        assert!(parse_sections("just prose\nno headings").is_empty());
    }

    #[test]
    fn sanitize_strips_invalid_chars() {
        assert_eq!(sanitize_filename("What? A/B: \"test\"*"), "What AB test");
        assert_eq!(sanitize_filename("  第三章：模型  "), "第三章：模型");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_filename(&long).chars().count(), 100);
    }

    #[test]
    fn split_writes_numbered_files() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("book.md");
        std::fs::write(&input, "# Intro\nhello\n\n# Methods\nworld\n\n# End\nbye").unwrap();

        let out = dir.path().join("out");
        let count = split_document(&input, &out).unwrap();
        assert_eq!(count, 3);

        assert!(out.join("01_Intro.md").exists());
        assert!(out.join("02_Methods.md").exists());
        assert!(out.join("03_End.md").exists());

        let intro = std::fs::read_to_string(out.join("01_Intro.md")).unwrap();
        assert_eq!(intro, "# Intro\nhello\n");
        assert_eq!(count_chapters(&out), 3);
    }

    #[test]
    fn count_chapters_ignores_source_and_hidden_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("book.md"), "src").unwrap();
        std::fs::write(dir.path().join(".extract_progress.json"), "{}").unwrap();
        std::fs::write(dir.path().join("01_Intro.md"), "c").unwrap();
        assert_eq!(count_chapters(dir.path()), 1);
    }
}
