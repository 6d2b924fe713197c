//! The Segmenter: split content into bounded-size units along structural
//! boundaries.
//!
//! ## Splitting strategy
//!
//! 1. Content that already fits the limit is one unit — untouched.
//! 2. Otherwise split at top-level heading boundaries (a blank line followed
//!    by a `# ` line). Small sections are merged back together; a section
//!    that alone exceeds the limit is re-split at paragraph boundaries.
//! 3. Paragraphs are packed greedily into units up to the limit. A single
//!    paragraph larger than the limit stays whole as its own oversized unit:
//!    cutting inside a paragraph (or worse, inside a code fence) corrupts
//!    structure, and downstream models handle a single oversized input
//!    better than they handle broken markdown.
//!
//! ## Reconstruction invariant
//!
//! Every join in this module — sections into units, paragraphs into units,
//! and units back into a document at merge time — uses the same `"\n\n"`
//! separator that the split consumed. For well-formed input (headings
//! preceded by a blank line) re-joining all units therefore reproduces the
//! original content byte-for-byte, which is what makes per-unit
//! checkpointing safe: no content is lost or invented at unit boundaries.

/// Separator consumed at every split point and re-inserted at every join.
pub const UNIT_SEPARATOR: &str = "\n\n";

/// Split `content` into units of at most `max_chars` bytes (best effort —
/// see the oversized-paragraph rule above).
pub fn segment(content: &str, max_chars: usize) -> Vec<String> {
    if content.len() <= max_chars {
        return vec![content.to_string()];
    }

    let sections = split_sections(content);
    if sections.len() > 1 {
        merge_and_split_sections(&sections, max_chars)
    } else {
        merge_paragraphs(content.split(UNIT_SEPARATOR), max_chars)
    }
}

/// Split at `"\n\n# "` boundaries, consuming the blank line.
///
/// Each piece after the first starts with `"# "`; joining all pieces with
/// [`UNIT_SEPARATOR`] reconstructs the input exactly.
fn split_sections(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut sections = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i + 4 <= bytes.len() {
        if &bytes[i..i + 4] == b"\n\n# " {
            sections.push(&content[start..i]);
            start = i + 2; // skip the blank line, keep "# "
            i = start;
        } else {
            i += 1;
        }
    }
    sections.push(&content[start..]);
    sections
}

/// Merge small sections into shared units; re-split oversized ones.
fn merge_and_split_sections(sections: &[&str], max_chars: usize) -> Vec<String> {
    let mut units: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_has_content = false;

    for section in sections {
        if section.len() > max_chars {
            if current_has_content {
                units.push(std::mem::take(&mut current));
                current_has_content = false;
            }
            units.extend(merge_paragraphs(section.split(UNIT_SEPARATOR), max_chars));
        } else if current_has_content
            && current.len() + UNIT_SEPARATOR.len() + section.len() > max_chars
        {
            units.push(std::mem::take(&mut current));
            current.push_str(section);
        } else {
            if current_has_content {
                current.push_str(UNIT_SEPARATOR);
            }
            current.push_str(section);
            current_has_content = true;
        }
    }

    if current_has_content {
        units.push(current);
    }
    units
}

/// Pack paragraphs greedily into units up to `max_chars`.
fn merge_paragraphs<'a>(paragraphs: impl Iterator<Item = &'a str>, max_chars: usize) -> Vec<String> {
    let mut units: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_has_content = false;

    for para in paragraphs {
        if para.len() > max_chars {
            // Oversized paragraph: keep it whole rather than corrupt it.
            if current_has_content {
                units.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            current_has_content = false;
            units.push(para.to_string());
        } else if current_has_content
            && current.len() + UNIT_SEPARATOR.len() + para.len() > max_chars
        {
            units.push(std::mem::take(&mut current));
            current.push_str(para);
        } else {
            if current_has_content {
                current.push_str(UNIT_SEPARATOR);
            }
            current.push_str(para);
            current_has_content = true;
        }
    }

    if current_has_content || !current.is_empty() {
        units.push(current);
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejoin(units: &[String]) -> String {
        units.join(UNIT_SEPARATOR)
    }

    #[test]
    fn content_within_limit_is_one_unit() {
        let content = "# Title\n\nShort body.";
        let units = segment(content, 1000);
        assert_eq!(units, vec![content.to_string()]);
    }

    #[test]
    fn exactly_at_limit_is_one_unit() {
        let content = "a".repeat(64);
        assert_eq!(segment(&content, 64).len(), 1);
    }

    #[test]
    fn splits_on_top_level_headings() {
        let content = format!(
            "# One\n\n{}\n\n# Two\n\n{}\n\n# Three\n\n{}",
            "a".repeat(60),
            "b".repeat(60),
            "c".repeat(60)
        );
        let units = segment(&content, 80);
        assert!(units.len() >= 3, "expected one unit per section, got {units:?}");
        assert!(units[1..].iter().all(|u| u.starts_with("# ")));
    }

    #[test]
    fn rejoined_units_reconstruct_input_exactly() {
        let content = format!(
            "Preamble before any heading.\n\n# Alpha\n\nBody {}\n\npara two\n\n# Beta\n\nBody {}\n\n# Gamma\n\nTail.",
            "x".repeat(100),
            "y".repeat(100)
        );
        let units = segment(&content, 90);
        assert!(units.len() > 1);
        assert_eq!(rejoin(&units), content, "byte-for-byte reconstruction");
    }

    #[test]
    fn reconstruction_survives_paragraph_fallback() {
        // No headings at all — pure paragraph packing.
        let paras: Vec<String> = (0..20).map(|i| format!("paragraph {i} {}", "z".repeat(30))).collect();
        let content = paras.join("\n\n");
        let units = segment(&content, 100);
        assert!(units.len() > 1);
        assert_eq!(rejoin(&units), content);
    }

    #[test]
    fn small_sections_are_merged() {
        let content = format!(
            "# A\n\nshort\n\n# B\n\nshort\n\n# C\n\n{}",
            "d".repeat(200)
        );
        let units = segment(&content, 100);
        // A and B fit together in one unit; C's body is split out.
        assert!(units[0].contains("# A"));
        assert!(units[0].contains("# B"));
    }

    #[test]
    fn oversized_paragraph_kept_whole() {
        let big = "w".repeat(500);
        let content = format!("small one\n\n{big}\n\nsmall two");
        let units = segment(&content, 100);
        assert!(
            units.iter().any(|u| u == &big),
            "oversized paragraph must be its own unit, unsplit"
        );
        assert_eq!(rejoin(&units), content);
    }

    #[test]
    fn oversized_section_resplit_by_paragraphs() {
        let body: Vec<String> = (0..10).map(|i| format!("sentence {i} {}", "q".repeat(40))).collect();
        let content = format!("# Big\n\n{}", body.join("\n\n"));
        let units = segment(&content, 120);
        assert!(units.len() > 2);
        assert!(units.iter().all(|u| u.len() <= 120 || !u.contains("\n\n")));
        assert_eq!(rejoin(&units), content);
    }

    #[test]
    fn hash_inside_line_is_not_a_boundary() {
        let content = format!(
            "Text with a # character inline\n\nand ## second-level\n\n# Real\n\n{}",
            "m".repeat(150)
        );
        let units = segment(&content, 100);
        assert_eq!(rejoin(&units), content);
        // The "## second-level" line must not start a unit.
        assert!(!units.iter().any(|u| u.starts_with("## ")));
    }
}
