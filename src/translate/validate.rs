//! Output validation for translated units.
//!
//! Two failure modes are caught here, both observed in production traffic
//! from instruction-following models:
//!
//! 1. **Instruction leakage** — the model echoes part of its own system
//!    instruction instead of (or mixed into) the translation.
//! 2. **Wrong output language** — the model answers in the source language,
//!    typically on units dominated by proper nouns or code.
//!
//! Code- and table-heavy units are exempt from the language check: code is
//! language-agnostic, so a unit that is mostly fenced blocks and pipe tables
//! legitimately "detects" as the wrong language.

use crate::lang::{detect_language, Lang};
use crate::prompts::INSTRUCTION_LEAK_FRAGMENTS;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// Markup that makes a unit exempt from language detection: fenced code
/// blocks, inline code spans, and table rows.
static RE_CODE_MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```|`[^`\n]+`|\|[^\n]*\|").unwrap());

/// Fraction of the output covered by code/table markup above which the
/// language check is skipped.
const CODE_EXEMPTION_RATIO: f64 = 0.1;

/// Validate one transformed unit against the requested target language.
///
/// Returns `false` when the output leaked instruction text or is in the
/// wrong language (and is not code-exempt). The caller retries on `false`
/// and degrade-accepts after the retry budget is spent.
pub fn validate_output(output: &str, target: Lang) -> bool {
    for fragment in INSTRUCTION_LEAK_FRAGMENTS {
        if output.contains(fragment) {
            warn!("Validation failed: instruction fragment '{fragment}' found in output");
            return false;
        }
    }

    let detected = detect_language(output);
    if detected != target && code_markup_ratio(output) < CODE_EXEMPTION_RATIO {
        warn!(
            "Validation failed: expected {} output, detected {}",
            target.code(),
            detected.code()
        );
        return false;
    }

    true
}

/// Bytes matched by code/table markup divided by total length.
fn code_markup_ratio(output: &str) -> f64 {
    if output.is_empty() {
        return 0.0;
    }
    let matched: usize = RE_CODE_MARKUP
        .find_iter(output)
        .map(|m| m.len())
        .sum();
    matched as f64 / output.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_correct_language() {
        assert!(validate_output("这是一个关于机器学习的章节。", Lang::Zh));
        assert!(validate_output("A chapter about machine learning.", Lang::En));
    }

    #[test]
    fn rejects_wrong_language() {
        assert!(!validate_output(
            "This text was supposed to be translated into Chinese but was not.",
            Lang::Zh
        ));
    }

    #[test]
    fn rejects_instruction_leakage() {
        let leaked = "翻译内容\n\n# Critical Requirements\n1. Output Language...";
        assert!(!validate_output(leaked, Lang::Zh));

        let leaked = "好的。Keep ALL markdown formatting exactly as-is.";
        assert!(!validate_output(leaked, Lang::Zh));
    }

    #[test]
    fn code_heavy_output_is_exempt_from_language_check() {
        // Mostly a fenced block: "wrong" detected language is fine.
        let output = "```rust\nfn main() { println!(\"hello world from rust\"); }\nlet x = compute_the_value();\n```\n好";
        assert!(validate_output(output, Lang::Zh));
    }

    #[test]
    fn table_heavy_output_is_exempt() {
        let output = "| name | value |\n| --- | --- |\n| alpha | 1 |\n| beta | 2 |\n| gamma | 3 |\n表";
        assert!(validate_output(output, Lang::Zh));
    }

    #[test]
    fn leakage_beats_code_exemption() {
        // Instruction leakage is rejected even in code-heavy output.
        let output = "```\nMarkdown Preservation\n```";
        assert!(!validate_output(output, Lang::Zh));
    }

    #[test]
    fn ratio_of_empty_is_zero() {
        assert_eq!(code_markup_ratio(""), 0.0);
    }

    #[test]
    fn prose_has_low_markup_ratio() {
        let prose = "An ordinary paragraph of English prose with no markup whatsoever in it.";
        assert!(code_markup_ratio(prose) < CODE_EXEMPTION_RATIO);
    }
}
