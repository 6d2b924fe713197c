//! Model instructions for translation and domain detection.
//!
//! Centralising every instruction here serves two purposes:
//!
//! 1. **Single source of truth** — tweaking the translation rules requires
//!    editing exactly one place.
//! 2. **Leak detection** — output validation rejects any response that
//!    echoes fragments of these instructions back (see
//!    [`crate::translate::validate`]); keeping the fragments and the
//!    instructions in the same module keeps them from drifting apart.

use crate::lang::Lang;

/// Build the system instruction for translating one content unit.
///
/// The instruction names the detected content domain so the model applies
/// field-appropriate terminology, and states the target language three
/// separate times — models drift back into the source language on long
/// inputs unless the requirement is repeated.
pub fn translation_system_prompt(domain: &str, source: Lang, target: Lang) -> String {
    let source_name = source.name();
    let target_name = target.name();
    format!(
        r#"# Role
You are a senior expert and professional translator in the field of **{domain}**.
You have deep knowledge of {domain} terminology and concepts.

# Task
Translate the following text from **{source_name}** to **{target_name}**.

# Critical Requirements
1. **Output Language**: Your translation MUST be in {target_name}. Do not output {source_name}.
2. **Domain Expertise**: Use accurate and professional {domain} terminology.
3. **Markdown Preservation**: Keep ALL markdown formatting exactly as-is:
   - Headers (# ## ###)
   - Lists (- * 1.)
   - Code blocks (```)
   - Links ([text](url))
   - Images (![](path)) - DO NOT modify image paths
4. **No Additions**: Output ONLY the translated text. No explanations, notes, or comments.
5. **Structure**: Maintain the original paragraph and section structure.

# Language Reminder
Source: {source_name} → Target: {target_name}
Your output must be entirely in {target_name}."#
    )
}

/// Build the user message carrying one content unit.
pub fn translation_user_prompt(source: Lang, target: Lang, unit: &str) -> String {
    format!(
        "Please translate the following {} text to {}:\n\n{}",
        source.name(),
        target.name(),
        unit
    )
}

/// Build the single-shot instruction for detecting a document's domain.
///
/// `sample` should be the first few thousand characters of the document —
/// enough to identify the field, cheap enough to run on every new job.
pub fn domain_detection_prompt(sample: &str) -> String {
    format!(
        r#"Analyze the following text and identify its primary domain/field.
Reply with ONLY the domain name in English (e.g., "computer science", "medicine", "business").
Do not include any other text.

Text sample:
{sample}

Domain:"#
    )
}

/// Instruction fragments that must never appear in a translation output.
///
/// A model that echoes its own instructions produces output containing these
/// strings; validation rejects such output and retries. The fragments are
/// chosen to be distinctive — ordinary translated prose will not contain
/// them — and must be kept in sync with [`translation_system_prompt`].
pub const INSTRUCTION_LEAK_FRAGMENTS: &[&str] = &[
    "Critical Requirements",
    "Markdown Preservation",
    "Keep ALL markdown formatting",
    "DO NOT modify image paths",
    "Output ONLY the translated text",
    "Language Reminder",
    "Your output must be entirely in",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_domain_and_languages() {
        let p = translation_system_prompt("computer science", Lang::En, Lang::Zh);
        assert!(p.contains("computer science"));
        assert!(p.contains("English"));
        assert!(p.contains("Chinese"));
    }

    #[test]
    fn leak_fragments_actually_appear_in_the_prompt() {
        // The whole point of the fragment list is to detect echoes of the
        // system prompt; each fragment must therefore occur in it.
        let p = translation_system_prompt("general", Lang::En, Lang::Zh);
        for fragment in INSTRUCTION_LEAK_FRAGMENTS {
            assert!(
                p.contains(fragment),
                "fragment '{fragment}' not found in system prompt"
            );
        }
    }

    #[test]
    fn user_prompt_carries_the_unit() {
        let p = translation_user_prompt(Lang::En, Lang::Zh, "# Title\n\nBody");
        assert!(p.ends_with("# Title\n\nBody"));
    }

    #[test]
    fn domain_prompt_embeds_sample() {
        let p = domain_detection_prompt("Quantum chromodynamics studies...");
        assert!(p.contains("Quantum chromodynamics"));
        assert!(p.contains("ONLY the domain name"));
    }
}
